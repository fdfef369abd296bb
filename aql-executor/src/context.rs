//! Per-query shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use aql_errors::{AqlError, AqlResult};
use aql_expression::{NoopScriptRuntime, ScriptRuntime};
use aql_storage::Transaction;

use crate::stats::{ExecutionStats, Warning};

/// State shared by every operator of one query: the transaction, the kill
/// flag, statistics counters and accumulated warnings.
///
/// Execution within one query is single-threaded, but the context is also
/// read from whatever thread serves a kill request, so the flag and the
/// counters are atomics.
pub struct QueryContext {
    /// The transaction the query executes under.
    pub trx: Arc<dyn Transaction>,
    /// Statistics counters.
    pub stats: ExecutionStats,
    /// The scripting runtime for expressions that need one.
    pub script_runtime: Arc<dyn ScriptRuntime>,
    /// Whether this engine runs as part of a cluster (affects expression
    /// invalidation and mutation error handling).
    pub cluster_mode: bool,
    killed: AtomicBool,
    warnings: Mutex<Vec<Warning>>,
}

impl QueryContext {
    /// Create a context for a single-server query.
    pub fn new(trx: Arc<dyn Transaction>) -> Arc<Self> {
        Arc::new(Self {
            trx,
            stats: ExecutionStats::default(),
            script_runtime: Arc::new(NoopScriptRuntime),
            cluster_mode: false,
            killed: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
        })
    }

    /// Create a context for an engine participating in a cluster.
    pub fn new_cluster(
        trx: Arc<dyn Transaction>,
        script_runtime: Arc<dyn ScriptRuntime>,
    ) -> Arc<Self> {
        Arc::new(Self {
            trx,
            stats: ExecutionStats::default(),
            script_runtime,
            cluster_mode: true,
            killed: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
        })
    }

    /// Mark the query as killed. Operators notice at their next block
    /// boundary.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// Whether the query was killed.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// The cancellation gate called at the start of every pull and between
    /// expensive loops.
    pub fn throw_if_killed(&self) -> AqlResult<()> {
        if self.is_killed() {
            return Err(AqlError::QueryKilled);
        }
        Ok(())
    }

    /// Attach a warning to the query.
    pub fn register_warning(&self, code: i32, message: impl Into<String>) {
        self.warnings
            .lock()
            .expect("warning list poisoned")
            .push(Warning {
                code,
                message: message.into(),
            });
    }

    /// All warnings registered so far.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().expect("warning list poisoned").clone()
    }
}

//! Cluster routing interfaces.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use aql_data::lookup_path;
use aql_errors::{AqlError, AqlResult};
use serde_json::Value as JsonValue;

/// Identifier of a shard, unique within a collection.
pub type ShardId = String;

/// Maps a document to the shard responsible for it.
pub trait ShardLocator: Send + Sync {
    /// The shard-key attribute paths of the target collection.
    fn shard_keys(&self) -> &[String];

    /// Whether the collection shards on `_key` only.
    fn uses_default_sharding(&self) -> bool {
        self.shard_keys() == ["_key"]
    }

    /// The shard responsible for the given document.
    fn responsible_shard(&self, document: &JsonValue) -> AqlResult<ShardId>;
}

/// Source of cluster-wide unique document keys.
pub trait KeyGenerator: Send + Sync {
    /// Produce a fresh key.
    fn generate(&self) -> String;
}

/// A [`ShardLocator`] hashing the shard-key attribute values over a fixed
/// shard list.
#[derive(Debug)]
pub struct HashShardLocator {
    shards: Vec<ShardId>,
    shard_keys: Vec<String>,
}

impl HashShardLocator {
    /// Create a locator over the given shards, sharding by the given
    /// attribute paths.
    pub fn new(shards: Vec<ShardId>, shard_keys: Vec<String>) -> Self {
        Self { shards, shard_keys }
    }
}

impl ShardLocator for HashShardLocator {
    fn shard_keys(&self) -> &[String] {
        &self.shard_keys
    }

    fn responsible_shard(&self, document: &JsonValue) -> AqlResult<ShardId> {
        if self.shards.is_empty() {
            return Err(AqlError::Internal {
                message: "shard locator has no shards".into(),
            });
        }
        let mut hasher = DefaultHasher::new();
        for key in &self.shard_keys {
            match lookup_path(document, key) {
                Some(v) => v.to_string().hash(&mut hasher),
                None => JsonValue::Null.to_string().hash(&mut hasher),
            }
        }
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        Ok(self.shards[idx].clone())
    }
}

/// A [`KeyGenerator`] handing out keys from a monotonically increasing
/// counter, the way the cluster's unique-id service does.
#[derive(Debug)]
pub struct SequentialKeyGenerator {
    next: AtomicU64,
}

impl SequentialKeyGenerator {
    /// Start generating at the given id.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialKeyGenerator {
    fn default() -> Self {
        Self::starting_at(100_000)
    }
}

impl KeyGenerator for SequentialKeyGenerator {
    fn generate(&self) -> String {
        self.next.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

//! The planned query the engine executes.
//!
//! A plan is an immutable description: one [`PlanNode`] per operator,
//! dependencies owned by their consumer, subquery roots owned by their
//! Subquery node, and a shared [`RegisterPlan`] assigning every variable a
//! `(depth, register)` slot. Execution state lives exclusively in the
//! operators instantiated from the plan (see [`crate::ops`]).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use aql_data::{CollectionId, RegisterId};
use aql_errors::{internal_err, AqlResult};
use aql_expression::Expression;
use aql_storage::{KeyGenerator, ShardId, ShardLocator};

use crate::ops::condition::RangeSpec;
use crate::ops::mutation::ModificationOptions;
use crate::transport::RemoteTransport;

/// Identifier of a plan variable.
pub type VariableId = usize;

/// Where a variable lives: the loop depth that introduced it and its
/// register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarInfo {
    /// Nesting level under FOR-like iterators.
    pub depth: usize,
    /// Assigned register id.
    pub register: RegisterId,
}

/// The register assignment computed once per plan and shared read-only by
/// all operators of a query.
#[derive(Clone, Debug, Default)]
pub struct RegisterPlan {
    /// Per-variable slot assignment.
    pub var_info: HashMap<VariableId, VarInfo>,
    /// Per-depth total register count (registers of all depths up to and
    /// including this one).
    pub nr_regs: Vec<usize>,
    /// Per-depth count of registers introduced at that depth.
    pub nr_regs_here: Vec<usize>,
}

impl RegisterPlan {
    /// An empty plan with a single depth.
    pub fn new() -> Self {
        Self {
            var_info: HashMap::new(),
            nr_regs: vec![0],
            nr_regs_here: vec![0],
        }
    }

    /// Assign the next register at `depth` to `variable`.
    ///
    /// Depths must be populated outside-in, the way a planner walks the
    /// query: increasing the depth opens a new frame on top of the previous
    /// one.
    pub fn add_variable(&mut self, variable: VariableId, depth: usize) -> RegisterId {
        while self.nr_regs.len() <= depth {
            let prev = *self.nr_regs.last().expect("starts non-empty");
            self.nr_regs.push(prev);
            self.nr_regs_here.push(0);
        }
        let register = self.nr_regs[depth];
        for d in depth..self.nr_regs.len() {
            self.nr_regs[d] += 1;
        }
        self.nr_regs_here[depth] += 1;
        self.var_info.insert(variable, VarInfo { depth, register });
        register
    }

    /// The register of a variable.
    pub fn register_of(&self, variable: VariableId) -> AqlResult<RegisterId> {
        self.var_info
            .get(&variable)
            .map(|i| i.register)
            .ok_or_else(|| internal_err!("no register assigned to variable {variable}"))
    }
}

/// One element of a sort specification: a register and its direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortElement {
    /// The register holding the sort key.
    pub register: RegisterId,
    /// True for ascending.
    pub ascending: bool,
}

/// The operator-specific part of a plan node.
#[derive(Clone)]
pub enum NodeParams {
    /// The plan leaf producing a single row.
    Singleton,
    /// Full collection scan.
    EnumerateCollection {
        /// Collection to scan.
        collection: CollectionId,
        /// Use the random scanner instead of the linear one.
        random: bool,
    },
    /// Iterate an array/range/docvec register value.
    EnumerateList {
        /// Register holding the value to iterate.
        in_reg: RegisterId,
    },
    /// Index-driven range access.
    IndexRange {
        /// Collection owning the index.
        collection: CollectionId,
        /// Index id, resolved through the transaction.
        index_id: String,
        /// Disjunction of conjunctions of per-attribute bounds.
        ranges: Vec<Vec<RangeSpec>>,
        /// Iterate in reverse index order.
        reverse: bool,
    },
    /// Keep rows whose condition register is truthy.
    Filter {
        /// Register holding the boolean computed upstream.
        in_reg: RegisterId,
    },
    /// Evaluate an expression per row into an output register.
    Calculation {
        /// The compiled expression.
        expression: Arc<dyn Expression>,
        /// Output register.
        out_reg: RegisterId,
        /// Optional guard: when falsy, write `null` without evaluating.
        condition_reg: Option<RegisterId>,
    },
    /// Run a subquery per input row, materializing its result into a
    /// register.
    Subquery {
        /// The subquery's root node.
        subquery: Box<PlanNode>,
        /// Output register.
        out_reg: RegisterId,
        /// Evaluate only for the first row and reuse the result
        /// (optimizer-asserted constant subqueries; off by default).
        is_const: bool,
    },
    /// Materialize and sort the entire input.
    Sort {
        /// Sort specification, most significant first.
        elements: Vec<SortElement>,
        /// Keep input order among equal keys.
        stable: bool,
    },
    /// Stream grouping over input pre-sorted on the group registers.
    Collect {
        /// Pairs of (output register, input register) for the group keys.
        group_registers: Vec<(RegisterId, RegisterId)>,
        /// `WITH COUNT INTO`: emit only the group size.
        count_only: bool,
        /// Register receiving the group result, if any.
        group_reg: Option<RegisterId>,
        /// `INTO g = expr`: collect this register's values instead of whole
        /// rows.
        expression_reg: Option<RegisterId>,
        /// Variables materialized per retained row, as (register, name).
        keep: Vec<(RegisterId, String)>,
    },
    /// Offset/count windowing.
    Limit {
        /// Rows to skip before emitting.
        offset: usize,
        /// Rows to emit.
        limit: usize,
        /// Keep draining the input after the window to count it.
        full_count: bool,
    },
    /// Strip all columns but the designated result column.
    ReturnRows {
        /// The result register.
        in_reg: RegisterId,
    },
    /// Produce nothing (plans proven empty).
    NoResults,
    /// Remove documents by key.
    Remove {
        /// Target collection.
        collection: CollectionId,
        /// Register holding the key or document.
        in_reg: RegisterId,
        /// Mutation behavior flags.
        options: ModificationOptions,
        /// Register receiving the removed document, if requested.
        out_reg: Option<RegisterId>,
    },
    /// Insert documents.
    Insert {
        /// Target collection.
        collection: CollectionId,
        /// Register holding the document.
        in_reg: RegisterId,
        /// Mutation behavior flags.
        options: ModificationOptions,
        /// Register receiving the inserted document, if requested.
        out_reg: Option<RegisterId>,
    },
    /// Patch documents.
    Update {
        /// Target collection.
        collection: CollectionId,
        /// Register holding the patch document.
        doc_reg: RegisterId,
        /// Separate key register, when the patch does not carry the key.
        key_reg: Option<RegisterId>,
        /// Mutation behavior flags.
        options: ModificationOptions,
        /// Register receiving the old or new document, if requested.
        out_reg: Option<RegisterId>,
    },
    /// Replace documents.
    Replace {
        /// Target collection.
        collection: CollectionId,
        /// Register holding the replacement document.
        doc_reg: RegisterId,
        /// Separate key register, when the document does not carry the key.
        key_reg: Option<RegisterId>,
        /// Mutation behavior flags.
        options: ModificationOptions,
        /// Register receiving the old or new document, if requested.
        out_reg: Option<RegisterId>,
    },
    /// Serve one input stream to N shard clients, each at its own pace.
    Scatter {
        /// The client shards, in client-id order.
        shards: Vec<ShardId>,
    },
    /// Route each input row to exactly one shard client.
    Distribute {
        /// The client shards, in client-id order.
        shards: Vec<ShardId>,
        /// Register holding the routed document.
        in_reg: RegisterId,
        /// Inject generated `_key`s where sharding requires them.
        create_keys: bool,
        /// The target collection's shard map.
        locator: Arc<dyn ShardLocator>,
        /// The cluster's unique-id service.
        key_generator: Arc<dyn KeyGenerator>,
    },
    /// Merge N input streams into one, optionally as a sorted merge.
    Gather {
        /// Merge-sort specification; empty for simple concatenation.
        elements: Vec<SortElement>,
    },
    /// Proxy the remainder of the plan to a peer engine.
    Remote {
        /// Base URL of the peer.
        server: String,
        /// Database name on the peer.
        vocbase: String,
        /// The peer-side query id.
        query_id: String,
        /// Shard bound to this operator, sent as `Shard-Id`.
        own_shard: Option<ShardId>,
        /// The transport requests go over.
        transport: Arc<dyn RemoteTransport>,
    },
}

/// One node of the plan DAG.
#[derive(Clone)]
pub struct PlanNode {
    /// Node id, unique within the plan.
    pub id: usize,
    /// Nesting depth under FOR-like iterators.
    pub depth: usize,
    /// Registers dead after this node; erased from every emitted block.
    pub regs_to_clear: HashSet<RegisterId>,
    /// Operator-specific parameters.
    pub params: NodeParams,
    /// Input nodes, in input order.
    pub dependencies: Vec<PlanNode>,
}

impl PlanNode {
    /// A node with no dead registers; dependencies attach via
    /// [`with_dependency`](Self::with_dependency).
    pub fn new(id: usize, depth: usize, params: NodeParams) -> Self {
        Self {
            id,
            depth,
            regs_to_clear: HashSet::new(),
            params,
            dependencies: Vec::new(),
        }
    }

    /// Attach an input node.
    pub fn with_dependency(mut self, dep: PlanNode) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Declare registers dead after this node.
    pub fn with_regs_to_clear(mut self, regs: impl IntoIterator<Item = RegisterId>) -> Self {
        self.regs_to_clear.extend(regs);
        self
    }
}

/// A visitor over the plan DAG. Dependencies are visited in input order;
/// descending into a subquery is a distinct step from following a
/// dependency.
pub trait PlanWalker {
    /// Called before a node's children; return true to skip the subtree.
    fn before(&mut self, _node: &PlanNode) -> bool {
        false
    }

    /// Called after a node's children.
    fn after(&mut self, _node: &PlanNode) {}

    /// Called before descending into a subquery; return false to skip it.
    fn enter_subquery(&mut self, _node: &PlanNode, _subquery: &PlanNode) -> bool {
        true
    }

    /// Called after a subquery has been visited.
    fn leave_subquery(&mut self, _node: &PlanNode, _subquery: &PlanNode) {}
}

impl PlanNode {
    /// Walk the subtree rooted at this node.
    pub fn walk(&self, walker: &mut dyn PlanWalker) {
        if walker.before(self) {
            return;
        }
        for dep in &self.dependencies {
            dep.walk(walker);
        }
        if let NodeParams::Subquery { subquery, .. } = &self.params {
            if walker.enter_subquery(self, subquery) {
                subquery.walk(walker);
                walker.leave_subquery(self, subquery);
            }
        }
        walker.after(self);
    }
}

/// A complete plan: the root node and the shared register assignment.
#[derive(Clone)]
pub struct ExecutionPlan {
    /// The root (final consumer) node.
    pub root: PlanNode,
    /// The register assignment.
    pub registers: Arc<RegisterPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assignment_accumulates_per_depth() {
        let mut plan = RegisterPlan::new();
        let a = plan.add_variable(1, 0);
        let b = plan.add_variable(2, 1);
        let c = plan.add_variable(3, 1);
        let d = plan.add_variable(4, 2);
        assert_eq!((a, b, c, d), (0, 1, 2, 3));
        assert_eq!(plan.nr_regs, vec![1, 3, 4]);
        assert_eq!(plan.nr_regs_here, vec![1, 2, 1]);
        assert_eq!(
            plan.var_info[&4],
            VarInfo {
                depth: 2,
                register: 3
            }
        );
    }

    #[test]
    fn walker_distinguishes_subqueries() {
        let sub_root = PlanNode::new(10, 0, NodeParams::Singleton);
        let node = PlanNode::new(
            1,
            0,
            NodeParams::Subquery {
                subquery: Box::new(sub_root),
                out_reg: 0,
                is_const: false,
            },
        )
        .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));

        #[derive(Default)]
        struct Recorder {
            order: Vec<String>,
        }
        impl PlanWalker for Recorder {
            fn before(&mut self, node: &PlanNode) -> bool {
                self.order.push(format!("before {}", node.id));
                false
            }
            fn enter_subquery(&mut self, _: &PlanNode, sub: &PlanNode) -> bool {
                self.order.push(format!("enter {}", sub.id));
                true
            }
            fn leave_subquery(&mut self, _: &PlanNode, sub: &PlanNode) {
                self.order.push(format!("leave {}", sub.id));
            }
            fn after(&mut self, node: &PlanNode) {
                self.order.push(format!("after {}", node.id));
            }
        }

        let mut rec = Recorder::default();
        node.walk(&mut rec);
        assert_eq!(
            rec.order,
            vec![
                "before 1", "before 0", "after 0", "enter 10", "before 10", "after 10",
                "leave 10", "after 1"
            ]
        );
    }
}

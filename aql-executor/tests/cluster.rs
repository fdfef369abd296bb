//! Cluster-operator scenarios: scatter fan-out, distribute routing,
//! sorted gather merge, and the Remote operator looped back onto a local
//! peer engine through the request handler.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aql_data::Value;
use aql_errors::AqlResult;
use aql_executor::api::ApiOperation;
use aql_executor::context::QueryContext;
use aql_executor::engine::ExecutionEngine;
use aql_executor::handler::handle_request;
use aql_executor::plan::{ExecutionPlan, NodeParams, PlanNode, RegisterPlan, SortElement};
use aql_executor::transport::{HttpMethod, RemoteTransport};
use aql_expression::Expr;
use aql_storage::cluster::{HashShardLocator, SequentialKeyGenerator};
use aql_storage::mem::MemoryEngine;
use aql_storage::ShardLocator;
use common::{build_engine, seed_collection};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};

/// singleton → calculation(list literal) → enumerate-list, yielding one
/// row per element in register 1.
fn list_stream(first_id: usize, list: JsonValue, list_reg: usize) -> PlanNode {
    let bind = PlanNode::new(first_id + 1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(list)),
        out_reg: list_reg,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(first_id, 0, NodeParams::Singleton));
    PlanNode::new(first_id + 2, 1, NodeParams::EnumerateList { in_reg: list_reg })
        .with_dependency(bind)
}

fn stream_registers() -> (RegisterPlan, usize, usize) {
    let mut regs = RegisterPlan::new();
    let list = regs.add_variable(0, 0);
    let item = regs.add_variable(1, 1);
    (regs, list, item)
}

/// Drain one scatter/distribute client, materializing `reg` per row.
fn drain_client(engine: &mut ExecutionEngine, shard: &str, reg: usize) -> Vec<JsonValue> {
    let mut out = Vec::new();
    while let Some(block) = engine
        .root_mut()
        .get_some_for_client(1, 3, shard)
        .expect("get_some_for_client")
    {
        for row in 0..block.len() {
            out.push(block.value(row, reg).materialize(block.collection(reg)));
        }
    }
    out
}

#[test]
fn scatter_serves_every_client_the_full_stream() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();
    let input: Vec<JsonValue> = (0..10).map(JsonValue::from).collect();
    let root = PlanNode::new(3, 1, NodeParams::Scatter {
        shards: vec!["s1".into(), "s2".into()],
    })
    .with_dependency(list_stream(0, JsonValue::Array(input.clone()), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);

    // interleave the two clients at different paces
    let mut got1 = Vec::new();
    let mut got2 = Vec::new();
    loop {
        let b1 = engine.root_mut().get_some_for_client(1, 3, "s1").unwrap();
        let b2 = engine.root_mut().get_some_for_client(1, 2, "s2").unwrap();
        if let Some(b) = &b1 {
            for row in 0..b.len() {
                got1.push(b.value(row, item).materialize(None));
            }
        }
        if let Some(b) = &b2 {
            for row in 0..b.len() {
                got2.push(b.value(row, item).materialize(None));
            }
        }
        if b1.is_none() && b2.is_none() {
            break;
        }
    }

    assert_eq!(got1, input);
    assert_eq!(got2, input);
    assert!(!engine
        .root_mut()
        .has_more_for_client("s1")
        .unwrap());
}

// a block buffered by one client's tiny request must not cap another
// client's lower batch bound
#[test]
fn scatter_meets_lower_bounds_across_buffered_blocks() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();
    let input: Vec<JsonValue> = (0..10).map(JsonValue::from).collect();
    let root = PlanNode::new(3, 1, NodeParams::Scatter {
        shards: vec!["s1".into(), "s2".into()],
    })
    .with_dependency(list_stream(0, JsonValue::Array(input.clone()), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);

    let rows_of = |block: &aql_data::ItemBlock| -> Vec<JsonValue> {
        (0..block.len())
            .map(|row| block.value(row, item).materialize(None))
            .collect()
    };

    // a one-row pull by s1 leaves a one-row block in the shared buffer
    let first = engine
        .root_mut()
        .get_some_for_client(1, 1, "s1")
        .unwrap()
        .expect("input not exhausted");
    assert_eq!(first.len(), 1);
    let mut got1 = rows_of(&first);

    // s2's lower bound must be met by pulling past that leftover block
    let second = engine
        .root_mut()
        .get_some_for_client(5, 1000, "s2")
        .unwrap()
        .expect("input not exhausted");
    assert!(
        second.len() >= 5,
        "got {} rows for at_least 5",
        second.len()
    );
    let mut got2 = rows_of(&second);

    got1.extend(drain_client(&mut engine, "s1", item));
    got2.extend(drain_client(&mut engine, "s2", item));
    assert_eq!(got1, input);
    assert_eq!(got2, input);
}

#[test]
fn distribute_routes_each_row_to_exactly_one_client() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();
    let input: Vec<JsonValue> = (0..20).map(|i| json!({"_key": format!("k{i}")})).collect();

    let locator = Arc::new(HashShardLocator::new(
        vec!["s1".into(), "s2".into(), "s3".into()],
        vec!["_key".into()],
    ));
    let root = PlanNode::new(3, 1, NodeParams::Distribute {
        shards: vec!["s1".into(), "s2".into(), "s3".into()],
        in_reg: item,
        create_keys: false,
        locator: Arc::clone(&locator) as Arc<dyn ShardLocator>,
        key_generator: Arc::new(SequentialKeyGenerator::default()),
    })
    .with_dependency(list_stream(0, JsonValue::Array(input.clone()), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);

    let mut seen = Vec::new();
    for shard in ["s1", "s2", "s3"] {
        for doc in drain_client(&mut engine, shard, item) {
            // the receiving client is the one the shard map names
            assert_eq!(locator.responsible_shard(&doc).unwrap(), shard);
            seen.push(doc);
        }
    }
    seen.sort_by(|a, b| aql_data::compare_json(a, b));
    let mut expected = input;
    expected.sort_by(|a, b| aql_data::compare_json(a, b));
    assert_eq!(seen, expected);
}

#[test]
fn distribute_injects_generated_keys() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();
    let input: Vec<JsonValue> = (0..4).map(|i| json!({"v": i})).collect();

    let root = PlanNode::new(3, 1, NodeParams::Distribute {
        shards: vec!["s1".into(), "s2".into()],
        in_reg: item,
        create_keys: true,
        locator: Arc::new(HashShardLocator::new(
            vec!["s1".into(), "s2".into()],
            vec!["_key".into()],
        )),
        key_generator: Arc::new(SequentialKeyGenerator::starting_at(7000)),
    })
    .with_dependency(list_stream(0, JsonValue::Array(input), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);

    let mut docs = Vec::new();
    for shard in ["s1", "s2"] {
        docs.extend(drain_client(&mut engine, shard, item));
    }
    assert_eq!(docs.len(), 4);
    for doc in docs {
        let key = doc["_key"].as_str().expect("generated key");
        assert!(key.parse::<u64>().expect("numeric key") >= 7000);
    }
}

// two shards produce already-sorted streams; sorted Gather merges them
#[test]
fn s6_sorted_gather_merge() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();

    let root = PlanNode::new(6, 1, NodeParams::Gather {
        elements: vec![SortElement {
            register: item,
            ascending: true,
        }],
    })
    .with_dependency(list_stream(0, json!([1, 3, 5]), list))
    .with_dependency(list_stream(3, json!([2, 4, 6]), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);

    let mut merged = Vec::new();
    while let Some(block) = engine.get_some(1, 4).unwrap() {
        for row in 0..block.len() {
            merged.push(block.value(row, item).materialize(None));
        }
    }
    assert_eq!(
        merged,
        vec![json!(1), json!(2), json!(3), json!(4), json!(5), json!(6)]
    );
}

// leftover queued rows from a small pull are not enough for a larger
// lower bound; the merge must re-pull its inputs
#[test]
fn sorted_gather_meets_lower_bounds_with_leftover_blocks() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();

    let root = PlanNode::new(6, 1, NodeParams::Gather {
        elements: vec![SortElement {
            register: item,
            ascending: true,
        }],
    })
    .with_dependency(list_stream(0, json!([1, 3, 5, 7, 9, 11, 13, 15, 17, 19]), list))
    .with_dependency(list_stream(3, json!([2, 4, 6, 8, 10, 12, 14, 16, 18, 20]), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);

    // a small pull leaves each input's queue with an unconsumed row
    let first = engine.get_some(1, 2).unwrap().expect("input not exhausted");
    let mut merged: Vec<JsonValue> = (0..first.len())
        .map(|row| first.value(row, item).materialize(None))
        .collect();
    assert_eq!(merged, vec![json!(1), json!(2)]);

    // the next call's lower bound exceeds the leftovers
    let second = engine.get_some(6, 1000).unwrap().expect("input not exhausted");
    assert!(
        second.len() >= 6,
        "got {} rows for at_least 6",
        second.len()
    );
    for row in 0..second.len() {
        merged.push(second.value(row, item).materialize(None));
    }

    while let Some(block) = engine.get_some(1, 1000).unwrap() {
        for row in 0..block.len() {
            merged.push(block.value(row, item).materialize(None));
        }
    }
    let expected: Vec<JsonValue> = (1..=20).map(JsonValue::from).collect();
    assert_eq!(merged, expected);
}

#[test]
fn simple_gather_concatenates_inputs() {
    let mem = MemoryEngine::new();
    let (regs, list, item) = stream_registers();

    let root = PlanNode::new(6, 1, NodeParams::Gather { elements: vec![] })
        .with_dependency(list_stream(0, json!([1, 2]), list))
        .with_dependency(list_stream(3, json!([3, 4]), list));

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let mut out = Vec::new();
    while let Some(block) = engine.get_some(1, 10).unwrap() {
        for row in 0..block.len() {
            out.push(block.value(row, item).materialize(None));
        }
    }
    assert_eq!(out, vec![json!(1), json!(2), json!(3), json!(4)]);
}

/// A transport that loops requests back into a peer engine through the
/// server-side handler, the way a DB server would serve them.
struct LoopbackTransport {
    peer: Mutex<ExecutionEngine>,
}

impl RemoteTransport for LoopbackTransport {
    fn request(
        &self,
        _method: HttpMethod,
        _server: &str,
        path: &str,
        shard_id: Option<&str>,
        body: String,
        _timeout: Duration,
    ) -> AqlResult<String> {
        // /_db/{vocbase}/_api/aql/{op}/{queryId}
        let op = path
            .split('/')
            .nth(4)
            .and_then(|s| s.parse::<ApiOperation>().ok())
            .expect("well-formed peer path");
        let mut peer = self.peer.lock().expect("peer engine poisoned");
        Ok(handle_request(&mut peer, op, shard_id, &body))
    }
}

fn peer_engine() -> (ExecutionEngine, Arc<QueryContext>) {
    // the peer runs: FOR d IN C RETURN d.v
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", (0..7).map(|i| json!({"v": i})).collect::<Vec<_>>());

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let v = regs.add_variable(1, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let project = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "v")),
        out_reg: v,
        condition_reg: None,
    })
    .with_dependency(scan);
    let root = PlanNode::new(3, 1, NodeParams::ReturnRows { in_reg: v }).with_dependency(project);

    let plan = ExecutionPlan {
        root,
        registers: Arc::new(regs),
    };
    let ctx = QueryContext::new(mem);
    let mut engine = ExecutionEngine::from_plan(&plan, Arc::clone(&ctx)).unwrap();
    engine.initialize().unwrap();
    (engine, ctx)
}

#[test]
fn remote_proxies_the_peer_plan() {
    let (peer, peer_ctx) = peer_engine();
    peer_ctx.register_warning(1234, "peer saw something odd");
    let transport = Arc::new(LoopbackTransport {
        peer: Mutex::new(peer),
    });

    // locally the remote is the whole plan: one result column
    let mut regs = RegisterPlan::new();
    regs.add_variable(0, 0);
    let root = PlanNode::new(0, 0, NodeParams::Remote {
        server: "http://peer:8529".into(),
        vocbase: "_system".into(),
        query_id: "q-42".into(),
        own_shard: None,
        transport: transport.clone() as Arc<dyn RemoteTransport>,
    });

    let plan = ExecutionPlan {
        root,
        registers: Arc::new(regs),
    };
    let mem = MemoryEngine::new();
    let ctx = QueryContext::new(mem);
    let mut local = ExecutionEngine::from_plan(&plan, Arc::clone(&ctx)).unwrap();
    local.initialize().unwrap();
    local.initialize_cursor(None, 0).unwrap();

    let mut results = Vec::new();
    while let Some(block) = local.get_some(1, 3).unwrap() {
        assert_eq!(block.nr_regs(), 1);
        for row in 0..block.len() {
            results.push(block.value(row, 0).materialize(None));
        }
    }
    let expected: Vec<JsonValue> = (0..7).map(JsonValue::from).collect();
    assert_eq!(results, expected);

    // peer statistics arrive as deltas and accumulate exactly once
    assert_eq!(local.stats().scanned_full, 7);

    // shutdown folds peer warnings into the local query
    local.shutdown(0).unwrap();
    let warnings = local.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, 1234);
    assert_eq!(warnings[0].message, "peer saw something odd");
}

#[test]
fn remote_skip_and_has_more() {
    let (peer, _peer_ctx) = peer_engine();
    let transport = Arc::new(LoopbackTransport {
        peer: Mutex::new(peer),
    });

    let mut regs = RegisterPlan::new();
    regs.add_variable(0, 0);
    let root = PlanNode::new(0, 0, NodeParams::Remote {
        server: "http://peer:8529".into(),
        vocbase: "_system".into(),
        query_id: "q-43".into(),
        own_shard: None,
        transport: transport as Arc<dyn RemoteTransport>,
    });
    let plan = ExecutionPlan {
        root,
        registers: Arc::new(regs),
    };
    let ctx = QueryContext::new(MemoryEngine::new());
    let mut local = ExecutionEngine::from_plan(&plan, Arc::clone(&ctx)).unwrap();
    local.initialize().unwrap();
    local.initialize_cursor(None, 0).unwrap();

    assert_eq!(local.skip_some(2, 2).unwrap(), 2);
    assert!(local.has_more().unwrap());
    let block = local.get_some(1, 100).unwrap().unwrap();
    assert_eq!(block.len(), 5);
    assert_eq!(block.value(0, 0), &Value::json(json!(2)));
}

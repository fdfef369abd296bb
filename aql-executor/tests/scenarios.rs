//! End-to-end scenarios over in-memory collections: single-server plans
//! from scans and index ranges through filtering, grouping, limits,
//! subqueries and mutations.

mod common;

use std::sync::Arc;

use aql_errors::AqlError;
use aql_executor::ops::condition::{BoundValue, RangeSpec};
use aql_executor::ops::mutation::ModificationOptions;
use aql_executor::plan::{NodeParams, PlanNode, RegisterPlan, SortElement};
use aql_expression::{CmpOp, Expr};
use aql_storage::mem::MemoryEngine;
use common::{build_engine, drain_results, drain_results_batched, seed_collection};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};

fn values(range: std::ops::Range<i64>, attr: &str) -> Vec<JsonValue> {
    range
        .map(|i| {
            let mut doc = serde_json::Map::new();
            doc.insert(attr.to_string(), JsonValue::from(i));
            JsonValue::Object(doc)
        })
        .collect()
}

// FOR d IN C FILTER d.v >= 10 LIMIT 5 RETURN d.v
fn scan_filter_limit_plan(cid: u64, limit: usize, full_count: bool) -> (PlanNode, RegisterPlan) {
    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let cond = regs.add_variable(1, 1);
    let v = regs.add_variable(2, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let condition = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::cmp(CmpOp::Ge, Expr::attr(d, "v"), Expr::lit(json!(10)))),
        out_reg: cond,
        condition_reg: None,
    })
    .with_dependency(scan);
    let filter = PlanNode::new(3, 1, NodeParams::Filter { in_reg: cond }).with_dependency(condition);
    let project = PlanNode::new(4, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "v")),
        out_reg: v,
        condition_reg: None,
    })
    .with_dependency(filter);
    let limited = PlanNode::new(5, 1, NodeParams::Limit {
        offset: 0,
        limit,
        full_count,
    })
    .with_dependency(project);
    let root = PlanNode::new(6, 1, NodeParams::ReturnRows { in_reg: v }).with_dependency(limited);
    (root, regs)
}

#[test]
fn s1_scan_filter_limit() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..100, "v"));
    let (root, regs) = scan_filter_limit_plan(cid, 5, false);
    let (mut engine, _ctx) = build_engine(mem, root, regs);

    let results = drain_results(&mut engine);
    assert_eq!(results, vec![json!(10), json!(11), json!(12), json!(13), json!(14)]);

    let stats = engine.stats();
    assert_eq!(stats.scanned_full, 100);
    assert_eq!(stats.filtered, 10);
    engine.shutdown(0).unwrap();
}

#[test]
fn s1_small_batches_respect_bounds() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..100, "v"));
    let (root, regs) = scan_filter_limit_plan(cid, 30, false);
    let (mut engine, _ctx) = build_engine(mem, root, regs);

    let results = drain_results_batched(&mut engine, 7);
    let expected: Vec<JsonValue> = (10..40).map(JsonValue::from).collect();
    assert_eq!(results, expected);
}

// FOR d IN C FILTER d.v >= 50 && d.v < 55 SORT d.v RETURN d.v
// with a skiplist index on v: no Sort node needed, the index preserves
// order
#[test]
fn s2_skiplist_range_preserves_order() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..100, "v"));

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let v = regs.add_variable(1, 1);

    let index = PlanNode::new(1, 1, NodeParams::IndexRange {
        collection: cid,
        index_id: "skiplist:v".into(),
        ranges: vec![vec![RangeSpec::range(
            "v",
            Some(BoundValue::inclusive(json!(50))),
            Some(BoundValue::exclusive(json!(55))),
        )]],
        reverse: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let project = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "v")),
        out_reg: v,
        condition_reg: None,
    })
    .with_dependency(index);
    let root = PlanNode::new(3, 1, NodeParams::ReturnRows { in_reg: v }).with_dependency(project);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(results, vec![json!(50), json!(51), json!(52), json!(53), json!(54)]);
    assert_eq!(engine.stats().scanned_index, 5);
}

#[test]
fn s2_reverse_iteration() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..100, "v"));

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let v = regs.add_variable(1, 1);

    let index = PlanNode::new(1, 1, NodeParams::IndexRange {
        collection: cid,
        index_id: "skiplist:v".into(),
        ranges: vec![vec![RangeSpec::range(
            "v",
            Some(BoundValue::inclusive(json!(50))),
            Some(BoundValue::exclusive(json!(53))),
        )]],
        reverse: true,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let project = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "v")),
        out_reg: v,
        condition_reg: None,
    })
    .with_dependency(index);
    let root = PlanNode::new(3, 1, NodeParams::ReturnRows { in_reg: v }).with_dependency(project);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    assert_eq!(
        drain_results(&mut engine),
        vec![json!(52), json!(51), json!(50)]
    );
}

// LET xs = [1, 3, 5] FOR d IN C FILTER d.k IN xs RETURN d.k
// as an index range with a variable bound expanding to equalities
#[test]
fn s3_variable_bound_array_expansion() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..10, "k"));

    let mut regs = RegisterPlan::new();
    let xs = regs.add_variable(0, 0);
    let d = regs.add_variable(1, 1);
    let k = regs.add_variable(2, 1);

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!([1, 3, 5]))),
        out_reg: xs,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let index = PlanNode::new(2, 1, NodeParams::IndexRange {
        collection: cid,
        index_id: "hash:k".into(),
        ranges: vec![vec![RangeSpec::eq_expr("k", Arc::new(Expr::reg(xs)))]],
        reverse: false,
    })
    .with_dependency(bind);
    let project = PlanNode::new(3, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "k")),
        out_reg: k,
        condition_reg: None,
    })
    .with_dependency(index);
    let root = PlanNode::new(4, 1, NodeParams::ReturnRows { in_reg: k }).with_dependency(project);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let mut results = drain_results(&mut engine);
    results.sort_by(|a, b| aql_data::compare_json(a, b));
    assert_eq!(results, vec![json!(1), json!(3), json!(5)]);
}

// FOR d IN C COLLECT g = d.g WITH COUNT INTO c RETURN {g, c}
#[test]
fn s4_collect_with_count() {
    let mem = MemoryEngine::new();
    let docs = (0..100).map(|i| json!({"g": i % 4}));
    let (_coll, cid) = seed_collection(&mem, "C", docs);

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let g_in = regs.add_variable(1, 1);
    let g_out = regs.add_variable(2, 1);
    let c = regs.add_variable(3, 1);
    let obj = regs.add_variable(4, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let key = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "g")),
        out_reg: g_in,
        condition_reg: None,
    })
    .with_dependency(scan);
    // Collect assumes pre-sorted input; the planner plants this Sort
    let sort = PlanNode::new(3, 1, NodeParams::Sort {
        elements: vec![SortElement {
            register: g_in,
            ascending: true,
        }],
        stable: false,
    })
    .with_dependency(key);
    let collect = PlanNode::new(4, 1, NodeParams::Collect {
        group_registers: vec![(g_out, g_in)],
        count_only: true,
        group_reg: Some(c),
        expression_reg: None,
        keep: vec![],
    })
    .with_dependency(sort);
    let project = PlanNode::new(5, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::Object(vec![
            ("g".into(), Expr::reg(g_out)),
            ("c".into(), Expr::reg(c)),
        ])),
        out_reg: obj,
        condition_reg: None,
    })
    .with_dependency(collect);
    let root = PlanNode::new(6, 1, NodeParams::ReturnRows { in_reg: obj }).with_dependency(project);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(
        results,
        vec![
            json!({"g": 0, "c": 25}),
            json!({"g": 1, "c": 25}),
            json!({"g": 2, "c": 25}),
            json!({"g": 3, "c": 25}),
        ]
    );
}

// an offset skips whole groups; the skipped keys must not leak into the
// following pull as phantom zero-count rows
#[test]
fn collect_with_count_after_offset_skip() {
    let mem = MemoryEngine::new();
    let docs = (0..100).map(|i| json!({"g": i % 4}));
    let (_coll, cid) = seed_collection(&mem, "C", docs);

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let g_in = regs.add_variable(1, 1);
    let g_out = regs.add_variable(2, 1);
    let c = regs.add_variable(3, 1);
    let obj = regs.add_variable(4, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let key = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "g")),
        out_reg: g_in,
        condition_reg: None,
    })
    .with_dependency(scan);
    let sort = PlanNode::new(3, 1, NodeParams::Sort {
        elements: vec![SortElement {
            register: g_in,
            ascending: true,
        }],
        stable: false,
    })
    .with_dependency(key);
    let collect = PlanNode::new(4, 1, NodeParams::Collect {
        group_registers: vec![(g_out, g_in)],
        count_only: true,
        group_reg: Some(c),
        expression_reg: None,
        keep: vec![],
    })
    .with_dependency(sort);
    let limited = PlanNode::new(5, 1, NodeParams::Limit {
        offset: 2,
        limit: 2,
        full_count: false,
    })
    .with_dependency(collect);
    let project = PlanNode::new(6, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::Object(vec![
            ("g".into(), Expr::reg(g_out)),
            ("c".into(), Expr::reg(c)),
        ])),
        out_reg: obj,
        condition_reg: None,
    })
    .with_dependency(limited);
    let root = PlanNode::new(7, 1, NodeParams::ReturnRows { in_reg: obj }).with_dependency(project);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(
        results,
        vec![json!({"g": 2, "c": 25}), json!({"g": 3, "c": 25})]
    );
}

// total aggregation over an empty input still emits the zero count
#[test]
fn collect_total_aggregation_on_empty_input() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..10, "v"));

    let mut regs = RegisterPlan::new();
    let _d = regs.add_variable(0, 1);
    let cond = regs.add_variable(1, 1);
    let c = regs.add_variable(2, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let never = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!(false))),
        out_reg: cond,
        condition_reg: None,
    })
    .with_dependency(scan);
    let filter = PlanNode::new(3, 1, NodeParams::Filter { in_reg: cond }).with_dependency(never);
    let collect = PlanNode::new(4, 1, NodeParams::Collect {
        group_registers: vec![],
        count_only: true,
        group_reg: Some(c),
        expression_reg: None,
        keep: vec![],
    })
    .with_dependency(filter);
    let root = PlanNode::new(5, 1, NodeParams::ReturnRows { in_reg: c }).with_dependency(collect);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    assert_eq!(drain_results(&mut engine), vec![json!(0)]);
}

// FOR i IN 1..3 LET sq = (FOR j IN 1..i RETURN j) RETURN sq
#[test]
fn s5_subquery_per_row() {
    let mem = MemoryEngine::new();

    let mut regs = RegisterPlan::new();
    let outer_range = regs.add_variable(0, 0);
    let i = regs.add_variable(1, 1);
    let sq = regs.add_variable(2, 1);
    let inner_range = regs.add_variable(3, 1);
    let j = regs.add_variable(4, 2);

    // the subquery: FOR j IN 1..i RETURN j
    let inner = PlanNode::new(13, 2, NodeParams::ReturnRows { in_reg: j }).with_dependency(
        PlanNode::new(12, 2, NodeParams::EnumerateList { in_reg: inner_range }).with_dependency(
            PlanNode::new(11, 1, NodeParams::Calculation {
                expression: Arc::new(Expr::Range {
                    low: Box::new(Expr::lit(json!(1))),
                    high: Box::new(Expr::reg(i)),
                }),
                out_reg: inner_range,
                condition_reg: None,
            })
            .with_dependency(PlanNode::new(10, 1, NodeParams::Singleton)),
        ),
    );

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::Range {
            low: Box::new(Expr::lit(json!(1))),
            high: Box::new(Expr::lit(json!(3))),
        }),
        out_reg: outer_range,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let each = PlanNode::new(2, 1, NodeParams::EnumerateList { in_reg: outer_range })
        .with_dependency(bind);
    let subquery = PlanNode::new(3, 1, NodeParams::Subquery {
        subquery: Box::new(inner),
        out_reg: sq,
        is_const: false,
    })
    .with_dependency(each);
    let root = PlanNode::new(4, 1, NodeParams::ReturnRows { in_reg: sq }).with_dependency(subquery);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(
        results,
        vec![json!([1]), json!([1, 2]), json!([1, 2, 3])]
    );
}

#[test]
fn sort_is_stable_when_requested() {
    let mem = MemoryEngine::new();

    let mut regs = RegisterPlan::new();
    let list = regs.add_variable(0, 0);
    let item = regs.add_variable(1, 1);
    let key = regs.add_variable(2, 1);

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!([
            {"k": 1, "tag": "a"},
            {"k": 1, "tag": "b"},
            {"k": 0, "tag": "c"},
        ]))),
        out_reg: list,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let each = PlanNode::new(2, 1, NodeParams::EnumerateList { in_reg: list }).with_dependency(bind);
    let sort_key = PlanNode::new(3, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(item, "k")),
        out_reg: key,
        condition_reg: None,
    })
    .with_dependency(each);
    let sort = PlanNode::new(4, 1, NodeParams::Sort {
        elements: vec![SortElement {
            register: key,
            ascending: true,
        }],
        stable: true,
    })
    .with_dependency(sort_key);
    let root = PlanNode::new(5, 1, NodeParams::ReturnRows { in_reg: item }).with_dependency(sort);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let tags: Vec<JsonValue> = drain_results(&mut engine)
        .into_iter()
        .map(|v| v["tag"].clone())
        .collect();
    assert_eq!(tags, vec![json!("c"), json!("a"), json!("b")]);
}

#[test]
fn limit_with_offset_and_full_count() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..100, "v"));

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
    let limited = PlanNode::new(3, 1, NodeParams::Limit {
        offset: 10,
        limit: 5,
        full_count: true,
    })
    .with_dependency(project);
    let root = PlanNode::new(4, 1, NodeParams::ReturnRows { in_reg: v }).with_dependency(limited);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(
        results,
        vec![json!(10), json!(11), json!(12), json!(13), json!(14)]
    );
    // the reported full count equals the total input size of the subtree
    assert_eq!(engine.stats().full_count, 100);
}

#[test]
fn limit_exactness_when_offset_exceeds_input() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..8, "v"));

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let limited = PlanNode::new(2, 1, NodeParams::Limit {
        offset: 20,
        limit: 5,
        full_count: false,
    })
    .with_dependency(scan);
    let root = PlanNode::new(3, 1, NodeParams::ReturnRows { in_reg: d }).with_dependency(limited);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    assert_eq!(drain_results(&mut engine), Vec::<JsonValue>::new());
}

#[test]
fn skip_some_advances_like_get_some() {
    let make = || {
        let mem = MemoryEngine::new();
        let (_coll, cid) = seed_collection(&mem, "C", values(0..50, "v"));
        let (root, regs) = scan_filter_limit_plan(cid, usize::MAX, false);
        build_engine(mem, root, regs)
    };

    // skipping then pulling ...
    let (mut skipping, _ctx) = make();
    let skipped = skipping.skip_some(7, 7).unwrap();
    assert_eq!(skipped, 7);
    let after_skip = drain_results(&mut skipping);

    // ... sees the same stream as pulling and discarding
    let (mut pulling, _ctx) = make();
    let mut discarded = drain_results(&mut pulling);
    let after_get = discarded.split_off(7);

    assert_eq!(after_skip, after_get);
}

#[test]
fn registers_in_kill_set_are_erased() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..10, "v"));

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let cond = regs.add_variable(1, 1);
    let v = regs.add_variable(2, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: false,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let condition = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::cmp(CmpOp::Ge, Expr::attr(d, "v"), Expr::lit(json!(0)))),
        out_reg: cond,
        condition_reg: None,
    })
    .with_dependency(scan);
    let filter = PlanNode::new(3, 1, NodeParams::Filter { in_reg: cond }).with_dependency(condition);
    // the condition register dies here
    let root = PlanNode::new(4, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "v")),
        out_reg: v,
        condition_reg: None,
    })
    .with_regs_to_clear([cond])
    .with_dependency(filter);

    let plan = aql_executor::plan::ExecutionPlan {
        root,
        registers: Arc::new(regs),
    };
    let ctx = aql_executor::context::QueryContext::new(mem);
    let mut engine =
        aql_executor::engine::ExecutionEngine::from_plan(&plan, Arc::clone(&ctx)).unwrap();
    engine.initialize().unwrap();
    engine.initialize_cursor(None, 0).unwrap();

    let block = engine.get_some(1, 1000).unwrap().unwrap();
    assert_eq!(block.nr_regs(), 3);
    for row in 0..block.len() {
        assert!(block.value(row, cond).is_empty());
        assert!(!block.value(row, d).is_empty());
        assert!(!block.value(row, v).is_empty());
    }
}

#[test]
fn killed_query_raises_at_block_boundary() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..100, "v"));
    let (root, regs) = scan_filter_limit_plan(cid, usize::MAX, false);
    let (mut engine, ctx) = build_engine(mem, root, regs);

    assert!(engine.get_some(1, 10).unwrap().is_some());
    ctx.kill();
    assert_eq!(engine.get_some(1, 10).unwrap_err(), AqlError::QueryKilled);
}

#[test]
fn has_more_false_implies_exhausted() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..5, "v"));
    let (root, regs) = scan_filter_limit_plan(cid, usize::MAX, false);
    let (mut engine, _ctx) = build_engine(mem, root, regs);

    drain_results(&mut engine);
    assert!(!engine.has_more().unwrap());
    assert!(engine.get_some(1, 10).unwrap().is_none());
}

#[test]
fn random_scan_covers_collection() {
    let mem = MemoryEngine::new();
    let (_coll, cid) = seed_collection(&mem, "C", values(0..30, "v"));

    let mut regs = RegisterPlan::new();
    let d = regs.add_variable(0, 1);
    let v = regs.add_variable(1, 1);

    let scan = PlanNode::new(1, 1, NodeParams::EnumerateCollection {
        collection: cid,
        random: true,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let project = PlanNode::new(2, 1, NodeParams::Calculation {
        expression: Arc::new(Expr::attr(d, "v")),
        out_reg: v,
        condition_reg: None,
    })
    .with_dependency(scan);
    let root = PlanNode::new(3, 1, NodeParams::ReturnRows { in_reg: v }).with_dependency(project);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let mut results = drain_results(&mut engine);
    results.sort_by(aql_data::compare_json);
    let expected: Vec<JsonValue> = (0..30).map(JsonValue::from).collect();
    assert_eq!(results, expected);
}

#[test]
fn insert_writes_and_reports_documents() {
    let mem = MemoryEngine::new();
    let (target, target_id) = seed_collection(&mem, "out", vec![]);

    let mut regs = RegisterPlan::new();
    let list = regs.add_variable(0, 0);
    let doc = regs.add_variable(1, 1);
    let written = regs.add_variable(2, 1);

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!([
            {"_key": "a", "v": 1},
            {"_key": "b", "v": 2},
        ]))),
        out_reg: list,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let each = PlanNode::new(2, 1, NodeParams::EnumerateList { in_reg: list }).with_dependency(bind);
    let insert = PlanNode::new(3, 1, NodeParams::Insert {
        collection: target_id,
        in_reg: doc,
        options: ModificationOptions::default(),
        out_reg: Some(written),
    })
    .with_dependency(each);
    let root = PlanNode::new(4, 1, NodeParams::ReturnRows { in_reg: written })
        .with_dependency(insert);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["_key"], json!("a"));
    assert_eq!(results[1]["v"], json!(2));
    assert_eq!(target.document_count(), 2);
    assert_eq!(engine.stats().writes_executed, 2);
}

#[test]
fn remove_with_ignore_errors_counts_misses() {
    let mem = MemoryEngine::new();
    let (target, target_id) = seed_collection(
        &mem,
        "C",
        vec![json!({"_key": "a"}), json!({"_key": "b"})],
    );

    let mut regs = RegisterPlan::new();
    let list = regs.add_variable(0, 0);
    let key = regs.add_variable(1, 1);

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!(["a", "missing", "b"]))),
        out_reg: list,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let each = PlanNode::new(2, 1, NodeParams::EnumerateList { in_reg: list }).with_dependency(bind);
    let root = PlanNode::new(3, 1, NodeParams::Remove {
        collection: target_id,
        in_reg: key,
        options: ModificationOptions {
            ignore_errors: true,
            ..Default::default()
        },
        out_reg: None,
    })
    .with_dependency(each);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    assert!(engine.get_some(1, 1000).unwrap().is_none());
    assert_eq!(target.document_count(), 0);
    let stats = engine.stats();
    assert_eq!(stats.writes_executed, 2);
    assert_eq!(stats.writes_ignored, 1);
}

#[test]
fn update_returns_new_values_when_asked() {
    let mem = MemoryEngine::new();
    let (_target, target_id) =
        seed_collection(&mem, "C", vec![json!({"_key": "a", "v": 1, "w": true})]);

    let mut regs = RegisterPlan::new();
    let list = regs.add_variable(0, 0);
    let patch = regs.add_variable(1, 1);
    let updated = regs.add_variable(2, 1);

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!([{"_key": "a", "v": 42}]))),
        out_reg: list,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let each = PlanNode::new(2, 1, NodeParams::EnumerateList { in_reg: list }).with_dependency(bind);
    let update = PlanNode::new(3, 1, NodeParams::Update {
        collection: target_id,
        doc_reg: patch,
        key_reg: None,
        options: ModificationOptions {
            return_new_values: true,
            ..Default::default()
        },
        out_reg: Some(updated),
    })
    .with_dependency(each);
    let root = PlanNode::new(4, 1, NodeParams::ReturnRows { in_reg: updated })
        .with_dependency(update);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    let results = drain_results(&mut engine);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["v"], json!(42));
    assert_eq!(results[0]["w"], json!(true));
}

#[test]
fn enumerate_list_rejects_non_arrays() {
    let mem = MemoryEngine::new();

    let mut regs = RegisterPlan::new();
    let list = regs.add_variable(0, 0);
    let item = regs.add_variable(1, 1);

    let bind = PlanNode::new(1, 0, NodeParams::Calculation {
        expression: Arc::new(Expr::lit(json!(42))),
        out_reg: list,
        condition_reg: None,
    })
    .with_dependency(PlanNode::new(0, 0, NodeParams::Singleton));
    let each = PlanNode::new(2, 1, NodeParams::EnumerateList { in_reg: list }).with_dependency(bind);
    let root = PlanNode::new(3, 1, NodeParams::ReturnRows { in_reg: item }).with_dependency(each);

    let (mut engine, _ctx) = build_engine(mem, root, regs);
    assert!(matches!(
        engine.get_some(1, 10),
        Err(AqlError::ArrayExpected { .. })
    ));
}

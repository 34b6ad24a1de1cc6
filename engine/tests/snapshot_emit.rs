// Snapshot tests: lock emitted script units to detect unintended changes in
// lowering, naming or layout.
//
// Graphs are built through the library API and compiled with the full
// pipeline (validate → check → emit). Snapshots are managed by `insta` and
// stored under `engine/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

mod common;

use common::*;
use weft::emit::{CompiledUnit, EmitOptions};
use weft::facade::EngineContext;
use weft::graph::Graph;
use weft::id::ScopeId;
use weft::node::{Binary, Branch, ForLoop, Get, Sequence, Stop, Throw, Try, Wait, WaitKind};
use weft::pipeline;
use weft::reference::{MemberPath, MemberReference, Segment};
use weft::value::{BinaryOp, Ty, Value};

fn emit_with(graph: &Graph, options: EmitOptions) -> CompiledUnit {
    let ctx = EngineContext::with_builtins();
    let result = pipeline::compile(&ctx, graph, &options);
    assert!(result.diagnostics.is_empty(), "diagnostics: {:?}", result.diagnostics);
    result.unit.expect("unit emitted")
}

fn source_of(graph: &Graph) -> String {
    emit_with(graph, EmitOptions::default()).source
}

// ── Graphs ──────────────────────────────────────────────────────────────────

fn scenario() -> Graph {
    let mut g = Graph::new("Scenario");
    g.declare(ScopeId::ROOT, "x", Ty::Int, None);
    let e = entry(&mut g, "start");
    let s = set(&mut g, "x", Value::Int(5).into());
    let cmp = g.add_node(Binary {
        op: BinaryOp::Gt,
        left: MemberReference::variable("x"),
        right: Value::Int(3).into(),
    });
    let br = g.add_node(Branch {
        condition: out(cmp),
        on_true: None,
        on_false: None,
        finished: None,
    });
    let a = say(&mut g, "A");
    let b = say(&mut g, "B");
    chain(&mut g, &[e, s, br]);
    g.connect(br, "true", a).unwrap();
    g.connect(br, "false", b).unwrap();
    g
}

fn loops() -> Graph {
    let mut g = Graph::new("Loops");
    g.declare(ScopeId::ROOT, "total", Ty::Int, Some(Value::Int(0)));
    let e = entry(&mut g, "start");
    let l = g.add_node(ForLoop {
        start: Value::Int(0).into(),
        end: Value::Int(3).into(),
        step: Value::Int(1).into(),
        body: None,
        finished: None,
    });
    let sum = g.add_node(Binary {
        op: BinaryOp::Add,
        left: MemberReference::variable("total"),
        right: MemberReference::node_output(l, "index"),
    });
    let acc = set(&mut g, "total", out(sum));
    let t = g.add_node(Try {
        body: None,
        catch: None,
        finished: None,
    });
    let bad = g.add_node(Throw {
        message: Value::str("boom").into(),
    });
    let caught = say_ref(&mut g, MemberReference::variable("total"));
    let done = say(&mut g, "done");
    g.connect(e, "next", l).unwrap();
    g.connect(l, "body", acc).unwrap();
    g.connect(l, "finished", t).unwrap();
    g.connect(t, "body", bad).unwrap();
    g.connect(t, "catch", caught).unwrap();
    g.connect(t, "finished", done).unwrap();
    g
}

fn waits() -> Graph {
    let mut g = Graph::new("Waits");
    g.declare(ScopeId::ROOT, "x", Ty::Int, None);
    let e = entry(&mut g, "start");
    let seq = g.add_node(Sequence { targets: vec![] });
    let w = g.add_node(Wait {
        wait: WaitKind::Seconds {
            duration: Value::Float(0.5).into(),
        },
        parallel: true,
        next: None,
        cancelled: None,
    });
    let after = set(&mut g, "x", Value::Int(1).into());
    let started = say(&mut g, "started");
    let cancelled = say(&mut g, "cancelled");
    let halt = entry(&mut g, "halt");
    let stop = g.add_node(Stop { node: w, next: None });
    g.connect(e, "next", seq).unwrap();
    g.connect(seq, "then_0", w).unwrap();
    g.connect(seq, "then_1", started).unwrap();
    g.connect(w, "next", after).unwrap();
    g.connect(w, "cancelled", cancelled).unwrap();
    g.connect(halt, "next", stop).unwrap();
    g
}

fn evaluate_once() -> Graph {
    let mut g = Graph::new("Once");
    g.declare(ScopeId::ROOT, "x", Ty::Int, None);
    let e = entry(&mut g, "start");
    let tick = g.add_node(Get {
        source: MemberReference::method(MemberPath::on_type(Ty::named("Counter"), Segment::new("tick"))),
    });
    let sum = g.add_node(Binary {
        op: BinaryOp::Add,
        left: out(tick),
        right: out(tick),
    });
    let s = set(&mut g, "x", out(sum));
    let ticks = say_ref(
        &mut g,
        MemberReference::field(MemberPath::on_type(Ty::named("Counter"), Segment::new("ticks"))),
    );
    chain(&mut g, &[e, s, ticks]);
    g
}

// ── Snapshots ───────────────────────────────────────────────────────────────

#[test]
fn snapshot_scenario() {
    let source = source_of(&scenario());
    insta::assert_snapshot!("scenario", source);
}

#[test]
fn snapshot_scenario_unsimplified() {
    let source = emit_with(&scenario(), EmitOptions { simplify: false }).source;
    insta::assert_snapshot!("scenario_unsimplified", source);
}

#[test]
fn snapshot_scenario_debug_map() {
    let unit = emit_with(&scenario(), EmitOptions::default());
    let map = unit
        .debug_map
        .entries()
        .iter()
        .map(|e| format!("{}:{} {}", e.line, e.col, e.node))
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!("scenario_debug_map", map);
}

#[test]
fn snapshot_loops() {
    let source = source_of(&loops());
    insta::assert_snapshot!("loops", source);
}

#[test]
fn snapshot_waits() {
    let source = source_of(&waits());
    insta::assert_snapshot!("waits", source);
}

#[test]
fn snapshot_evaluate_once() {
    let source = source_of(&evaluate_once());
    insta::assert_snapshot!("evaluate_once", source);
}

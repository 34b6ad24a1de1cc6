// Error reporting end to end: what the compile pipeline rejects, what the
// interpreter reports when it meets the same problem at run time, and how
// graph-contributed types behave when the graph changes under a loaded unit.

mod common;

use common::*;
use weft::diag::{codes, DiagCode};
use weft::emit::EmitOptions;
use weft::exec::Execution;
use weft::facade::{EngineContext, GraphHandle, RuntimeTypes};
use weft::graph::Graph;
use weft::host::{native, Overload, TypeDesc, TypeOrigin};
use weft::id::{NodeId, ScopeId};
use weft::interp::Interpreter;
use weft::node::{Construct, Entry, Invoke, Sequence, SetValue};
use weft::pipeline;
use weft::reference::{MemberPath, MemberReference, Segment, Signature};
use weft::sched::FixedStepScheduler;
use weft::script::vm::Machine;
use weft::sink::{CompileSink, ScriptSink, SinkError};
use weft::value::{Ty, Value};

fn compile_codes(ctx: &EngineContext, g: &Graph) -> Vec<(Option<DiagCode>, Option<NodeId>)> {
    let result = pipeline::compile(ctx, g, &EmitOptions::default());
    assert!(result.unit.is_none(), "graph '{}' unexpectedly compiled", g.name);
    faults(&result.diagnostics)
}

// ── Unresolvable references ─────────────────────────────────────────────────

#[test]
fn every_unassigned_reference_is_reported() {
    let mut g = Graph::new("Unassigned");
    g.declare(ScopeId::ROOT, "x", Ty::Int, None);
    let e = entry(&mut g, "start");
    let seq = g.add_node(Sequence { targets: vec![] });
    g.connect(e, "next", seq).unwrap();
    let mut nodes = Vec::new();
    for i in 0..3 {
        let n = set(&mut g, "x", MemberReference::none());
        g.connect(seq, &format!("then_{i}"), n).unwrap();
        nodes.push(n);
    }
    let expected: Vec<_> = nodes.iter().map(|&n| (Some(codes::E0100), Some(n))).collect();

    let ctx = EngineContext::with_builtins();
    assert_eq!(compile_codes(&ctx, &g), expected);

    // The interpreter does not need a clean compile; it reports the same
    // problems as the nodes fail.
    let outcome = interpret(&g, &[Trigger("start")]);
    assert_eq!(outcome.faults, expected);
    assert_eq!(outcome.variables["x"], Value::Int(0));
}

fn max_call(signature: Option<Signature>) -> MemberReference {
    let mut segment = Segment::new("max").args(vec![Value::Int(1).into(), Value::Int(2).into()]);
    if let Some(sig) = signature {
        segment = segment.signature(sig);
    }
    emit_call(MemberReference::method(MemberPath::on_type(Ty::named("Math"), segment)))
}

fn invoke_graph(name: &str, call: MemberReference) -> (Graph, NodeId) {
    let mut g = Graph::new(name);
    let e = entry(&mut g, "start");
    let n = g.add_node(Invoke { call, next: None });
    g.connect(e, "next", n).unwrap();
    (g, n)
}

#[test]
fn recorded_overload_selects_the_call() {
    let (g, _) = invoke_graph("Picked", max_call(Some(Signature::new(vec![Ty::Int, Ty::Int]))));
    let outcome = assert_parity(&g, &[Trigger("start")]);
    assert_eq!(outcome.trace, vec!["2"]);
}

#[test]
fn stale_or_missing_overload_is_a_mismatch() {
    let ctx = EngineContext::with_builtins();
    for (name, sig) in [
        ("Stale", Some(Signature::new(vec![Ty::Str, Ty::Str]))),
        ("Ambiguous", None),
    ] {
        let (g, n) = invoke_graph(name, max_call(sig));
        assert_eq!(compile_codes(&ctx, &g), vec![(Some(codes::E0102), Some(n))]);
        let outcome = interpret(&g, &[Trigger("start")]);
        assert_eq!(outcome.faults, vec![(Some(codes::E0102), Some(n))]);
        assert!(outcome.trace.is_empty());
    }
}

#[test]
fn argument_count_mismatch_is_an_overload_error() {
    let call = MemberReference::method(MemberPath::on_type(Ty::named("Trace"), Segment::new("emit")));
    let (g, n) = invoke_graph("Arity", call);
    let ctx = EngineContext::with_builtins();
    assert_eq!(compile_codes(&ctx, &g), vec![(Some(codes::E0102), Some(n))]);
    let outcome = interpret(&g, &[Trigger("start")]);
    assert_eq!(outcome.faults, vec![(Some(codes::E0102), Some(n))]);
}

// ── Member lookup cascade ───────────────────────────────────────────────────

/// Context with a `Probe` host type whose field and method share a name.
fn probe_context() -> EngineContext {
    let mut ctx = EngineContext::with_builtins();
    ctx.register_host(
        TypeDesc::host("Probe")
            .field("size", Ty::Int, Value::Int(3))
            .method(
                "size",
                Overload::new(vec![], Ty::Int, native(|_, _| Ok(Value::Int(99)))),
            ),
    );
    ctx
}

fn probe_graph(read: MemberReference) -> (Graph, NodeId) {
    let mut g = Graph::new("Probing");
    g.declare(ScopeId::ROOT, "p", Ty::named("Probe"), None);
    let e = entry(&mut g, "start");
    let make = g.add_node(Construct { ty: Ty::named("Probe") });
    let s = set(&mut g, "p", out(make));
    let show = say_ref(&mut g, read);
    chain(&mut g, &[e, s, show]);
    (g, show)
}

fn size_path() -> MemberPath {
    MemberPath::on_value(MemberReference::variable("p"), Segment::new("size"))
}

#[test]
fn fields_shadow_methods_of_the_same_name() {
    let ctx = probe_context();

    let (g, show) = probe_graph(MemberReference::method(size_path()));
    assert_eq!(compile_codes(&ctx, &g), vec![(Some(codes::E0101), Some(show))]);

    let (g, _) = probe_graph(MemberReference::field(size_path()));
    let unit = compile(&ctx, &g);
    assert!(unit.source.contains("Trace::emit(p.size);"), "{}", unit.source);

    let mut it = Interpreter::new(&ctx, &g).unwrap();
    it.trigger("start", &mut FixedStepScheduler::default()).unwrap();
    assert_eq!(it.trace(), ["3"]);

    let loaded = ScriptSink.load(&ctx, &unit).unwrap();
    let mut vm = Machine::new(&ctx, &loaded).unwrap();
    vm.trigger("start", &mut FixedStepScheduler::default()).unwrap();
    assert_eq!(vm.trace(), ["3"]);
}

// ── Graph-contributed types ─────────────────────────────────────────────────

fn counter_graph() -> Graph {
    let mut g = Graph::new("Facade");
    g.declare(ScopeId::ROOT, "hits", Ty::Int, Some(Value::Int(0)));
    let e = entry(&mut g, "start");
    let s = set(&mut g, "hits", Value::Int(1).into());
    chain(&mut g, &[e, s]);
    g.add_node(Entry {
        event: "reset".into(),
        next: None,
    });
    g
}

#[test]
fn loaded_units_win_until_the_graph_changes() {
    let ctx = EngineContext::with_builtins();
    let g = counter_graph();
    let handle = GraphHandle::new("Facade");
    let unit = compile(&ctx, &g);
    assert_eq!(ctx.resolve(&handle).map(|t| t.origin), Some(TypeOrigin::GraphProxy));

    ScriptSink.load(&ctx, &unit).unwrap();
    let loaded = ctx.resolve(&handle).unwrap();
    assert_eq!(loaded.origin, TypeOrigin::GraphNative);
    assert!(!ctx.is_stale(&g));
    let names: Vec<String> = ctx.members(&loaded).into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["hits", "start", "reset"]);

    let mut edited = g.clone();
    edited.declare(ScopeId::ROOT, "misses", Ty::Int, None);
    assert!(ctx.is_stale(&edited));
    ctx.register_graph(&edited);
    let proxy = ctx.resolve(&handle).unwrap();
    assert_eq!(proxy.origin, TypeOrigin::GraphProxy);
    assert!(ctx.members(&proxy).iter().any(|m| m.name == "misses"));
}

// ── Loading and structure ───────────────────────────────────────────────────

#[test]
fn tampered_units_fail_to_load() {
    let ctx = EngineContext::with_builtins();
    let mut unit = compile(&ctx, &counter_graph());
    unit.source = unit.source.replace("hits = 1;", "hits = ;");
    let err = ScriptSink.load(&ctx, &unit).unwrap_err();
    assert!(matches!(err, SinkError::Parse { .. }), "{err}");
    let diags = err.to_diagnostics();
    assert!(!diags.is_empty());
    assert!(diags.iter().all(|d| d.code == Some(codes::E0500)));
    assert!(diags
        .iter()
        .all(|d| d.cause_chain.iter().any(|c| c.message == "loading unit 'Facade'")));
}

fn write_to(target: MemberReference) -> (Graph, NodeId) {
    let mut g = Graph::new("Writes");
    let e = entry(&mut g, "start");
    let s = g.add_node(SetValue {
        target,
        value: Value::Int(1).into(),
        next: None,
    });
    let after = say(&mut g, "after");
    chain(&mut g, &[e, s, after]);
    (g, s)
}

#[test]
fn types_and_methods_are_not_assignable() {
    let ctx = EngineContext::with_builtins();
    let max = Segment::new("max")
        .args(vec![Value::Int(1).into(), Value::Int(2).into()])
        .signature(Signature::new(vec![Ty::Int, Ty::Int]));
    for target in [
        MemberReference::ty(Ty::named("Math")),
        MemberReference::method(MemberPath::on_type(Ty::named("Math"), max)),
    ] {
        let (g, s) = write_to(target);
        assert_eq!(compile_codes(&ctx, &g), vec![(Some(codes::E0103), Some(s))]);
        let outcome = interpret(&g, &[Trigger("start")]);
        assert_eq!(outcome.faults, vec![(Some(codes::E0103), Some(s))]);
        assert!(outcome.trace.is_empty());
    }
}

#[test]
fn flow_cycles_stop_the_pipeline_before_checking() {
    let mut g = Graph::new("Cyclic");
    g.declare(ScopeId::ROOT, "x", Ty::Int, None);
    let e = entry(&mut g, "start");
    let a = set(&mut g, "x", MemberReference::none());
    let b = set(&mut g, "x", Value::Int(2).into());
    chain(&mut g, &[e, a, b, a]);
    let ctx = EngineContext::with_builtins();
    let found: Vec<_> = compile_codes(&ctx, &g).into_iter().map(|(c, _)| c).collect();
    assert!(found.contains(&Some(codes::E0302)), "{found:?}");
    assert!(!found.contains(&Some(codes::E0100)), "checking ran: {found:?}");
}

#[test]
fn read_only_targets_are_rejected() {
    let mut g = Graph::new("ReadOnly");
    let e = entry(&mut g, "start");
    let s = g.add_node(SetValue {
        target: MemberReference::property(MemberPath::on_type(Ty::named("Math"), Segment::new("pi"))),
        value: Value::Float(3.0).into(),
        next: None,
    });
    chain(&mut g, &[e, s]);
    let ctx = EngineContext::with_builtins();
    assert_eq!(compile_codes(&ctx, &g), vec![(Some(codes::E0103), Some(s))]);
}

// ── Determinism ─────────────────────────────────────────────────────────────

#[test]
fn emission_survives_a_storage_round_trip() {
    let g = counter_graph();
    let json = serde_json::to_string(&g).unwrap();
    let reloaded: Graph = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded, g);

    let first = compile(&EngineContext::with_builtins(), &g);
    let second = compile(&EngineContext::with_builtins(), &reloaded);
    assert_eq!(first.source, second.source);
    assert_eq!(first.debug_map, second.debug_map);
    assert_eq!(first.fingerprint, second.fingerprint);
}

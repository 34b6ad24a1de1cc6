// Shared helpers for the integration tests: graph building shorthands and a
// driver that runs one graph on both backends and captures what the host
// can observe.

#![allow(dead_code)]

use std::collections::BTreeMap;

use weft::diag::{DiagCode, Diagnostic};
use weft::emit::{CompiledUnit, EmitOptions};
use weft::exec::Execution;
use weft::facade::EngineContext;
use weft::graph::Graph;
use weft::id::NodeId;
use weft::interp::Interpreter;
use weft::node::{Entry, Invoke, SetValue};
use weft::pipeline;
use weft::reference::{MemberPath, MemberReference, Segment};
use weft::sched::FixedStepScheduler;
use weft::script::vm::Machine;
use weft::sink::{CompileSink, ScriptSink};
use weft::value::{Ty, Value};

// ── Graph shorthands ────────────────────────────────────────────────────────

pub fn entry(g: &mut Graph, event: &str) -> NodeId {
    g.add_node(Entry {
        event: event.into(),
        next: None,
    })
}

/// `Trace::emit(arg)`.
pub fn emit_call(arg: MemberReference) -> MemberReference {
    MemberReference::method(MemberPath::on_type(
        Ty::named("Trace"),
        Segment::new("emit").args(vec![arg]),
    ))
}

/// Invoke node emitting a literal string to the host trace.
pub fn say(g: &mut Graph, text: &str) -> NodeId {
    g.add_node(Invoke {
        call: emit_call(Value::str(text).into()),
        next: None,
    })
}

/// Invoke node emitting whatever `arg` reads.
pub fn say_ref(g: &mut Graph, arg: MemberReference) -> NodeId {
    g.add_node(Invoke {
        call: emit_call(arg),
        next: None,
    })
}

pub fn set(g: &mut Graph, target: &str, value: MemberReference) -> NodeId {
    g.add_node(SetValue {
        target: MemberReference::variable(target),
        value,
        next: None,
    })
}

pub fn out(node: NodeId) -> MemberReference {
    MemberReference::node_output(node, "value")
}

/// Link `nodes` through their `next` ports.
pub fn chain(g: &mut Graph, nodes: &[NodeId]) {
    for pair in nodes.windows(2) {
        g.connect(pair[0], "next", pair[1])
            .unwrap_or_else(|e| panic!("connect {} -> {}: {e}", pair[0], pair[1]));
    }
}

// ── Driving ─────────────────────────────────────────────────────────────────

/// One host action applied to an execution.
#[derive(Debug, Clone, Copy)]
pub enum Drive<'a> {
    Trigger(&'a str),
    Tick(u32),
}

#[allow(unused_imports)]
pub use Drive::{Tick, Trigger};

/// Everything a host can observe after driving an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub trace: Vec<String>,
    /// `(code, node)` of every reported diagnostic, in report order.
    pub faults: Vec<(Option<DiagCode>, Option<NodeId>)>,
    pub variables: BTreeMap<String, Value>,
    pub idle: bool,
}

impl Outcome {
    fn capture(exec: &dyn Execution) -> Self {
        Self {
            trace: exec.trace().to_vec(),
            faults: faults(exec.diagnostics()),
            variables: exec.variables(),
            idle: exec.is_idle(),
        }
    }
}

pub fn faults(diags: &[Diagnostic]) -> Vec<(Option<DiagCode>, Option<NodeId>)> {
    diags.iter().map(|d| (d.code, d.location.node)).collect()
}

fn drive(exec: &mut dyn Execution, steps: &[Drive<'_>]) -> Outcome {
    let mut sched = FixedStepScheduler::new(0.25);
    for step in steps {
        match *step {
            Drive::Trigger(event) => {
                exec.trigger(event, &mut sched)
                    .unwrap_or_else(|e| panic!("trigger '{event}': {e}"));
            }
            Drive::Tick(n) => {
                for _ in 0..n {
                    sched.tick(exec);
                }
            }
        }
    }
    Outcome::capture(exec)
}

/// Run `graph` on the reflection interpreter.
pub fn interpret(graph: &Graph, steps: &[Drive<'_>]) -> Outcome {
    let ctx = EngineContext::with_builtins();
    let mut it = Interpreter::new(&ctx, graph).unwrap_or_else(|e| panic!("interpreter: {e}"));
    drive(&mut it, steps)
}

/// Validate, check and emit `graph`, panicking on any error diagnostic.
pub fn compile(ctx: &EngineContext, graph: &Graph) -> CompiledUnit {
    let result = pipeline::compile(ctx, graph, &EmitOptions::default());
    match result.unit {
        Some(unit) => unit,
        None => panic!("compile failed: {:?}", result.diagnostics),
    }
}

/// Compile `graph`, load the unit and run it on the script VM.
pub fn compile_and_run(graph: &Graph, steps: &[Drive<'_>]) -> Outcome {
    let ctx = EngineContext::with_builtins();
    let unit = compile(&ctx, graph);
    let loaded = ScriptSink
        .load(&ctx, &unit)
        .unwrap_or_else(|e| panic!("load: {e}\n{}", unit.source));
    let mut vm = Machine::new(&ctx, &loaded).unwrap_or_else(|e| panic!("machine: {e}"));
    drive(&mut vm, steps)
}

/// Run `graph` on both backends, assert they agree, and return the outcome.
pub fn assert_parity(graph: &Graph, steps: &[Drive<'_>]) -> Outcome {
    let interpreted = interpret(graph, steps);
    let compiled = compile_and_run(graph, steps);
    assert_eq!(
        interpreted, compiled,
        "backends disagree on graph '{}' after {steps:?}",
        graph.name
    );
    interpreted
}

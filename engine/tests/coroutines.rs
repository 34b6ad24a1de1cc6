// Suspension and resumption across ticks: waits park fibers, the host
// scheduler resumes them, and stopping a wait runs its cleanup chain. Each
// scenario is checked on both backends at several points in time.

mod common;

use common::*;
use weft::exec::Execution;
use weft::facade::EngineContext;
use weft::graph::Graph;
use weft::id::{NodeId, ScopeId};
use weft::interp::Interpreter;
use weft::node::{Sequence, Stop, Wait, WaitKind};
use weft::reference::MemberReference;
use weft::sched::FixedStepScheduler;
use weft::value::{Ty, Value};

fn wait(g: &mut Graph, kind: WaitKind, parallel: bool) -> NodeId {
    g.add_node(Wait {
        wait: kind,
        parallel,
        next: None,
        cancelled: None,
    })
}

// ── Wait kinds ──────────────────────────────────────────────────────────────

#[test]
fn until_resumes_once_the_condition_holds() {
    let mut g = Graph::new("Until");
    g.declare(ScopeId::ROOT, "ready", Ty::Bool, Some(Value::Bool(false)));
    let e = entry(&mut g, "start");
    let w = wait(
        &mut g,
        WaitKind::Until {
            condition: MemberReference::variable("ready"),
        },
        false,
    );
    let done = say(&mut g, "ready");
    chain(&mut g, &[e, w, done]);
    let go = entry(&mut g, "go");
    let flip = set(&mut g, "ready", Value::Bool(true).into());
    chain(&mut g, &[go, flip]);

    let parked = assert_parity(&g, &[Trigger("start"), Tick(3)]);
    assert!(parked.trace.is_empty());
    assert!(!parked.idle);

    // Setting the flag does not resume by itself; the next tick does.
    let flagged = assert_parity(&g, &[Trigger("start"), Tick(1), Trigger("go")]);
    assert!(flagged.trace.is_empty());
    assert_eq!(flagged.variables["ready"], Value::Bool(true));

    let resumed = assert_parity(&g, &[Trigger("start"), Tick(1), Trigger("go"), Tick(1)]);
    assert_eq!(resumed.trace, vec!["ready"]);
    assert!(resumed.idle);
}

#[test]
fn until_that_already_holds_does_not_suspend() {
    let mut g = Graph::new("AlreadyTrue");
    let e = entry(&mut g, "start");
    let w = wait(
        &mut g,
        WaitKind::Until {
            condition: Value::Bool(true).into(),
        },
        false,
    );
    let done = say(&mut g, "through");
    chain(&mut g, &[e, w, done]);

    let outcome = assert_parity(&g, &[Trigger("start")]);
    assert_eq!(outcome.trace, vec!["through"]);
    assert!(outcome.idle);
}

#[test]
fn seconds_compare_against_the_host_clock() {
    let mut g = Graph::new("Timed");
    let e = entry(&mut g, "start");
    let w = wait(
        &mut g,
        WaitKind::Seconds {
            duration: Value::Float(0.5).into(),
        },
        false,
    );
    let done = say(&mut g, "elapsed");
    chain(&mut g, &[e, w, done]);

    // The common driver advances the clock by 0.25 s per tick.
    let early = assert_parity(&g, &[Trigger("start"), Tick(1)]);
    assert!(early.trace.is_empty());
    let due = assert_parity(&g, &[Trigger("start"), Tick(2)]);
    assert_eq!(due.trace, vec!["elapsed"]);
    assert!(due.idle);
}

#[test]
fn tick_counts_resume_after_that_many_ticks() {
    let mut g = Graph::new("Counted");
    let e = entry(&mut g, "start");
    let w = wait(
        &mut g,
        WaitKind::Ticks {
            count: Value::Int(3).into(),
        },
        false,
    );
    let done = say(&mut g, "counted");
    chain(&mut g, &[e, w, done]);

    assert!(assert_parity(&g, &[Trigger("start"), Tick(2)]).trace.is_empty());
    assert_eq!(
        assert_parity(&g, &[Trigger("start"), Tick(3)]).trace,
        vec!["counted"]
    );
}

// ── Parallel and sequential waits ───────────────────────────────────────────

fn sibling_graph(parallel: bool) -> Graph {
    let mut g = Graph::new(if parallel { "Parallel" } else { "Sequential" });
    let e = entry(&mut g, "start");
    let seq = g.add_node(Sequence { targets: vec![] });
    let w = wait(&mut g, WaitKind::NextTick, parallel);
    let waited = say(&mut g, "waited");
    let sibling = say(&mut g, "sibling");
    g.connect(e, "next", seq).unwrap();
    g.connect(seq, "then_0", w).unwrap();
    g.connect(seq, "then_1", sibling).unwrap();
    g.connect(w, "next", waited).unwrap();
    g
}

#[test]
fn parallel_wait_lets_later_siblings_run() {
    let g = sibling_graph(true);
    let now = assert_parity(&g, &[Trigger("start")]);
    assert_eq!(now.trace, vec!["sibling"]);
    assert!(!now.idle);
    let later = assert_parity(&g, &[Trigger("start"), Tick(1)]);
    assert_eq!(later.trace, vec!["sibling", "waited"]);
    assert!(later.idle);
}

#[test]
fn sequential_wait_holds_later_siblings() {
    let g = sibling_graph(false);
    let now = assert_parity(&g, &[Trigger("start")]);
    assert!(now.trace.is_empty());
    let later = assert_parity(&g, &[Trigger("start"), Tick(1)]);
    assert_eq!(later.trace, vec!["waited", "sibling"]);
}

// ── Stopping ────────────────────────────────────────────────────────────────

/// `start` spawns a half-second wait and reports; `halt` stops the wait.
fn waits_graph() -> Graph {
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

#[test]
fn stopping_a_wait_runs_its_cleanup() {
    let g = waits_graph();
    let stopped = assert_parity(&g, &[Trigger("start"), Trigger("halt"), Tick(4)]);
    assert_eq!(stopped.trace, vec!["started", "cancelled"]);
    assert_eq!(stopped.variables["x"], Value::Int(0));
    assert!(stopped.idle);
}

#[test]
fn unstopped_wait_completes() {
    let g = waits_graph();
    let finished = assert_parity(&g, &[Trigger("start"), Tick(2)]);
    assert_eq!(finished.trace, vec!["started"]);
    assert_eq!(finished.variables["x"], Value::Int(1));
    assert!(finished.idle);
}

#[test]
fn stopping_an_idle_wait_skips_cleanup() {
    let g = waits_graph();
    let outcome = assert_parity(&g, &[Trigger("halt")]);
    assert!(outcome.trace.is_empty());
    let outcome = assert_parity(&g, &[Trigger("start"), Tick(2), Trigger("halt")]);
    assert_eq!(outcome.trace, vec!["started"]);
}

#[test]
fn scheduler_sees_every_suspension_closed() {
    let g = waits_graph();
    let ctx = EngineContext::with_builtins();
    let mut it = Interpreter::new(&ctx, &g).unwrap();
    let mut sched = FixedStepScheduler::new(0.25);
    it.trigger("start", &mut sched).unwrap();
    assert_eq!(sched.open(), 1);
    it.trigger("halt", &mut sched).unwrap();
    assert_eq!(sched.open(), 0);
    assert_eq!(sched.stats().started, 1);
    assert_eq!(sched.stats().cancelled, 1);
    assert!(it.is_idle());
}

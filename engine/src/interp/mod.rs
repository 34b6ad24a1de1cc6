// interp/mod.rs — Reflection interpreter
//
// Walks a graph directly, resolving member references through the shared
// access helpers on every read. Execution is cooperative: each triggered
// entry runs on a fiber with an explicit frame stack, so finish chains of
// any length are trampolined and a suspended coroutine is simply a parked
// fiber.
//
// Frames:
//   Activate(n)  step n with `Start`
//   Resume(n)    step a suspended n with `Resume`
//   Return(n)    step n with `AfterCall` once its sub-branch ends
//   Boundary     error boundary (Branch per finish target, Body/Catch per call)
//
// Preconditions: the graph passed validation; `ctx` holds its types.
// Postconditions: node failures never escape; they become diagnostics.
// Failure modes: `new` fails when the graph instance cannot be created.
// Side effects: host state, scheduler suspensions, tracing events.

mod eval;

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::analysis::{GraphInfo, HoistItem};
use crate::diag::{Diagnostic, Location};
use crate::error::{EngineError, ResolutionError};
use crate::exec::{slot_values, Execution};
use crate::facade::EngineContext;
use crate::graph::Graph;
use crate::host::HostState;
use crate::id::{FiberId, IdAllocator, NodeId, SuspensionHandle};
use crate::node::{NodeState, NodeStatus, Step, StepKind};
use crate::resolve::TypeCx;
use crate::sched::HostScheduler;
use crate::value::Value;

// ── Fibers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryKind {
    Branch,
    Body,
    Catch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Activate(NodeId),
    Resume(NodeId),
    Return(NodeId),
    Boundary { kind: BoundaryKind, opaque: bool },
}

#[derive(Debug)]
struct Fiber {
    id: FiberId,
    frames: Vec<Frame>,
    /// Wait node this fiber is parked at, with its scheduler handle.
    waiting: Option<(NodeId, SuspensionHandle)>,
    /// The sub-branch just unwound to a Body or Catch boundary.
    failed: bool,
}

impl Fiber {
    fn push_boundary(&mut self, kind: BoundaryKind) {
        let opaque = !self.frames.iter().any(|f| {
            matches!(
                f,
                Frame::Boundary {
                    kind: BoundaryKind::Catch,
                    ..
                }
            )
        });
        self.frames.push(Frame::Boundary { kind, opaque });
    }

    /// Push finish targets so they run left to right, each behind its own
    /// branch boundary. A lone target reuses a boundary already on top.
    fn push_targets(&mut self, targets: &[NodeId]) {
        if let [only] = targets {
            if let Some(Frame::Boundary {
                kind: BoundaryKind::Branch,
                ..
            }) = self.frames.last()
            {
                self.frames.push(Frame::Activate(*only));
                return;
            }
        }
        for &target in targets.iter().rev() {
            self.push_boundary(BoundaryKind::Branch);
            self.frames.push(Frame::Activate(target));
        }
    }

    /// Whether the fiber is inside a loop body, try body or catch body.
    fn in_region(&self) -> bool {
        self.frames.iter().any(|f| {
            matches!(
                f,
                Frame::Boundary {
                    kind: BoundaryKind::Body | BoundaryKind::Catch,
                    ..
                }
            )
        })
    }

    /// Drop frames up to the first boundary that stops a failure.
    fn unwind(&mut self) {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Boundary { kind, opaque } = frame {
                if kind == BoundaryKind::Catch || opaque {
                    self.failed = kind != BoundaryKind::Branch;
                    return;
                }
            }
        }
    }
}

/// What the run loop does after one step.
enum Flow {
    Continue,
    Park,
}

// ── Interpreter ──────────────────────────────────────────────────────────

pub struct Interpreter<'g> {
    ctx: &'g EngineContext,
    graph: &'g Graph,
    info: GraphInfo,
    plans: Vec<Rc<[HoistItem]>>,
    host: HostState,
    this: Value,
    states: Vec<NodeState>,
    fibers: BTreeMap<FiberId, Fiber>,
    ids: IdAllocator,
    diagnostics: Vec<Diagnostic>,
    /// Side-effecting value nodes computed by the current read plan.
    memo: HashMap<NodeId, Value>,
    /// Node being stepped; selects the read plan.
    stepping: NodeId,
    last_failed: bool,
}

impl<'g> Interpreter<'g> {
    /// Interpreter over `graph`. Registers the graph's proxy type so the
    /// instance can be created even when no compiled unit is loaded.
    pub fn new(ctx: &'g EngineContext, graph: &'g Graph) -> Result<Self, EngineError> {
        ctx.register_graph(graph);
        let desc = ctx
            .type_desc(&graph.name)
            .ok_or_else(|| ResolutionError::UnknownType(graph.name.clone()))?;
        let mut host = HostState::new();
        let this = host.instantiate(&desc);
        let info = GraphInfo::analyze(ctx, graph);
        let mut cx = TypeCx::new(ctx, graph);
        let plans = graph
            .nodes
            .iter()
            .map(|n| Rc::from(info.plan(&mut cx, &n.behavior.operands())))
            .collect();
        debug!(graph = %graph.name, nodes = graph.nodes.len(), "interpreter ready");
        Ok(Self {
            ctx,
            graph,
            info,
            plans,
            host,
            this,
            states: vec![NodeState::default(); graph.nodes.len()],
            fibers: BTreeMap::new(),
            ids: IdAllocator::new(),
            diagnostics: Vec::new(),
            memo: HashMap::new(),
            stepping: NodeId(0),
            last_failed: false,
        })
    }

    pub fn host(&self) -> &HostState {
        &self.host
    }

    pub fn status(&self, node: NodeId) -> NodeStatus {
        self.states
            .get(node.index())
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Number of parked fibers.
    pub fn suspended(&self) -> usize {
        self.fibers.len()
    }

    fn fresh_fiber(&mut self, start: NodeId) -> Fiber {
        Fiber {
            id: self.ids.alloc_fiber(),
            frames: vec![
                Frame::Boundary {
                    kind: BoundaryKind::Branch,
                    opaque: true,
                },
                Frame::Activate(start),
            ],
            waiting: None,
            failed: false,
        }
    }

    /// Run `fiber` until it parks or ends; parked fibers are stored.
    fn run(&mut self, mut fiber: Fiber, sched: &mut dyn HostScheduler) {
        while let Some(frame) = fiber.frames.pop() {
            let flow = match frame {
                Frame::Boundary { .. } => Flow::Continue,
                Frame::Activate(n) => self.step(&mut fiber, n, StepKind::Start, sched),
                Frame::Resume(n) => self.step(&mut fiber, n, StepKind::Resume, sched),
                Frame::Return(n) => {
                    self.last_failed = std::mem::take(&mut fiber.failed);
                    self.step(&mut fiber, n, StepKind::AfterCall, sched)
                }
            };
            if let Flow::Park = flow {
                debug!(fiber = %fiber.id, frames = fiber.frames.len(), "fiber suspended");
                self.fibers.insert(fiber.id, fiber);
                return;
            }
        }
    }

    fn step(&mut self, fiber: &mut Fiber, n: NodeId, kind: StepKind, sched: &mut dyn HostScheduler) -> Flow {
        let graph = self.graph;
        let Some(exec) = graph.behavior(n).and_then(|b| b.as_executable()) else {
            let err = EngineError::Structural(format!("flow reached non-executable node {n}"));
            self.fail(fiber, n, err);
            return Flow::Continue;
        };
        if kind == StepKind::Start {
            if self.fibers.values().any(|f| f.waiting.map(|w| w.0) == Some(n)) {
                self.stop_wait(n, sched);
            }
            if let Some(state) = self.states.get_mut(n.index()) {
                state.status = NodeStatus::Running;
            }
        }
        let mut state = self.states.get(n.index()).cloned().unwrap_or_default();
        self.stepping = n;
        let result = {
            let mut cx = eval::StepCx { it: self, sched: &mut *sched };
            exec.step(&mut cx, &mut state, kind)
        };
        if let Some(slot) = self.states.get_mut(n.index()) {
            *slot = state;
        }
        let resumed = match fiber.waiting {
            Some((w, h)) if w == n && kind == StepKind::Resume => Some(h),
            _ => None,
        };
        if let (Some(h), false) = (resumed, matches!(result, Ok(Step::Suspend))) {
            fiber.waiting = None;
            sched.resume_suspension(h);
            debug!(fiber = %fiber.id, node = %n, "fiber resumed");
        }
        match result {
            Ok(Step::Finish(targets)) => {
                fiber.push_targets(&targets);
                Flow::Continue
            }
            Ok(Step::Call { target, catching }) => {
                fiber.frames.push(Frame::Return(n));
                fiber.push_boundary(if catching {
                    BoundaryKind::Catch
                } else {
                    BoundaryKind::Body
                });
                fiber.frames.push(Frame::Activate(target));
                Flow::Continue
            }
            Ok(Step::Suspend) => self.suspend(fiber, n, resumed, sched),
            Err(err) => {
                self.fail(fiber, n, err);
                Flow::Continue
            }
        }
    }

    fn suspend(
        &mut self,
        fiber: &mut Fiber,
        n: NodeId,
        handle: Option<SuspensionHandle>,
        sched: &mut dyn HostScheduler,
    ) -> Flow {
        let handle = handle.unwrap_or_else(|| {
            let h = self.ids.alloc_suspension();
            sched.start_suspension(h);
            h
        });
        let parallel = self
            .graph
            .behavior(n)
            .and_then(|b| b.as_suspendable())
            .is_some_and(|s| s.is_parallel());
        if parallel && fiber.waiting.is_none() && !fiber.in_region() {
            let from = fiber
                .frames
                .iter()
                .rposition(|f| {
                    matches!(
                        f,
                        Frame::Boundary {
                            kind: BoundaryKind::Branch,
                            ..
                        }
                    )
                })
                .unwrap_or(0);
            let mut frames = fiber.frames.split_off(from);
            frames.push(Frame::Resume(n));
            let detached = Fiber {
                id: self.ids.alloc_fiber(),
                frames,
                waiting: Some((n, handle)),
                failed: false,
            };
            debug!(from = %fiber.id, fiber = %detached.id, node = %n, "branch detached");
            self.fibers.insert(detached.id, detached);
            return Flow::Continue;
        }
        fiber.waiting = Some((n, handle));
        fiber.frames.push(Frame::Resume(n));
        Flow::Park
    }

    fn fail(&mut self, fiber: &mut Fiber, n: NodeId, err: EngineError) {
        if let Some(state) = self.states.get_mut(n.index()) {
            state.status = NodeStatus::Failure;
        }
        warn!(node = %self.graph.display_name(n), error = %err, "node failed");
        self.diagnostics.push(err.to_diagnostic(Location::node(n)));
        fiber.unwind();
    }

    /// Kill every parked fiber waiting at `n`, reset the wait, and run its
    /// cleanup chain when something was actually stopped.
    fn stop_wait(&mut self, n: NodeId, sched: &mut dyn HostScheduler) {
        let victims: Vec<FiberId> = self
            .fibers
            .iter()
            .filter(|(_, f)| f.waiting.map(|w| w.0) == Some(n))
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            if let Some(fiber) = self.fibers.remove(id) {
                if let Some((_, h)) = fiber.waiting {
                    sched.cancel_suspension(h);
                }
                debug!(fiber = %id, node = %n, "fiber killed");
            }
        }
        if let Some(state) = self.states.get_mut(n.index()) {
            *state = NodeState::default();
        }
        if victims.is_empty() {
            return;
        }
        let cleanup = self
            .graph
            .behavior(n)
            .and_then(|b| b.as_suspendable())
            .and_then(|s| s.cleanup());
        if let Some(cleanup) = cleanup {
            let fiber = self.fresh_fiber(cleanup);
            self.run(fiber, sched);
        }
    }
}

impl Execution for Interpreter<'_> {
    fn trigger(&mut self, event: &str, sched: &mut dyn HostScheduler) -> Result<usize, EngineError> {
        let entries: Vec<NodeId> = self
            .graph
            .entries()
            .into_iter()
            .filter(|(_, e)| *e == event)
            .map(|(id, _)| id)
            .collect();
        debug!(event, handlers = entries.len(), "trigger");
        for &entry in &entries {
            let fiber = self.fresh_fiber(entry);
            self.run(fiber, sched);
        }
        Ok(entries.len())
    }

    fn tick(&mut self, sched: &mut dyn HostScheduler) {
        let parked: Vec<FiberId> = self.fibers.keys().copied().collect();
        for id in parked {
            // Stopped earlier in this tick.
            let Some(fiber) = self.fibers.remove(&id) else {
                continue;
            };
            self.run(fiber, sched);
        }
    }

    fn variables(&self) -> BTreeMap<String, Value> {
        slot_values(&self.host, &self.this, self.graph.slots().map(|s| s.slot_name()))
    }

    fn trace(&self) -> &[String] {
        self.host.trace()
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn is_idle(&self) -> bool {
        self.fibers.is_empty()
    }
}

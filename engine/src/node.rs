// node.rs — Node behaviors, capability traits and per-node runtime state
//
// A node is a flat record (`graph::Node`) holding one `Behavior`. Each
// behavior implements only the capabilities it has:
//
//   Executable     — takes part in control flow; stepped by the interpreter
//   ValueProducing — exposes named outputs readable through NodeOutput refs
//   Suspendable    — may yield to the scheduler (coroutines)
//
// The emitter lowers the same behaviors by pattern matching; the operand
// lists returned by each behavior are shared by both backends so reads and
// their evaluate-once plan line up exactly.

use serde::{Deserialize, Serialize};

use crate::analysis::Operand;
use crate::error::EngineError;
use crate::id::NodeId;
use crate::reference::MemberReference;
use crate::value::{apply_binary, apply_unary, BinaryOp, Ty, UnaryOp, Value};

// ── Runtime state ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    NotStarted,
    Running,
    Success,
    Failure,
}

/// Behavior-specific scratch kept between steps of one activation. There is
/// one slot per node; a new activation overwrites it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Scratch {
    #[default]
    Idle,
    Loop {
        index: Value,
        end: Value,
        step: Value,
    },
    Cached(Value),
    Waiting {
        remaining: Value,
        deadline: Value,
    },
    Trying {
        in_catch: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub status: NodeStatus,
    pub scratch: Scratch,
}

impl NodeState {
    /// Move a running activation to `Success`. Finishing twice is an error.
    pub fn finish(&mut self) -> Result<(), EngineError> {
        if self.status != NodeStatus::Running {
            return Err(EngineError::FinishReentry(format!("{:?}", self.status)));
        }
        self.status = NodeStatus::Success;
        Ok(())
    }
}

/// Result of stepping an executable node.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Completed; activate the targets left to right.
    Finish(Vec<NodeId>),
    /// Run a sub-branch to completion, then step this node again.
    Call { target: NodeId, catching: bool },
    /// Yield to the scheduler; re-stepped on later ticks.
    Suspend,
}

/// Why a node is being stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Start,
    AfterCall,
    Resume,
}

// ── Capability traits ────────────────────────────────────────────────────

pub trait ValueContext {
    fn eval(&mut self, reference: &MemberReference) -> Result<Value, EngineError>;
    fn instantiate(&mut self, ty: &Ty) -> Result<Value, EngineError>;
}

pub trait StepContext: ValueContext {
    /// Evaluate `operands` under the evaluate-once plan. Returns one value
    /// per `Operand::Read`, in order.
    fn read(&mut self, operands: &[Operand<'_>]) -> Result<Vec<Value>, EngineError>;
    fn write(&mut self, target: &MemberReference, value: Value) -> Result<(), EngineError>;
    fn now(&self) -> f64;
    /// Whether the sub-branch started by the last `Step::Call` failed.
    fn branch_failed(&self) -> bool;
    /// Stop a running coroutine: kill its fiber, then run its cleanup.
    fn stop(&mut self, node: NodeId) -> Result<(), EngineError>;
}

pub trait TypeContext {
    fn ref_type(&mut self, reference: &MemberReference) -> Result<Ty, EngineError>;
    fn type_exists(&self, ty: &Ty) -> bool;
}

pub trait Executable {
    /// Named flow ports in declaration order.
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)>;
    fn step(
        &self,
        cx: &mut dyn StepContext,
        state: &mut NodeState,
        kind: StepKind,
    ) -> Result<Step, EngineError>;
}

pub trait ValueProducing {
    fn outputs(&self) -> &'static [&'static str];
    fn read(
        &self,
        port: &str,
        cx: &mut dyn ValueContext,
        state: &NodeState,
    ) -> Result<Value, EngineError>;
    fn output_type(&self, port: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError>;
    /// Side effects that do not come from any port reference.
    fn has_intrinsic_effects(&self) -> bool {
        false
    }
}

pub trait Suspendable {
    fn is_parallel(&self) -> bool;
    fn cleanup(&self) -> Option<NodeId>;
}

// ── Behaviors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Behavior {
    Entry(Entry),
    SetValue(SetValue),
    Invoke(Invoke),
    Branch(Branch),
    Sequence(Sequence),
    ForLoop(ForLoop),
    WhileLoop(WhileLoop),
    Try(Try),
    Cache(Cache),
    Wait(Wait),
    Stop(Stop),
    Throw(Throw),
    Binary(Binary),
    Unary(Unary),
    Get(Get),
    Construct(Construct),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub event: String,
    #[serde(default)]
    pub next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetValue {
    pub target: MemberReference,
    pub value: MemberReference,
    #[serde(default)]
    pub next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoke {
    pub call: MemberReference,
    #[serde(default)]
    pub next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub condition: MemberReference,
    #[serde(default)]
    pub on_true: Option<NodeId>,
    #[serde(default)]
    pub on_false: Option<NodeId>,
    #[serde(default)]
    pub finished: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub targets: Vec<Option<NodeId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    pub start: MemberReference,
    pub end: MemberReference,
    pub step: MemberReference,
    #[serde(default)]
    pub body: Option<NodeId>,
    #[serde(default)]
    pub finished: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileLoop {
    pub condition: MemberReference,
    #[serde(default)]
    pub body: Option<NodeId>,
    #[serde(default)]
    pub finished: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Try {
    #[serde(default)]
    pub body: Option<NodeId>,
    #[serde(default)]
    pub catch: Option<NodeId>,
    #[serde(default)]
    pub finished: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    pub value: MemberReference,
    #[serde(default)]
    pub next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitKind {
    NextTick,
    Ticks { count: MemberReference },
    Seconds { duration: MemberReference },
    Until { condition: MemberReference },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wait {
    pub wait: WaitKind,
    /// A parallel wait does not block the siblings that follow it.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub next: Option<NodeId>,
    /// Cleanup chain run when the wait is stopped while suspended.
    #[serde(default)]
    pub cancelled: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub node: NodeId,
    #[serde(default)]
    pub next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throw {
    pub message: MemberReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binary {
    pub op: BinaryOp,
    pub left: MemberReference,
    pub right: MemberReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unary {
    pub op: UnaryOp,
    pub operand: MemberReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Get {
    pub source: MemberReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Construct {
    pub ty: Ty,
}

// ── Behavior dispatch ────────────────────────────────────────────────────

impl Behavior {
    pub fn name(&self) -> &'static str {
        match self {
            Behavior::Entry(_) => "entry",
            Behavior::SetValue(_) => "set_value",
            Behavior::Invoke(_) => "invoke",
            Behavior::Branch(_) => "branch",
            Behavior::Sequence(_) => "sequence",
            Behavior::ForLoop(_) => "for_loop",
            Behavior::WhileLoop(_) => "while_loop",
            Behavior::Try(_) => "try",
            Behavior::Cache(_) => "cache",
            Behavior::Wait(_) => "wait",
            Behavior::Stop(_) => "stop",
            Behavior::Throw(_) => "throw",
            Behavior::Binary(_) => "binary",
            Behavior::Unary(_) => "unary",
            Behavior::Get(_) => "get",
            Behavior::Construct(_) => "construct",
        }
    }

    pub fn as_executable(&self) -> Option<&dyn Executable> {
        match self {
            Behavior::Entry(b) => Some(b),
            Behavior::SetValue(b) => Some(b),
            Behavior::Invoke(b) => Some(b),
            Behavior::Branch(b) => Some(b),
            Behavior::Sequence(b) => Some(b),
            Behavior::ForLoop(b) => Some(b),
            Behavior::WhileLoop(b) => Some(b),
            Behavior::Try(b) => Some(b),
            Behavior::Cache(b) => Some(b),
            Behavior::Wait(b) => Some(b),
            Behavior::Stop(b) => Some(b),
            Behavior::Throw(b) => Some(b),
            Behavior::Binary(_) | Behavior::Unary(_) | Behavior::Get(_) | Behavior::Construct(_) => {
                None
            }
        }
    }

    pub fn as_value(&self) -> Option<&dyn ValueProducing> {
        match self {
            Behavior::ForLoop(b) => Some(b),
            Behavior::Cache(b) => Some(b),
            Behavior::Binary(b) => Some(b),
            Behavior::Unary(b) => Some(b),
            Behavior::Get(b) => Some(b),
            Behavior::Construct(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_suspendable(&self) -> Option<&dyn Suspendable> {
        match self {
            Behavior::Wait(b) => Some(b),
            _ => None,
        }
    }

    /// Pure data-flow node: its outputs are computed on read.
    pub fn is_value_node(&self) -> bool {
        self.as_value().is_some() && self.as_executable().is_none()
    }

    pub fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        self.as_executable()
            .map(|e| e.flow_ports())
            .unwrap_or_default()
    }

    /// Mutable access to a named flow port, for graph construction.
    pub fn flow_port_mut(&mut self, name: &str) -> Option<&mut Option<NodeId>> {
        match (self, name) {
            (Behavior::Entry(b), "next") => Some(&mut b.next),
            (Behavior::SetValue(b), "next") => Some(&mut b.next),
            (Behavior::Invoke(b), "next") => Some(&mut b.next),
            (Behavior::Cache(b), "next") => Some(&mut b.next),
            (Behavior::Stop(b), "next") => Some(&mut b.next),
            (Behavior::Wait(b), "next") => Some(&mut b.next),
            (Behavior::Wait(b), "cancelled") => Some(&mut b.cancelled),
            (Behavior::Branch(b), "true") => Some(&mut b.on_true),
            (Behavior::Branch(b), "false") => Some(&mut b.on_false),
            (Behavior::Branch(b), "finished") => Some(&mut b.finished),
            (Behavior::ForLoop(b), "body") => Some(&mut b.body),
            (Behavior::ForLoop(b), "finished") => Some(&mut b.finished),
            (Behavior::WhileLoop(b), "body") => Some(&mut b.body),
            (Behavior::WhileLoop(b), "finished") => Some(&mut b.finished),
            (Behavior::Try(b), "body") => Some(&mut b.body),
            (Behavior::Try(b), "catch") => Some(&mut b.catch),
            (Behavior::Try(b), "finished") => Some(&mut b.finished),
            (Behavior::Sequence(b), name) => {
                let index: usize = name.strip_prefix("then_")?.parse().ok()?;
                if b.targets.len() <= index {
                    b.targets.resize(index + 1, None);
                }
                b.targets.get_mut(index)
            }
            _ => None,
        }
    }

    /// Every value port with its reference, in declaration order.
    pub fn value_ports(&self) -> Vec<(&'static str, &MemberReference)> {
        match self {
            Behavior::SetValue(b) => vec![("target", &b.target), ("value", &b.value)],
            Behavior::Invoke(b) => vec![("call", &b.call)],
            Behavior::Branch(b) => vec![("condition", &b.condition)],
            Behavior::ForLoop(b) => vec![("start", &b.start), ("end", &b.end), ("step", &b.step)],
            Behavior::WhileLoop(b) => vec![("condition", &b.condition)],
            Behavior::Cache(b) => vec![("value", &b.value)],
            Behavior::Wait(b) => match &b.wait {
                WaitKind::NextTick => vec![],
                WaitKind::Ticks { count } => vec![("count", count)],
                WaitKind::Seconds { duration } => vec![("duration", duration)],
                WaitKind::Until { condition } => vec![("condition", condition)],
            },
            Behavior::Throw(b) => vec![("message", &b.message)],
            Behavior::Binary(b) => vec![("left", &b.left), ("right", &b.right)],
            Behavior::Unary(b) => vec![("operand", &b.operand)],
            Behavior::Get(b) => vec![("source", &b.source)],
            Behavior::Entry(_)
            | Behavior::Sequence(_)
            | Behavior::Try(_)
            | Behavior::Stop(_)
            | Behavior::Construct(_) => vec![],
        }
    }

    pub fn value_ports_mut(&mut self) -> Vec<&mut MemberReference> {
        match self {
            Behavior::SetValue(b) => vec![&mut b.target, &mut b.value],
            Behavior::Invoke(b) => vec![&mut b.call],
            Behavior::Branch(b) => vec![&mut b.condition],
            Behavior::ForLoop(b) => vec![&mut b.start, &mut b.end, &mut b.step],
            Behavior::WhileLoop(b) => vec![&mut b.condition],
            Behavior::Cache(b) => vec![&mut b.value],
            Behavior::Wait(b) => match &mut b.wait {
                WaitKind::NextTick => vec![],
                WaitKind::Ticks { count } => vec![count],
                WaitKind::Seconds { duration } => vec![duration],
                WaitKind::Until { condition } => vec![condition],
            },
            Behavior::Throw(b) => vec![&mut b.message],
            Behavior::Binary(b) => vec![&mut b.left, &mut b.right],
            Behavior::Unary(b) => vec![&mut b.operand],
            Behavior::Get(b) => vec![&mut b.source],
            Behavior::Entry(_)
            | Behavior::Sequence(_)
            | Behavior::Try(_)
            | Behavior::Stop(_)
            | Behavior::Construct(_) => vec![],
        }
    }
}

impl Behavior {
    /// Operand list of this behavior's read point; empty for nodes that read
    /// nothing during a step.
    pub fn operands(&self) -> Vec<Operand<'_>> {
        match self {
            Behavior::SetValue(b) => b.operands().to_vec(),
            Behavior::Invoke(b) => b.operands().to_vec(),
            Behavior::Branch(b) => b.operands().to_vec(),
            Behavior::ForLoop(b) => b.operands().to_vec(),
            Behavior::WhileLoop(b) => b.operands().to_vec(),
            Behavior::Cache(b) => b.operands().to_vec(),
            Behavior::Wait(b) => b.wait.operands(),
            Behavior::Throw(b) => b.operands().to_vec(),
            _ => Vec::new(),
        }
    }
}

fn port(name: &str, target: Option<NodeId>) -> (String, Option<NodeId>) {
    (name.to_string(), target)
}

// ── Operand lists (shared with the emitter) ──────────────────────────────

impl SetValue {
    pub fn operands(&self) -> [Operand<'_>; 2] {
        [Operand::Read(&self.value), Operand::Target(&self.target)]
    }
}

impl Invoke {
    pub fn operands(&self) -> [Operand<'_>; 1] {
        [Operand::Read(&self.call)]
    }
}

impl Branch {
    pub fn operands(&self) -> [Operand<'_>; 1] {
        [Operand::Read(&self.condition)]
    }
}

impl ForLoop {
    pub fn operands(&self) -> [Operand<'_>; 3] {
        [
            Operand::Read(&self.start),
            Operand::Read(&self.end),
            Operand::Read(&self.step),
        ]
    }

    /// Advance `index` past `end` without running a body.
    fn exhaust(index: Value, end: &Value, step: &Value) -> Result<Value, EngineError> {
        let mut index = index;
        while apply_binary(BinaryOp::Lt, &index, end)?.as_bool()? {
            index = apply_binary(BinaryOp::Add, &index, step)?;
        }
        Ok(index)
    }

    fn iterate(&self, state: &mut NodeState) -> Result<Step, EngineError> {
        let Scratch::Loop { index, end, step } = &mut state.scratch else {
            return Err(EngineError::Structural("for-loop stepped without bounds".into()));
        };
        if !apply_binary(BinaryOp::Lt, index, end)?.as_bool()? {
            state.finish()?;
            return Ok(Step::Finish(self.finished.into_iter().collect()));
        }
        match self.body {
            Some(body) => Ok(Step::Call {
                target: body,
                catching: false,
            }),
            None => {
                *index = Self::exhaust(index.clone(), end, step)?;
                state.finish()?;
                Ok(Step::Finish(self.finished.into_iter().collect()))
            }
        }
    }
}

pub const FOR_STEP_MESSAGE: &str = "for-loop step must be positive";

impl WhileLoop {
    pub fn operands(&self) -> [Operand<'_>; 1] {
        [Operand::Read(&self.condition)]
    }
}

impl Cache {
    pub fn operands(&self) -> [Operand<'_>; 1] {
        [Operand::Read(&self.value)]
    }
}

impl WaitKind {
    pub fn operands(&self) -> Vec<Operand<'_>> {
        match self {
            WaitKind::NextTick => vec![],
            WaitKind::Ticks { count } => vec![Operand::Read(count)],
            WaitKind::Seconds { duration } => vec![Operand::Read(duration)],
            WaitKind::Until { condition } => vec![Operand::Read(condition)],
        }
    }
}

impl Throw {
    pub fn operands(&self) -> [Operand<'_>; 1] {
        [Operand::Read(&self.message)]
    }
}

fn finish_with(state: &mut NodeState, targets: Vec<NodeId>) -> Result<Step, EngineError> {
    state.finish()?;
    Ok(Step::Finish(targets))
}

fn first(values: Vec<Value>) -> Value {
    values.into_iter().next().unwrap_or(Value::Null)
}

// ── Executable impls ─────────────────────────────────────────────────────

impl Executable for Entry {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("next", self.next)]
    }

    fn step(&self, _: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        finish_with(state, self.next.into_iter().collect())
    }
}

impl Executable for SetValue {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("next", self.next)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        let value = first(cx.read(&self.operands())?);
        cx.write(&self.target, value)?;
        finish_with(state, self.next.into_iter().collect())
    }
}

impl Executable for Invoke {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("next", self.next)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        cx.read(&self.operands())?;
        finish_with(state, self.next.into_iter().collect())
    }
}

impl Executable for Branch {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![
            port("true", self.on_true),
            port("false", self.on_false),
            port("finished", self.finished),
        ]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        let taken = if first(cx.read(&self.operands())?).as_bool()? {
            self.on_true
        } else {
            self.on_false
        };
        // Explicit branch target before the generic `finished`.
        let targets = taken.into_iter().chain(self.finished).collect();
        finish_with(state, targets)
    }
}

impl Executable for Sequence {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        self.targets
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("then_{i}"), *t))
            .collect()
    }

    fn step(&self, _: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        finish_with(state, self.targets.iter().flatten().copied().collect())
    }
}

impl Executable for ForLoop {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("body", self.body), port("finished", self.finished)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, kind: StepKind) -> Result<Step, EngineError> {
        match kind {
            StepKind::Start => {
                let mut vals = cx.read(&self.operands())?.into_iter();
                let start = vals.next().unwrap_or(Value::Null);
                let end = vals.next().unwrap_or(Value::Null);
                let step = vals.next().unwrap_or(Value::Null);
                if apply_binary(BinaryOp::Le, &step, &Value::Int(0))?.as_bool()? {
                    return Err(EngineError::fault(FOR_STEP_MESSAGE));
                }
                state.scratch = Scratch::Loop {
                    index: start,
                    end,
                    step,
                };
            }
            StepKind::AfterCall | StepKind::Resume => {
                if let Scratch::Loop { index, step, .. } = &mut state.scratch {
                    *index = apply_binary(BinaryOp::Add, index, step)?;
                }
            }
        }
        self.iterate(state)
    }
}

impl Executable for WhileLoop {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("body", self.body), port("finished", self.finished)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        loop {
            let holds = first(cx.read(&self.operands())?).as_bool()?;
            match (holds, self.body) {
                (false, _) => return finish_with(state, self.finished.into_iter().collect()),
                (true, Some(body)) => {
                    return Ok(Step::Call {
                        target: body,
                        catching: false,
                    })
                }
                (true, None) => continue,
            }
        }
    }
}

impl Executable for Try {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![
            port("body", self.body),
            port("catch", self.catch),
            port("finished", self.finished),
        ]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, kind: StepKind) -> Result<Step, EngineError> {
        let done = |state: &mut NodeState| finish_with(state, self.finished.into_iter().collect());
        match kind {
            StepKind::Start => match self.body {
                Some(body) => {
                    state.scratch = Scratch::Trying { in_catch: false };
                    Ok(Step::Call {
                        target: body,
                        catching: true,
                    })
                }
                None => done(state),
            },
            StepKind::AfterCall | StepKind::Resume => {
                let in_catch = matches!(state.scratch, Scratch::Trying { in_catch: true });
                match self.catch {
                    Some(catch) if !in_catch && cx.branch_failed() => {
                        state.scratch = Scratch::Trying { in_catch: true };
                        Ok(Step::Call {
                            target: catch,
                            catching: false,
                        })
                    }
                    _ => done(state),
                }
            }
        }
    }
}

impl Executable for Cache {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("next", self.next)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        let value = first(cx.read(&self.operands())?);
        state.scratch = Scratch::Cached(value);
        finish_with(state, self.next.into_iter().collect())
    }
}

impl Executable for Wait {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("next", self.next), port("cancelled", self.cancelled)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, kind: StepKind) -> Result<Step, EngineError> {
        let now = Value::Float(cx.now());
        let waiting = match (&self.wait, kind) {
            (WaitKind::NextTick, StepKind::Start) => true,
            (WaitKind::NextTick, _) => false,
            (WaitKind::Ticks { .. }, kind) => {
                if kind == StepKind::Start {
                    let count = first(cx.read(&self.wait.operands())?);
                    state.scratch = Scratch::Waiting {
                        remaining: count,
                        deadline: Value::Null,
                    };
                }
                match &mut state.scratch {
                    Scratch::Waiting { remaining, .. } => {
                        let more = apply_binary(BinaryOp::Gt, remaining, &Value::Int(0))?.as_bool()?;
                        if more {
                            *remaining = apply_binary(BinaryOp::Sub, remaining, &Value::Int(1))?;
                        }
                        more
                    }
                    _ => false,
                }
            }
            (WaitKind::Seconds { .. }, kind) => {
                if kind == StepKind::Start {
                    let duration = first(cx.read(&self.wait.operands())?);
                    state.scratch = Scratch::Waiting {
                        remaining: Value::Null,
                        deadline: apply_binary(BinaryOp::Add, &now, &duration)?,
                    };
                }
                match &state.scratch {
                    Scratch::Waiting { deadline, .. } => {
                        apply_binary(BinaryOp::Lt, &now, deadline)?.as_bool()?
                    }
                    _ => false,
                }
            }
            (WaitKind::Until { .. }, _) => !first(cx.read(&self.wait.operands())?).as_bool()?,
        };
        if waiting {
            Ok(Step::Suspend)
        } else {
            finish_with(state, self.next.into_iter().collect())
        }
    }
}

impl Suspendable for Wait {
    fn is_parallel(&self) -> bool {
        self.parallel
    }

    fn cleanup(&self) -> Option<NodeId> {
        self.cancelled
    }
}

impl Executable for Stop {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![port("next", self.next)]
    }

    fn step(&self, cx: &mut dyn StepContext, state: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        cx.stop(self.node)?;
        finish_with(state, self.next.into_iter().collect())
    }
}

impl Executable for Throw {
    fn flow_ports(&self) -> Vec<(String, Option<NodeId>)> {
        vec![]
    }

    fn step(&self, cx: &mut dyn StepContext, _: &mut NodeState, _: StepKind) -> Result<Step, EngineError> {
        let message = first(cx.read(&self.operands())?);
        Err(EngineError::Fault(message.to_string()))
    }
}

// ── ValueProducing impls ─────────────────────────────────────────────────

fn no_output(port: &str) -> EngineError {
    EngineError::Structural(format!("no output named '{port}'"))
}

impl ValueProducing for ForLoop {
    fn outputs(&self) -> &'static [&'static str] {
        &["index"]
    }

    fn read(&self, port: &str, _: &mut dyn ValueContext, state: &NodeState) -> Result<Value, EngineError> {
        match (port, &state.scratch) {
            ("index", Scratch::Loop { index, .. }) => Ok(index.clone()),
            ("index", _) => Ok(Value::Null),
            _ => Err(no_output(port)),
        }
    }

    fn output_type(&self, _: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError> {
        let start = tx.ref_type(&self.start)?;
        let step = tx.ref_type(&self.step)?;
        Ok(match (start, step) {
            (Ty::Int, Ty::Int) => Ty::Int,
            (Ty::Any, _) | (_, Ty::Any) => Ty::Any,
            _ => Ty::Float,
        })
    }
}

impl ValueProducing for Cache {
    fn outputs(&self) -> &'static [&'static str] {
        &["value"]
    }

    fn read(&self, port: &str, _: &mut dyn ValueContext, state: &NodeState) -> Result<Value, EngineError> {
        match (port, &state.scratch) {
            ("value", Scratch::Cached(v)) => Ok(v.clone()),
            ("value", _) => Ok(Value::Null),
            _ => Err(no_output(port)),
        }
    }

    fn output_type(&self, _: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError> {
        tx.ref_type(&self.value)
    }
}

impl ValueProducing for Binary {
    fn outputs(&self) -> &'static [&'static str] {
        &["value"]
    }

    fn read(&self, _: &str, cx: &mut dyn ValueContext, _: &NodeState) -> Result<Value, EngineError> {
        let l = cx.eval(&self.left)?;
        let r = cx.eval(&self.right)?;
        apply_binary(self.op, &l, &r)
    }

    fn output_type(&self, _: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError> {
        let l = tx.ref_type(&self.left)?;
        let r = tx.ref_type(&self.right)?;
        self.op.result_type(&l, &r)
    }
}

impl ValueProducing for Unary {
    fn outputs(&self) -> &'static [&'static str] {
        &["value"]
    }

    fn read(&self, _: &str, cx: &mut dyn ValueContext, _: &NodeState) -> Result<Value, EngineError> {
        let v = cx.eval(&self.operand)?;
        apply_unary(self.op, &v)
    }

    fn output_type(&self, _: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError> {
        let t = tx.ref_type(&self.operand)?;
        self.op.result_type(&t)
    }
}

impl ValueProducing for Get {
    fn outputs(&self) -> &'static [&'static str] {
        &["value"]
    }

    fn read(&self, _: &str, cx: &mut dyn ValueContext, _: &NodeState) -> Result<Value, EngineError> {
        cx.eval(&self.source)
    }

    fn output_type(&self, _: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError> {
        tx.ref_type(&self.source)
    }
}

impl ValueProducing for Construct {
    fn outputs(&self) -> &'static [&'static str] {
        &["value"]
    }

    fn read(&self, _: &str, cx: &mut dyn ValueContext, _: &NodeState) -> Result<Value, EngineError> {
        cx.instantiate(&self.ty)
    }

    fn output_type(&self, _: &str, tx: &mut dyn TypeContext) -> Result<Ty, EngineError> {
        if tx.type_exists(&self.ty) {
            Ok(self.ty.clone())
        } else {
            Err(crate::error::ResolutionError::UnknownType(self.ty.to_string()).into())
        }
    }

    fn has_intrinsic_effects(&self) -> bool {
        true
    }
}

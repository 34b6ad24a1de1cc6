// script/vm.rs — Fiber VM for lowered script units
//
// Runs a loaded unit against the same host state, resolver and scheduler
// interface as the reflection interpreter. Every `on` block fires on its own
// fiber; a fiber is a frame stack plus an operand stack plus the fault
// handlers installed by `try`.
//
// Suspension:
//   yield N     park the fiber at wait N. Inside a function spawned with tag
//               N, only the spawned frames park; the spawner continues.
//   stop N      kill every other fiber parked at N, then run `cleanup N`
//               on a fresh fiber if anything was killed.
//
// A resumed fiber keeps its scheduler handle pending until it either yields
// at the same wait again (the handle is reused) or moves on: another yield,
// `stop N`, a fault or the end of the fiber.
//
// Preconditions: the unit's native type is registered in `ctx`.
// Postconditions: faults never escape; they become diagnostics located
//   through the unit's debug map.
// Failure modes: `new` fails when the unit's type cannot be instantiated.
// Side effects: host state, scheduler suspensions, tracing events.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::diag::{Diagnostic, Location};
use crate::error::{EngineError, ResolutionError};
use crate::exec::{slot_values, Execution};
use crate::facade::EngineContext;
use crate::host::{HostState, MemberKind};
use crate::id::{FiberId, IdAllocator, SuspensionHandle};
use crate::resolve::access::{construct, read_member, write_member, Receiver};
use crate::resolve::Lookup;
use crate::sched::HostScheduler;
use crate::script::lower::{Op, Pos};
use crate::sink::LoadedUnit;
use crate::value::{apply_binary, apply_unary, Value};

// ── Fibers ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Frame {
    func: usize,
    pc: usize,
    locals: Vec<Value>,
    /// Spawn tag of a function frame.
    tag: Option<u32>,
    /// Operand stack height at entry.
    base: usize,
}

#[derive(Debug, Clone, Copy)]
struct Handler {
    frame: usize,
    stack: usize,
    target: usize,
}

type Wait = (Option<u32>, SuspensionHandle);

#[derive(Debug)]
struct Fiber {
    id: FiberId,
    frames: Vec<Frame>,
    stack: Vec<Value>,
    handlers: Vec<Handler>,
    /// Parked at this yield.
    waiting: Option<Wait>,
    /// Resumed from this yield; the handle is not resolved yet.
    pending: Option<Wait>,
}

impl Fiber {
    fn pop(&mut self) -> Result<Value, EngineError> {
        self.stack
            .pop()
            .ok_or_else(|| EngineError::Structural("operand stack underflow".into()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, EngineError> {
        if self.stack.len() < n {
            return Err(EngineError::Structural("operand stack underflow".into()));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn frame(&mut self) -> Result<&mut Frame, EngineError> {
        self.frames
            .last_mut()
            .ok_or_else(|| EngineError::Structural("no active frame".into()))
    }
}

enum Flow {
    Continue,
    Park,
}

// ── Machine ──────────────────────────────────────────────────────────────

pub struct Machine<'u> {
    ctx: &'u EngineContext,
    unit: &'u LoadedUnit,
    host: HostState,
    this: Value,
    /// Hidden unit variables, by declaration index.
    globals: Vec<Value>,
    fibers: BTreeMap<FiberId, Fiber>,
    ids: IdAllocator,
    diagnostics: Vec<Diagnostic>,
}

impl<'u> Machine<'u> {
    pub fn new(ctx: &'u EngineContext, unit: &'u LoadedUnit) -> Result<Self, EngineError> {
        let name = &unit.program.name;
        let desc = ctx
            .type_desc(name)
            .ok_or_else(|| ResolutionError::UnknownType(name.clone()))?;
        let mut host = HostState::new();
        let this = host.instantiate(&desc);
        let globals = unit.program.vars.iter().map(|v| v.init.clone()).collect();
        debug!(unit = %name, functions = unit.program.functions.len(), "machine ready");
        Ok(Self {
            ctx,
            unit,
            host,
            this,
            globals,
            fibers: BTreeMap::new(),
            ids: IdAllocator::new(),
            diagnostics: Vec::new(),
        })
    }

    pub fn host(&self) -> &HostState {
        &self.host
    }

    /// Number of parked fibers.
    pub fn suspended(&self) -> usize {
        self.fibers.len()
    }

    fn fresh_fiber(&mut self, func: usize) -> Fiber {
        let locals = self.unit.program.functions[func].locals;
        Fiber {
            id: self.ids.alloc_fiber(),
            frames: vec![Frame {
                func,
                pc: 0,
                locals: vec![Value::Null; locals],
                tag: None,
                base: 0,
            }],
            stack: Vec::new(),
            handlers: Vec::new(),
            waiting: None,
            pending: None,
        }
    }

    /// Run `fiber` until it parks or ends; parked fibers are stored.
    fn run(&mut self, mut fiber: Fiber, sched: &mut dyn HostScheduler) {
        let unit = self.unit;
        while let Some(frame) = fiber.frames.last_mut() {
            let func = &unit.program.functions[frame.func];
            let Some(op) = func.code.get(frame.pc) else {
                fiber.frames.pop();
                continue;
            };
            let pos = func.positions[frame.pc];
            frame.pc += 1;
            match self.exec(&mut fiber, op, sched) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Park) => {
                    debug!(fiber = %fiber.id, frames = fiber.frames.len(), "fiber suspended");
                    self.fibers.insert(fiber.id, fiber);
                    return;
                }
                Err(err) => self.fault(&mut fiber, pos, err, sched),
            }
        }
        self.resolve_pending(&mut fiber, sched);
    }

    fn exec(&mut self, fiber: &mut Fiber, op: &'u Op, sched: &mut dyn HostScheduler) -> Result<Flow, EngineError> {
        let ctx = self.ctx;
        let unit = self.unit;
        let program = &unit.program;
        match op {
            Op::Const(v) => fiber.stack.push(v.clone()),
            Op::MakeList(n) => {
                let items = fiber.pop_n(*n)?;
                fiber.stack.push(Value::List(items));
            }
            Op::LoadLocal(i) => {
                let v = fiber.frame()?.locals.get(*i).cloned().unwrap_or(Value::Null);
                fiber.stack.push(v);
            }
            Op::StoreLocal(i) => {
                let v = fiber.pop()?;
                if let Some(slot) = fiber.frame()?.locals.get_mut(*i) {
                    *slot = v;
                }
            }
            Op::LoadVar(i) => {
                let var = &program.vars[*i];
                let v = if var.is_hidden() {
                    self.globals[*i].clone()
                } else {
                    read_member(
                        ctx,
                        &mut self.host,
                        &Receiver::Instance(self.this.clone()),
                        field_lookup(&var.name),
                        Vec::new(),
                        Some(MemberKind::Field),
                    )?
                };
                fiber.stack.push(v);
            }
            Op::StoreVar(i) => {
                let v = fiber.pop()?;
                let var = &program.vars[*i];
                if var.is_hidden() {
                    self.globals[*i] = v;
                } else {
                    write_member(
                        ctx,
                        &mut self.host,
                        &Receiver::Instance(self.this.clone()),
                        field_lookup(&var.name),
                        v,
                        Some(MemberKind::Field),
                    )?;
                }
            }
            Op::LoadSelf => fiber.stack.push(self.this.clone()),
            Op::Clock => fiber.stack.push(Value::Float(sched.now())),
            Op::New(ty) => {
                let v = construct(ctx, &mut self.host, ty)?;
                fiber.stack.push(v);
            }
            Op::Member {
                name,
                signature,
                argc,
                call,
            } => {
                let args = fiber.pop_n(*argc)?;
                let recv = Receiver::Instance(fiber.pop()?);
                let lookup = Lookup {
                    name: name.as_str(),
                    signature: signature.as_ref(),
                    arity: *argc,
                };
                let tag = call.then_some(MemberKind::Method);
                let v = read_member(ctx, &mut self.host, &recv, lookup, args, tag)?;
                fiber.stack.push(v);
            }
            Op::StaticMember {
                ty,
                name,
                signature,
                argc,
                call,
            } => {
                let args = fiber.pop_n(*argc)?;
                let lookup = Lookup {
                    name: name.as_str(),
                    signature: signature.as_ref(),
                    arity: *argc,
                };
                let tag = call.then_some(MemberKind::Method);
                let v = read_member(ctx, &mut self.host, &Receiver::Static(ty.clone()), lookup, args, tag)?;
                fiber.stack.push(v);
            }
            Op::SetMember(name) => {
                let recv = Receiver::Instance(fiber.pop()?);
                let v = fiber.pop()?;
                write_member(ctx, &mut self.host, &recv, field_lookup(name), v, None)?;
            }
            Op::SetStatic { ty, name } => {
                let v = fiber.pop()?;
                write_member(
                    ctx,
                    &mut self.host,
                    &Receiver::Static(ty.clone()),
                    field_lookup(name),
                    v,
                    None,
                )?;
            }
            Op::Binary(op) => {
                let r = fiber.pop()?;
                let l = fiber.pop()?;
                fiber.stack.push(apply_binary(*op, &l, &r)?);
            }
            Op::Unary(op) => {
                let x = fiber.pop()?;
                fiber.stack.push(apply_unary(*op, &x)?);
            }
            Op::Pop => {
                fiber.pop()?;
            }
            Op::Jump(target) => fiber.frame()?.pc = *target,
            Op::JumpIfFalse(target) => {
                if !fiber.pop()?.as_bool()? {
                    fiber.frame()?.pc = *target;
                }
            }
            Op::Try(target) => {
                let handler = Handler {
                    frame: fiber.frames.len() - 1,
                    stack: fiber.stack.len(),
                    target: *target,
                };
                fiber.handlers.push(handler);
            }
            Op::EndTry => {
                fiber.handlers.pop();
            }
            Op::Throw => {
                let message = fiber.pop()?;
                return Err(EngineError::Fault(message.to_string()));
            }
            Op::Yield(tag) => return Ok(self.suspend(fiber, *tag, sched)),
            Op::Spawn { tag, func } => {
                let locals = program.functions[*func].locals;
                fiber.frames.push(Frame {
                    func: *func,
                    pc: 0,
                    locals: vec![Value::Null; locals],
                    tag: Some(*tag),
                    base: fiber.stack.len(),
                });
            }
            Op::Stop(tag) => {
                if matches!(fiber.pending, Some((Some(t), _)) if t == *tag) {
                    self.resolve_pending(fiber, sched);
                }
                self.stop_wait(*tag, sched);
            }
            Op::Return => {
                if let Some(frame) = fiber.frames.pop() {
                    fiber.stack.truncate(frame.base);
                    let depth = fiber.frames.len();
                    fiber.handlers.retain(|h| h.frame < depth);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn suspend(&mut self, fiber: &mut Fiber, tag: Option<u32>, sched: &mut dyn HostScheduler) -> Flow {
        if let Some((t, h)) = fiber.pending {
            if tag.is_some() && t == tag {
                fiber.pending = None;
                fiber.waiting = Some((tag, h));
                return Flow::Park;
            }
        }
        self.resolve_pending(fiber, sched);
        let handle = self.ids.alloc_suspension();
        sched.start_suspension(handle);

        let spawned = fiber.frames.iter().rposition(|f| f.tag.is_some());
        if let (Some(k), Some(_)) = (spawned, tag) {
            if fiber.frames[k].tag == tag {
                let frames = fiber.frames.split_off(k);
                self.detach(fiber, frames, (tag, handle));
                return Flow::Continue;
            }
        }
        fiber.waiting = Some((tag, handle));
        Flow::Park
    }

    /// Move spawned `frames` with their operands and handlers to a new
    /// parked fiber.
    fn detach(&mut self, fiber: &mut Fiber, mut frames: Vec<Frame>, wait: Wait) {
        let depth = fiber.frames.len();
        let base = frames.first().map_or(fiber.stack.len(), |f| f.base);
        let stack = fiber.stack.split_off(base);
        for frame in &mut frames {
            frame.base -= base;
        }
        let (handlers, kept): (Vec<Handler>, Vec<Handler>) =
            fiber.handlers.drain(..).partition(|h| h.frame >= depth);
        fiber.handlers = kept;
        let handlers = handlers
            .into_iter()
            .map(|h| Handler {
                frame: h.frame - depth,
                stack: h.stack - base,
                target: h.target,
            })
            .collect();
        let detached = Fiber {
            id: self.ids.alloc_fiber(),
            frames,
            stack,
            handlers,
            waiting: Some(wait),
            pending: None,
        };
        debug!(from = %fiber.id, fiber = %detached.id, "spawned function detached");
        self.fibers.insert(detached.id, detached);
    }

    fn resolve_pending(&mut self, fiber: &mut Fiber, sched: &mut dyn HostScheduler) {
        if let Some((_, h)) = fiber.pending.take() {
            sched.resume_suspension(h);
            debug!(fiber = %fiber.id, "fiber resumed");
        }
    }

    fn fault(&mut self, fiber: &mut Fiber, pos: Pos, err: EngineError, sched: &mut dyn HostScheduler) {
        let node = self.unit.debug_map.locate(pos.line, pos.col);
        let location = node.map(Location::node).unwrap_or_default();
        warn!(unit = %self.unit.program.name, line = pos.line, col = pos.col, error = %err, "compiled code faulted");
        self.diagnostics.push(err.to_diagnostic(location));
        self.resolve_pending(fiber, sched);
        match fiber.handlers.pop() {
            Some(h) => {
                fiber.frames.truncate(h.frame + 1);
                fiber.stack.truncate(h.stack);
                if let Some(frame) = fiber.frames.last_mut() {
                    frame.pc = h.target;
                }
            }
            None => fiber.frames.clear(),
        }
    }

    /// Kill every parked fiber waiting at `tag` and run its cleanup block
    /// when something was actually stopped.
    fn stop_wait(&mut self, tag: u32, sched: &mut dyn HostScheduler) {
        let victims: Vec<FiberId> = self
            .fibers
            .iter()
            .filter(|(_, f)| matches!(f.waiting, Some((Some(t), _)) if t == tag))
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            if let Some(fiber) = self.fibers.remove(id) {
                if let Some((_, h)) = fiber.waiting {
                    sched.cancel_suspension(h);
                }
                debug!(fiber = %id, tag, "fiber killed");
            }
        }
        if victims.is_empty() {
            return;
        }
        if let Some(&cleanup) = self.unit.program.cleanups.get(&tag) {
            let fiber = self.fresh_fiber(cleanup);
            self.run(fiber, sched);
        }
    }
}

fn field_lookup(name: &str) -> Lookup<'_> {
    Lookup {
        name,
        signature: None,
        arity: 0,
    }
}

impl Execution for Machine<'_> {
    fn trigger(&mut self, event: &str, sched: &mut dyn HostScheduler) -> Result<usize, EngineError> {
        let handlers: Vec<usize> = self.unit.program.handlers_of(event).collect();
        debug!(event, handlers = handlers.len(), "trigger");
        for &func in &handlers {
            let fiber = self.fresh_fiber(func);
            self.run(fiber, sched);
        }
        Ok(handlers.len())
    }

    fn tick(&mut self, sched: &mut dyn HostScheduler) {
        let parked: Vec<FiberId> = self.fibers.keys().copied().collect();
        for id in parked {
            // Stopped earlier in this tick.
            let Some(mut fiber) = self.fibers.remove(&id) else {
                continue;
            };
            fiber.pending = fiber.waiting.take();
            self.run(fiber, sched);
        }
    }

    fn variables(&self) -> BTreeMap<String, Value> {
        let names = self
            .unit
            .program
            .vars
            .iter()
            .filter(|v| !v.is_hidden())
            .map(|v| v.name.clone());
        slot_values(&self.host, &self.this, names)
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

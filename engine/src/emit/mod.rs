// emit/mod.rs — Source emitter: behavior graph → Weft script unit
//
// Lowers a validated graph into one script unit plus a debug map. The layout
// is fixed: header, `unit`, variable declarations (graph slots, then hidden
// per-node state), one `on` block per entry in id order, one `cleanup` block
// per wait with a cleanup chain, then the functions spawned for parallel
// waits. Emission is deterministic: the same graph and options always give
// byte-identical text.
//
// Flow lowering mirrors the interpreter's boundaries:
//   - every finish target but the last runs inside `try { }` when no catch
//     is active, so its failure only aborts that target
//   - loop and catch bodies are wrapped the same way
//   - a wait restarts by `stop N;` before its own statements
//   - a parallel wait outside any loop or try region becomes a spawned
//     function holding the wait and its downstream chain
//
// Preconditions: `graph` passed structural validation (no flow or value
//   cycles); the graph's instance type is resolvable through `ctx`.
// Postconditions: `unit` is present iff no error diagnostic was produced.
// Failure modes: every unresolvable reference, type mismatch or read-only
//   target is reported once per node; lowering always runs to completion.
// Side effects: registers the graph's proxy type in `ctx`.

pub mod debug_map;
pub mod writer;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::analysis::{GraphInfo, HoistItem, Operand};
use crate::diag::{self, codes, Diagnostic, Location};
use crate::error::{EngineError, ResolutionError};
use crate::facade::EngineContext;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::node::{
    Behavior, Branch, ForLoop, Invoke, SetValue, Try, Wait, WaitKind, WhileLoop, FOR_STEP_MESSAGE,
};
use crate::reference::MemberReference;
use crate::resolve::fragment::{to_expression, Fragment, FragmentEnv};
use crate::resolve::TypeCx;
use crate::store::fingerprint;
use crate::value::{Ty, Value};

pub use debug_map::{DebugEntry, DebugMap};
pub use writer::{NameTable, SourceWriter};

// ── Public types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Inline pure value nodes that have exactly one consumer.
    pub simplify: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self { simplify: true }
    }
}

/// Emitted script plus what is needed to load and debug it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    /// Name of the graph and of the unit's native type.
    pub name: String,
    pub source: String,
    pub debug_map: DebugMap,
    /// Fingerprint of the graph data the unit was emitted from.
    pub fingerprint: String,
}

#[derive(Debug)]
pub struct EmitResult {
    pub unit: Option<CompiledUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ───────────────────────────────────────────────────

pub fn emit(ctx: &EngineContext, graph: &Graph, options: &EmitOptions) -> EmitResult {
    ctx.register_graph(graph);
    let mut emitter = Emitter {
        cx: TypeCx::new(ctx, graph),
        graph,
        info: GraphInfo::analyze(ctx, graph),
        options: *options,
        names: NameTable::new(),
        functions: Vec::new(),
        diagnostics: Vec::new(),
        catch_depth: 0,
        region_depth: 0,
    };

    let mut head = SourceWriter::new();
    head.plain(format!("// generated by weft from graph '{}'", graph.name));
    head.plain(format!("unit {};", graph.name));
    emitter.declare(&mut head);

    let mut parts = vec![head];
    for (entry, event) in graph.entries() {
        let mut w = SourceWriter::new();
        w.set_node(Some(entry));
        w.open(&format!("on {event}"));
        if let Some(Behavior::Entry(e)) = graph.behavior(entry) {
            if let Some(next) = e.next {
                emitter.lower_chain(next, &mut w);
            }
        }
        w.close();
        parts.push(w);
    }
    for node in &graph.nodes {
        let Behavior::Wait(Wait {
            cancelled: Some(cleanup),
            ..
        }) = &node.behavior
        else {
            continue;
        };
        let mut w = SourceWriter::new();
        w.open(&format!("cleanup {}", node.id.0));
        emitter.lower_chain(*cleanup, &mut w);
        w.close();
        parts.push(w);
    }
    parts.append(&mut emitter.functions);

    let mut diagnostics = emitter.diagnostics;
    diag::dedup(&mut diagnostics);
    if diag::has_errors(&diagnostics) {
        return EmitResult {
            unit: None,
            diagnostics,
        };
    }
    let (source, debug_map) = writer::assemble(&parts);
    debug!(
        graph = %graph.name,
        lines = source.lines().count(),
        mapped = debug_map.len(),
        "emitted unit"
    );
    EmitResult {
        unit: Some(CompiledUnit {
            name: graph.name.clone(),
            source,
            debug_map,
            fingerprint: fingerprint(graph),
        }),
        diagnostics,
    }
}

// ── Statement bindings ───────────────────────────────────────────────────

/// Temporaries bound ahead of one statement.
#[derive(Default)]
struct Bindings<'a> {
    /// Value nodes already held in a `let`.
    temps: HashMap<NodeId, Fragment>,
    /// Operands evaluated up front, matched by identity.
    hoisted: Vec<(&'a MemberReference, Fragment)>,
}

/// Fragment environment over one statement's bindings. Value nodes without
/// a temporary are rendered inline.
struct Env<'b, 'a> {
    graph: &'a Graph,
    bindings: &'b Bindings<'a>,
    visiting: Vec<NodeId>,
}

impl Env<'_, '_> {
    /// Expression computing value node `node`, ignoring any temporary for it.
    fn value_expr(&mut self, cx: &mut TypeCx<'_>, node: NodeId) -> Result<Fragment, EngineError> {
        let graph = self.graph;
        let Some(behavior) = graph.behavior(node) else {
            return Err(unknown_output(node, "value"));
        };
        if self.visiting.contains(&node) {
            return Err(EngineError::ValueCycle(node));
        }
        self.visiting.push(node);
        let fragment = self.render_value(cx, node, behavior);
        self.visiting.pop();
        fragment
    }

    fn render_value(&mut self, cx: &mut TypeCx<'_>, node: NodeId, behavior: &Behavior) -> Result<Fragment, EngineError> {
        let Some(value) = behavior.as_value() else {
            return Err(unknown_output(node, "value"));
        };
        let ty = value.output_type("value", cx)?;
        match behavior {
            Behavior::Binary(b) => {
                let l = to_expression(&b.left, cx, self)?;
                let r = to_expression(&b.right, cx, self)?;
                Ok(Fragment::compound(
                    format!("{} {} {}", l.operand(), b.op.symbol(), r.operand()),
                    ty,
                ))
            }
            Behavior::Unary(u) => {
                let x = to_expression(&u.operand, cx, self)?;
                Ok(Fragment::compound(format!("{}{}", u.op.symbol(), x.operand()), ty))
            }
            Behavior::Get(g) => to_expression(&g.source, cx, self),
            Behavior::Construct(c) => Ok(Fragment::atom(format!("new {}()", c.ty), ty)),
            _ => Err(unknown_output(node, "value")),
        }
    }
}

impl FragmentEnv for Env<'_, '_> {
    fn node_output(&mut self, cx: &mut TypeCx<'_>, node: NodeId, port: &str) -> Result<Fragment, EngineError> {
        if let Some(temp) = self.bindings.temps.get(&node) {
            return Ok(temp.clone());
        }
        let graph = self.graph;
        let Some(behavior) = graph.behavior(node) else {
            return Err(unknown_output(node, port));
        };
        let Some(value) = behavior.as_value().filter(|v| v.outputs().contains(&port)) else {
            return Err(unknown_output(node, port));
        };
        match behavior {
            Behavior::ForLoop(_) | Behavior::Cache(_) => {
                let purpose = if matches!(behavior, Behavior::ForLoop(_)) {
                    "index"
                } else {
                    "cache"
                };
                let ty = value.output_type(port, cx).unwrap_or(Ty::Any);
                Ok(Fragment::atom(NameTable::hidden(purpose, node), ty))
            }
            _ => self.value_expr(cx, node),
        }
    }

    fn hoisted(&self, reference: &MemberReference) -> Option<Fragment> {
        self.bindings
            .hoisted
            .iter()
            .find(|(r, _)| std::ptr::eq(*r, reference))
            .map(|(_, f)| f.clone())
    }
}

fn unknown_output(node: NodeId, port: &str) -> EngineError {
    ResolutionError::UnknownOutput {
        node,
        port: port.to_string(),
    }
    .into()
}

fn expect_bool(fragment: &Fragment) -> Result<(), EngineError> {
    if Ty::Bool.accepts(&fragment.ty) {
        Ok(())
    } else {
        Err(EngineError::type_mismatch(Ty::Bool, fragment.ty.clone()))
    }
}

fn literal(value: Value) -> String {
    value.to_source().unwrap_or_else(|| "null".to_string())
}

// ── Emitter ──────────────────────────────────────────────────────────────

struct Emitter<'a> {
    cx: TypeCx<'a>,
    graph: &'a Graph,
    info: GraphInfo,
    options: EmitOptions,
    names: NameTable,
    functions: Vec<SourceWriter>,
    diagnostics: Vec<Diagnostic>,
    /// Enclosing `Try` bodies.
    catch_depth: usize,
    /// Enclosing loop, try and catch bodies.
    region_depth: usize,
}

impl<'a> Emitter<'a> {
    fn report(&mut self, node: NodeId, err: EngineError) {
        self.diagnostics.push(err.to_diagnostic(Location::node(node)));
    }

    // ── Declarations ──

    fn declare(&mut self, w: &mut SourceWriter) {
        let graph = self.graph;
        for slot in graph.slots() {
            let name = slot.slot_name();
            let ty = &slot.decl.ty;
            match &slot.decl.default {
                None => w.plain(format!("var {name}: {ty};")),
                Some(value) => match value.to_source() {
                    Some(init) => w.plain(format!("var {name}: {ty} = {init};")),
                    None => self.diagnostics.push(
                        Diagnostic::error(
                            Location::default(),
                            format!("default of variable '{name}' has no literal form"),
                        )
                        .with_code(codes::E0305),
                    ),
                },
            }
        }
        for node in &graph.nodes {
            let purposes: &[&str] = match &node.behavior {
                Behavior::ForLoop(_) => &["index", "end", "step"],
                Behavior::Cache(_) => &["cache"],
                Behavior::Wait(Wait {
                    wait: WaitKind::Ticks { .. },
                    ..
                }) => &["ticks"],
                Behavior::Wait(Wait {
                    wait: WaitKind::Seconds { .. },
                    ..
                }) => &["deadline"],
                _ => &[],
            };
            for purpose in purposes {
                w.plain(format!("var {}: any;", NameTable::hidden(purpose, node.id)));
            }
        }
    }

    // ── Expressions ──

    fn render(&mut self, r: &MemberReference, bindings: &Bindings<'a>) -> Result<Fragment, EngineError> {
        let mut env = Env {
            graph: self.graph,
            bindings,
            visiting: Vec::new(),
        };
        to_expression(r, &mut self.cx, &mut env)
    }

    fn render_node(&mut self, node: NodeId, bindings: &Bindings<'a>) -> Result<Fragment, EngineError> {
        let mut env = Env {
            graph: self.graph,
            bindings,
            visiting: Vec::new(),
        };
        env.value_expr(&mut self.cx, node)
    }

    /// Bind the evaluate-once plan of a statement, then any pure value node
    /// that is not inlined. With `skip_call`, a trailing hoisted operand is
    /// left for the statement itself.
    fn prepare(
        &mut self,
        owner: NodeId,
        operands: &[Operand<'a>],
        skip_call: bool,
        w: &mut SourceWriter,
    ) -> Result<Bindings<'a>, EngineError> {
        let plan = self.info.plan(&mut self.cx, operands);
        let mut bindings = Bindings::default();
        for (i, item) in plan.iter().enumerate() {
            match *item {
                HoistItem::Node(n) => {
                    let value = self.render_node(n, &bindings)?;
                    let name = format!("__v_{n}");
                    w.line(format!("let {name} = {};", value.text));
                    bindings.temps.insert(n, Fragment::atom(name, value.ty));
                }
                HoistItem::Operand(k) => {
                    if skip_call && i + 1 == plan.len() {
                        continue;
                    }
                    let Some(op) = operands.get(k) else { continue };
                    let r = op.reference();
                    let value = self.render(r, &bindings)?;
                    let name = format!("__h_{owner}_{k}");
                    w.line(format!("let {name} = {};", value.text));
                    bindings.hoisted.push((r, Fragment::atom(name, value.ty)));
                }
            }
        }
        for n in self.pure_lets(operands, &bindings) {
            let value = self.render_node(n, &bindings)?;
            let name = format!("__t_{n}");
            w.line(format!("let {name} = {};", value.text));
            bindings.temps.insert(n, Fragment::atom(name, value.ty));
        }
        Ok(bindings)
    }

    /// Pure value nodes read by `operands` that get their own `let`, in
    /// post-order.
    fn pure_lets(&self, operands: &[Operand<'a>], bindings: &Bindings<'a>) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for op in operands {
            let r = op.reference();
            if bindings.hoisted.iter().any(|(h, _)| std::ptr::eq(*h, r)) {
                continue;
            }
            for (src, _) in r.node_outputs() {
                self.collect_pure(src, bindings, &mut seen, &mut order);
            }
        }
        order.retain(|&n| !self.options.simplify || self.info.consumers(n) != 1);
        order
    }

    fn collect_pure(
        &self,
        node: NodeId,
        bindings: &Bindings<'a>,
        seen: &mut HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        if bindings.temps.contains_key(&node) || !seen.insert(node) {
            return;
        }
        let Some(behavior) = self.graph.behavior(node) else { return };
        if !behavior.is_value_node() {
            return;
        }
        for (_, r) in behavior.value_ports() {
            for (src, _) in r.node_outputs() {
                self.collect_pure(src, bindings, seen, order);
            }
        }
        order.push(node);
    }

    // ── Flow ──

    /// Lower the chain starting at `start`. Single finish targets continue
    /// the straight line; multiple targets run in order, all but the last
    /// guarded.
    fn lower_chain(&mut self, start: NodeId, w: &mut SourceWriter) {
        let owner = w.set_node(Some(start));
        let mut node = start;
        loop {
            w.set_node(Some(node));
            let next = match self.lower_node(node, w) {
                Ok(next) => next,
                Err(err) => {
                    self.report(node, err);
                    self.graph.flow_targets(node)
                }
            };
            let Some((&last, init)) = next.split_last() else { break };
            for &target in init {
                self.lower_guarded(target, w);
                w.set_node(Some(node));
            }
            node = last;
        }
        w.set_node(owner);
    }

    fn lower_guarded(&mut self, target: NodeId, w: &mut SourceWriter) {
        if self.catch_depth == 0 {
            w.open("try");
            self.lower_chain(target, w);
            w.close();
        } else {
            self.lower_chain(target, w);
        }
    }

    /// Loop, try or catch body.
    fn lower_region(&mut self, body: NodeId, guard: bool, w: &mut SourceWriter) {
        self.region_depth += 1;
        if guard {
            self.lower_guarded(body, w);
        } else {
            self.lower_chain(body, w);
        }
        self.region_depth -= 1;
    }

    /// Statements for one node; returns the targets that continue after it.
    fn lower_node(&mut self, node: NodeId, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        let graph = self.graph;
        let Some(behavior) = graph.behavior(node) else {
            return Err(EngineError::Structural(format!("flow reached missing node {node}")));
        };
        match behavior {
            Behavior::Entry(e) => Ok(e.next.into_iter().collect()),
            Behavior::SetValue(s) => self.lower_set(node, s, w),
            Behavior::Invoke(i) => self.lower_invoke(node, i, w),
            Behavior::Branch(b) => self.lower_branch(node, b, w),
            Behavior::Sequence(s) => Ok(s.targets.iter().flatten().copied().collect()),
            Behavior::ForLoop(f) => self.lower_for(node, f, w),
            Behavior::WhileLoop(l) => self.lower_while(node, l, w),
            Behavior::Try(t) => Ok(self.lower_try(t, w)),
            Behavior::Cache(c) => {
                let bindings = self.prepare(node, &c.operands(), false, w)?;
                let value = self.render(&c.value, &bindings)?;
                w.line(format!("{} = {};", NameTable::hidden("cache", node), value.text));
                Ok(c.next.into_iter().collect())
            }
            Behavior::Wait(wait) => self.lower_wait_site(node, wait, w),
            Behavior::Stop(s) => {
                w.line(format!("stop {};", s.node.0));
                Ok(s.next.into_iter().collect())
            }
            Behavior::Throw(t) => {
                let bindings = self.prepare(node, &t.operands(), false, w)?;
                let message = self.render(&t.message, &bindings)?;
                w.line(format!("throw {};", message.text));
                Ok(Vec::new())
            }
            Behavior::Binary(_) | Behavior::Unary(_) | Behavior::Get(_) | Behavior::Construct(_) => Err(
                EngineError::Structural(format!("flow reached value node {}", graph.display_name(node))),
            ),
        }
    }

    fn lower_set(&mut self, node: NodeId, s: &'a SetValue, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        if !s.target.is_settable() {
            return Err(EngineError::ReadOnly(s.target.kind().to_string()));
        }
        let bindings = self.prepare(node, &s.operands(), false, w)?;
        let value = self.render(&s.value, &bindings)?;
        let target = self.render(&s.target, &bindings)?;
        if !target.ty.accepts(&value.ty) {
            return Err(EngineError::type_mismatch(target.ty, value.ty));
        }
        w.line(format!("{} = {};", target.text, value.text));
        Ok(s.next.into_iter().collect())
    }

    fn lower_invoke(&mut self, node: NodeId, i: &'a Invoke, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        let bindings = self.prepare(node, &i.operands(), true, w)?;
        let call = self.render(&i.call, &bindings)?;
        w.line(format!("{};", call.text));
        Ok(i.next.into_iter().collect())
    }

    fn lower_branch(&mut self, node: NodeId, b: &'a Branch, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        let bindings = self.prepare(node, &b.operands(), false, w)?;
        let cond = self.render(&b.condition, &bindings)?;
        expect_bool(&cond)?;
        // A failing arm must not skip `finished`.
        let guard = b.finished.is_some();
        match (b.on_true, b.on_false) {
            (Some(t), Some(f)) => {
                w.open(&format!("if ({})", cond.text));
                self.lower_arm(t, guard, w);
                w.set_node(Some(node));
                w.reopen("else");
                self.lower_arm(f, guard, w);
                w.close();
            }
            (Some(t), None) => {
                w.open(&format!("if ({})", cond.text));
                self.lower_arm(t, guard, w);
                w.close();
            }
            (None, Some(f)) => {
                w.open(&format!("if (!{})", cond.operand()));
                self.lower_arm(f, guard, w);
                w.close();
            }
            (None, None) => {
                w.open(&format!("if ({})", cond.text));
                w.close();
            }
        }
        Ok(b.finished.into_iter().collect())
    }

    fn lower_arm(&mut self, target: NodeId, guard: bool, w: &mut SourceWriter) {
        if guard {
            self.lower_guarded(target, w);
        } else {
            self.lower_chain(target, w);
        }
    }

    fn lower_for(&mut self, node: NodeId, f: &'a ForLoop, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        let bindings = self.prepare(node, &f.operands(), false, w)?;
        let start = self.render(&f.start, &bindings)?;
        let end = self.render(&f.end, &bindings)?;
        let step = self.render(&f.step, &bindings)?;
        let index = NameTable::hidden("index", node);
        let end_slot = NameTable::hidden("end", node);
        let step_slot = NameTable::hidden("step", node);
        // Operands are read in port order; the index is only replaced once
        // the step is known to be valid.
        w.line(format!("let __start_{node} = {};", start.text));
        w.line(format!("{end_slot} = {};", end.text));
        w.line(format!("{step_slot} = {};", step.text));
        w.open(&format!("if ({step_slot} <= 0)"));
        w.line(format!("throw {};", literal(Value::str(FOR_STEP_MESSAGE))));
        w.close();
        w.line(format!("{index} = __start_{node};"));
        w.open(&format!("while ({index} < {end_slot})"));
        if let Some(body) = f.body {
            self.lower_region(body, self.catch_depth == 0, w);
            w.set_node(Some(node));
        }
        w.line(format!("{index} = {index} + {step_slot};"));
        w.close();
        Ok(f.finished.into_iter().collect())
    }

    fn lower_while(&mut self, node: NodeId, l: &'a WhileLoop, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        let operands = l.operands();
        let mut lets = SourceWriter::new();
        lets.set_node(Some(node));
        let bindings = self.prepare(node, &operands, false, &mut lets)?;
        let cond = self.render(&l.condition, &bindings)?;
        expect_bool(&cond)?;
        if lets.is_empty() {
            w.open(&format!("while ({})", cond.text));
        } else {
            // The condition's temporaries are recomputed every iteration.
            w.open("while (true)");
            w.append_nested(lets);
            w.open(&format!("if (!{})", cond.operand()));
            w.line("break;");
            w.close();
        }
        if let Some(body) = l.body {
            self.lower_region(body, self.catch_depth == 0, w);
            w.set_node(Some(node));
        }
        w.close();
        Ok(l.finished.into_iter().collect())
    }

    fn lower_try(&mut self, t: &'a Try, w: &mut SourceWriter) -> Vec<NodeId> {
        w.open("try");
        if let Some(body) = t.body {
            self.catch_depth += 1;
            self.lower_region(body, false, w);
            self.catch_depth -= 1;
        }
        if let Some(catch) = t.catch {
            w.reopen("catch");
            self.lower_region(catch, self.catch_depth == 0, w);
        }
        w.close();
        t.finished.into_iter().collect()
    }

    // ── Waits ──

    fn lower_wait_site(&mut self, node: NodeId, wait: &'a Wait, w: &mut SourceWriter) -> Result<Vec<NodeId>, EngineError> {
        if !wait.parallel || self.region_depth > 0 {
            self.lower_wait(node, wait, w)?;
            return Ok(wait.next.into_iter().collect());
        }
        let name = self.names.fresh(&format!("__co_{node}"));
        w.line(format!("spawn {} {name};", node.0));
        let mut f = SourceWriter::new();
        f.set_node(Some(node));
        f.open(&format!("fn {name}()"));
        match self.lower_wait(node, wait, &mut f) {
            Ok(()) => {
                if let Some(next) = wait.next {
                    self.lower_chain(next, &mut f);
                }
            }
            Err(err) => self.report(node, err),
        }
        f.close();
        self.functions.push(f);
        Ok(Vec::new())
    }

    fn lower_wait(&mut self, node: NodeId, wait: &'a Wait, w: &mut SourceWriter) -> Result<(), EngineError> {
        let id = node.0;
        w.line(format!("stop {id};"));
        let operands = wait.wait.operands();
        match &wait.wait {
            WaitKind::NextTick => w.line(format!("yield {id};")),
            WaitKind::Ticks { count } => {
                let bindings = self.prepare(node, &operands, false, w)?;
                let count = self.render(count, &bindings)?;
                let ticks = NameTable::hidden("ticks", node);
                w.line(format!("{ticks} = {};", count.text));
                w.open(&format!("while ({ticks} > 0)"));
                w.line(format!("{ticks} = {ticks} - 1;"));
                w.line(format!("yield {id};"));
                w.close();
            }
            WaitKind::Seconds { duration } => {
                let bindings = self.prepare(node, &operands, false, w)?;
                let duration = self.render(duration, &bindings)?;
                let deadline = NameTable::hidden("deadline", node);
                w.line(format!("{deadline} = clock() + {};", duration.operand()));
                w.open(&format!("while (clock() < {deadline})"));
                w.line(format!("yield {id};"));
                w.close();
            }
            WaitKind::Until { condition } => {
                let mut lets = SourceWriter::new();
                lets.set_node(Some(node));
                let bindings = self.prepare(node, &operands, false, &mut lets)?;
                let cond = self.render(condition, &bindings)?;
                expect_bool(&cond)?;
                if lets.is_empty() {
                    w.open(&format!("while (!{})", cond.operand()));
                } else {
                    w.open("while (true)");
                    w.append_nested(lets);
                    w.open(&format!("if ({})", cond.text));
                    w.line("break;");
                    w.close();
                }
                w.line(format!("yield {id};"));
                w.close();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ScopeId;
    use crate::node::{Binary, Entry, Get, Sequence, Stop};
    use crate::reference::{MemberPath, Segment};
    use crate::value::BinaryOp;

    fn emit_text(g: &Graph, options: EmitOptions) -> String {
        let ctx = EngineContext::with_builtins();
        let result = emit(&ctx, g, &options);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        result.unit.expect("unit").source
    }

    fn entry(g: &mut Graph) -> NodeId {
        g.add_node(Entry {
            event: "start".into(),
            next: None,
        })
    }

    fn set(target: &str, value: MemberReference) -> SetValue {
        SetValue {
            target: MemberReference::variable(target),
            value,
            next: None,
        }
    }

    #[test]
    fn linear_chain_is_straight_line() {
        let mut g = Graph::new("Line");
        g.declare(ScopeId::ROOT, "x", Ty::Int, Some(Value::Int(1)));
        let e = entry(&mut g);
        let a = g.add_node(set("x", Value::Int(5).into()));
        let b = g.add_node(set("x", Value::Int(6).into()));
        g.connect(e, "next", a).unwrap();
        g.connect(a, "next", b).unwrap();
        let text = emit_text(&g, EmitOptions::default());
        assert_eq!(
            text,
            "// generated by weft from graph 'Line'\nunit Line;\nvar x: int = 1;\non start {\n    x = 5;\n    x = 6;\n}\n"
        );
    }

    #[test]
    fn shared_pure_nodes_get_a_let_and_single_ones_inline() {
        let mut g = Graph::new("Lets");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        g.declare(ScopeId::ROOT, "y", Ty::Int, None);
        let e = entry(&mut g);
        let sum = g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::variable("x"),
            right: Value::Int(1).into(),
        });
        let twice = g.add_node(Binary {
            op: BinaryOp::Mul,
            left: MemberReference::node_output(sum, "value"),
            right: MemberReference::node_output(sum, "value"),
        });
        let s = g.add_node(set("y", MemberReference::node_output(twice, "value")));
        g.connect(e, "next", s).unwrap();

        let text = emit_text(&g, EmitOptions::default());
        assert!(text.contains("    let __t_n1 = x + 1;\n    y = __t_n1 * __t_n1;\n"), "{text}");
        let text = emit_text(&g, EmitOptions { simplify: false });
        assert!(
            text.contains("    let __t_n1 = x + 1;\n    let __t_n2 = __t_n1 * __t_n1;\n    y = __t_n2;\n"),
            "{text}"
        );
    }

    #[test]
    fn side_effecting_producers_are_bound_once() {
        let mut g = Graph::new("Once");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let e = entry(&mut g);
        let tick = g.add_node(Get {
            source: MemberReference::method(MemberPath::on_type(Ty::named("Counter"), Segment::new("tick"))),
        });
        let sum = g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::node_output(tick, "value"),
            right: MemberReference::node_output(tick, "value"),
        });
        let s = g.add_node(set("x", MemberReference::node_output(sum, "value")));
        g.connect(e, "next", s).unwrap();
        let text = emit_text(&g, EmitOptions::default());
        assert!(
            text.contains("    let __v_n1 = Counter::tick();\n    let __v_n2 = __v_n1 + __v_n1;\n    x = __v_n2;\n"),
            "{text}"
        );
    }

    #[test]
    fn multi_target_finishes_guard_all_but_last() {
        let mut g = Graph::new("Seq");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let e = entry(&mut g);
        let a = g.add_node(set("x", Value::Int(1).into()));
        let b = g.add_node(set("x", Value::Int(2).into()));
        let seq = g.add_node(Sequence {
            targets: vec![Some(a), Some(b)],
        });
        g.connect(e, "next", seq).unwrap();
        let text = emit_text(&g, EmitOptions::default());
        assert!(text.contains("    try {\n        x = 1;\n    }\n    x = 2;\n"), "{text}");
    }

    #[test]
    fn parallel_wait_becomes_spawned_function() {
        let mut g = Graph::new("Par");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let e = entry(&mut g);
        let wait = g.add_node(Wait {
            wait: WaitKind::Ticks {
                count: Value::Int(2).into(),
            },
            parallel: true,
            next: None,
            cancelled: None,
        });
        let after = g.add_node(set("x", Value::Int(1).into()));
        let stop = g.add_node(Stop { node: wait, next: None });
        let seq = g.add_node(Sequence {
            targets: vec![Some(wait), Some(stop)],
        });
        g.connect(e, "next", seq).unwrap();
        g.connect(wait, "next", after).unwrap();
        let text = emit_text(&g, EmitOptions::default());
        assert!(text.contains("var __ticks_n1: any;\n"), "{text}");
        assert!(text.contains("    try {\n        spawn 1 __co_n1;\n    }\n    stop 1;\n"), "{text}");
        assert!(text.contains(
            "fn __co_n1() {\n    stop 1;\n    __ticks_n1 = 2;\n    while (__ticks_n1 > 0) {\n        __ticks_n1 = __ticks_n1 - 1;\n        yield 1;\n    }\n    x = 1;\n}\n"
        ), "{text}");
    }

    #[test]
    fn errors_accumulate_per_node() {
        let mut g = Graph::new("Bad");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let e = entry(&mut g);
        let a = g.add_node(set("x", MemberReference::none()));
        let b = g.add_node(set("x", MemberReference::none()));
        let c = g.add_node(SetValue {
            target: Value::Int(1).into(),
            value: Value::Int(2).into(),
            next: None,
        });
        g.connect(e, "next", a).unwrap();
        g.connect(a, "next", b).unwrap();
        g.connect(b, "next", c).unwrap();
        let ctx = EngineContext::with_builtins();
        let result = emit(&ctx, &g, &EmitOptions::default());
        assert!(result.unit.is_none());
        let found: Vec<_> = result
            .diagnostics
            .iter()
            .map(|d| (d.code, d.location.node))
            .collect();
        assert_eq!(
            found,
            vec![
                (Some(codes::E0100), Some(a)),
                (Some(codes::E0100), Some(b)),
                (Some(codes::E0103), Some(c)),
            ]
        );
    }

    #[test]
    fn emission_is_deterministic() {
        let mut g = Graph::new("Det");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let e = entry(&mut g);
        let a = g.add_node(set("x", Value::Int(1).into()));
        g.connect(e, "next", a).unwrap();
        let first = emit_text(&g, EmitOptions::default());
        let second = emit_text(&g, EmitOptions::default());
        assert_eq!(first, second);
    }
}

// script/lower.rs — Lowering of a parsed unit to stack bytecode
//
// Each handler, function and cleanup block becomes one `Function`: a flat
// op list with a source position per op, so a fault raised by any op can be
// mapped back through the unit's debug map. Names are bound here, not at run
// time: `let` locals get frame slots, unit variables get their declaration
// index.
//
// Preconditions: `unit` was parsed from `source`.
// Postconditions: every jump target lies inside its function; every
//   `spawn` names a function of the unit.
// Failure modes: unknown names, duplicate declarations, invalid assignment
//   targets, `break` outside a loop, non-constant initializers. All are
//   collected before returning.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};

use chumsky::span::Span as _;
use thiserror::Error;

use crate::reference::Signature;
use crate::script::ast::{Block, Call, Expr, ExprKind, Item, Member, Stmt, StmtKind, Unit};
use crate::value::{apply_binary, apply_unary, BinaryOp, Ty, UnaryOp, Value};

// ── Program ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Const(Value),
    MakeList(usize),
    LoadLocal(usize),
    StoreLocal(usize),
    /// Unit variable by declaration index.
    LoadVar(usize),
    StoreVar(usize),
    LoadSelf,
    Clock,
    New(Ty),
    /// Pops `argc` arguments, then the receiver.
    Member {
        name: String,
        signature: Option<Signature>,
        argc: usize,
        call: bool,
    },
    StaticMember {
        ty: Ty,
        name: String,
        signature: Option<Signature>,
        argc: usize,
        call: bool,
    },
    /// Pops the receiver, then the value.
    SetMember(String),
    SetStatic { ty: Ty, name: String },
    Binary(BinaryOp),
    Unary(UnaryOp),
    Pop,
    Jump(usize),
    JumpIfFalse(usize),
    /// Install a fault handler resuming at the address.
    Try(usize),
    EndTry,
    Throw,
    Yield(Option<u32>),
    Spawn { tag: u32, func: usize },
    Stop(u32),
    Return,
}

/// 1-based source position of the statement an op was lowered from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub code: Vec<Op>,
    pub positions: Vec<Pos>,
    pub locals: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarSlot {
    pub name: String,
    pub ty: Ty,
    pub init: Value,
}

impl VarSlot {
    /// Implementation state of the unit; not a field of its type.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with("__")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: String,
    pub vars: Vec<VarSlot>,
    pub functions: Vec<Function>,
    /// `(event, function)` in declaration order.
    pub handlers: Vec<(String, usize)>,
    pub cleanups: BTreeMap<u32, usize>,
}

impl Program {
    pub fn handlers_of<'a>(&'a self, event: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.handlers
            .iter()
            .filter(move |(e, _)| e == event)
            .map(|(_, f)| *f)
    }

    /// Distinct handled events, first occurrence order.
    pub fn events(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (event, _) in &self.handlers {
            if !out.contains(&event.as_str()) {
                out.push(event);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{col}: {message}")]
pub struct LowerError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

// ── Positions ────────────────────────────────────────────────────────────

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn pos(&self, offset: usize) -> Pos {
        let line = self.starts.partition_point(|&s| s <= offset).max(1);
        Pos {
            line: line as u32,
            col: (offset - self.starts[line - 1] + 1) as u32,
        }
    }
}

// ── Lowering ─────────────────────────────────────────────────────────────

struct LoopCx {
    breaks: Vec<usize>,
    try_depth: usize,
}

#[derive(Default)]
struct FnBuilder {
    code: Vec<Op>,
    positions: Vec<Pos>,
    scopes: Vec<HashMap<String, usize>>,
    locals: usize,
    loops: Vec<LoopCx>,
    try_depth: usize,
    pos: Pos,
}

impl FnBuilder {
    fn push(&mut self, op: Op) -> usize {
        self.code.push(op);
        self.positions.push(self.pos);
        self.code.len() - 1
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.code[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) | Op::Try(t) => *t = target,
            _ => {}
        }
    }

    fn local(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn declare(&mut self, name: &str) -> usize {
        let slot = self.locals;
        self.locals += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
        slot
    }

    fn finish(mut self, name: String) -> Function {
        self.push(Op::Return);
        Function {
            name,
            code: self.code,
            positions: self.positions,
            locals: self.locals,
        }
    }
}

struct Lowerer {
    lines: LineIndex,
    vars: HashMap<String, usize>,
    functions: HashMap<String, usize>,
    errors: Vec<LowerError>,
}

impl Lowerer {
    fn error(&mut self, offset: usize, message: impl Into<String>) {
        let pos = self.lines.pos(offset);
        self.errors.push(LowerError {
            line: pos.line,
            col: pos.col,
            message: message.into(),
        });
    }

    fn function(&mut self, name: String, body: &Block) -> Function {
        let mut f = FnBuilder::default();
        self.block(&mut f, body);
        f.finish(name)
    }

    fn block(&mut self, f: &mut FnBuilder, block: &Block) {
        f.scopes.push(HashMap::new());
        for stmt in block {
            self.stmt(f, stmt);
        }
        f.scopes.pop();
    }

    fn stmt(&mut self, f: &mut FnBuilder, stmt: &Stmt) {
        f.pos = self.lines.pos(stmt.span.start());
        match &stmt.kind {
            StmtKind::Let(name, value) => {
                self.expr(f, value);
                let slot = f.declare(&name.name);
                f.push(Op::StoreLocal(slot));
            }
            StmtKind::Expr(e) => {
                self.expr(f, e);
                f.push(Op::Pop);
            }
            StmtKind::Assign(target, value) => self.assign(f, target, value),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(f, cond);
                let skip = f.push(Op::JumpIfFalse(0));
                self.block(f, then);
                match otherwise {
                    Some(otherwise) => {
                        let end = f.push(Op::Jump(0));
                        let here = f.here();
                        f.patch(skip, here);
                        self.block(f, otherwise);
                        let here = f.here();
                        f.patch(end, here);
                    }
                    None => {
                        let here = f.here();
                        f.patch(skip, here);
                    }
                }
            }
            StmtKind::While { cond, body } => {
                let start = f.here();
                self.expr(f, cond);
                let exit = f.push(Op::JumpIfFalse(0));
                f.loops.push(LoopCx {
                    breaks: Vec::new(),
                    try_depth: f.try_depth,
                });
                self.block(f, body);
                f.pos = self.lines.pos(stmt.span.start());
                f.push(Op::Jump(start));
                let end = f.here();
                f.patch(exit, end);
                if let Some(cx) = f.loops.pop() {
                    for b in cx.breaks {
                        f.patch(b, end);
                    }
                }
            }
            StmtKind::Break => {
                let Some(depth) = f.loops.last().map(|l| l.try_depth) else {
                    self.error(stmt.span.start(), "'break' outside of a loop");
                    return;
                };
                for _ in depth..f.try_depth {
                    f.push(Op::EndTry);
                }
                let at = f.push(Op::Jump(0));
                if let Some(cx) = f.loops.last_mut() {
                    cx.breaks.push(at);
                }
            }
            StmtKind::Yield(tag) => {
                f.push(Op::Yield(*tag));
            }
            StmtKind::Spawn(tag, func) => match self.functions.get(&func.name) {
                Some(&index) => {
                    f.push(Op::Spawn { tag: *tag, func: index });
                }
                None => self.error(func.span.start(), format!("unknown function '{}'", func.name)),
            },
            StmtKind::Stop(tag) => {
                f.push(Op::Stop(*tag));
            }
            StmtKind::Try { body, catch } => {
                let handler = f.push(Op::Try(0));
                f.try_depth += 1;
                self.block(f, body);
                f.try_depth -= 1;
                f.push(Op::EndTry);
                match catch {
                    Some(catch) => {
                        let end = f.push(Op::Jump(0));
                        let here = f.here();
                        f.patch(handler, here);
                        self.block(f, catch);
                        let here = f.here();
                        f.patch(end, here);
                    }
                    None => {
                        let here = f.here();
                        f.patch(handler, here);
                    }
                }
            }
            StmtKind::Throw(message) => {
                self.expr(f, message);
                f.push(Op::Throw);
            }
        }
    }

    fn assign(&mut self, f: &mut FnBuilder, target: &Expr, value: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(slot) = f.local(name) {
                    self.expr(f, value);
                    f.push(Op::StoreLocal(slot));
                } else if let Some(&index) = self.vars.get(name) {
                    self.expr(f, value);
                    f.push(Op::StoreVar(index));
                } else {
                    self.error(target.span.start(), format!("unknown name '{name}'"));
                }
            }
            ExprKind::Member {
                receiver,
                member: Member { name, call: None },
            } => {
                self.expr(f, value);
                self.expr(f, receiver);
                f.push(Op::SetMember(name.clone()));
            }
            ExprKind::Static {
                ty,
                member: Member { name, call: None },
            } => {
                self.expr(f, value);
                f.push(Op::SetStatic {
                    ty: Ty::parse(ty),
                    name: name.clone(),
                });
            }
            _ => self.error(target.span.start(), "invalid assignment target"),
        }
    }

    fn args(&mut self, f: &mut FnBuilder, call: &Option<Call>) -> (Option<Signature>, usize) {
        match call {
            Some(call) => {
                for arg in &call.args {
                    self.expr(f, arg);
                }
                (call.signature.clone(), call.args.len())
            }
            None => (None, 0),
        }
    }

    fn expr(&mut self, f: &mut FnBuilder, expr: &Expr) {
        match &expr.kind {
            ExprKind::Null => {
                f.push(Op::Const(Value::Null));
            }
            ExprKind::Bool(b) => {
                f.push(Op::Const(Value::Bool(*b)));
            }
            ExprKind::Int(i) => {
                f.push(Op::Const(Value::Int(*i)));
            }
            ExprKind::Float(x) => {
                f.push(Op::Const(Value::Float(*x)));
            }
            ExprKind::Str(s) => {
                f.push(Op::Const(Value::str(s.clone())));
            }
            ExprKind::TypeLit(t) => {
                f.push(Op::Const(Value::Type(Ty::parse(t))));
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expr(f, item);
                }
                f.push(Op::MakeList(items.len()));
            }
            ExprKind::SelfRef => {
                f.push(Op::LoadSelf);
            }
            ExprKind::Clock => {
                f.push(Op::Clock);
            }
            ExprKind::New(t) => {
                f.push(Op::New(Ty::parse(t)));
            }
            ExprKind::Name(name) => {
                if let Some(slot) = f.local(name) {
                    f.push(Op::LoadLocal(slot));
                } else if let Some(&index) = self.vars.get(name) {
                    f.push(Op::LoadVar(index));
                } else {
                    self.error(expr.span.start(), format!("unknown name '{name}'"));
                }
            }
            ExprKind::Static { ty, member } => {
                let (signature, argc) = self.args(f, &member.call);
                f.push(Op::StaticMember {
                    ty: Ty::parse(ty),
                    name: member.name.clone(),
                    signature,
                    argc,
                    call: member.call.is_some(),
                });
            }
            ExprKind::Member { receiver, member } => {
                self.expr(f, receiver);
                let (signature, argc) = self.args(f, &member.call);
                f.push(Op::Member {
                    name: member.name.clone(),
                    signature,
                    argc,
                    call: member.call.is_some(),
                });
            }
            ExprKind::Binary(op, l, r) => {
                self.expr(f, l);
                self.expr(f, r);
                f.push(Op::Binary(*op));
            }
            ExprKind::Unary(op, x) => {
                self.expr(f, x);
                f.push(Op::Unary(*op));
            }
        }
    }

    /// Initializers are literals, possibly negated or folded.
    fn constant(&mut self, expr: &Expr) -> Option<Value> {
        let folded = match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(x) => Ok(Value::Float(*x)),
            ExprKind::Str(s) => Ok(Value::str(s.clone())),
            ExprKind::TypeLit(t) => Ok(Value::Type(Ty::parse(t))),
            ExprKind::List(items) => {
                let items = items
                    .iter()
                    .map(|i| self.constant(i))
                    .collect::<Option<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            ExprKind::Unary(op, x) => {
                let x = self.constant(x)?;
                apply_unary(*op, &x)
            }
            ExprKind::Binary(op, l, r) => {
                let l = self.constant(l)?;
                let r = self.constant(r)?;
                apply_binary(*op, &l, &r)
            }
            _ => {
                self.error(expr.span.start(), "variable initializer must be constant");
                return None;
            }
        };
        match folded {
            Ok(v) => Some(v),
            Err(err) => {
                self.error(expr.span.start(), err.to_string());
                None
            }
        }
    }
}

/// Lower `unit` (parsed from `source`) to a program.
pub fn lower(source: &str, unit: &Unit) -> Result<Program, Vec<LowerError>> {
    let mut lowerer = Lowerer {
        lines: LineIndex::new(source),
        vars: HashMap::new(),
        functions: HashMap::new(),
        errors: Vec::new(),
    };

    // Declarations first: functions may be spawned before they appear.
    let mut vars = Vec::new();
    let mut slots = 0usize;
    for item in &unit.items {
        match item {
            Item::Var { name, ty, init } => {
                if lowerer.vars.insert(name.name.clone(), vars.len()).is_some() {
                    lowerer.error(name.span.start(), format!("variable '{}' declared twice", name.name));
                    continue;
                }
                let ty = Ty::parse(&ty.name);
                let init = match init {
                    Some(e) => lowerer.constant(e).unwrap_or(Value::Null),
                    None => ty.zero(),
                };
                vars.push(VarSlot {
                    name: name.name.clone(),
                    ty,
                    init,
                });
            }
            Item::Fn { name, .. } => {
                if lowerer.functions.insert(name.name.clone(), slots).is_some() {
                    lowerer.error(name.span.start(), format!("function '{}' declared twice", name.name));
                }
                slots += 1;
            }
            Item::On { .. } | Item::Cleanup { .. } => slots += 1,
        }
    }

    let mut functions = Vec::with_capacity(slots);
    let mut handlers = Vec::new();
    let mut cleanups = BTreeMap::new();
    for item in &unit.items {
        match item {
            Item::Var { .. } => {}
            Item::On { event, body } => {
                handlers.push((event.name.clone(), functions.len()));
                functions.push(lowerer.function(format!("on {}", event.name), body));
            }
            Item::Fn { name, body } => {
                functions.push(lowerer.function(name.name.clone(), body));
            }
            Item::Cleanup { node, body, span } => {
                if cleanups.insert(*node, functions.len()).is_some() {
                    lowerer.error(span.start(), format!("cleanup {node} declared twice"));
                }
                functions.push(lowerer.function(format!("cleanup {node}"), body));
            }
        }
    }

    if !lowerer.errors.is_empty() {
        return Err(lowerer.errors);
    }
    Ok(Program {
        name: unit.name.name.clone(),
        vars,
        functions,
        handlers,
        cleanups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;

    fn lower_source(source: &str) -> Result<Program, Vec<LowerError>> {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        lower(source, &parsed.unit.expect("unit"))
    }

    fn messages(source: &str) -> Vec<String> {
        lower_source(source)
            .expect_err("lowering should fail")
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn declarations_and_handlers() {
        let program = lower_source(
            "unit G;\nvar x: int = -2;\nvar __index_n3: any;\non start {\n    spawn 4 __co_n4;\n}\nfn __co_n4() {\n    yield 4;\n}\ncleanup 4 {\n}\non start {\n}\n",
        )
        .unwrap();
        assert_eq!(program.name, "G");
        assert_eq!(program.vars[0].init, Value::Int(-2));
        assert!(program.vars[1].is_hidden());
        assert_eq!(program.handlers, vec![("start".to_string(), 0), ("start".to_string(), 3)]);
        assert_eq!(program.cleanups.get(&4), Some(&2));
        assert_eq!(program.functions[0].code[0], Op::Spawn { tag: 4, func: 1 });
        assert_eq!(program.events(), vec!["start"]);
    }

    #[test]
    fn names_bind_to_locals_then_vars() {
        let program = lower_source(
            "unit G;\nvar x: int;\non start {\n    let t = x + 1;\n    x = t;\n}\n",
        )
        .unwrap();
        assert_eq!(
            program.functions[0].code,
            vec![
                Op::LoadVar(0),
                Op::Const(Value::Int(1)),
                Op::Binary(BinaryOp::Add),
                Op::StoreLocal(0),
                Op::LoadLocal(0),
                Op::StoreVar(0),
                Op::Return,
            ]
        );
        assert_eq!(program.functions[0].positions[0], Pos { line: 4, col: 5 });
        assert_eq!(program.functions[0].positions[4], Pos { line: 5, col: 5 });
    }

    #[test]
    fn member_assignment_evaluates_value_first() {
        let program = lower_source("unit G;\non start {\n    self.c.count = 3;\n}\n").unwrap();
        assert_eq!(
            program.functions[0].code[..4],
            [
                Op::Const(Value::Int(3)),
                Op::LoadSelf,
                Op::Member {
                    name: "c".into(),
                    signature: None,
                    argc: 0,
                    call: false
                },
                Op::SetMember("count".into()),
            ]
        );
    }

    #[test]
    fn break_leaves_open_handlers() {
        let program = lower_source(
            "unit G;\non start {\n    while (true) {\n        try {\n            break;\n        }\n    }\n}\n",
        )
        .unwrap();
        let code = &program.functions[0].code;
        assert_eq!(code[2], Op::Try(6));
        assert_eq!(code[3], Op::EndTry);
        assert_eq!(code[4], Op::Jump(7));
        assert_eq!(code[6], Op::Jump(0));
        assert_eq!(code[1], Op::JumpIfFalse(7));
    }

    #[test]
    fn try_catch_layout() {
        let program =
            lower_source("unit G;\non start {\n    try {\n        throw \"x\";\n    } catch {\n        stop 1;\n    }\n}\n")
                .unwrap();
        assert_eq!(
            program.functions[0].code,
            vec![
                Op::Try(5),
                Op::Const(Value::str("x")),
                Op::Throw,
                Op::EndTry,
                Op::Jump(6),
                Op::Stop(1),
                Op::Return,
            ]
        );
    }

    #[test]
    fn errors_are_collected() {
        let errors = messages(
            "unit G;\nvar x: int;\nvar x: int;\nvar y: int = self;\non start {\n    z = 1;\n    break;\n    spawn 1 nowhere;\n    1 = 2;\n}\n",
        );
        assert_eq!(
            errors,
            vec![
                "3:5: variable 'x' declared twice",
                "4:14: variable initializer must be constant",
                "6:5: unknown name 'z'",
                "7:5: 'break' outside of a loop",
                "8:13: unknown function 'nowhere'",
                "9:5: invalid assignment target",
            ]
        );
    }
}

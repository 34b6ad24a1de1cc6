// script/ast.rs — Syntax tree of a Weft script unit
//
// Produced by `parser::parse`, consumed by `lower`. Statements keep their
// span so compiled code can report faults at source positions.

use chumsky::span::SimpleSpan;

use crate::reference::Signature;
use crate::value::{BinaryOp, UnaryOp};

pub type Span = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: Ident,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Var {
        name: Ident,
        ty: Ident,
        init: Option<Expr>,
    },
    On {
        event: Ident,
        body: Block,
    },
    Fn {
        name: Ident,
        body: Block,
    },
    Cleanup {
        node: u32,
        body: Block,
        span: Span,
    },
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let(Ident, Expr),
    Expr(Expr),
    Assign(Expr, Expr),
    If {
        cond: Expr,
        then: Block,
        otherwise: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Break,
    Yield(Option<u32>),
    Spawn(u32, Ident),
    Stop(u32),
    Try {
        body: Block,
        catch: Option<Block>,
    },
    Throw(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    /// `@Type`
    TypeLit(String),
    SelfRef,
    Clock,
    Name(String),
    New(String),
    /// `Type::member`
    Static { ty: String, member: Member },
    Member { receiver: Box<Expr>, member: Member },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub call: Option<Call>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub signature: Option<Signature>,
    pub args: Vec<Expr>,
}

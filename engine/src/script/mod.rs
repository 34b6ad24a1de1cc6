// script/mod.rs — The Weft script language
//
// Emitted units are plain text in a small statement language; this module is
// everything needed to run one: lexer, parser, lowering to stack bytecode and
// the fiber VM that executes it.

pub mod ast;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod vm;

/// Reserved words of the script language. Graph names, variables and entry
/// events must avoid them to be emittable.
pub const KEYWORDS: &[&str] = &[
    "unit", "var", "on", "fn", "cleanup", "let", "if", "else", "while", "break", "yield", "spawn",
    "stop", "try", "catch", "throw", "true", "false", "null", "self", "new", "clock",
];

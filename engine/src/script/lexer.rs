// script/lexer.rs — Lexer for Weft script units
//
// Tokenizes emitted unit source. Uses the `logos` crate for DFA-based lexing.
// Keywords are fixed tokens; identifiers carry no value and are recovered
// from the source through their span.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters, bad escapes and out-of-range
//   integers produce `LexError`; lexing continues.
// Side effects: none.

use std::fmt;

use logos::Logos;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("unit")]
    Unit,
    #[token("var")]
    Var,
    #[token("on")]
    On,
    #[token("fn")]
    Fn,
    #[token("cleanup")]
    Cleanup,
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("yield")]
    Yield,
    #[token("spawn")]
    Spawn,
    #[token("stop")]
    Stop,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("throw")]
    Throw,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("self")]
    SelfKw,
    #[token("new")]
    New,
    #[token("clock")]
    Clock,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token("=")]
    Assign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    // ── Literals ──
    /// Float literal: a fraction, an exponent, or both.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?|[0-9]+[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    /// Non-negative integer literal; negation is the unary operator.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// String literal with `\"`, `\\`, `\n` and `\t` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Unit => "unit",
            Token::Var => "var",
            Token::On => "on",
            Token::Fn => "fn",
            Token::Cleanup => "cleanup",
            Token::Let => "let",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::Break => "break",
            Token::Yield => "yield",
            Token::Spawn => "spawn",
            Token::Stop => "stop",
            Token::Try => "try",
            Token::Catch => "catch",
            Token::Throw => "throw",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::SelfKw => "self",
            Token::New => "new",
            Token::Clock => "clock",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::ColonColon => "::",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::At => "@",
            Token::Assign => "=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Float(v) => return write!(f, "{v:?}"),
            Token::Int(v) => return write!(f, "{v}"),
            Token::Str(s) => return write!(f, "\"{s}\""),
            Token::Ident => "<ident>",
        };
        f.write_str(text)
    }
}

// ── Callbacks ──

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex a unit. Errors are collected and lexing continues past them.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("on start { stop 3; }"),
            vec![
                Token::On,
                Token::Ident,
                Token::LBrace,
                Token::Stop,
                Token::Int(3),
                Token::Semi,
                Token::RBrace
            ]
        );
        assert_eq!(kinds("__index_n3 starts"), vec![Token::Ident, Token::Ident]);
    }

    #[test]
    fn numbers_split_by_form() {
        assert_eq!(
            kinds("1 1.5 2e3 0.25e-1"),
            vec![Token::Int(1), Token::Float(1.5), Token::Float(2000.0), Token::Float(0.025)]
        );
    }

    #[test]
    fn operators_take_longest_match() {
        assert_eq!(
            kinds("<= == != :: : && ||"),
            vec![
                Token::Le,
                Token::EqEq,
                Token::NotEq,
                Token::ColonColon,
                Token::Colon,
                Token::AndAnd,
                Token::OrOr
            ]
        );
    }

    #[test]
    fn strings_unescape() {
        assert_eq!(
            kinds(r#""a\"b\\c\n""#),
            vec![Token::Str("a\"b\\c\n".to_string())]
        );
    }

    #[test]
    fn comments_are_skipped_and_errors_collected() {
        assert_eq!(kinds("// header\nunit G;"), vec![Token::Unit, Token::Ident, Token::Semi]);
        let result = lex("x # y");
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 2, end: 3 });
    }
}

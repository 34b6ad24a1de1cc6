// script/parser.rs — Parser for Weft script units
//
// Parses a token stream (from the lexer) into a `Unit`. Uses chumsky
// combinators. Operator precedence, loosest first:
//
//   ||   &&   == !=   < <= > >=   + -   * / %   unary - !   postfix .member
//
// Preconditions: input is a token stream from `lexer::lex()`.
// Postconditions: returns a unit plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::reference::Signature;
use crate::script::ast::*;
use crate::script::lexer::Token;
use crate::value::{BinaryOp, Ty, UnaryOp};

/// Result of parsing: the unit plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub unit: Option<Unit>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a unit's source text. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::script::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = unit_parser(source);
    let (unit, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        unit,
        errors: all_errors,
    }
}

fn join(a: SimpleSpan, b: SimpleSpan) -> SimpleSpan {
    (a.start()..b.end()).into()
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |left, (op, right)| Expr {
        span: join(left.span, right.span),
        kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
    })
}

// ── Main parser builder ──

fn unit_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Unit, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let node_id = select! {
        Token::Int(n) if (0..=u32::MAX as i64).contains(&n) => n as u32,
    };

    // ── Signature: '[' types ( ';' types )? ']' ──

    let types = ident
        .clone()
        .map(|id| Ty::parse(&id.name))
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>();

    let signature = types
        .clone()
        .then(just(Token::Semi).ignore_then(types.clone()).or_not())
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map(|(params, generics)| Signature::new(params).with_generics(generics.unwrap_or_default()));

    // ── Expressions ──

    let expr = recursive(|expr| {
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let call = signature
            .clone()
            .or_not()
            .then(args)
            .map(|(signature, args)| Call { signature, args });

        let member = ident
            .clone()
            .then(call.or_not())
            .map(|(name, call)| Member {
                name: name.name,
                call,
            });

        let literal = select! {
            Token::Int(n) => ExprKind::Int(n),
            Token::Float(f) => ExprKind::Float(f),
            Token::Str(s) => ExprKind::Str(s),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::Null => ExprKind::Null,
            Token::SelfKw => ExprKind::SelfRef,
        };

        let list = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(ExprKind::List);

        let type_lit = just(Token::At)
            .ignore_then(ident.clone())
            .map(|id| ExprKind::TypeLit(id.name));

        let clock = just(Token::Clock)
            .then(just(Token::LParen))
            .then(just(Token::RParen))
            .to(ExprKind::Clock);

        let new = just(Token::New)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::LParen))
            .then_ignore(just(Token::RParen))
            .map(|id| ExprKind::New(id.name));

        let static_member = ident
            .clone()
            .then_ignore(just(Token::ColonColon))
            .then(member.clone())
            .map(|(ty, member)| ExprKind::Static { ty: ty.name, member });

        let name = ident.clone().map(|id| ExprKind::Name(id.name));

        let atom = choice((literal, list, type_lit, clock, new, static_member, name))
            .map_with(|kind, e| Expr { kind, span: e.span() })
            .or(expr
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)));

        let postfix = atom
            .then(
                just(Token::Dot)
                    .ignore_then(member)
                    .map_with(|member, e| (member, e.span()))
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(base, members)| {
                members.into_iter().fold(base, |receiver, (member, span)| Expr {
                    span: join(receiver.span, span),
                    kind: ExprKind::Member {
                        receiver: Box::new(receiver),
                        member,
                    },
                })
            })
            .boxed();

        let unary_op = select! {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
        }
        .map_with(|op, e| (op, e.span()));

        let unary = unary_op
            .repeated()
            .collect::<Vec<_>>()
            .then(postfix)
            .map(|(ops, operand)| {
                ops.into_iter().rev().fold(operand, |operand, (op, span)| Expr {
                    span: join(span, operand.span),
                    kind: ExprKind::Unary(op, Box::new(operand)),
                })
            })
            .boxed();

        let product = unary
            .clone()
            .then(
                select! {
                    Token::Star => BinaryOp::Mul,
                    Token::Slash => BinaryOp::Div,
                    Token::Percent => BinaryOp::Rem,
                }
                .then(unary)
                .repeated()
                .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| fold_binary(first, rest))
            .boxed();

        let sum = product
            .clone()
            .then(
                select! {
                    Token::Plus => BinaryOp::Add,
                    Token::Minus => BinaryOp::Sub,
                }
                .then(product)
                .repeated()
                .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| fold_binary(first, rest))
            .boxed();

        let comparison = sum
            .clone()
            .then(
                select! {
                    Token::Lt => BinaryOp::Lt,
                    Token::Le => BinaryOp::Le,
                    Token::Gt => BinaryOp::Gt,
                    Token::Ge => BinaryOp::Ge,
                }
                .then(sum)
                .repeated()
                .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| fold_binary(first, rest))
            .boxed();

        let equality = comparison
            .clone()
            .then(
                select! {
                    Token::EqEq => BinaryOp::Eq,
                    Token::NotEq => BinaryOp::Ne,
                }
                .then(comparison)
                .repeated()
                .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| fold_binary(first, rest))
            .boxed();

        let conjunction = equality
            .clone()
            .then(
                just(Token::AndAnd)
                    .to(BinaryOp::And)
                    .then(equality)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| fold_binary(first, rest))
            .boxed();

        conjunction
            .clone()
            .then(
                just(Token::OrOr)
                    .to(BinaryOp::Or)
                    .then(conjunction)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| fold_binary(first, rest))
            .boxed()
    });

    // ── Statements ──

    let block = recursive(|block| {
        let semi = just(Token::Semi);

        let let_stmt = just(Token::Let)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .then_ignore(semi.clone())
            .map(|(name, value)| StmtKind::Let(name, value));

        // `else if` nests the inner `if` as the sole statement of the else block.
        let if_stmt = recursive(|if_stmt| {
            let else_if = if_stmt.map_with(|kind, e| vec![Stmt { kind, span: e.span() }]);
            just(Token::If)
                .ignore_then(
                    expr.clone()
                        .delimited_by(just(Token::LParen), just(Token::RParen)),
                )
                .then(block.clone())
                .then(
                    just(Token::Else)
                        .ignore_then(block.clone().or(else_if))
                        .or_not(),
                )
                .map(|((cond, then), otherwise)| StmtKind::If {
                    cond,
                    then,
                    otherwise,
                })
        });

        let while_stmt = just(Token::While)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .map(|(cond, body)| StmtKind::While { cond, body });

        let break_stmt = just(Token::Break).then(semi.clone()).to(StmtKind::Break);

        let yield_stmt = just(Token::Yield)
            .ignore_then(node_id.or_not())
            .then_ignore(semi.clone())
            .map(StmtKind::Yield);

        let spawn_stmt = just(Token::Spawn)
            .ignore_then(node_id)
            .then(ident.clone())
            .then_ignore(semi.clone())
            .map(|(tag, func)| StmtKind::Spawn(tag, func));

        let stop_stmt = just(Token::Stop)
            .ignore_then(node_id)
            .then_ignore(semi.clone())
            .map(StmtKind::Stop);

        let try_stmt = just(Token::Try)
            .ignore_then(block.clone())
            .then(just(Token::Catch).ignore_then(block.clone()).or_not())
            .map(|(body, catch)| StmtKind::Try { body, catch });

        let throw_stmt = just(Token::Throw)
            .ignore_then(expr.clone())
            .then_ignore(semi.clone())
            .map(StmtKind::Throw);

        let expr_stmt = expr
            .clone()
            .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
            .then_ignore(semi)
            .map(|(lhs, rhs)| match rhs {
                Some(value) => StmtKind::Assign(lhs, value),
                None => StmtKind::Expr(lhs),
            });

        let stmt = choice((
            let_stmt,
            if_stmt,
            while_stmt,
            break_stmt,
            yield_stmt,
            spawn_stmt,
            stop_stmt,
            try_stmt,
            throw_stmt,
            expr_stmt,
        ))
        .map_with(|kind, e| Stmt { kind, span: e.span() });

        stmt.repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .boxed()
    });

    // ── Items ──

    let var_item = just(Token::Var)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(ident.clone())
        .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
        .then_ignore(just(Token::Semi))
        .map(|((name, ty), init)| Item::Var { name, ty, init });

    let on_item = just(Token::On)
        .ignore_then(ident.clone())
        .then(block.clone())
        .map(|(event, body)| Item::On { event, body });

    let fn_item = just(Token::Fn)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::LParen))
        .then_ignore(just(Token::RParen))
        .then(block.clone())
        .map(|(name, body)| Item::Fn { name, body });

    let cleanup_item = just(Token::Cleanup)
        .ignore_then(node_id)
        .then(block)
        .map_with(|(node, body), e| Item::Cleanup {
            node,
            body,
            span: e.span(),
        });

    let item = choice((var_item, on_item, fn_item, cleanup_item));

    just(Token::Unit)
        .ignore_then(ident)
        .then_ignore(just(Token::Semi))
        .then(item.repeated().collect::<Vec<_>>())
        .then_ignore(end())
        .map(|(name, items)| Unit { name, items })
}

// error.rs — Engine error taxonomy
//
// One enum shared by the resolver, both execution backends and the emitter's
// checking passes. Each variant maps to a stable diagnostic code so errors
// raised at runtime and problems found at compile time read the same way.

use thiserror::Error;

use crate::diag::{codes, DiagCode, Diagnostic, Location};
use crate::host::MemberKind;
use crate::id::NodeId;
use crate::value::Ty;

/// Why a member reference could not be turned into an accessor or fragment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("reference is unassigned")]
    Unassigned,
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("type '{ty}' has no member '{member}'")]
    UnknownMember { ty: String, member: String },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("node {node} has no output '{port}'")]
    UnknownOutput { node: NodeId, port: String },
    #[error("target unreachable: {0}")]
    Unreachable(String),
    #[error("'{member}' resolves to a {found}, expected a {expected}")]
    KindMismatch {
        member: String,
        expected: MemberKind,
        found: MemberKind,
    },
    #[error("'{member}' on '{ty}' is {}", static_phrase(.is_static))]
    StaticMismatch {
        ty: String,
        member: String,
        is_static: bool,
    },
}

fn static_phrase(is_static: &bool) -> &'static str {
    if *is_static {
        "static but accessed through an instance"
    } else {
        "an instance member but accessed statically"
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("no overload of '{member}' matches {recorded}; available: {available}")]
    OverloadMismatch {
        member: String,
        recorded: String,
        available: String,
    },
    #[error("cannot assign to {0}")]
    ReadOnly(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Ty, found: Ty },
    #[error("'{member}' takes {expected} argument(s), {given} given")]
    Arity {
        member: String,
        expected: usize,
        given: usize,
    },
    #[error("value cycle through {0}")]
    ValueCycle(NodeId),
    #[error("finish called on a node that is {0}")]
    FinishReentry(String),
    #[error("{0}")]
    Structural(String),
    #[error("{0}")]
    Fault(String),
}

impl EngineError {
    pub fn type_mismatch(expected: Ty, found: Ty) -> Self {
        EngineError::TypeMismatch { expected, found }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        EngineError::Fault(message.into())
    }

    pub fn code(&self) -> DiagCode {
        match self {
            EngineError::Resolution(ResolutionError::Unassigned) => codes::E0100,
            EngineError::Resolution(_) => codes::E0101,
            EngineError::OverloadMismatch { .. } | EngineError::Arity { .. } => codes::E0102,
            EngineError::ReadOnly(_) => codes::E0103,
            EngineError::TypeMismatch { .. } => codes::E0200,
            EngineError::ValueCycle(_) => codes::E0303,
            EngineError::Structural(_) => codes::E0307,
            EngineError::FinishReentry(_) => codes::E0401,
            EngineError::Fault(_) => codes::E0400,
        }
    }

    /// Render as an error diagnostic at `location`.
    pub fn to_diagnostic(&self, location: Location) -> Diagnostic {
        let diag = Diagnostic::error(location, self.to_string()).with_code(self.code());
        match self {
            EngineError::Resolution(ResolutionError::Unassigned) => {
                diag.with_hint("connect the port or assign a value")
            }
            EngineError::OverloadMismatch { .. } => {
                diag.with_hint("re-select the member so its signature is recorded again")
            }
            _ => diag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            EngineError::from(ResolutionError::Unassigned).code(),
            codes::E0100
        );
        assert_eq!(
            EngineError::from(ResolutionError::UnknownVariable("x".into())).code(),
            codes::E0101
        );
        assert_eq!(EngineError::ReadOnly("a literal".into()).code(), codes::E0103);
        assert_eq!(
            EngineError::type_mismatch(Ty::Int, Ty::Str).code(),
            codes::E0200
        );
        assert_eq!(EngineError::fault("boom").code(), codes::E0400);
    }

    #[test]
    fn structural_errors_are_not_finish_reentry() {
        let arity = EngineError::Arity {
            member: "emit".into(),
            expected: 1,
            given: 0,
        };
        assert_eq!(arity.code(), codes::E0102);
        assert_eq!(arity.to_string(), "'emit' takes 1 argument(s), 0 given");
        assert_eq!(EngineError::ValueCycle(NodeId(4)).code(), codes::E0303);
        assert_eq!(EngineError::Structural("no active frame".into()).code(), codes::E0307);
        assert_eq!(EngineError::FinishReentry("Success".into()).code(), codes::E0401);
    }

    #[test]
    fn messages() {
        let e = EngineError::type_mismatch(Ty::Bool, Ty::Int);
        assert_eq!(e.to_string(), "type mismatch: expected bool, found int");
        let e = EngineError::from(ResolutionError::StaticMismatch {
            ty: "Math".into(),
            member: "max".into(),
            is_static: true,
        });
        assert_eq!(
            e.to_string(),
            "'max' on 'Math' is static but accessed through an instance"
        );
    }

    #[test]
    fn unassigned_diagnostic_has_hint() {
        let d = EngineError::from(ResolutionError::Unassigned)
            .to_diagnostic(Location::port(NodeId(2), "value"));
        assert_eq!(d.code, Some(codes::E0100));
        assert!(d.hint.is_some());
    }
}

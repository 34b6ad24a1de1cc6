// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by graph validation, checking, emission and
// both execution backends. Locations are graph coordinates (node + port)
// rather than source spans; emitted-source positions are translated back to
// nodes through the unit's debug map.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::NodeId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0002`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code keeps its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Resolution (E01xx)
    pub const E0100: DiagCode = DiagCode("E0100"); // unassigned reference
    pub const E0101: DiagCode = DiagCode("E0101"); // unresolved name / member / type / output
    pub const E0102: DiagCode = DiagCode("E0102"); // overload mismatch
    pub const E0103: DiagCode = DiagCode("E0103"); // read-only target

    // Types (E02xx)
    pub const E0200: DiagCode = DiagCode("E0200");

    // Structure (E03xx)
    pub const E0300: DiagCode = DiagCode("E0300"); // dangling flow port
    pub const E0301: DiagCode = DiagCode("E0301"); // dangling node output
    pub const E0302: DiagCode = DiagCode("E0302"); // flow cycle
    pub const E0303: DiagCode = DiagCode("E0303"); // value cycle
    pub const E0304: DiagCode = DiagCode("E0304"); // invalid stop target
    pub const E0305: DiagCode = DiagCode("E0305"); // bad scope / variable declaration
    pub const E0306: DiagCode = DiagCode("E0306"); // node id does not match arena slot
    pub const E0307: DiagCode = DiagCode("E0307"); // malformed reference or flow

    // Execution (E04xx)
    pub const E0400: DiagCode = DiagCode("E0400"); // runtime fault
    pub const E0401: DiagCode = DiagCode("E0401"); // finish re-entry

    // Loading (E05xx)
    pub const E0500: DiagCode = DiagCode("E0500");

    // Warnings
    pub const W0001: DiagCode = DiagCode("W0001"); // stale recorded type
    pub const W0002: DiagCode = DiagCode("W0002"); // unreachable node
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// Where in the graph a diagnostic applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub node: Option<NodeId>,
    pub port: Option<String>,
}

impl Location {
    pub fn node(node: NodeId) -> Self {
        Self {
            node: Some(node),
            port: None,
        }
    }

    pub fn port(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node: Some(node),
            port: Some(port.into()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node, &self.port) {
            (Some(n), Some(p)) => write!(f, "{n}.{p}"),
            (Some(n), None) => write!(f, "{n}"),
            (None, _) => write!(f, "<graph>"),
        }
    }
}

/// A secondary node providing context for a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedNode {
    pub node: NodeId,
    pub label: String,
}

/// One link in a cause chain explaining a propagated failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CauseRecord {
    pub message: String,
    pub node: Option<NodeId>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedNode>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related nodes, or causes.
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message)
    }

    pub fn warning(location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, location, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_related(mut self, node: NodeId, label: impl Into<String>) -> Self {
        self.related.push(RelatedNode {
            node,
            label: label.into(),
        });
        self
    }

    pub fn with_cause(mut self, message: impl Into<String>, node: Option<NodeId>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            node,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        match &self.code {
            Some(code) => write!(f, "{level}[{code}] {}: {}", self.location, self.message)?,
            None => write!(f, "{level} {}: {}", self.location, self.message)?,
        }
        for cause in &self.cause_chain {
            match cause.node {
                Some(n) => write!(f, "\n  caused by ({n}): {}", cause.message)?,
                None => write!(f, "\n  caused by: {}", cause.message)?,
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

/// Drop exact duplicates while keeping first-seen order.
///
/// A node reached along several flow paths is lowered once per path; its
/// diagnostics must still be reported once.
pub fn dedup(diags: &mut Vec<Diagnostic>) {
    let mut seen: Vec<(Option<DiagCode>, Location, String)> = Vec::new();
    diags.retain(|d| {
        let key = (d.code, d.location.clone(), d.message.clone());
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(Location::port(NodeId(3), "value"), "reference is unassigned")
            .with_code(codes::E0100)
            .with_hint("connect the port or assign a literal")
            .with_related(NodeId(1), "consumer");
        assert_eq!(d.code, Some(codes::E0100));
        assert_eq!(d.related.len(), 1);
        assert!(d.is_error());
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::error(Location::port(NodeId(3), "value"), "bad")
            .with_code(codes::E0200)
            .with_hint("fix it");
        assert_eq!(d.to_string(), "error[E0200] n3.value: bad\n  hint: fix it");
    }

    #[test]
    fn display_graph_level_warning() {
        let d = Diagnostic::warning(Location::default(), "stale");
        assert_eq!(d.to_string(), "warning <graph>: stale");
    }

    #[test]
    fn dedup_keeps_first() {
        let a = Diagnostic::error(Location::node(NodeId(1)), "x").with_code(codes::E0100);
        let b = Diagnostic::error(Location::node(NodeId(2)), "x").with_code(codes::E0100);
        let mut v = vec![a.clone(), b.clone(), a.clone()];
        dedup(&mut v);
        assert_eq!(v, vec![a, b]);
    }
}

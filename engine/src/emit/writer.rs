// emit/writer.rs — Indented line buffers and the emitter's name table
//
// Source is produced as line buffers rather than one string: declarations are
// only complete after every handler is lowered, and spawned functions are
// discovered mid-lowering. Each line remembers the node it was emitted for,
// which is what the debug map is built from when the buffers are stitched
// together.
//
// Preconditions: `open`/`close` calls are balanced per buffer.
// Postconditions: `assemble` numbers lines from 1; a mapped line's column is
//   `indent * 4 + 1`, the first column of its statement.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;

use crate::emit::debug_map::DebugMap;
use crate::id::NodeId;

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub indent: usize,
    pub text: String,
    pub node: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct SourceWriter {
    lines: Vec<Line>,
    indent: usize,
    node: Option<NodeId>,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequent lines to `node`; returns the previous owner.
    pub fn set_node(&mut self, node: Option<NodeId>) -> Option<NodeId> {
        std::mem::replace(&mut self.node, node)
    }

    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(Line {
            indent: self.indent,
            text: text.into(),
            node: self.node,
        });
    }

    /// Unattributed line, e.g. a header comment or a declaration.
    pub fn plain(&mut self, text: impl Into<String>) {
        self.lines.push(Line {
            indent: self.indent,
            text: text.into(),
            node: None,
        });
    }

    /// `head {` and indent.
    pub fn open(&mut self, head: &str) {
        self.line(format!("{head} {{"));
        self.indent += 1;
    }

    pub fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.lines.push(Line {
            indent: self.indent,
            text: "}".to_string(),
            node: None,
        });
    }

    /// `} head {` at the enclosing level, e.g. `} else {`.
    pub fn reopen(&mut self, head: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(format!("}} {head} {{"));
        self.indent += 1;
    }

    /// Append `other`, written from depth 0, at the current depth.
    pub fn append_nested(&mut self, other: SourceWriter) {
        for mut line in other.lines {
            line.indent += self.indent;
            self.lines.push(line);
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Stitch buffers into the final text and its debug map.
pub fn assemble(parts: &[SourceWriter]) -> (String, DebugMap) {
    let mut text = String::new();
    let mut map = DebugMap::default();
    let mut line_no = 0u32;
    for part in parts {
        for line in &part.lines {
            line_no += 1;
            for _ in 0..line.indent {
                text.push_str(INDENT);
            }
            text.push_str(&line.text);
            text.push('\n');
            if let Some(node) = line.node {
                map.insert(line_no, (line.indent * INDENT.len() + 1) as u32, node);
            }
        }
    }
    (text, map)
}

// ── Names ────────────────────────────────────────────────────────────────

/// Stable, collision-free generated names. The first request for a base
/// gets the base itself; re-emitting the same node gets `_2`, `_3`, ...
#[derive(Debug, Default)]
pub struct NameTable {
    counts: HashMap<String, usize>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, base: &str) -> String {
        let n = self.counts.entry(base.to_string()).or_insert(0);
        *n += 1;
        if *n == 1 {
            base.to_string()
        } else {
            format!("{base}_{n}")
        }
    }

    /// Hidden per-node state slot, e.g. `__index_n4`.
    pub fn hidden(purpose: &str, node: NodeId) -> String {
        format!("__{purpose}_{node}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_maps_statement_columns() {
        let mut w = SourceWriter::new();
        w.plain("unit G;");
        w.set_node(Some(NodeId(0)));
        w.open("on start");
        w.set_node(Some(NodeId(1)));
        w.line("x = 1;");
        w.close();
        let (text, map) = assemble(&[w]);
        assert_eq!(text, "unit G;\non start {\n    x = 1;\n}\n");
        assert_eq!(map.exact(2, 1), Some(NodeId(0)));
        assert_eq!(map.exact(3, 5), Some(NodeId(1)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn reopen_keeps_depth() {
        let mut w = SourceWriter::new();
        w.open("if (c)");
        w.line("a;");
        w.reopen("else");
        w.line("b;");
        w.close();
        let (text, _) = assemble(&[w]);
        assert_eq!(text, "if (c) {\n    a;\n} else {\n    b;\n}\n");
    }

    #[test]
    fn names_get_occurrence_suffixes() {
        let mut names = NameTable::new();
        assert_eq!(names.fresh("__co_n3"), "__co_n3");
        assert_eq!(names.fresh("__co_n3"), "__co_n3_2");
        assert_eq!(names.fresh("__co_n4"), "__co_n4");
        assert_eq!(NameTable::hidden("index", NodeId(7)), "__index_n7");
    }
}

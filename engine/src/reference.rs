// reference.rs — Serialized member references
//
// A `MemberReference` is the persisted descriptor behind every value port:
// a literal, a variable, a dotted member path rooted at `self`, a type or a
// value, a node output, and so on. It is pure data; turning it into an
// accessor or a source fragment is the resolver's job (`resolve`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, ScopeId};
use crate::value::{Ty, Value};

// ── Reference ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemberReference {
    pub target: Target,
    /// Scope the reference was authored in; variables resolve from here up.
    #[serde(default, skip_serializing_if = "is_root_scope")]
    pub scope: ScopeId,
    /// Type recorded by the editor the last time the reference was annotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_type: Option<Ty>,
}

fn is_root_scope(scope: &ScopeId) -> bool {
    *scope == ScopeId::ROOT
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    #[default]
    None,
    Literal {
        value: Value,
    },
    Variable {
        name: String,
    },
    Field {
        path: MemberPath,
    },
    Property {
        path: MemberPath,
    },
    Method {
        path: MemberPath,
    },
    Type {
        ty: Ty,
    },
    NodeOutput {
        node: NodeId,
        port: String,
    },
    SelfReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    None,
    Literal,
    Variable,
    Field,
    Property,
    Method,
    Type,
    NodeOutput,
    SelfReference,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefKind::None => "unassigned reference",
            RefKind::Literal => "a literal",
            RefKind::Variable => "a variable",
            RefKind::Field => "a field",
            RefKind::Property => "a property",
            RefKind::Method => "a method",
            RefKind::Type => "a type",
            RefKind::NodeOutput => "a node output",
            RefKind::SelfReference => "self",
        })
    }
}

// ── Member paths ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPath {
    pub root: PathRoot,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathRoot {
    /// The graph instance.
    SelfInstance,
    /// Static members of a type.
    Static { ty: Ty },
    /// Members of whatever another reference evaluates to.
    Value { source: Box<MemberReference> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    /// Overload recorded when the member was picked in the editor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<MemberReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Ty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generics: Vec<Ty>,
}

impl Signature {
    pub fn new(params: Vec<Ty>) -> Self {
        Self {
            params,
            generics: Vec::new(),
        }
    }

    pub fn with_generics(mut self, generics: Vec<Ty>) -> Self {
        self.generics = generics;
        self
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(Ty::name).collect();
        if self.generics.is_empty() {
            write!(f, "({})", params.join(", "))
        } else {
            let generics: Vec<&str> = self.generics.iter().map(Ty::name).collect();
            write!(f, "<{}>({})", generics.join(", "), params.join(", "))
        }
    }
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: None,
            args: Vec::new(),
        }
    }

    pub fn signature(mut self, sig: Signature) -> Self {
        self.signature = Some(sig);
        self
    }

    pub fn args(mut self, args: Vec<MemberReference>) -> Self {
        self.args = args;
        self
    }
}

impl MemberPath {
    pub fn on_self(names: &[&str]) -> Self {
        Self {
            root: PathRoot::SelfInstance,
            segments: names.iter().map(|n| Segment::new(*n)).collect(),
        }
    }

    pub fn on_type(ty: Ty, segment: Segment) -> Self {
        Self {
            root: PathRoot::Static { ty },
            segments: vec![segment],
        }
    }

    pub fn on_value(source: MemberReference, segment: Segment) -> Self {
        Self {
            root: PathRoot::Value {
                source: Box::new(source),
            },
            segments: vec![segment],
        }
    }

    pub fn then(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn is_static(&self) -> bool {
        matches!(self.root, PathRoot::Static { .. })
    }

    /// Nested references in evaluation order: root source, then every
    /// segment's arguments left to right.
    pub fn operands(&self) -> Vec<&MemberReference> {
        let mut out = Vec::new();
        if let PathRoot::Value { source } = &self.root {
            out.push(source.as_ref());
        }
        for seg in &self.segments {
            out.extend(seg.args.iter());
        }
        out
    }
}

// ── Constructors and queries ─────────────────────────────────────────────

impl MemberReference {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            scope: ScopeId::ROOT,
            resolved_type: None,
        }
    }

    pub fn none() -> Self {
        Self::new(Target::None)
    }

    pub fn literal(value: Value) -> Self {
        Self::new(Target::Literal { value })
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(Target::Variable { name: name.into() })
    }

    pub fn field(path: MemberPath) -> Self {
        Self::new(Target::Field { path })
    }

    pub fn property(path: MemberPath) -> Self {
        Self::new(Target::Property { path })
    }

    pub fn method(path: MemberPath) -> Self {
        Self::new(Target::Method { path })
    }

    pub fn ty(ty: Ty) -> Self {
        Self::new(Target::Type { ty })
    }

    pub fn node_output(node: NodeId, port: impl Into<String>) -> Self {
        Self::new(Target::NodeOutput {
            node,
            port: port.into(),
        })
    }

    pub fn self_ref() -> Self {
        Self::new(Target::SelfReference)
    }

    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = scope;
        self
    }

    pub fn kind(&self) -> RefKind {
        match &self.target {
            Target::None => RefKind::None,
            Target::Literal { .. } => RefKind::Literal,
            Target::Variable { .. } => RefKind::Variable,
            Target::Field { .. } => RefKind::Field,
            Target::Property { .. } => RefKind::Property,
            Target::Method { .. } => RefKind::Method,
            Target::Type { .. } => RefKind::Type,
            Target::NodeOutput { .. } => RefKind::NodeOutput,
            Target::SelfReference => RefKind::SelfReference,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self.target, Target::None)
    }

    /// Whether the reference kind can be written. Properties additionally
    /// need a setter, which only resolution can tell.
    pub fn is_settable(&self) -> bool {
        matches!(
            self.kind(),
            RefKind::Variable | RefKind::Field | RefKind::Property
        )
    }

    pub fn path(&self) -> Option<&MemberPath> {
        match &self.target {
            Target::Field { path } | Target::Property { path } | Target::Method { path } => {
                Some(path)
            }
            _ => None,
        }
    }

    /// Directly nested references (path root source and segment arguments).
    pub fn operands(&self) -> Vec<&MemberReference> {
        self.path().map(MemberPath::operands).unwrap_or_default()
    }

    /// Pre-order walk over this reference and every nested one.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a MemberReference)) {
        f(self);
        for op in self.operands() {
            op.visit(f);
        }
    }

    /// Mutable pre-order walk, in the same order as `visit`.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut MemberReference)) {
        f(self);
        let path = match &mut self.target {
            Target::Field { path } | Target::Property { path } | Target::Method { path } => path,
            _ => return,
        };
        if let PathRoot::Value { source } = &mut path.root {
            source.visit_mut(f);
        }
        for seg in &mut path.segments {
            for arg in &mut seg.args {
                arg.visit_mut(f);
            }
        }
    }

    /// Every `NodeOutput` target in evaluation order.
    pub fn node_outputs(&self) -> Vec<(NodeId, &str)> {
        let mut out = Vec::new();
        self.visit(&mut |r| {
            if let Target::NodeOutput { node, port } = &r.target {
                out.push((*node, port.as_str()));
            }
        });
        out
    }
}

impl From<Value> for MemberReference {
    fn from(value: Value) -> Self {
        MemberReference::literal(value)
    }
}

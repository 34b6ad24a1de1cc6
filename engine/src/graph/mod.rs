// graph/mod.rs — Behavior graph: node arena, scopes and variables
//
// A graph is a dense arena of nodes (node id == index), a scope table and a
// name. Flow edges live inside behaviors as `Option<NodeId>` targets; value
// edges are `NodeOutput` member references. Everything here is plain,
// serde-persisted data; `validate` checks structure, `check` checks types.
//
// Preconditions: none; construction never fails, validation reports.
// Postconditions: builder methods keep `nodes[i].id == NodeId(i)`.
// Failure modes: `connect` rejects unknown ports with `Structural`.
// Side effects: none.

pub mod validate;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::id::{NodeId, ScopeId};
use crate::node::Behavior;
use crate::value::{Ty, Value};

// ── Public types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    #[serde(default = "root_scopes")]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

fn root_scopes() -> Vec<Scope> {
    vec![Scope::root()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ScopeId>,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
}

impl Scope {
    fn root() -> Self {
        Self {
            id: ScopeId::ROOT,
            parent: None,
            variables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub ty: Ty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl VariableDecl {
    /// Value the slot holds before anything writes it.
    pub fn initial(&self) -> Value {
        self.default.clone().unwrap_or_else(|| self.ty.zero())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub behavior: Behavior,
}

/// A declared variable together with its storage slot name.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'g> {
    pub scope: ScopeId,
    pub name: &'g str,
    pub decl: &'g VariableDecl,
}

impl Slot<'_> {
    pub fn slot_name(&self) -> String {
        slot_name(self.scope, self.name)
    }
}

/// Field name backing a variable on the graph instance.
pub fn slot_name(scope: ScopeId, name: &str) -> String {
    if scope == ScopeId::ROOT {
        name.to_string()
    } else {
        format!("{name}_{scope}")
    }
}

// ── Construction ─────────────────────────────────────────────────────────

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scopes: root_scopes(),
            nodes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, behavior: impl Into<Behavior>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            label: None,
            behavior: behavior.into(),
        });
        id
    }

    pub fn add_labeled(&mut self, label: &str, behavior: impl Into<Behavior>) -> NodeId {
        let id = self.add_node(behavior);
        self.nodes[id.index()].label = Some(label.to_string());
        id
    }

    pub fn add_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            id,
            parent: Some(parent),
            variables: Vec::new(),
        });
        id
    }

    /// Declare a variable in `scope`. Unknown scopes are ignored here and
    /// reported by validation of the references that use them.
    pub fn declare(&mut self, scope: ScopeId, name: &str, ty: Ty, default: Option<Value>) {
        if let Some(s) = self.scopes.get_mut(scope.index()) {
            s.variables.push(VariableDecl {
                name: name.to_string(),
                ty,
                default,
            });
        }
    }

    /// Point flow port `port` of `from` at `to`.
    pub fn connect(&mut self, from: NodeId, port: &str, to: NodeId) -> Result<(), EngineError> {
        let node = self
            .nodes
            .get_mut(from.index())
            .ok_or_else(|| EngineError::Structural(format!("no node {from}")))?;
        let kind = node.behavior.name();
        let slot = node
            .behavior
            .flow_port_mut(port)
            .ok_or_else(|| EngineError::Structural(format!("{kind} node {from} has no flow port '{port}'")))?;
        *slot = Some(to);
        Ok(())
    }
}

// ── Queries ──────────────────────────────────────────────────────────────

impl Graph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).filter(|n| n.id == id)
    }

    pub fn behavior(&self, id: NodeId) -> Option<&Behavior> {
        self.node(id).map(|n| &n.behavior)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    /// Find `name` starting at `scope` and walking up through parents.
    /// Returns the declaring scope with the declaration.
    pub fn lookup_variable(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &VariableDecl)> {
        let mut current = Some(scope);
        // Bounded by the scope count so a malformed parent chain terminates.
        for _ in 0..=self.scopes.len() {
            let s = self.scope(current?)?;
            if let Some(v) = s.variables.iter().find(|v| v.name == name) {
                return Some((s.id, v));
            }
            current = s.parent;
        }
        None
    }

    /// Every declared variable, scope by scope in declaration order.
    pub fn slots(&self) -> impl Iterator<Item = Slot<'_>> {
        self.scopes.iter().flat_map(|s| {
            s.variables.iter().map(move |v| Slot {
                scope: s.id,
                name: &v.name,
                decl: v,
            })
        })
    }

    /// Entry nodes in id order with the event each one handles.
    pub fn entries(&self) -> Vec<(NodeId, &str)> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.behavior {
                Behavior::Entry(e) => Some((n.id, e.event.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Connected flow targets of `id` in port order.
    pub fn flow_targets(&self, id: NodeId) -> Vec<NodeId> {
        self.behavior(id)
            .map(|b| b.flow_ports().into_iter().filter_map(|(_, t)| t).collect())
            .unwrap_or_default()
    }

    pub fn display_name(&self, id: NodeId) -> String {
        match self.node(id) {
            Some(Node {
                label: Some(label), ..
            }) => format!("{id} ({label})"),
            Some(n) => format!("{id} ({})", n.behavior.name()),
            None => id.to_string(),
        }
    }
}

// ── Behavior conversions for the builder ─────────────────────────────────

macro_rules! into_behavior {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<crate::node::$ty> for Behavior {
                fn from(b: crate::node::$ty) -> Self {
                    Behavior::$ty(b)
                }
            }
        )*
    };
}

into_behavior!(
    Entry, SetValue, Invoke, Branch, Sequence, ForLoop, WhileLoop, Try, Cache, Wait, Stop,
    Throw, Binary, Unary, Get, Construct,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Entry, SetValue};
    use crate::reference::MemberReference;

    fn entry() -> Entry {
        Entry {
            event: "start".into(),
            next: None,
        }
    }

    #[test]
    fn add_node_keeps_dense_ids() {
        let mut g = Graph::new("G");
        let a = g.add_node(entry());
        let b = g.add_labeled("set", SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::literal(Value::Int(1)),
            next: None,
        });
        assert_eq!((a, b), (NodeId(0), NodeId(1)));
        assert_eq!(g.display_name(b), "n1 (set)");
        assert_eq!(g.display_name(a), "n0 (entry)");
    }

    #[test]
    fn connect_sets_named_port() {
        let mut g = Graph::new("G");
        let a = g.add_node(entry());
        let b = g.add_node(entry());
        g.connect(a, "next", b).unwrap();
        assert_eq!(g.flow_targets(a), vec![b]);
        assert!(g.connect(a, "body", b).is_err());
    }

    #[test]
    fn lookup_walks_parent_scopes() {
        let mut g = Graph::new("G");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let inner = g.add_scope(ScopeId::ROOT);
        g.declare(inner, "y", Ty::Bool, None);
        let (scope, decl) = g.lookup_variable(inner, "x").unwrap();
        assert_eq!(scope, ScopeId::ROOT);
        assert_eq!(decl.ty, Ty::Int);
        assert!(g.lookup_variable(ScopeId::ROOT, "y").is_none());
        let slots: Vec<String> = g.slots().map(|s| s.slot_name()).collect();
        assert_eq!(slots, vec!["x", "y_s1"]);
    }

    #[test]
    fn initial_value_defaults_to_zero() {
        let decl = VariableDecl {
            name: "n".into(),
            ty: Ty::Int,
            default: None,
        };
        assert_eq!(decl.initial(), Value::Int(0));
    }

    #[test]
    fn graph_json_round_trips() {
        let mut g = Graph::new("G");
        g.declare(ScopeId::ROOT, "x", Ty::Int, Some(Value::Int(3)));
        let a = g.add_node(entry());
        let b = g.add_node(entry());
        g.connect(a, "next", b).unwrap();
        let json = serde_json::to_string(&g).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}

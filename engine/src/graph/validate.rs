// graph/validate.rs — Structural validation
//
// Checks everything about a graph that does not need type information:
// arena and scope consistency, variable declarations, dangling flow ports
// and node outputs, flow and value cycles, and stop targets.
//
// Preconditions: none.
// Postconditions: an empty result means every later pass may index the
//   arena and walk flow edges without bounds or termination checks.
// Failure modes: each problem becomes one E03xx diagnostic; the pass never
//   stops early.
// Side effects: none.

use std::collections::HashSet;

use crate::diag::{codes, Diagnostic, Location};
use crate::graph::Graph;
use crate::id::{NodeId, ScopeId};
use crate::node::Behavior;
use crate::reference::Target;
use crate::script::KEYWORDS;

pub fn validate(graph: &Graph) -> Vec<Diagnostic> {
    let mut v = Validator {
        graph,
        diagnostics: Vec::new(),
    };
    v.check_name();
    v.check_arena();
    v.check_scopes();
    v.check_ports();
    v.check_stop_targets();
    v.check_flow_cycles();
    v.check_value_cycles();
    v.diagnostics
}

/// Identifier rule shared by the graph name and variable names.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Validator<'g> {
    graph: &'g Graph,
    diagnostics: Vec<Diagnostic>,
}

impl Validator<'_> {
    fn error(&mut self, location: Location, code: crate::diag::DiagCode, message: String) {
        self.diagnostics
            .push(Diagnostic::error(location, message).with_code(code));
    }

    fn check_name(&mut self) {
        let name = &self.graph.name;
        if !is_identifier(name) || name.starts_with("__") || KEYWORDS.contains(&name.as_str()) {
            self.error(
                Location::default(),
                codes::E0305,
                format!("graph name '{name}' is not a valid identifier"),
            );
        }
    }

    fn check_arena(&mut self) {
        for (i, node) in self.graph.nodes.iter().enumerate() {
            if node.id.index() != i {
                self.error(
                    Location::node(node.id),
                    codes::E0306,
                    format!("node {} is stored at arena slot {i}", node.id),
                );
            }
        }
    }

    fn check_scopes(&mut self) {
        let graph = self.graph;
        for (i, scope) in graph.scopes.iter().enumerate() {
            if scope.id.index() != i {
                self.error(
                    Location::default(),
                    codes::E0305,
                    format!("scope {} is stored at slot {i}", scope.id),
                );
            }
            match (scope.id == ScopeId::ROOT, scope.parent) {
                (true, Some(_)) => self.error(
                    Location::default(),
                    codes::E0305,
                    "root scope cannot have a parent".into(),
                ),
                (false, None) => self.error(
                    Location::default(),
                    codes::E0305,
                    format!("scope {} has no parent", scope.id),
                ),
                // Parents precede children, so parent chains cannot loop.
                (false, Some(p)) if p >= scope.id => self.error(
                    Location::default(),
                    codes::E0305,
                    format!("scope {} must be declared after its parent {p}", scope.id),
                ),
                _ => {}
            }
            let mut seen = HashSet::new();
            for var in &scope.variables {
                let name = var.name.as_str();
                let problem = if !is_identifier(name) {
                    Some("is not a valid identifier")
                } else if name.starts_with("__") {
                    Some("uses the reserved '__' prefix")
                } else if KEYWORDS.contains(&name) {
                    Some("is a keyword")
                } else if !seen.insert(name) {
                    Some("is declared twice")
                } else {
                    None
                };
                if let Some(problem) = problem {
                    self.error(
                        Location::default(),
                        codes::E0305,
                        format!("variable '{name}' in scope {} {problem}", scope.id),
                    );
                }
            }
        }
        if graph.scopes.is_empty() {
            self.error(Location::default(), codes::E0305, "graph has no root scope".into());
        }
    }

    fn check_ports(&mut self) {
        let graph = self.graph;
        for node in &graph.nodes {
            for (port, target) in node.behavior.flow_ports() {
                let Some(target) = target else { continue };
                let problem = match graph.behavior(target) {
                    None => Some(format!("points at missing node {target}")),
                    Some(Behavior::Entry(_)) => Some(format!("points at entry node {target}")),
                    Some(b) if b.as_executable().is_none() => {
                        Some(format!("points at value node {target}"))
                    }
                    Some(_) => None,
                };
                if let Some(problem) = problem {
                    self.error(
                        Location::port(node.id, port.as_str()),
                        codes::E0300,
                        format!("flow port '{port}' {problem}"),
                    );
                }
            }
            for (port, reference) in node.behavior.value_ports() {
                let mut problems = Vec::new();
                reference.visit(&mut |r| {
                    if let Target::NodeOutput { node: src, port: out } = &r.target {
                        match graph.behavior(*src).and_then(Behavior::as_value) {
                            None => problems.push(format!("reads output of missing or non-value node {src}")),
                            Some(v) if !v.outputs().contains(&out.as_str()) => {
                                problems.push(format!("reads unknown output '{out}' of {src}"))
                            }
                            Some(_) => {}
                        }
                    }
                    if r.scope.index() >= graph.scopes.len() {
                        problems.push(format!("is authored in unknown scope {}", r.scope));
                    }
                });
                for problem in problems {
                    self.error(Location::port(node.id, port), codes::E0301, format!("port '{port}' {problem}"));
                }
            }
        }
    }

    fn check_stop_targets(&mut self) {
        let graph = self.graph;
        for node in &graph.nodes {
            if let Behavior::Stop(stop) = &node.behavior {
                if !matches!(graph.behavior(stop.node), Some(Behavior::Wait(_))) {
                    self.error(
                        Location::node(node.id),
                        codes::E0304,
                        format!("stop target {} is not a wait node", stop.node),
                    );
                }
            }
        }
    }

    fn check_flow_cycles(&mut self) {
        let graph = self.graph;
        let cycles = detect_cycles(graph.nodes.len(), |id| graph.flow_targets(id));
        for cycle in cycles {
            let mut d = Diagnostic::error(
                Location::node(cycle[0]),
                format!("flow cycle through {} node(s)", cycle.len()),
            )
            .with_code(codes::E0302)
            .with_hint("use a loop node instead of wiring flow back upstream");
            for &n in &cycle[1..] {
                d = d.with_related(n, "in cycle");
            }
            self.diagnostics.push(d);
        }
    }

    fn check_value_cycles(&mut self) {
        let graph = self.graph;
        let deps = |id: NodeId| -> Vec<NodeId> {
            match graph.behavior(id) {
                Some(b) if b.is_value_node() => b
                    .value_ports()
                    .into_iter()
                    .flat_map(|(_, r)| r.node_outputs())
                    .map(|(n, _)| n)
                    .filter(|n| graph.behavior(*n).is_some_and(Behavior::is_value_node))
                    .collect(),
                _ => Vec::new(),
            }
        };
        for cycle in detect_cycles(graph.nodes.len(), deps) {
            let mut d = Diagnostic::error(
                Location::node(cycle[0]),
                format!("value cycle through {} node(s)", cycle.len()),
            )
            .with_code(codes::E0303);
            for &n in &cycle[1..] {
                d = d.with_related(n, "in cycle");
            }
            self.diagnostics.push(d);
        }
    }
}

/// Iterative three-colour DFS over nodes `0..count`. Returns each back-edge
/// cycle found, as the path from the re-entered node to the current one.
fn detect_cycles(count: usize, successors: impl Fn(NodeId) -> Vec<NodeId>) -> Vec<Vec<NodeId>> {
    const UNVISITED: u8 = 0;
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNVISITED; count];
    let mut cycles = Vec::new();
    for root in 0..count {
        if state[root] != UNVISITED {
            continue;
        }
        let root = NodeId(root as u32);
        let mut path: Vec<NodeId> = vec![root];
        let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = vec![(root, successors(root), 0)];
        state[root.index()] = IN_PROGRESS;
        while let Some((node, succ, cursor)) = stack.last_mut() {
            let Some(&next) = succ.get(*cursor) else {
                state[node.index()] = DONE;
                stack.pop();
                path.pop();
                continue;
            };
            *cursor += 1;
            match state.get(next.index()).copied() {
                Some(UNVISITED) => {
                    state[next.index()] = IN_PROGRESS;
                    path.push(next);
                    let s = successors(next);
                    stack.push((next, s, 0));
                }
                Some(IN_PROGRESS) => {
                    if let Some(pos) = path.iter().position(|&n| n == next) {
                        cycles.push(path[pos..].to_vec());
                    }
                }
                // Done, or out of range (reported as a dangling port).
                _ => {}
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagCode;
    use crate::node::{Binary, Entry, SetValue, Stop};
    use crate::reference::MemberReference;
    use crate::value::{BinaryOp, Ty, Value};

    fn entry(next: Option<NodeId>) -> Entry {
        Entry {
            event: "start".into(),
            next,
        }
    }

    fn set(next: Option<NodeId>) -> SetValue {
        SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::literal(Value::Int(1)),
            next,
        }
    }

    fn codes_of(diags: &[Diagnostic]) -> Vec<DiagCode> {
        diags.iter().filter_map(|d| d.code).collect()
    }

    #[test]
    fn clean_graph_passes() {
        let mut g = Graph::new("Clean");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let a = g.add_node(entry(None));
        let b = g.add_node(set(None));
        g.connect(a, "next", b).unwrap();
        assert!(validate(&g).is_empty());
    }

    #[test]
    fn flow_cycle_detected() {
        let mut g = Graph::new("Loop");
        g.add_node(entry(Some(NodeId(1))));
        g.add_node(set(Some(NodeId(2))));
        g.add_node(set(Some(NodeId(1))));
        let diags = validate(&g);
        assert_eq!(codes_of(&diags), vec![codes::E0302]);
        assert_eq!(diags[0].location.node, Some(NodeId(1)));
    }

    #[test]
    fn value_cycle_detected() {
        let mut g = Graph::new("V");
        g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::node_output(NodeId(1), "value"),
            right: MemberReference::literal(Value::Int(1)),
        });
        g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::node_output(NodeId(0), "value"),
            right: MemberReference::literal(Value::Int(1)),
        });
        assert_eq!(codes_of(&validate(&g)), vec![codes::E0303]);
    }

    #[test]
    fn dangling_ports_reported() {
        let mut g = Graph::new("D");
        g.add_node(entry(Some(NodeId(9))));
        g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::node_output(NodeId(0), "value"),
            next: None,
        });
        assert_eq!(codes_of(&validate(&g)), vec![codes::E0300, codes::E0301]);
    }

    #[test]
    fn stop_must_target_wait() {
        let mut g = Graph::new("S");
        let e = g.add_node(entry(None));
        g.add_node(Stop { node: e, next: None });
        assert_eq!(codes_of(&validate(&g)), vec![codes::E0304]);
    }

    #[test]
    fn reserved_variable_names_rejected() {
        let mut g = Graph::new("R");
        g.declare(ScopeId::ROOT, "__index", Ty::Int, None);
        g.declare(ScopeId::ROOT, "while", Ty::Int, None);
        g.declare(ScopeId::ROOT, "ok", Ty::Int, None);
        g.declare(ScopeId::ROOT, "ok", Ty::Int, None);
        assert_eq!(
            codes_of(&validate(&g)),
            vec![codes::E0305, codes::E0305, codes::E0305]
        );
    }

    #[test]
    fn identifier_rule() {
        assert!(is_identifier("Player_2"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}

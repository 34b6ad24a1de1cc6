// check.rs — Static type and reference checking
//
// Resolves every value port of every node against the runtime-type façade
// and checks what the node does with the result: conditions are bool, loop
// bounds and wait amounts are numeric, write targets are settable and accept
// the written type, and method arguments match the selected overload.
//
// Preconditions: the graph passed `graph::validate`; its instance type is
//   registered in the context.
// Postconditions: an error-free result means every reference resolves, so
//   the emitter only fails on things it alone can detect.
// Failure modes: E01xx / E0200 errors, W0001 stale recorded types, W0002
//   unreachable nodes. All problems are accumulated.
// Side effects: fills the resolver cache.

use std::collections::HashSet;

use crate::diag::{codes, Diagnostic, Location};
use crate::error::EngineError;
use crate::facade::EngineContext;
use crate::graph::Graph;
use crate::host::MemberDesc;
use crate::id::NodeId;
use crate::node::{Behavior, WaitKind};
use crate::reference::{MemberReference, RefKind};
use crate::resolve::{tag_of, TypeCx};
use crate::value::Ty;

/// What a port's value is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Use {
    Any,
    Bool,
    Number,
    /// Written by the node; the payload is the port holding the value.
    Target(&'static str),
}

fn port_use(behavior: &Behavior, port: &str) -> Use {
    match (behavior, port) {
        (Behavior::Branch(_) | Behavior::WhileLoop(_), "condition") => Use::Bool,
        (Behavior::Wait(w), _) if matches!(w.wait, WaitKind::Until { .. }) => Use::Bool,
        (Behavior::Wait(_), _) | (Behavior::ForLoop(_), _) => Use::Number,
        (Behavior::SetValue(_), "target") => Use::Target("value"),
        _ => Use::Any,
    }
}

pub fn check(ctx: &EngineContext, graph: &Graph) -> Vec<Diagnostic> {
    let mut checker = Checker {
        cx: TypeCx::new(ctx, graph).lenient(),
        graph,
        diagnostics: Vec::new(),
    };
    for node in &graph.nodes {
        checker.check_node(node.id, &node.behavior);
    }
    checker.check_reachability();
    checker.diagnostics
}

struct Checker<'a> {
    cx: TypeCx<'a>,
    graph: &'a Graph,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn report(&mut self, err: EngineError, node: NodeId, port: &str) {
        self.diagnostics
            .push(err.to_diagnostic(Location::port(node, port)));
    }

    fn check_node(&mut self, id: NodeId, behavior: &Behavior) {
        let ports = behavior.value_ports();
        for &(port, reference) in &ports {
            let Some(ty) = self.check_reference(id, port, reference) else {
                continue;
            };
            match port_use(behavior, port) {
                Use::Any => {}
                Use::Bool => self.expect(id, port, &Ty::Bool, &ty),
                Use::Number if ty.is_numeric() || ty == Ty::Any => {}
                Use::Number => self.report(EngineError::type_mismatch(Ty::Float, ty), id, port),
                Use::Target(source) => {
                    if let Err(err) = self.check_settable(reference) {
                        self.report(err, id, port);
                        continue;
                    }
                    let value = ports.iter().find(|(p, _)| *p == source).map(|(_, r)| *r);
                    if let Some(value) = value {
                        if let Ok(found) = self.cx.ref_type(value) {
                            self.expect(id, source, &ty, &found);
                        }
                    }
                }
            }
        }
        if let Some(producer) = behavior.as_value() {
            if behavior.is_value_node() {
                for port in producer.outputs() {
                    if let Err(err) = producer.output_type(port, &mut self.cx) {
                        // Port errors were reported above; only operator and
                        // construction errors are new here.
                        if matches!(err, EngineError::TypeMismatch { .. })
                            || matches!(behavior, Behavior::Construct(_))
                        {
                            self.report(err, id, port);
                        }
                    }
                }
            }
        }
    }

    /// Type one port reference and everything nested in it. Reports the
    /// first failure and returns `None` on error.
    fn check_reference(&mut self, id: NodeId, port: &str, reference: &MemberReference) -> Option<Ty> {
        let ty = match self.cx.ref_type(reference) {
            Ok(ty) => ty,
            Err(err) => {
                self.report(err, id, port);
                return None;
            }
        };
        let mut nested: Vec<&MemberReference> = Vec::new();
        reference.visit(&mut |r| nested.push(r));
        for r in nested {
            let computed = match self.cx.ref_type(r) {
                Ok(t) => t,
                Err(err) => {
                    self.report(err, id, port);
                    return None;
                }
            };
            if let Some(recorded) = &r.resolved_type {
                if recorded != &computed {
                    self.diagnostics.push(
                        Diagnostic::warning(
                            Location::port(id, port),
                            format!("recorded type {recorded} is stale; reference now has type {computed}"),
                        )
                        .with_code(codes::W0001)
                        .with_hint("re-annotate the graph to refresh recorded types"),
                    );
                }
            }
            if let Err(err) = self.check_arguments(r) {
                self.report(err, id, port);
                return None;
            }
        }
        Some(ty)
    }

    /// Method arguments against the parameters of the selected overload.
    fn check_arguments(&mut self, r: &MemberReference) -> Result<(), EngineError> {
        let (Some(path), Some(tag)) = (r.path(), tag_of(&r.target)) else {
            return Ok(());
        };
        let resolved = self.cx.path(path, tag)?;
        for (step, seg) in resolved.steps.iter().zip(&path.segments) {
            let Some(overload) = step.overload() else { continue };
            for (arg, param) in seg.args.iter().zip(&overload.params) {
                let found = self.cx.ref_type(arg)?;
                if !param.accepts(&found) {
                    return Err(EngineError::type_mismatch(param.clone(), found));
                }
            }
        }
        Ok(())
    }

    fn check_settable(&mut self, target: &MemberReference) -> Result<(), EngineError> {
        if !target.is_settable() {
            return Err(EngineError::ReadOnly(target.kind().to_string()));
        }
        if target.kind() != RefKind::Property {
            return Ok(());
        }
        let Some(path) = target.path() else { return Ok(()) };
        let Some(tag) = tag_of(&target.target) else { return Ok(()) };
        let resolved = self.cx.path(path, tag)?;
        if let Some(step) = resolved.steps.last().filter(|_| !resolved.dynamic) {
            if let MemberDesc::Property(p) = step.member() {
                if p.setter.is_none() {
                    return Err(EngineError::ReadOnly(format!("property '{}' (no setter)", p.name)));
                }
            }
        }
        Ok(())
    }

    fn expect(&mut self, id: NodeId, port: &str, expected: &Ty, found: &Ty) {
        if !expected.accepts(found) {
            self.report(EngineError::type_mismatch(expected.clone(), found.clone()), id, port);
        }
    }

    /// Executable nodes no entry can reach never run.
    fn check_reachability(&mut self) {
        let graph = self.graph;
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut work: Vec<NodeId> = graph.entries().into_iter().map(|(id, _)| id).collect();
        while let Some(id) = work.pop() {
            if seen.insert(id) {
                work.extend(graph.flow_targets(id));
            }
        }
        for node in &graph.nodes {
            let executable = node.behavior.as_executable().is_some();
            if executable && !seen.contains(&node.id) {
                self.diagnostics.push(
                    Diagnostic::warning(
                        Location::node(node.id),
                        format!("{} is not reachable from any entry", graph.display_name(node.id)),
                    )
                    .with_code(codes::W0002),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagCode;
    use crate::id::ScopeId;
    use crate::node::{Binary, Branch, Entry, Get, Invoke, SetValue};
    use crate::reference::{MemberPath, Segment, Signature};
    use crate::value::{BinaryOp, Value};

    fn run(g: &Graph) -> Vec<DiagCode> {
        let ctx = EngineContext::with_builtins();
        ctx.register_graph(g);
        check(&ctx, g).iter().filter_map(|d| d.code).collect()
    }

    fn base() -> Graph {
        let mut g = Graph::new("T");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        g.declare(ScopeId::ROOT, "s", Ty::Str, None);
        g
    }

    fn entry(g: &mut Graph) -> NodeId {
        g.add_node(Entry {
            event: "start".into(),
            next: None,
        })
    }

    #[test]
    fn clean_graph_has_no_diagnostics() {
        let mut g = base();
        let e = entry(&mut g);
        let s = g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: Value::Int(3).into(),
            next: None,
        });
        g.connect(e, "next", s).unwrap();
        assert!(run(&g).is_empty());
    }

    #[test]
    fn three_unassigned_references_give_three_diagnostics() {
        let mut g = base();
        let e = entry(&mut g);
        let a = g.add_node(Invoke {
            call: MemberReference::none(),
            next: None,
        });
        let b = g.add_node(Branch {
            condition: MemberReference::none(),
            on_true: None,
            on_false: None,
            finished: None,
        });
        let c = g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::none(),
            next: None,
        });
        g.connect(e, "next", a).unwrap();
        g.connect(a, "next", b).unwrap();
        g.connect(b, "finished", c).unwrap();
        let ctx = EngineContext::with_builtins();
        ctx.register_graph(&g);
        let diags = check(&ctx, &g);
        assert_eq!(diags.len(), 3);
        let nodes: Vec<_> = diags.iter().map(|d| d.location.node).collect();
        assert_eq!(nodes, vec![Some(a), Some(b), Some(c)]);
        assert!(diags.iter().all(|d| d.code == Some(codes::E0100)));
    }

    #[test]
    fn producer_errors_are_reported_once() {
        let mut g = base();
        let e = entry(&mut g);
        let bin = g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::none(),
            right: Value::Int(1).into(),
        });
        let s = g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::node_output(bin, "value"),
            next: None,
        });
        g.connect(e, "next", s).unwrap();
        assert_eq!(run(&g), vec![codes::E0100]);
    }

    #[test]
    fn condition_and_assignment_types() {
        let mut g = base();
        let e = entry(&mut g);
        let b = g.add_node(Branch {
            condition: Value::Int(1).into(),
            on_true: None,
            on_false: None,
            finished: None,
        });
        let s = g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: Value::str("no").into(),
            next: None,
        });
        g.connect(e, "next", b).unwrap();
        g.connect(b, "finished", s).unwrap();
        assert_eq!(run(&g), vec![codes::E0200, codes::E0200]);
    }

    #[test]
    fn read_only_targets() {
        let mut g = base();
        let e = entry(&mut g);
        let a = g.add_node(SetValue {
            target: Value::Int(1).into(),
            value: Value::Int(2).into(),
            next: None,
        });
        let b = g.add_node(SetValue {
            target: MemberReference::property(MemberPath::on_type(Ty::named("Math"), Segment::new("pi"))),
            value: Value::Float(3.0).into(),
            next: None,
        });
        g.connect(e, "next", a).unwrap();
        g.connect(a, "next", b).unwrap();
        assert_eq!(run(&g), vec![codes::E0103, codes::E0103]);
    }

    #[test]
    fn argument_types_follow_overload() {
        let mut g = base();
        let e = entry(&mut g);
        let call = MemberReference::method(MemberPath::on_type(
            Ty::named("Math"),
            Segment::new("max")
                .signature(Signature::new(vec![Ty::Int, Ty::Int]))
                .args(vec![MemberReference::variable("s"), Value::Int(1).into()]),
        ));
        let i = g.add_node(Invoke { call, next: None });
        g.connect(e, "next", i).unwrap();
        assert_eq!(run(&g), vec![codes::E0200]);
    }

    #[test]
    fn stale_recorded_type_warns() {
        let mut g = base();
        let e = entry(&mut g);
        let mut value = MemberReference::variable("x");
        value.resolved_type = Some(Ty::Str);
        let s = g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value,
            next: None,
        });
        g.connect(e, "next", s).unwrap();
        assert_eq!(run(&g), vec![codes::W0001]);
    }

    #[test]
    fn unreachable_flow_nodes_warn_but_value_nodes_do_not() {
        let mut g = base();
        entry(&mut g);
        g.add_node(Invoke {
            call: MemberReference::method(MemberPath::on_type(Ty::named("Counter"), Segment::new("tick"))),
            next: None,
        });
        g.add_node(Get {
            source: MemberReference::variable("x"),
        });
        assert_eq!(run(&g), vec![codes::W0002]);
    }
}

// analysis.rs — Purity, consumer counts and the evaluate-once plan
//
// Static facts about a graph that both backends consult:
//   - how many references consume each node's outputs (emitter inlining)
//   - which value nodes are side-effecting (transitively)
//   - the evaluate-once plan for a read point
//
// The plan is the agreement that keeps the interpreter and compiled code in
// step: every side-effecting producer feeding a read point runs exactly once,
// in post-order, before any operand is read, followed by side-effecting
// top-level reads in operand order.
//
// Preconditions: the graph has passed structural validation.
// Postconditions: plans are deterministic for a given graph and context.
// Failure modes: none; unresolvable references count as pure (their errors
//   surface where they are evaluated).
// Side effects: none.

use std::collections::HashSet;

use crate::facade::EngineContext;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::reference::MemberReference;
use crate::resolve::{tag_of, TypeCx};

/// One operand of a read point.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    /// A value to read.
    Read(&'a MemberReference),
    /// A write destination; only its nested producers are planned.
    Target(&'a MemberReference),
}

impl<'a> Operand<'a> {
    pub fn reference(&self) -> &'a MemberReference {
        match self {
            Operand::Read(r) | Operand::Target(r) => r,
        }
    }
}

/// One entry of an evaluate-once plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoistItem {
    /// Compute a side-effecting value node and memoize it.
    Node(NodeId),
    /// Evaluate the side-effecting `Read` operand at this index up front.
    Operand(usize),
}

#[derive(Debug, Clone)]
pub struct GraphInfo {
    consumers: Vec<usize>,
    impure: Vec<bool>,
}

impl GraphInfo {
    pub fn analyze(ctx: &EngineContext, graph: &Graph) -> Self {
        let count = graph.nodes.len();
        let mut consumers = vec![0; count];
        for node in &graph.nodes {
            for (_, r) in node.behavior.value_ports() {
                for (src, _) in r.node_outputs() {
                    if let Some(c) = consumers.get_mut(src.index()) {
                        *c += 1;
                    }
                }
            }
        }
        let mut cx = TypeCx::new(ctx, graph);
        let mut memo: Vec<Option<bool>> = vec![None; count];
        for id in 0..count {
            node_impure(&mut cx, graph, NodeId(id as u32), &mut memo, &mut Vec::new());
        }
        Self {
            consumers,
            impure: memo.into_iter().map(|m| m.unwrap_or(true)).collect(),
        }
    }

    /// Number of references reading any output of `node`.
    pub fn consumers(&self, node: NodeId) -> usize {
        self.consumers.get(node.index()).copied().unwrap_or(0)
    }

    /// Whether computing `node` has side effects (value nodes only).
    pub fn is_impure(&self, node: NodeId) -> bool {
        self.impure.get(node.index()).copied().unwrap_or(false)
    }

    /// Evaluate-once plan for a read point.
    pub fn plan(&self, cx: &mut TypeCx<'_>, operands: &[Operand<'_>]) -> Vec<HoistItem> {
        let graph = cx.graph();
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        for (i, op) in operands.iter().enumerate() {
            for (src, _) in op.reference().node_outputs() {
                self.schedule(graph, src, &mut seen, &mut items);
            }
            if let Operand::Read(r) = op {
                if has_own_effects(cx, r) {
                    items.push(HoistItem::Operand(i));
                }
            }
        }
        items
    }

    fn schedule(&self, graph: &Graph, node: NodeId, seen: &mut HashSet<NodeId>, items: &mut Vec<HoistItem>) {
        let Some(behavior) = graph.behavior(node) else { return };
        if !behavior.is_value_node() || !self.is_impure(node) || !seen.insert(node) {
            return;
        }
        for (_, r) in behavior.value_ports() {
            for (src, _) in r.node_outputs() {
                self.schedule(graph, src, seen, items);
            }
        }
        items.push(HoistItem::Node(node));
    }
}

/// Whether evaluating `r` itself has side effects, not counting the value
/// nodes it reads (those are memoized by the plan).
pub fn has_own_effects(cx: &mut TypeCx<'_>, r: &MemberReference) -> bool {
    let mut effects = false;
    r.visit(&mut |sub| {
        if effects {
            return;
        }
        let (Some(tag), Some(path)) = (tag_of(&sub.target), sub.path()) else {
            return;
        };
        effects = match cx.path(path, tag) {
            // Members of an unknown type may do anything.
            Ok(resolved) => resolved.dynamic || resolved.steps.iter().any(|s| !s.pure),
            Err(_) => false,
        };
    });
    effects
}

fn node_impure(
    cx: &mut TypeCx<'_>,
    graph: &Graph,
    node: NodeId,
    memo: &mut Vec<Option<bool>>,
    visiting: &mut Vec<NodeId>,
) -> bool {
    if let Some(known) = memo.get(node.index()).copied().flatten() {
        return known;
    }
    let Some(behavior) = graph.behavior(node) else {
        return false;
    };
    if !behavior.is_value_node() {
        memo[node.index()] = Some(false);
        return false;
    }
    if visiting.contains(&node) {
        return true;
    }
    visiting.push(node);
    let mut impure = behavior.as_value().is_some_and(|v| v.has_intrinsic_effects());
    for (_, r) in behavior.value_ports() {
        if impure {
            break;
        }
        impure = has_own_effects(cx, r)
            || r.node_outputs().into_iter().any(|(src, _)| {
                matches!(graph.behavior(src), Some(b) if b.is_value_node())
                    && node_impure(cx, graph, src, memo, visiting)
            });
    }
    visiting.pop();
    memo[node.index()] = Some(impure);
    impure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemberKind;
    use crate::node::{Binary, Construct, Get, SetValue};
    use crate::reference::{MemberPath, Segment};
    use crate::value::{BinaryOp, Ty, Value};

    fn counter_tick() -> MemberReference {
        MemberReference::method(MemberPath::on_type(Ty::named("Counter"), Segment::new("tick")))
    }

    /// n0 = Counter::tick(); n1 = n0 + 1 (pure op over impure input);
    /// n2 = Math::pi (pure); n3 sets x = n1 + n1.
    fn graph() -> Graph {
        let mut g = Graph::new("A");
        g.declare(crate::id::ScopeId::ROOT, "x", Ty::Int, None);
        g.add_node(Get { source: counter_tick() });
        g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::node_output(NodeId(0), "value"),
            right: MemberReference::literal(Value::Int(1)),
        });
        g.add_node(Get {
            source: MemberReference::property(MemberPath::on_type(Ty::named("Math"), Segment::new("pi"))),
        });
        g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::node_output(NodeId(1), "value"),
            next: None,
        });
        g
    }

    #[test]
    fn impurity_is_transitive() {
        let ctx = EngineContext::with_builtins();
        let g = graph();
        ctx.register_graph(&g);
        let info = GraphInfo::analyze(&ctx, &g);
        assert!(info.is_impure(NodeId(0)));
        assert!(info.is_impure(NodeId(1)));
        assert!(!info.is_impure(NodeId(2)));
        assert!(!info.is_impure(NodeId(3)));
        assert_eq!(info.consumers(NodeId(0)), 1);
        assert_eq!(info.consumers(NodeId(2)), 0);
    }

    #[test]
    fn plan_is_post_order_and_deduplicated() {
        let ctx = EngineContext::with_builtins();
        let g = graph();
        ctx.register_graph(&g);
        let info = GraphInfo::analyze(&ctx, &g);
        let mut cx = TypeCx::new(&ctx, &g);
        let a = MemberReference::node_output(NodeId(1), "value");
        let b = MemberReference::node_output(NodeId(1), "value");
        let tick = counter_tick();
        let plan = info.plan(
            &mut cx,
            &[Operand::Read(&a), Operand::Read(&b), Operand::Read(&tick)],
        );
        assert_eq!(
            plan,
            vec![HoistItem::Node(NodeId(0)), HoistItem::Node(NodeId(1)), HoistItem::Operand(2)]
        );
    }

    #[test]
    fn construct_is_impure_and_targets_only_plan_producers() {
        let ctx = EngineContext::with_builtins();
        let mut g = Graph::new("C");
        g.add_node(Construct { ty: Ty::named("Counter") });
        ctx.register_graph(&g);
        let info = GraphInfo::analyze(&ctx, &g);
        assert!(info.is_impure(NodeId(0)));
        let mut cx = TypeCx::new(&ctx, &g);
        let target = MemberReference::field(MemberPath::on_value(
            MemberReference::node_output(NodeId(0), "value"),
            Segment::new("value"),
        ));
        let tick = counter_tick();
        let plan = info.plan(&mut cx, &[Operand::Read(&tick), Operand::Target(&target)]);
        assert_eq!(plan, vec![HoistItem::Operand(0), HoistItem::Node(NodeId(0))]);
        let _ = MemberKind::Field;
    }

    #[test]
    fn dynamic_roots_count_as_effects() {
        let ctx = EngineContext::with_builtins();
        let mut g = Graph::new("D");
        g.declare(crate::id::ScopeId::ROOT, "thing", Ty::Any, None);
        ctx.register_graph(&g);
        let mut cx = TypeCx::new(&ctx, &g);
        let r = MemberReference::field(MemberPath::on_value(
            MemberReference::variable("thing"),
            Segment::new("value"),
        ));
        assert!(has_own_effects(&mut cx, &r));
    }
}

// interp/eval.rs — Reference evaluation for the interpreter
//
// Live `Get`/`Set` over member references. Variables are fields of the graph
// instance, so every read and write goes through `resolve::access`, exactly
// like member accesses in compiled code.

use crate::analysis::{HoistItem, Operand};
use crate::error::{EngineError, ResolutionError};
use crate::graph::slot_name;
use crate::host::MemberKind;
use crate::id::NodeId;
use crate::interp::Interpreter;
use crate::node::{StepContext, ValueContext};
use crate::reference::{MemberPath, MemberReference, PathRoot, Target};
use crate::resolve::access::{construct, read_member, write_member, Receiver};
use crate::resolve::{tag_of, Lookup};
use crate::sched::HostScheduler;
use crate::value::{Ty, Value};

impl Interpreter<'_> {
    fn slot_lookup(&self, reference: &MemberReference, name: &str) -> Result<String, EngineError> {
        let (scope, _) = self
            .graph
            .lookup_variable(reference.scope, name)
            .ok_or_else(|| ResolutionError::UnknownVariable(name.to_string()))?;
        Ok(slot_name(scope, name))
    }

    fn node_output(&mut self, node: NodeId, port: &str) -> Result<Value, EngineError> {
        let graph = self.graph;
        let unknown = || ResolutionError::UnknownOutput {
            node,
            port: port.to_string(),
        };
        let behavior = graph.behavior(node).ok_or_else(unknown)?;
        let producer = behavior
            .as_value()
            .filter(|v| v.outputs().contains(&port))
            .ok_or_else(unknown)?;
        let state = self.states.get(node.index()).cloned().unwrap_or_default();
        if !(behavior.is_value_node() && self.info.is_impure(node)) {
            return producer.read(port, self, &state);
        }
        if let Some(v) = self.memo.get(&node) {
            return Ok(v.clone());
        }
        let value = producer.read(port, self, &state)?;
        self.memo.insert(node, value.clone());
        Ok(value)
    }

    fn root(&mut self, path: &MemberPath) -> Result<Receiver, EngineError> {
        Ok(match &path.root {
            PathRoot::SelfInstance => Receiver::Instance(self.this.clone()),
            PathRoot::Static { ty } => Receiver::Static(ty.clone()),
            PathRoot::Value { source } => Receiver::Instance(self.eval(source)?),
        })
    }

    /// Walk `path` up to (not including) its final segment.
    fn receiver(&mut self, path: &MemberPath) -> Result<Receiver, EngineError> {
        let mut recv = self.root(path)?;
        let Some((_, init)) = path.segments.split_last() else {
            return Err(EngineError::Structural("member path has no segments".into()));
        };
        for seg in init {
            let args = self.eval_all(&seg.args)?;
            let value = read_member(self.ctx, &mut self.host, &recv, seg.into(), args, None)?;
            recv = Receiver::Instance(value);
        }
        Ok(recv)
    }

    fn eval_all(&mut self, refs: &[MemberReference]) -> Result<Vec<Value>, EngineError> {
        refs.iter().map(|r| self.eval(r)).collect()
    }

    fn eval_path(&mut self, path: &MemberPath, tag: MemberKind) -> Result<Value, EngineError> {
        let recv = self.receiver(path)?;
        let last = path
            .segments
            .last()
            .ok_or_else(|| EngineError::Structural("member path has no segments".into()))?;
        let args = self.eval_all(&last.args)?;
        read_member(self.ctx, &mut self.host, &recv, last.into(), args, Some(tag))
    }

    /// Evaluate `operands` under the node's read plan.
    fn read_planned(&mut self, operands: &[Operand<'_>]) -> Result<Vec<Value>, EngineError> {
        self.memo.clear();
        let plan = self.plans.get(self.stepping.index()).cloned();
        let mut hoisted: Vec<Option<Value>> = vec![None; operands.len()];
        for item in plan.iter().flat_map(|p| p.iter()) {
            match *item {
                HoistItem::Node(n) => {
                    let port = self
                        .graph
                        .behavior(n)
                        .and_then(|b| b.as_value())
                        .and_then(|v| v.outputs().first().copied())
                        .unwrap_or("value");
                    self.node_output(n, port)?;
                }
                HoistItem::Operand(i) => {
                    if let Some(op) = operands.get(i) {
                        hoisted[i] = Some(self.eval(op.reference())?);
                    }
                }
            }
        }
        let mut values = Vec::with_capacity(operands.len());
        for (i, op) in operands.iter().enumerate() {
            if let Operand::Read(r) = op {
                let value = match hoisted[i].take() {
                    Some(v) => v,
                    None => self.eval(r)?,
                };
                values.push(value);
            }
        }
        Ok(values)
    }

    fn write_target(&mut self, target: &MemberReference, value: Value) -> Result<(), EngineError> {
        match &target.target {
            Target::None => Err(ResolutionError::Unassigned.into()),
            Target::Variable { name } => {
                let slot = self.slot_lookup(target, name)?;
                let lookup = Lookup {
                    name: &slot,
                    signature: None,
                    arity: 0,
                };
                let recv = Receiver::Instance(self.this.clone());
                write_member(self.ctx, &mut self.host, &recv, lookup, value, Some(MemberKind::Field))
            }
            Target::Field { path } | Target::Property { path } => {
                let recv = self.receiver(path)?;
                let last = path
                    .segments
                    .last()
                    .ok_or_else(|| EngineError::Structural("member path has no segments".into()))?;
                write_member(self.ctx, &mut self.host, &recv, last.into(), value, tag_of(&target.target))
            }
            _ => Err(EngineError::ReadOnly(target.kind().to_string())),
        }
    }
}

impl ValueContext for Interpreter<'_> {
    fn eval(&mut self, reference: &MemberReference) -> Result<Value, EngineError> {
        match &reference.target {
            Target::None => Err(ResolutionError::Unassigned.into()),
            Target::Literal { value } => Ok(value.clone()),
            Target::Variable { name } => {
                let slot = self.slot_lookup(reference, name)?;
                let lookup = Lookup {
                    name: &slot,
                    signature: None,
                    arity: 0,
                };
                let recv = Receiver::Instance(self.this.clone());
                read_member(self.ctx, &mut self.host, &recv, lookup, Vec::new(), Some(MemberKind::Field))
            }
            Target::Type { ty } => {
                if self.ctx.type_exists(ty) {
                    Ok(Value::Type(ty.clone()))
                } else {
                    Err(ResolutionError::UnknownType(ty.to_string()).into())
                }
            }
            Target::SelfReference => Ok(self.this.clone()),
            Target::NodeOutput { node, port } => self.node_output(*node, port),
            Target::Field { path } | Target::Property { path } | Target::Method { path } => {
                let tag = tag_of(&reference.target).unwrap_or(MemberKind::Field);
                self.eval_path(path, tag)
            }
        }
    }

    fn instantiate(&mut self, ty: &Ty) -> Result<Value, EngineError> {
        construct(self.ctx, &mut self.host, ty)
    }
}

/// Step context handed to executable behaviors: the interpreter plus the
/// scheduler driving the current trigger or tick.
pub(super) struct StepCx<'i, 'g> {
    pub(super) it: &'i mut Interpreter<'g>,
    pub(super) sched: &'i mut dyn HostScheduler,
}

impl ValueContext for StepCx<'_, '_> {
    fn eval(&mut self, reference: &MemberReference) -> Result<Value, EngineError> {
        self.it.eval(reference)
    }

    fn instantiate(&mut self, ty: &Ty) -> Result<Value, EngineError> {
        self.it.instantiate(ty)
    }
}

impl StepContext for StepCx<'_, '_> {
    fn read(&mut self, operands: &[Operand<'_>]) -> Result<Vec<Value>, EngineError> {
        self.it.read_planned(operands)
    }

    fn write(&mut self, target: &MemberReference, value: Value) -> Result<(), EngineError> {
        self.it.write_target(target, value)
    }

    fn now(&self) -> f64 {
        self.sched.now()
    }

    fn branch_failed(&self) -> bool {
        self.it.last_failed
    }

    fn stop(&mut self, node: NodeId) -> Result<(), EngineError> {
        self.it.stop_wait(node, &mut *self.sched);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::exec::Execution;
    use crate::facade::EngineContext;
    use crate::graph::Graph;
    use crate::id::ScopeId;
    use crate::interp::Interpreter;
    use crate::node::{Binary, Construct, Entry, Get, Invoke, SetValue};
    use crate::reference::{MemberPath, MemberReference, Segment};
    use crate::sched::FixedStepScheduler;
    use crate::value::{BinaryOp, Ty, Value};

    fn tick() -> MemberReference {
        MemberReference::method(MemberPath::on_type(Ty::named("Counter"), Segment::new("tick")))
    }

    #[test]
    fn side_effecting_producers_run_once_per_read() {
        // x = t + t where t = Counter::tick(): one tick, not two.
        let mut g = Graph::new("Once");
        g.declare(ScopeId::ROOT, "x", Ty::Int, None);
        let e = g.add_node(Entry {
            event: "start".into(),
            next: None,
        });
        let t = g.add_node(Get { source: tick() });
        let sum = g.add_node(Binary {
            op: BinaryOp::Add,
            left: MemberReference::node_output(t, "value"),
            right: MemberReference::node_output(t, "value"),
        });
        let set = g.add_node(SetValue {
            target: MemberReference::variable("x"),
            value: MemberReference::node_output(sum, "value"),
            next: None,
        });
        g.connect(e, "next", set).unwrap();
        let ctx = EngineContext::with_builtins();
        let mut it = Interpreter::new(&ctx, &g).unwrap();
        it.trigger("start", &mut FixedStepScheduler::default()).unwrap();
        assert_eq!(it.variables()["x"], Value::Int(2));
        assert_eq!(it.host().static_get("Counter", "ticks"), Some(&Value::Int(1)));
    }

    #[test]
    fn writes_through_constructed_objects_and_scoped_variables() {
        let mut g = Graph::new("Objects");
        let inner = g.add_scope(ScopeId::ROOT);
        g.declare(inner, "n", Ty::Int, Some(Value::Int(7)));
        g.declare(ScopeId::ROOT, "c", Ty::named("Counter"), None);
        let e = g.add_node(Entry {
            event: "start".into(),
            next: None,
        });
        let make = g.add_node(Construct { ty: Ty::named("Counter") });
        let keep = g.add_node(SetValue {
            target: MemberReference::variable("c"),
            value: MemberReference::node_output(make, "value"),
            next: None,
        });
        let field = g.add_node(SetValue {
            target: MemberReference::field(MemberPath::on_self(&["c", "value"])),
            value: MemberReference::variable("n").in_scope(inner),
            next: None,
        });
        let bump = g.add_node(Invoke {
            call: MemberReference::method(MemberPath::on_self(&["c"]).then(Segment::new("next"))),
            next: None,
        });
        g.connect(e, "next", keep).unwrap();
        g.connect(keep, "next", field).unwrap();
        g.connect(field, "next", bump).unwrap();
        let ctx = EngineContext::with_builtins();
        let mut it = Interpreter::new(&ctx, &g).unwrap();
        it.trigger("start", &mut FixedStepScheduler::default()).unwrap();
        assert!(it.diagnostics().is_empty(), "{:?}", it.diagnostics());
        let vars = it.variables();
        assert_eq!(vars["n_s1"], Value::Int(7));
        let Value::Object { id, .. } = &vars["c"] else {
            panic!("expected an object, got {}", vars["c"]);
        };
        assert_eq!(it.host().heap.get(*id).unwrap().fields["value"], Value::Int(8));
    }

    #[test]
    fn writing_a_literal_is_read_only() {
        let mut g = Graph::new("Literal");
        let e = g.add_node(Entry {
            event: "start".into(),
            next: None,
        });
        let set = g.add_node(SetValue {
            target: Value::Int(1).into(),
            value: Value::Int(2).into(),
            next: None,
        });
        g.connect(e, "next", set).unwrap();
        let ctx = EngineContext::with_builtins();
        let mut it = Interpreter::new(&ctx, &g).unwrap();
        it.trigger("start", &mut FixedStepScheduler::default()).unwrap();
        assert_eq!(it.diagnostics()[0].code, Some(crate::diag::codes::E0103));
        assert_eq!(it.diagnostics()[0].message, "cannot assign to a literal");
    }
}

// facade.rs — Runtime-type façade and the process-scoped engine context
//
// `EngineContext` owns everything resolution needs that outlives a single
// execution: the host type registry, the types contributed by graphs (native
// types from loaded compiled units, proxy types synthesized from graph
// data) and the resolver cache. Tests build isolated contexts; there are no
// globals.
//
// Type lookup order: host registry, then a graph's native type, then its
// proxy type. A native type whose fingerprint no longer matches the graph it
// was compiled from is skipped in favour of the proxy.
//
// Preconditions: a graph is registered (`register_graph`) before members of
//   its instance type are resolved.
// Postconditions: every registration bumps a generation, clearing the
//   resolver cache on its next use.
// Failure modes: none; missing types surface as `None`.
// Side effects: `tracing::debug!` on registration and invalidation.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use crate::graph::Graph;
use crate::host::{HostState, MemberDesc, MemberKind, TypeDesc, TypeOrigin, TypeRegistry};
use crate::reference::Signature;
use crate::resolve::{ResolveCache, Resolver};
use crate::store::fingerprint;
use crate::value::{Ty, Value};

// ── Façade surface ───────────────────────────────────────────────────────

/// Names a graph whose instance type is wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphHandle {
    pub name: String,
}

impl GraphHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHandle {
    pub name: String,
    pub origin: TypeOrigin,
}

/// One member as seen through the façade. Overloaded methods appear once
/// per overload, each with its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub name: String,
    pub kind: MemberKind,
    pub ty: Ty,
    pub is_static: bool,
    pub signature: Option<Signature>,
}

pub trait RuntimeTypes {
    fn resolve(&self, graph: &GraphHandle) -> Option<TypeHandle>;
    fn is_instance(&self, host: &HostState, value: &Value, ty: &TypeHandle) -> bool;
    fn members(&self, ty: &TypeHandle) -> Vec<MemberInfo>;
    fn describe(&self, ty: &TypeHandle) -> Option<Rc<TypeDesc>>;
}

// ── Graph-contributed types ──────────────────────────────────────────────

#[derive(Debug)]
struct NativeType {
    desc: Rc<TypeDesc>,
    fingerprint: String,
}

#[derive(Debug)]
struct ProxyType {
    desc: Rc<TypeDesc>,
    fingerprint: String,
}

#[derive(Debug, Default)]
struct GraphTypes {
    native: BTreeMap<String, NativeType>,
    proxy: BTreeMap<String, ProxyType>,
}

// ── Engine context ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EngineContext {
    registry: TypeRegistry,
    graph_types: RefCell<GraphTypes>,
    graph_generation: Cell<u64>,
    cache: RefCell<ResolveCache>,
}

impl EngineContext {
    /// Context with an empty host registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        Self {
            registry: TypeRegistry::with_builtins(),
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn register_host(&mut self, desc: TypeDesc) {
        debug!(ty = %desc.name, "registered host type");
        self.registry.register(desc);
    }

    /// Synthesize and register the proxy type of `graph`: one instance field
    /// per variable slot and one event per distinct entry event.
    pub fn register_graph(&self, graph: &Graph) {
        let desc = instance_type(graph, TypeOrigin::GraphProxy);
        let fp = fingerprint(graph);
        debug!(graph = %graph.name, fingerprint = %&fp[..12], "registered proxy type");
        self.graph_types.borrow_mut().proxy.insert(
            graph.name.clone(),
            ProxyType {
                desc: Rc::new(desc),
                fingerprint: fp,
            },
        );
        self.bump();
    }

    /// Register the native type of a loaded compiled unit. Hidden `__`
    /// fields are implementation state and never exposed.
    pub fn register_native(&self, mut desc: TypeDesc, fingerprint: String) {
        desc.origin = TypeOrigin::GraphNative;
        desc.members.retain(|m| !m.name().starts_with("__"));
        debug!(ty = %desc.name, "registered native type");
        self.graph_types.borrow_mut().native.insert(
            desc.name.clone(),
            NativeType {
                desc: Rc::new(desc),
                fingerprint,
            },
        );
        self.bump();
    }

    /// Whether the native type of `graph` was compiled from other graph data.
    /// Graphs without a native type are never stale.
    pub fn is_stale(&self, graph: &Graph) -> bool {
        self.graph_types
            .borrow()
            .native
            .get(&graph.name)
            .is_some_and(|n| n.fingerprint != fingerprint(graph))
    }

    /// Look a type up by name: host, then fresh native, then proxy.
    pub fn type_desc(&self, name: &str) -> Option<Rc<TypeDesc>> {
        if let Some(desc) = self.registry.get(name) {
            return Some(desc);
        }
        let types = self.graph_types.borrow();
        let proxy = types.proxy.get(name);
        if let Some(native) = types.native.get(name) {
            match proxy {
                Some(p) if p.fingerprint != native.fingerprint => {
                    debug!(ty = name, "native type is stale; using proxy");
                }
                _ => return Some(native.desc.clone()),
            }
        }
        proxy.map(|p| p.desc.clone())
    }

    pub fn desc_for(&self, ty: &Ty) -> Option<Rc<TypeDesc>> {
        self.type_desc(ty.name())
    }

    /// Whether `ty` names something values can have: a primitive or a
    /// known type.
    pub fn type_exists(&self, ty: &Ty) -> bool {
        match ty {
            Ty::Named(name) => self.type_desc(name).is_some(),
            _ => true,
        }
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self)
    }

    /// Drop every cached resolution.
    pub fn invalidate(&self) {
        debug!("resolver cache invalidated");
        self.cache.borrow_mut().clear();
    }

    /// Combined generation of the host registry and graph types.
    pub fn generation(&self) -> (u64, u64) {
        (self.registry.generation(), self.graph_generation.get())
    }

    pub(crate) fn cache(&self) -> &RefCell<ResolveCache> {
        &self.cache
    }

    fn bump(&self) {
        self.graph_generation.set(self.graph_generation.get() + 1);
    }
}

/// Instance type of a graph: its variable slots as fields, then its entry
/// events. Native and proxy descriptions are both built from this shape.
pub fn instance_type(graph: &Graph, origin: TypeOrigin) -> TypeDesc {
    let mut desc = TypeDesc::new(graph.name.clone(), origin);
    for slot in graph.slots() {
        desc = desc.field(&slot.slot_name(), slot.decl.ty.clone(), slot.decl.initial());
    }
    let mut events: Vec<&str> = Vec::new();
    for (_, event) in graph.entries() {
        if !events.contains(&event) {
            events.push(event);
        }
    }
    for event in events {
        desc = desc.event(event, false);
    }
    desc
}

impl RuntimeTypes for EngineContext {
    fn resolve(&self, graph: &GraphHandle) -> Option<TypeHandle> {
        self.type_desc(&graph.name).map(|d| TypeHandle {
            name: d.name.clone(),
            origin: d.origin,
        })
    }

    fn is_instance(&self, host: &HostState, value: &Value, ty: &TypeHandle) -> bool {
        match value {
            Value::Object { id, ty: t } => t == &ty.name && host.heap.get(*id).is_ok(),
            Value::Null => false,
            other => other.runtime_ty().name() == ty.name,
        }
    }

    fn members(&self, ty: &TypeHandle) -> Vec<MemberInfo> {
        let Some(desc) = self.describe(ty) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for member in &desc.members {
            let (name, kind, is_static) = (member.name().to_string(), member.kind(), member.is_static());
            match member {
                MemberDesc::Event(_) => out.push(MemberInfo {
                    name,
                    kind,
                    ty: Ty::Event,
                    is_static,
                    signature: None,
                }),
                MemberDesc::Field(f) => out.push(MemberInfo {
                    name,
                    kind,
                    ty: f.ty.clone(),
                    is_static,
                    signature: None,
                }),
                MemberDesc::Property(p) => out.push(MemberInfo {
                    name,
                    kind,
                    ty: p.ty.clone(),
                    is_static,
                    signature: None,
                }),
                MemberDesc::Method(m) => {
                    for o in &m.overloads {
                        let generics = vec![Ty::Any; o.generics];
                        out.push(MemberInfo {
                            name: name.clone(),
                            kind,
                            ty: o.ret.clone(),
                            is_static,
                            signature: Some(Signature::new(o.params.clone()).with_generics(generics)),
                        });
                    }
                }
            }
        }
        out
    }

    fn describe(&self, ty: &TypeHandle) -> Option<Rc<TypeDesc>> {
        self.type_desc(&ty.name)
    }
}

// host/mod.rs — Host type registry, member descriptors and object heap
//
// The registry is the reflection surface both backends resolve against:
// types expose events, fields, properties and (possibly overloaded) methods.
// Native behavior is supplied as `NativeFn` closures operating on a
// `HostState`, which owns every object and static slot an execution touches.
//
// Preconditions: types are registered before execution starts; later
//   registrations bump the registry generation so resolver caches drop.
// Postconditions: lookups are deterministic (BTreeMap ordering).
// Failure modes: natives report `HostError`, surfaced as runtime faults.
// Side effects: natives mutate the `HostState` they are handed.

pub mod builtins;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::error::{EngineError, ResolutionError};
use crate::value::{ObjectId, Ty, Value};

// ── Native calls ─────────────────────────────────────────────────────────

/// Arguments handed to a native getter, setter or method body.
#[derive(Debug, Clone, Default)]
pub struct NativeCall {
    pub receiver: Option<Value>,
    pub args: Vec<Value>,
    pub generics: Vec<Ty>,
}

impl NativeCall {
    pub fn arg(&self, index: usize) -> Result<&Value, HostError> {
        self.args
            .get(index)
            .ok_or_else(|| HostError::Failed(format!("missing argument {index}")))
    }

    pub fn receiver_object(&self) -> Result<ObjectId, HostError> {
        self.receiver
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| HostError::Failed("receiver is not an object".to_string()))
    }
}

pub type NativeFn = Rc<dyn Fn(&mut HostState, NativeCall) -> Result<Value, HostError>>;

pub fn native(
    f: impl Fn(&mut HostState, NativeCall) -> Result<Value, HostError> + 'static,
) -> NativeFn {
    Rc::new(f)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("{0}")]
    Failed(String),
    #[error("dangling object handle #{0}")]
    DanglingObject(u32),
}

impl From<HostError> for EngineError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::DanglingObject(_) => {
                EngineError::Resolution(ResolutionError::Unreachable(err.to_string()))
            }
            HostError::Failed(msg) => EngineError::Fault(msg),
        }
    }
}

// ── Member descriptors ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    Event,
    Field,
    Property,
    Method,
}

impl MemberKind {
    /// Lookup order at every path segment: methods only when nothing else
    /// carries the name.
    pub const CASCADE: [MemberKind; 4] = [
        MemberKind::Event,
        MemberKind::Field,
        MemberKind::Property,
        MemberKind::Method,
    ];
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberKind::Event => "event",
            MemberKind::Field => "field",
            MemberKind::Property => "property",
            MemberKind::Method => "method",
        })
    }
}

#[derive(Debug, Clone)]
pub struct EventDesc {
    pub name: String,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub name: String,
    pub ty: Ty,
    pub is_static: bool,
    pub default: Value,
}

#[derive(Clone)]
pub struct PropertyDesc {
    pub name: String,
    pub ty: Ty,
    pub is_static: bool,
    /// Getter has no observable side effects.
    pub pure: bool,
    pub getter: Option<NativeFn>,
    pub setter: Option<NativeFn>,
}

impl fmt::Debug for PropertyDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDesc")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("is_static", &self.is_static)
            .field("pure", &self.pure)
            .field("get", &self.getter.is_some())
            .field("set", &self.setter.is_some())
            .finish()
    }
}

/// One callable signature of a method.
#[derive(Clone)]
pub struct Overload {
    pub params: Vec<Ty>,
    /// Number of generic type arguments the overload takes.
    pub generics: usize,
    pub ret: Ty,
    /// When set, the return type is the given generic argument.
    pub ret_generic: Option<usize>,
    pub pure: bool,
    pub func: NativeFn,
}

impl Overload {
    pub fn new(params: Vec<Ty>, ret: Ty, func: NativeFn) -> Self {
        Self {
            params,
            generics: 0,
            ret,
            ret_generic: None,
            pure: false,
            func,
        }
    }

    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    pub fn generic(mut self, arity: usize, ret_generic: Option<usize>) -> Self {
        self.generics = arity;
        self.ret_generic = ret_generic;
        self
    }

    /// Human-readable signature, e.g. `(int, int) -> int`.
    pub fn describe(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(Ty::name).collect();
        let generics = if self.generics > 0 {
            format!("<{}>", self.generics)
        } else {
            String::new()
        };
        format!("{generics}({}) -> {}", params.join(", "), self.ret)
    }
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Overload{}", self.describe())
    }
}

#[derive(Debug, Clone)]
pub struct MethodDesc {
    pub name: String,
    pub is_static: bool,
    pub overloads: Vec<Overload>,
}

#[derive(Debug, Clone)]
pub enum MemberDesc {
    Event(EventDesc),
    Field(FieldDesc),
    Property(PropertyDesc),
    Method(MethodDesc),
}

impl MemberDesc {
    pub fn name(&self) -> &str {
        match self {
            MemberDesc::Event(e) => &e.name,
            MemberDesc::Field(f) => &f.name,
            MemberDesc::Property(p) => &p.name,
            MemberDesc::Method(m) => &m.name,
        }
    }

    pub fn kind(&self) -> MemberKind {
        match self {
            MemberDesc::Event(_) => MemberKind::Event,
            MemberDesc::Field(_) => MemberKind::Field,
            MemberDesc::Property(_) => MemberKind::Property,
            MemberDesc::Method(_) => MemberKind::Method,
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            MemberDesc::Event(e) => e.is_static,
            MemberDesc::Field(f) => f.is_static,
            MemberDesc::Property(p) => p.is_static,
            MemberDesc::Method(m) => m.is_static,
        }
    }
}

// ── Type descriptors ─────────────────────────────────────────────────────

/// Where a type description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
    Host,
    /// Registered by a loaded compiled unit.
    GraphNative,
    /// Synthesized from a graph that has not been loaded as compiled code.
    GraphProxy,
}

#[derive(Debug, Clone)]
pub struct TypeDesc {
    pub name: String,
    pub origin: TypeOrigin,
    pub members: Vec<MemberDesc>,
}

impl TypeDesc {
    pub fn new(name: impl Into<String>, origin: TypeOrigin) -> Self {
        Self {
            name: name.into(),
            origin,
            members: Vec::new(),
        }
    }

    pub fn host(name: impl Into<String>) -> Self {
        Self::new(name, TypeOrigin::Host)
    }

    pub fn ty(&self) -> Ty {
        Ty::parse(&self.name)
    }

    /// Member with this name and kind, with its index in `members`.
    pub fn find(&self, name: &str, kind: MemberKind) -> Option<(usize, &MemberDesc)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, m)| m.kind() == kind && m.name() == name)
    }

    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDesc> {
        self.members.iter().filter_map(|m| match m {
            MemberDesc::Field(f) if !f.is_static => Some(f),
            _ => None,
        })
    }

    pub fn field(mut self, name: &str, ty: Ty, default: Value) -> Self {
        self.members.push(MemberDesc::Field(FieldDesc {
            name: name.to_string(),
            ty,
            is_static: false,
            default,
        }));
        self
    }

    pub fn static_field(mut self, name: &str, ty: Ty, default: Value) -> Self {
        self.members.push(MemberDesc::Field(FieldDesc {
            name: name.to_string(),
            ty,
            is_static: true,
            default,
        }));
        self
    }

    pub fn property(mut self, prop: PropertyDesc) -> Self {
        self.members.push(MemberDesc::Property(prop));
        self
    }

    pub fn event(mut self, name: &str, is_static: bool) -> Self {
        self.members.push(MemberDesc::Event(EventDesc {
            name: name.to_string(),
            is_static,
        }));
        self
    }

    pub fn method(self, name: &str, overload: Overload) -> Self {
        self.add_method(name, false, overload)
    }

    pub fn static_method(self, name: &str, overload: Overload) -> Self {
        self.add_method(name, true, overload)
    }

    fn add_method(mut self, name: &str, is_static: bool, overload: Overload) -> Self {
        let existing = self.members.iter_mut().find_map(|m| match m {
            MemberDesc::Method(md) if md.name == name && md.is_static == is_static => Some(md),
            _ => None,
        });
        match existing {
            Some(md) => md.overloads.push(overload),
            None => self.members.push(MemberDesc::Method(MethodDesc {
                name: name.to_string(),
                is_static,
                overloads: vec![overload],
            })),
        }
        self
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Host type registry. Generation increments on every change so cached
/// resolutions can detect staleness.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, Rc<TypeDesc>>,
    generation: u64,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin host types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    /// Register or replace a type. Returns the replaced description.
    pub fn register(&mut self, desc: TypeDesc) -> Option<Rc<TypeDesc>> {
        self.generation += 1;
        self.types.insert(desc.name.clone(), Rc::new(desc))
    }

    pub fn unregister(&mut self, name: &str) -> Option<Rc<TypeDesc>> {
        let removed = self.types.remove(name);
        if removed.is_some() {
            self.generation += 1;
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Rc<TypeDesc>> {
        self.types.get(name).cloned()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// ── Host state ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostObject {
    pub ty: String,
    pub fields: BTreeMap<String, Value>,
}

/// Objects are never freed while an execution is alive, so handles stay
/// valid for its whole lifetime.
#[derive(Debug, Default)]
pub struct ObjectHeap {
    objects: Vec<HostObject>,
}

impl ObjectHeap {
    pub fn alloc(&mut self, object: HostObject) -> ObjectId {
        self.objects.push(object);
        ObjectId(self.objects.len() as u32 - 1)
    }

    pub fn get(&self, id: ObjectId) -> Result<&HostObject, HostError> {
        self.objects
            .get(id.0 as usize)
            .ok_or(HostError::DanglingObject(id.0))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut HostObject, HostError> {
        self.objects
            .get_mut(id.0 as usize)
            .ok_or(HostError::DanglingObject(id.0))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Mutable world state for one execution: heap objects, static slots and the
/// observable effect trace.
#[derive(Debug, Default)]
pub struct HostState {
    pub heap: ObjectHeap,
    statics: BTreeMap<(String, String), Value>,
    trace: Vec<String>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one observable effect.
    pub fn emit(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn static_get(&self, ty: &str, name: &str) -> Option<&Value> {
        self.statics.get(&(ty.to_string(), name.to_string()))
    }

    pub fn static_set(&mut self, ty: &str, name: &str, value: Value) {
        self.statics.insert((ty.to_string(), name.to_string()), value);
    }

    /// Allocate an instance of `desc` with every instance field at its default.
    pub fn instantiate(&mut self, desc: &TypeDesc) -> Value {
        let fields = desc
            .instance_fields()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect();
        let id = self.heap.alloc(HostObject {
            ty: desc.name.clone(),
            fields,
        });
        Value::Object {
            id,
            ty: desc.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> NativeFn {
        native(|_, _| Ok(Value::Null))
    }

    #[test]
    fn overloads_accumulate_under_one_member() {
        let desc = TypeDesc::host("M")
            .static_method("f", Overload::new(vec![Ty::Int], Ty::Int, noop()))
            .static_method("f", Overload::new(vec![Ty::Float], Ty::Float, noop()));
        assert_eq!(desc.members.len(), 1);
        match &desc.members[0] {
            MemberDesc::Method(m) => assert_eq!(m.overloads.len(), 2),
            other => panic!("expected method, got {other:?}"),
        }
    }

    #[test]
    fn find_respects_kind() {
        let desc = TypeDesc::host("P")
            .field("signal", Ty::Int, Value::Int(0))
            .method("signal", Overload::new(vec![], Ty::Void, noop()));
        assert_eq!(desc.find("signal", MemberKind::Field).unwrap().0, 0);
        assert_eq!(desc.find("signal", MemberKind::Method).unwrap().0, 1);
        assert!(desc.find("signal", MemberKind::Event).is_none());
    }

    #[test]
    fn registry_generation_tracks_changes() {
        let mut reg = TypeRegistry::new();
        assert_eq!(reg.generation(), 0);
        reg.register(TypeDesc::host("A"));
        reg.register(TypeDesc::host("B"));
        assert_eq!(reg.generation(), 2);
        assert!(reg.unregister("missing").is_none());
        assert_eq!(reg.generation(), 2);
        reg.unregister("A");
        assert_eq!(reg.generation(), 3);
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn instantiate_uses_field_defaults() {
        let desc = TypeDesc::host("C")
            .field("value", Ty::Int, Value::Int(7))
            .static_field("count", Ty::Int, Value::Int(0));
        let mut host = HostState::new();
        let obj = host.instantiate(&desc);
        let id = obj.as_object().unwrap();
        let o = host.heap.get(id).unwrap();
        assert_eq!(o.fields.len(), 1);
        assert_eq!(o.fields["value"], Value::Int(7));
    }

    #[test]
    fn dangling_handle_is_unreachable() {
        let host = HostState::new();
        let err: EngineError = host.heap.get(ObjectId(9)).unwrap_err().into();
        assert_eq!(err.code(), crate::diag::codes::E0101);
    }
}

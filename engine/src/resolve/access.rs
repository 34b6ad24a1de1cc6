// resolve/access.rs — Live member reads, writes and calls
//
// The runtime half of the resolver, shared by the reflection interpreter and
// the script VM: both backends hand a receiver plus a segment lookup to these
// functions, so member semantics (field defaults, property setters, argument
// coercion, null receivers) cannot drift between them.
//
// Preconditions: the receiver's type is registered in the context.
// Postconditions: writes coerce to the member's declared type.
// Failure modes: resolution errors, `ReadOnly`, `TypeMismatch`, host faults.
// Side effects: natives and writes mutate the `HostState`.

use crate::error::{EngineError, ResolutionError};
use crate::facade::EngineContext;
use crate::host::{HostState, MemberDesc, MemberKind, NativeCall};
use crate::resolve::{Lookup, ResolvedStep};
use crate::value::{ObjectId, Ty, Value};

/// What a member access is applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum Receiver {
    Static(Ty),
    Instance(Value),
}

impl Receiver {
    fn owner(&self, member: &str) -> Result<(Ty, bool), EngineError> {
        match self {
            Receiver::Static(ty) => Ok((ty.clone(), true)),
            Receiver::Instance(Value::Null) => Err(ResolutionError::Unreachable(format!(
                "member '{member}' accessed on null"
            ))
            .into()),
            Receiver::Instance(v) => Ok((v.runtime_ty(), false)),
        }
    }

    fn value(&self) -> Option<Value> {
        match self {
            Receiver::Instance(v) => Some(v.clone()),
            Receiver::Static(_) => None,
        }
    }

    fn object(&self, member: &str) -> Result<ObjectId, EngineError> {
        match self {
            Receiver::Instance(v) => v.as_object().ok_or_else(|| {
                ResolutionError::Unreachable(format!("field '{member}' read on a non-object {}", v.runtime_ty()))
                    .into()
            }),
            Receiver::Static(ty) => Err(ResolutionError::Unreachable(format!(
                "instance field '{member}' read on type {ty}"
            ))
            .into()),
        }
    }
}

fn resolve(
    ctx: &EngineContext,
    recv: &Receiver,
    lookup: Lookup<'_>,
    tag: Option<MemberKind>,
) -> Result<std::rc::Rc<ResolvedStep>, EngineError> {
    let (owner, is_static) = recv.owner(lookup.name)?;
    ctx.resolver().resolve_segment(&owner, lookup, is_static, tag)
}

/// Read (or call) one member of `recv`. `args` must match the lookup arity.
pub fn read_member(
    ctx: &EngineContext,
    host: &mut HostState,
    recv: &Receiver,
    lookup: Lookup<'_>,
    args: Vec<Value>,
    tag: Option<MemberKind>,
) -> Result<Value, EngineError> {
    let step = resolve(ctx, recv, lookup, tag)?;
    invoke(host, &step, recv, args)
}

/// Apply an already-resolved step to `recv`.
pub fn invoke(
    host: &mut HostState,
    step: &ResolvedStep,
    recv: &Receiver,
    args: Vec<Value>,
) -> Result<Value, EngineError> {
    let owner = step.owner.name.as_str();
    match step.member() {
        MemberDesc::Event(e) => Ok(Value::Event {
            owner: recv.value().as_ref().and_then(Value::as_object),
            ty: owner.to_string(),
            name: e.name.clone(),
        }),
        MemberDesc::Field(f) if f.is_static => Ok(host
            .static_get(owner, &f.name)
            .cloned()
            .unwrap_or_else(|| f.default.clone())),
        MemberDesc::Field(f) => {
            let id = recv.object(&f.name)?;
            Ok(host
                .heap
                .get(id)?
                .fields
                .get(&f.name)
                .cloned()
                .unwrap_or_else(|| f.default.clone()))
        }
        MemberDesc::Property(p) => {
            let getter = p
                .getter
                .clone()
                .ok_or_else(|| EngineError::fault(format!("property '{}' has no getter", p.name)))?;
            Ok(getter(
                host,
                NativeCall {
                    receiver: recv.value(),
                    args: Vec::new(),
                    generics: Vec::new(),
                },
            )?)
        }
        MemberDesc::Method(_) => {
            let overload = step
                .overload()
                .ok_or_else(|| EngineError::Structural("method resolved without an overload".into()))?;
            let args = args
                .into_iter()
                .zip(&overload.params)
                .map(|(arg, ty)| ty.coerce(arg))
                .collect::<Result<Vec<_>, _>>()?;
            let func = overload.func.clone();
            Ok(func(
                host,
                NativeCall {
                    receiver: recv.value(),
                    args,
                    generics: step.generics.clone(),
                },
            )?)
        }
    }
}

/// Assign `value` to one member of `recv`.
pub fn write_member(
    ctx: &EngineContext,
    host: &mut HostState,
    recv: &Receiver,
    lookup: Lookup<'_>,
    value: Value,
    tag: Option<MemberKind>,
) -> Result<(), EngineError> {
    let step = resolve(ctx, recv, lookup, tag)?;
    let owner = step.owner.name.as_str();
    match step.member() {
        MemberDesc::Field(f) => {
            let value = f.ty.coerce(value)?;
            if f.is_static {
                host.static_set(owner, &f.name, value);
            } else {
                let id = recv.object(&f.name)?;
                host.heap.get_mut(id)?.fields.insert(f.name.clone(), value);
            }
            Ok(())
        }
        MemberDesc::Property(p) => {
            let setter = p
                .setter
                .clone()
                .ok_or_else(|| EngineError::ReadOnly(format!("property '{}' (no setter)", p.name)))?;
            let value = p.ty.coerce(value)?;
            setter(
                host,
                NativeCall {
                    receiver: recv.value(),
                    args: vec![value],
                    generics: Vec::new(),
                },
            )?;
            Ok(())
        }
        other => Err(EngineError::ReadOnly(format!("{} '{}'", other.kind(), other.name()))),
    }
}

/// Allocate a new instance of the type named `ty`.
pub fn construct(ctx: &EngineContext, host: &mut HostState, ty: &Ty) -> Result<Value, EngineError> {
    let desc = ctx
        .desc_for(ty)
        .ok_or_else(|| ResolutionError::UnknownType(ty.to_string()))?;
    Ok(host.instantiate(&desc))
}

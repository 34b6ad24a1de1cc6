// host/builtins.rs — Builtin host types
//
// A small standard surface used by graphs, tests and the CLI:
//   Math    — pure static helpers, overloaded on int/float
//   Trace   — observable effect log
//   Counter — stateful instance and static counters (side-effecting)
//   Text    — string helpers, including a generic `parse`
//   string  — members on the primitive string type

use crate::host::{native, HostError, NativeCall, Overload, PropertyDesc, TypeDesc, TypeRegistry};
use crate::value::{Ty, Value};

pub fn register_all(registry: &mut TypeRegistry) {
    registry.register(math());
    registry.register(trace());
    registry.register(counter());
    registry.register(text());
    registry.register(string());
}

fn int_arg(call: &NativeCall, i: usize) -> Result<i64, HostError> {
    match call.arg(i)? {
        Value::Int(v) => Ok(*v),
        other => Err(HostError::Failed(format!("expected int, found {other}"))),
    }
}

fn float_arg(call: &NativeCall, i: usize) -> Result<f64, HostError> {
    match call.arg(i)? {
        Value::Float(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        other => Err(HostError::Failed(format!("expected float, found {other}"))),
    }
}

fn str_arg(call: &NativeCall, i: usize) -> Result<&str, HostError> {
    match call.arg(i)? {
        Value::Str(s) => Ok(s),
        other => Err(HostError::Failed(format!("expected string, found {other}"))),
    }
}

fn math() -> TypeDesc {
    TypeDesc::host("Math")
        .static_method(
            "max",
            Overload::new(
                vec![Ty::Int, Ty::Int],
                Ty::Int,
                native(|_, c| Ok(Value::Int(int_arg(&c, 0)?.max(int_arg(&c, 1)?)))),
            )
            .pure(),
        )
        .static_method(
            "max",
            Overload::new(
                vec![Ty::Float, Ty::Float],
                Ty::Float,
                native(|_, c| Ok(Value::Float(float_arg(&c, 0)?.max(float_arg(&c, 1)?)))),
            )
            .pure(),
        )
        .static_method(
            "min",
            Overload::new(
                vec![Ty::Int, Ty::Int],
                Ty::Int,
                native(|_, c| Ok(Value::Int(int_arg(&c, 0)?.min(int_arg(&c, 1)?)))),
            )
            .pure(),
        )
        .static_method(
            "abs",
            Overload::new(
                vec![Ty::Int],
                Ty::Int,
                native(|_, c| {
                    int_arg(&c, 0)?
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| HostError::Failed("integer overflow in abs".into()))
                }),
            )
            .pure(),
        )
        .static_method(
            "abs",
            Overload::new(
                vec![Ty::Float],
                Ty::Float,
                native(|_, c| Ok(Value::Float(float_arg(&c, 0)?.abs()))),
            )
            .pure(),
        )
        .static_method(
            "sqrt",
            Overload::new(
                vec![Ty::Float],
                Ty::Float,
                native(|_, c| Ok(Value::Float(float_arg(&c, 0)?.sqrt()))),
            )
            .pure(),
        )
        .property(PropertyDesc {
            name: "pi".into(),
            ty: Ty::Float,
            is_static: true,
            pure: true,
            getter: Some(native(|_, _| Ok(Value::Float(std::f64::consts::PI)))),
            setter: None,
        })
}

fn trace() -> TypeDesc {
    TypeDesc::host("Trace")
        .static_method(
            "emit",
            Overload::new(
                vec![Ty::Any],
                Ty::Void,
                native(|host, c| {
                    let line = c.arg(0)?.to_string();
                    host.emit(line);
                    Ok(Value::Null)
                }),
            ),
        )
        .property(PropertyDesc {
            name: "count".into(),
            ty: Ty::Int,
            is_static: true,
            pure: true,
            getter: Some(native(|host, _| Ok(Value::Int(host.trace().len() as i64)))),
            setter: None,
        })
        .event("emitted", true)
}

fn counter() -> TypeDesc {
    TypeDesc::host("Counter")
        .field("value", Ty::Int, Value::Int(0))
        .static_field("ticks", Ty::Int, Value::Int(0))
        .property(PropertyDesc {
            name: "current".into(),
            ty: Ty::Int,
            is_static: false,
            pure: true,
            getter: Some(native(|host, c| {
                let id = c.receiver_object()?;
                Ok(host
                    .heap
                    .get(id)?
                    .fields
                    .get("value")
                    .cloned()
                    .unwrap_or(Value::Int(0)))
            })),
            setter: Some(native(|host, c| {
                let id = c.receiver_object()?;
                let v = Value::Int(int_arg(&c, 0)?);
                host.heap.get_mut(id)?.fields.insert("value".into(), v);
                Ok(Value::Null)
            })),
        })
        .method(
            "next",
            Overload::new(
                vec![],
                Ty::Int,
                native(|host, c| {
                    let id = c.receiver_object()?;
                    let obj = host.heap.get_mut(id)?;
                    let next = match obj.fields.get("value") {
                        Some(Value::Int(v)) => v + 1,
                        _ => 1,
                    };
                    obj.fields.insert("value".into(), Value::Int(next));
                    Ok(Value::Int(next))
                }),
            ),
        )
        .static_method(
            "tick",
            Overload::new(
                vec![],
                Ty::Int,
                native(|host, _| {
                    let next = match host.static_get("Counter", "ticks") {
                        Some(Value::Int(v)) => v + 1,
                        _ => 1,
                    };
                    host.static_set("Counter", "ticks", Value::Int(next));
                    Ok(Value::Int(next))
                }),
            ),
        )
}

fn text() -> TypeDesc {
    TypeDesc::host("Text")
        .static_method(
            "concat",
            Overload::new(
                vec![Ty::Str, Ty::Str],
                Ty::Str,
                native(|_, c| Ok(Value::Str(format!("{}{}", str_arg(&c, 0)?, str_arg(&c, 1)?)))),
            )
            .pure(),
        )
        .static_method(
            "parse",
            Overload::new(
                vec![Ty::Str],
                Ty::Any,
                native(|_, c| {
                    let text = str_arg(&c, 0)?.trim();
                    let fail = |what: &str| HostError::Failed(format!("cannot parse '{text}' as {what}"));
                    match c.generics.first() {
                        Some(Ty::Int) => text.parse().map(Value::Int).map_err(|_| fail("int")),
                        Some(Ty::Float) => text.parse().map(Value::Float).map_err(|_| fail("float")),
                        Some(Ty::Bool) => text.parse().map(Value::Bool).map_err(|_| fail("bool")),
                        Some(Ty::Str) => Ok(Value::str(text)),
                        Some(other) => Err(fail(other.name())),
                        None => Err(HostError::Failed("parse requires a type argument".into())),
                    }
                }),
            )
            .pure()
            .generic(1, Some(0)),
        )
}

fn string() -> TypeDesc {
    TypeDesc::host("string")
        .property(PropertyDesc {
            name: "length".into(),
            ty: Ty::Int,
            is_static: false,
            pure: true,
            getter: Some(native(|_, c| match &c.receiver {
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
                _ => Err(HostError::Failed("length requires a string receiver".into())),
            })),
            setter: None,
        })
        .method(
            "upper",
            Overload::new(
                vec![],
                Ty::Str,
                native(|_, c| match &c.receiver {
                    Some(Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),
                    _ => Err(HostError::Failed("upper requires a string receiver".into())),
                }),
            )
            .pure(),
        )
}

// value.rs — Runtime values, static types and operator semantics
//
// `Value` is the single dynamic value representation shared by the
// interpreter, the script VM and host natives. Operator evaluation lives here
// so both backends compute arithmetic, comparison and coercion identically.
//
// Preconditions: none.
// Postconditions: operators never panic.
// Failure modes: overflow and division by zero are `EngineError::Fault`;
//   operand mismatches are `EngineError::TypeMismatch`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ── Types ────────────────────────────────────────────────────────────────

/// A static type as written in graphs, signatures and emitted source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Ty {
    Void,
    Any,
    Bool,
    Int,
    Float,
    Str,
    List,
    Type,
    Event,
    Named(String),
}

impl Ty {
    pub fn parse(name: &str) -> Ty {
        match name {
            "void" => Ty::Void,
            "any" => Ty::Any,
            "bool" => Ty::Bool,
            "int" => Ty::Int,
            "float" => Ty::Float,
            "string" => Ty::Str,
            "list" => Ty::List,
            "type" => Ty::Type,
            "event" => Ty::Event,
            other => Ty::Named(other.to_string()),
        }
    }

    pub fn named(name: impl Into<String>) -> Ty {
        Ty::Named(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Ty::Void => "void",
            Ty::Any => "any",
            Ty::Bool => "bool",
            Ty::Int => "int",
            Ty::Float => "float",
            Ty::Str => "string",
            Ty::List => "list",
            Ty::Type => "type",
            Ty::Event => "event",
            Ty::Named(n) => n,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    /// Initial value of a slot declared with this type and no default.
    pub fn zero(&self) -> Value {
        match self {
            Ty::Bool => Value::Bool(false),
            Ty::Int => Value::Int(0),
            Ty::Float => Value::Float(0.0),
            Ty::Str => Value::str(""),
            Ty::List => Value::List(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Static assignability: can a value of type `other` flow into a slot of
    /// type `self`?
    pub fn accepts(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Any, _) | (_, Ty::Any) => true,
            (Ty::Float, Ty::Int) => true,
            (a, b) => a == b,
        }
    }

    /// Runtime assignability, widening `int` to `float` where required.
    pub fn coerce(&self, value: Value) -> Result<Value, EngineError> {
        match (self, &value) {
            (Ty::Any, _) => Ok(value),
            (Ty::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
            (Ty::Named(_), Value::Null) | (Ty::Void, Value::Null) => Ok(value),
            _ => {
                let found = value.runtime_ty();
                if &found == self {
                    Ok(value)
                } else {
                    Err(EngineError::type_mismatch(self.clone(), found))
                }
            }
        }
    }
}

impl From<String> for Ty {
    fn from(s: String) -> Self {
        Ty::parse(&s)
    }
}

impl From<Ty> for String {
    fn from(t: Ty) -> Self {
        t.name().to_string()
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Values ───────────────────────────────────────────────────────────────

/// Handle to a heap object owned by a `HostState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object { id: ObjectId, ty: String },
    Type(Ty),
    Event {
        owner: Option<ObjectId>,
        ty: String,
        name: String,
    },
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn runtime_ty(&self) -> Ty {
        match self {
            Value::Null => Ty::Any,
            Value::Bool(_) => Ty::Bool,
            Value::Int(_) => Ty::Int,
            Value::Float(_) => Ty::Float,
            Value::Str(_) => Ty::Str,
            Value::List(_) => Ty::List,
            Value::Object { ty, .. } => Ty::Named(ty.clone()),
            Value::Type(_) => Ty::Type,
            Value::Event { .. } => Ty::Event,
        }
    }

    pub fn as_bool(&self) -> Result<bool, EngineError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EngineError::type_mismatch(Ty::Bool, other.runtime_ty())),
        }
    }

    pub fn as_f64(&self) -> Result<f64, EngineError> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            other => Err(EngineError::type_mismatch(Ty::Float, other.runtime_ty())),
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Source literal for this value, or `None` when it has no literal form
    /// (object handles, events, non-finite floats).
    pub fn to_source(&self) -> Option<String> {
        match self {
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(b.to_string()),
            // No positive literal exists to negate.
            Value::Int(i64::MIN) => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.is_finite() => Some(format!("{f:?}")),
            Value::Float(_) => None,
            Value::Str(s) => Some(quote(s)),
            Value::List(items) => {
                let parts: Option<Vec<String>> = items.iter().map(Value::to_source).collect();
                Some(format!("[{}]", parts?.join(", ")))
            }
            Value::Type(t) => Some(format!("@{t}")),
            Value::Object { .. } | Value::Event { .. } => None,
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object { id, ty } => write!(f, "<{ty}#{}>", id.0),
            Value::Type(t) => write!(f, "@{t}"),
            Value::Event { ty, name, .. } => write!(f, "event {ty}.{name}"),
        }
    }
}

// ── Operators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 13] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Rem,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::And,
        BinaryOp::Or,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    /// Static result type, mirroring `apply_binary`.
    pub fn result_type(self, l: &Ty, r: &Ty) -> Result<Ty, EngineError> {
        match self {
            BinaryOp::Add if *l == Ty::Str || *r == Ty::Str => Ok(Ty::Str),
            op if op.is_arithmetic() => match (l, r) {
                (Ty::Int, Ty::Int) => Ok(Ty::Int),
                (Ty::Any, _) | (_, Ty::Any) => Ok(Ty::Any),
                (a, b) if a.is_numeric() && b.is_numeric() => Ok(Ty::Float),
                (a, _) if !a.is_numeric() => Err(EngineError::type_mismatch(Ty::Float, a.clone())),
                (_, b) => Err(EngineError::type_mismatch(Ty::Float, b.clone())),
            },
            BinaryOp::Eq | BinaryOp::Ne => Ok(Ty::Bool),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (l, r) {
                (Ty::Any, _) | (_, Ty::Any) | (Ty::Str, Ty::Str) => Ok(Ty::Bool),
                (a, b) if a.is_numeric() && b.is_numeric() => Ok(Ty::Bool),
                (a, _) if !a.is_numeric() => Err(EngineError::type_mismatch(Ty::Float, a.clone())),
                (_, b) => Err(EngineError::type_mismatch(Ty::Float, b.clone())),
            },
            _ => {
                for t in [l, r] {
                    if !Ty::Bool.accepts(t) {
                        return Err(EngineError::type_mismatch(Ty::Bool, t.clone()));
                    }
                }
                Ok(Ty::Bool)
            }
        }
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }

    pub fn result_type(self, t: &Ty) -> Result<Ty, EngineError> {
        match (self, t) {
            (_, Ty::Any) => Ok(Ty::Any),
            (UnaryOp::Neg, t) if t.is_numeric() => Ok(t.clone()),
            (UnaryOp::Neg, t) => Err(EngineError::type_mismatch(Ty::Float, t.clone())),
            (UnaryOp::Not, Ty::Bool) => Ok(Ty::Bool),
            (UnaryOp::Not, t) => Err(EngineError::type_mismatch(Ty::Bool, t.clone())),
        }
    }
}

fn overflow(op: BinaryOp) -> EngineError {
    EngineError::fault(format!("integer overflow in '{}'", op.symbol()))
}

/// Evaluate a binary operator. Both operands are always evaluated by the
/// caller; `&&` and `||` do not short-circuit.
pub fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EngineError> {
    use Value::*;
    match op {
        BinaryOp::Add => match (l, r) {
            (Str(a), b) => Ok(Str(format!("{a}{b}"))),
            (a, Str(b)) => Ok(Str(format!("{a}{b}"))),
            _ => arith(op, l, r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arith(op, l, r),
        BinaryOp::Eq => Ok(Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Bool(!values_equal(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = match (l, r) {
                (Str(a), Str(b)) => a.partial_cmp(b),
                _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
            };
            let Some(ord) = ord else {
                return Ok(Bool(false));
            };
            Ok(Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinaryOp::And => Ok(Bool(l.as_bool()? & r.as_bool()?)),
        BinaryOp::Or => Ok(Bool(l.as_bool()? | r.as_bool()?)),
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EngineError> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(EngineError::fault("division by zero"))
            }
            BinaryOp::Div => a.checked_div(b),
            _ => a.checked_rem(b),
        };
        return result.map(Value::Int).ok_or_else(|| overflow(op));
    }
    let (a, b) = (l.as_f64()?, r.as_f64()?);
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }))
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        (Value::Object { id: a, .. }, Value::Object { id: b, .. }) => a == b,
        _ => l == r,
    }
}

pub fn apply_unary(op: UnaryOp, v: &Value) -> Result<Value, EngineError> {
    match (op, v) {
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EngineError::fault("integer overflow in '-'")),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(EngineError::type_mismatch(Ty::Float, other.runtime_ty())),
        (UnaryOp::Not, other) => Ok(Value::Bool(!other.as_bool()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_arithmetic_stays_int() {
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::Int(2), &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            apply_binary(BinaryOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn mixed_arithmetic_widens() {
        assert_eq!(
            apply_binary(BinaryOp::Mul, &Value::Int(2), &Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn division_by_zero_faults() {
        let err = apply_binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err, EngineError::fault("division by zero"));
    }

    #[test]
    fn overflow_faults() {
        assert!(apply_binary(BinaryOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).is_err());
        assert!(apply_unary(UnaryOp::Neg, &Value::Int(i64::MIN)).is_err());
    }

    #[test]
    fn string_concat() {
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::str("n="), &Value::Int(4)).unwrap(),
            Value::str("n=4")
        );
    }

    #[test]
    fn comparisons() {
        assert_eq!(
            apply_binary(BinaryOp::Gt, &Value::Int(5), &Value::Int(3)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap(),
            Value::Bool(true)
        );
        assert!(apply_binary(BinaryOp::Lt, &Value::Bool(true), &Value::Int(1)).is_err());
    }

    #[test]
    fn logic_requires_bool() {
        assert!(apply_binary(BinaryOp::And, &Value::Int(1), &Value::Bool(true)).is_err());
        assert_eq!(
            apply_binary(BinaryOp::Or, &Value::Bool(false), &Value::Bool(true)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn result_types_match_runtime() {
        assert_eq!(BinaryOp::Add.result_type(&Ty::Int, &Ty::Int).unwrap(), Ty::Int);
        assert_eq!(BinaryOp::Add.result_type(&Ty::Int, &Ty::Float).unwrap(), Ty::Float);
        assert_eq!(BinaryOp::Add.result_type(&Ty::Str, &Ty::Int).unwrap(), Ty::Str);
        assert_eq!(BinaryOp::Gt.result_type(&Ty::Int, &Ty::Float).unwrap(), Ty::Bool);
        assert!(BinaryOp::Sub.result_type(&Ty::Bool, &Ty::Int).is_err());
        assert!(BinaryOp::And.result_type(&Ty::Int, &Ty::Bool).is_err());
        assert!(UnaryOp::Not.result_type(&Ty::Int).is_err());
    }

    #[test]
    fn coercion_widens_int_to_float() {
        assert_eq!(Ty::Float.coerce(Value::Int(2)).unwrap(), Value::Float(2.0));
        assert!(Ty::Int.coerce(Value::Float(2.0)).is_err());
        assert_eq!(Ty::named("Counter").coerce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn source_literals() {
        assert_eq!(Value::Float(5.0).to_source().unwrap(), "5.0");
        assert_eq!(Value::Float(1e21).to_source().unwrap(), "1e21");
        assert_eq!(Value::str("a\"b").to_source().unwrap(), "\"a\\\"b\"");
        assert_eq!(Value::Type(Ty::Int).to_source().unwrap(), "@int");
        assert_eq!(Value::Float(f64::NAN).to_source(), None);
    }

    #[test]
    fn ty_serializes_as_name() {
        assert_eq!(serde_json::to_string(&Ty::Str).unwrap(), "\"string\"");
        let t: Ty = serde_json::from_str("\"Counter\"").unwrap();
        assert_eq!(t, Ty::named("Counter"));
    }
}

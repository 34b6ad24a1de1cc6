// resolve/fragment.rs — Source fragments for member references
//
// The emitter's half of the resolver: a reference becomes an expression in
// the script language. Paths are checked statically on the way (same cascade,
// same overload selection), so a fragment exists only for references the
// interpreter could also resolve.
//
// Rendering:
//   self.a.b            instance path on the graph object
//   Type::m.n           static root
//   (expr).m            path on another value
//   .m[params; gen](a)  method with a recorded signature
//   @Type               type reference
//
// Preconditions: hoisted and node-output fragments are supplied by the env.
// Postconditions: fragments of pure references are referentially transparent.
// Failure modes: any resolution error; values with no literal form.
// Side effects: none.

use crate::error::{EngineError, ResolutionError};
use crate::graph::slot_name;
use crate::host::MemberKind;
use crate::id::NodeId;
use crate::reference::{MemberPath, MemberReference, PathRoot, Segment, Signature, Target};
use crate::resolve::{tag_of, TypeCx};
use crate::value::Ty;

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub ty: Ty,
    /// Safe to use as an operand or receiver without parentheses.
    pub atomic: bool,
}

impl Fragment {
    pub fn atom(text: impl Into<String>, ty: Ty) -> Self {
        Self {
            text: text.into(),
            ty,
            atomic: true,
        }
    }

    pub fn compound(text: impl Into<String>, ty: Ty) -> Self {
        Self {
            text: text.into(),
            ty,
            atomic: false,
        }
    }

    /// Text usable as an operand: parenthesized unless atomic.
    pub fn operand(&self) -> String {
        if self.atomic {
            self.text.clone()
        } else {
            format!("({})", self.text)
        }
    }
}

/// Emitter-side services a fragment needs.
pub trait FragmentEnv {
    /// Expression for reading `port` of `node` (inlined, temporary or slot).
    fn node_output(&mut self, cx: &mut TypeCx<'_>, node: NodeId, port: &str) -> Result<Fragment, EngineError>;
    /// Temporary already holding this exact reference's value, if hoisted.
    fn hoisted(&self, reference: &MemberReference) -> Option<Fragment>;
}

pub fn to_expression(
    reference: &MemberReference,
    cx: &mut TypeCx<'_>,
    env: &mut dyn FragmentEnv,
) -> Result<Fragment, EngineError> {
    if let Some(hoisted) = env.hoisted(reference) {
        return Ok(hoisted);
    }
    match &reference.target {
        Target::None => Err(ResolutionError::Unassigned.into()),
        Target::Literal { value } => {
            let text = value
                .to_source()
                .ok_or_else(|| EngineError::Structural(format!("value {value} has no source literal")))?;
            let ty = value.runtime_ty();
            if text.starts_with('-') {
                Ok(Fragment::compound(text, ty))
            } else {
                Ok(Fragment::atom(text, ty))
            }
        }
        Target::Variable { name } => {
            let (scope, decl) = cx
                .graph()
                .lookup_variable(reference.scope, name)
                .ok_or_else(|| ResolutionError::UnknownVariable(name.clone()))?;
            Ok(Fragment::atom(slot_name(scope, name), decl.ty.clone()))
        }
        Target::Type { ty } => {
            cx.ref_type(reference)?;
            Ok(Fragment::atom(format!("@{ty}"), Ty::Type))
        }
        Target::SelfReference => Ok(Fragment::atom("self", cx.self_type())),
        Target::NodeOutput { node, port } => env.node_output(cx, *node, port),
        Target::Field { path } | Target::Property { path } | Target::Method { path } => {
            let tag = tag_of(&reference.target).unwrap_or(MemberKind::Field);
            render_path(path, tag, cx, env)
        }
    }
}

fn render_path(
    path: &MemberPath,
    tag: MemberKind,
    cx: &mut TypeCx<'_>,
    env: &mut dyn FragmentEnv,
) -> Result<Fragment, EngineError> {
    let resolved = cx.path(path, tag)?;
    let mut text = match &path.root {
        PathRoot::SelfInstance => "self".to_string(),
        PathRoot::Static { ty } => ty.name().to_string(),
        PathRoot::Value { source } => to_expression(source, cx, env)?.operand(),
    };
    let last = path.segments.len().saturating_sub(1);
    for (i, seg) in path.segments.iter().enumerate() {
        text.push_str(if i == 0 && resolved.is_static { "::" } else { "." });
        text.push_str(&seg.name);
        let is_call = match resolved.steps.get(i) {
            Some(step) => step.kind == MemberKind::Method,
            None => seg.signature.is_some() || !seg.args.is_empty() || (i == last && tag == MemberKind::Method),
        };
        if is_call {
            render_call(seg, cx, env, &mut text)?;
        }
    }
    Ok(Fragment::atom(text, resolved.ty()))
}

fn render_call(
    seg: &Segment,
    cx: &mut TypeCx<'_>,
    env: &mut dyn FragmentEnv,
    text: &mut String,
) -> Result<(), EngineError> {
    if let Some(sig) = &seg.signature {
        text.push_str(&render_signature(sig));
    }
    let args = seg
        .args
        .iter()
        .map(|a| to_expression(a, cx, env).map(|f| f.text))
        .collect::<Result<Vec<_>, _>>()?;
    text.push('(');
    text.push_str(&args.join(", "));
    text.push(')');
    Ok(())
}

/// `[int, int]` or `[string; int]` for a generic instantiation.
pub fn render_signature(sig: &Signature) -> String {
    let params: Vec<&str> = sig.params.iter().map(Ty::name).collect();
    if sig.generics.is_empty() {
        format!("[{}]", params.join(", "))
    } else {
        let generics: Vec<&str> = sig.generics.iter().map(Ty::name).collect();
        format!("[{}; {}]", params.join(", "), generics.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::EngineContext;
    use crate::graph::Graph;
    use crate::id::ScopeId;
    use crate::value::Value;

    struct NoEnv;

    impl FragmentEnv for NoEnv {
        fn node_output(&mut self, _: &mut TypeCx<'_>, node: NodeId, port: &str) -> Result<Fragment, EngineError> {
            Ok(Fragment::atom(format!("out_{node}_{port}"), Ty::Any))
        }

        fn hoisted(&self, _: &MemberReference) -> Option<Fragment> {
            None
        }
    }

    fn render(ctx: &EngineContext, g: &Graph, r: &MemberReference) -> Result<String, EngineError> {
        let mut cx = TypeCx::new(ctx, g);
        to_expression(r, &mut cx, &mut NoEnv).map(|f| f.text)
    }

    fn setup() -> (EngineContext, Graph) {
        let ctx = EngineContext::with_builtins();
        let mut g = Graph::new("G");
        g.declare(ScopeId::ROOT, "c", Ty::named("Counter"), None);
        let inner = g.add_scope(ScopeId::ROOT);
        g.declare(inner, "n", Ty::Int, None);
        ctx.register_graph(&g);
        (ctx, g)
    }

    #[test]
    fn variables_render_as_slots() {
        let (ctx, g) = setup();
        let r = MemberReference::variable("n").in_scope(ScopeId(1));
        assert_eq!(render(&ctx, &g, &r).unwrap(), "n_s1");
        let r = MemberReference::variable("c").in_scope(ScopeId(1));
        assert_eq!(render(&ctx, &g, &r).unwrap(), "c");
    }

    #[test]
    fn paths_render_with_calls_and_signatures() {
        let (ctx, g) = setup();
        let r = MemberReference::method(MemberPath::on_self(&["c"]).then(Segment::new("next")));
        assert_eq!(render(&ctx, &g, &r).unwrap(), "self.c.next()");
        let r = MemberReference::method(MemberPath::on_type(
            Ty::named("Math"),
            Segment::new("max")
                .signature(Signature::new(vec![Ty::Int, Ty::Int]))
                .args(vec![Value::Int(1).into(), Value::Int(-2).into()]),
        ));
        assert_eq!(render(&ctx, &g, &r).unwrap(), "Math::max[int, int](1, -2)");
        let r = MemberReference::method(MemberPath::on_type(
            Ty::named("Text"),
            Segment::new("parse")
                .signature(Signature::new(vec![Ty::Str]).with_generics(vec![Ty::Int]))
                .args(vec![Value::str("7").into()]),
        ));
        assert_eq!(render(&ctx, &g, &r).unwrap(), "Text::parse[string; int](\"7\")");
    }

    #[test]
    fn value_roots_render_before_members() {
        let (ctx, g) = setup();
        let r = MemberReference::property(MemberPath::on_value(
            Value::str("ab").into(),
            Segment::new("length"),
        ));
        assert_eq!(render(&ctx, &g, &r).unwrap(), "\"ab\".length");
    }

    #[test]
    fn errors_surface() {
        let (ctx, g) = setup();
        assert_eq!(
            render(&ctx, &g, &MemberReference::none()).unwrap_err().code(),
            crate::diag::codes::E0100
        );
        let r = MemberReference::field(MemberPath::on_self(&["missing"]));
        assert_eq!(render(&ctx, &g, &r).unwrap_err().code(), crate::diag::codes::E0101);
        let r = MemberReference::ty(Ty::named("Nope"));
        assert!(render(&ctx, &g, &r).is_err());
        assert_eq!(render(&ctx, &g, &MemberReference::ty(Ty::Int)).unwrap(), "@int");
    }

    #[test]
    fn signature_rendering() {
        assert_eq!(render_signature(&Signature::new(vec![])), "[]");
        assert_eq!(
            render_signature(&Signature::new(vec![]).with_generics(vec![Ty::Bool])),
            "[; bool]"
        );
    }
}

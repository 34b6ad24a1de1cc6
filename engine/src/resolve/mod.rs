// resolve/mod.rs — Member reference resolver
//
// Turns member paths into resolved steps against the runtime-type façade.
// Each segment runs the lookup cascade (event, field, property, method),
// then checks the member kind against the reference tag on the final
// segment, the static/instance flag, and the recorded overload.
//
// The same resolver backs three consumers:
//   access   — live reads and writes (interpreter and VM)
//   fragment — source expressions (emitter)
//   TypeCx   — static types for checking and edit-time annotation
//
// Preconditions: the graph's instance type is registered in the context.
// Postconditions: resolution never mutates the graph; identical inputs give
//   identical results (successes and failures are both cached).
// Failure modes: `ResolutionError`, `OverloadMismatch`, `Structural`.
// Side effects: fills the context's `ResolveCache`.

pub mod access;
pub mod fragment;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::{EngineError, ResolutionError};
use crate::facade::EngineContext;
use crate::graph::Graph;
use crate::host::{MemberDesc, MemberKind, MethodDesc, Overload, TypeDesc};
use crate::id::NodeId;
use crate::node::TypeContext;
use crate::reference::{MemberPath, MemberReference, PathRoot, Segment, Signature, Target};
use crate::value::Ty;

// ── Resolved steps ───────────────────────────────────────────────────────

/// One resolved path segment.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub owner: Rc<TypeDesc>,
    /// Index into `owner.members`.
    pub member: usize,
    pub kind: MemberKind,
    pub is_static: bool,
    pub overload: Option<usize>,
    pub generics: Vec<Ty>,
    /// Type of the value this step produces.
    pub ty: Ty,
    /// Reading this step has no observable side effects.
    pub pure: bool,
}

impl ResolvedStep {
    pub fn member(&self) -> &MemberDesc {
        &self.owner.members[self.member]
    }

    pub fn overload(&self) -> Option<&Overload> {
        match (self.member(), self.overload) {
            (MemberDesc::Method(m), Some(i)) => m.overloads.get(i),
            _ => None,
        }
    }
}

/// What the resolver needs from a segment; shared by graph paths and
/// compiled member accesses.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub name: &'a str,
    pub signature: Option<&'a Signature>,
    pub arity: usize,
}

impl<'a> From<&'a Segment> for Lookup<'a> {
    fn from(seg: &'a Segment) -> Self {
        Self {
            name: &seg.name,
            signature: seg.signature.as_ref(),
            arity: seg.args.len(),
        }
    }
}

/// Final member kind demanded by a reference tag.
pub fn tag_of(target: &Target) -> Option<MemberKind> {
    match target {
        Target::Field { .. } => Some(MemberKind::Field),
        Target::Property { .. } => Some(MemberKind::Property),
        Target::Method { .. } => Some(MemberKind::Method),
        _ => None,
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SegmentKey {
    owner: String,
    name: String,
    signature: Option<Signature>,
    arity: usize,
    is_static: bool,
    tag: Option<MemberKind>,
}

/// Resolution cache, keyed per segment. Dropped wholesale whenever the
/// owning context's type generation moves.
#[derive(Debug, Default)]
pub struct ResolveCache {
    generation: (u64, u64),
    entries: HashMap<SegmentKey, Result<Rc<ResolvedStep>, EngineError>>,
    hits: u64,
    misses: u64,
}

impl ResolveCache {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since the context was created.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub struct Resolver<'c> {
    ctx: &'c EngineContext,
}

impl<'c> Resolver<'c> {
    pub fn new(ctx: &'c EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &'c EngineContext {
        self.ctx
    }

    /// Resolve one segment on `owner`. `tag` constrains the member kind
    /// (final segments of tagged references); `None` accepts whatever the
    /// cascade finds.
    pub fn resolve_segment(
        &self,
        owner: &Ty,
        lookup: Lookup<'_>,
        is_static: bool,
        tag: Option<MemberKind>,
    ) -> Result<Rc<ResolvedStep>, EngineError> {
        let key = SegmentKey {
            owner: owner.name().to_string(),
            name: lookup.name.to_string(),
            signature: lookup.signature.cloned(),
            arity: lookup.arity,
            is_static,
            tag,
        };
        {
            let mut cache = self.ctx.cache().borrow_mut();
            let generation = self.ctx.generation();
            if cache.generation != generation {
                if !cache.is_empty() {
                    debug!(entries = cache.len(), "type generation changed; dropping resolver cache");
                }
                cache.clear();
                cache.generation = generation;
            }
            if let Some(hit) = cache.entries.get(&key) {
                let hit = hit.clone();
                cache.hits += 1;
                return hit;
            }
            cache.misses += 1;
        }
        let result = self.lookup(owner, lookup, is_static, tag).map(Rc::new);
        self.ctx
            .cache()
            .borrow_mut()
            .entries
            .insert(key, result.clone());
        result
    }

    fn lookup(
        &self,
        owner: &Ty,
        lookup: Lookup<'_>,
        is_static: bool,
        tag: Option<MemberKind>,
    ) -> Result<ResolvedStep, EngineError> {
        let desc = self
            .ctx
            .desc_for(owner)
            .ok_or_else(|| ResolutionError::UnknownType(owner.name().to_string()))?;
        let (index, member) = MemberKind::CASCADE
            .iter()
            .find_map(|kind| desc.find(lookup.name, *kind))
            .ok_or_else(|| ResolutionError::UnknownMember {
                ty: desc.name.clone(),
                member: lookup.name.to_string(),
            })?;
        let kind = member.kind();
        if let Some(expected) = tag {
            if kind != expected {
                return Err(ResolutionError::KindMismatch {
                    member: lookup.name.to_string(),
                    expected,
                    found: kind,
                }
                .into());
            }
        }
        if member.is_static() != is_static {
            return Err(ResolutionError::StaticMismatch {
                ty: desc.name.clone(),
                member: lookup.name.to_string(),
                is_static: member.is_static(),
            }
            .into());
        }
        if kind != MemberKind::Method && lookup.arity > 0 {
            return Err(EngineError::Arity {
                member: lookup.name.to_string(),
                expected: 0,
                given: lookup.arity,
            });
        }
        let generics = lookup
            .signature
            .map(|s| s.generics.clone())
            .unwrap_or_default();
        let (ty, pure, overload) = match member {
            MemberDesc::Event(_) => (Ty::Event, true, None),
            MemberDesc::Field(f) => (f.ty.clone(), true, None),
            MemberDesc::Property(p) => (p.ty.clone(), p.pure, None),
            MemberDesc::Method(m) => {
                let i = select_overload(m, lookup)?;
                let o = &m.overloads[i];
                let ty = match o.ret_generic {
                    Some(g) => generics.get(g).cloned().unwrap_or(Ty::Any),
                    None => o.ret.clone(),
                };
                (ty, o.pure, Some(i))
            }
        };
        Ok(ResolvedStep {
            owner: desc.clone(),
            member: index,
            kind,
            is_static,
            overload,
            generics,
            ty,
            pure,
        })
    }

    /// Resolve a whole path from a statically known root. Resolution stops
    /// early when an intermediate type is `any`; the returned steps are
    /// then shorter than the path (the rest is resolved at run time).
    pub fn resolve_path(
        &self,
        root: &Ty,
        is_static: bool,
        segments: &[Segment],
        tag: MemberKind,
    ) -> Result<Vec<Rc<ResolvedStep>>, EngineError> {
        if segments.is_empty() {
            return Err(EngineError::Structural("member path has no segments".into()));
        }
        let mut steps = Vec::with_capacity(segments.len());
        let mut owner = root.clone();
        for (i, seg) in segments.iter().enumerate() {
            if owner == Ty::Any {
                break;
            }
            let last = i + 1 == segments.len();
            let step = self.resolve_segment(&owner, seg.into(), is_static && i == 0, last.then_some(tag))?;
            owner = step.ty.clone();
            steps.push(step);
        }
        Ok(steps)
    }
}

/// Pick the overload named by the recorded signature. Without one, only a
/// lone non-generic overload is accepted.
fn select_overload(method: &MethodDesc, lookup: Lookup<'_>) -> Result<usize, EngineError> {
    let index = match lookup.signature {
        Some(sig) => method
            .overloads
            .iter()
            .position(|o| o.params == sig.params && o.generics == sig.generics.len()),
        None if method.overloads.len() == 1 && method.overloads[0].generics == 0 => Some(0),
        None => None,
    };
    let index = index.ok_or_else(|| EngineError::OverloadMismatch {
        member: method.name.clone(),
        recorded: lookup
            .signature
            .map(|s| s.to_string())
            .unwrap_or_else(|| "no recorded signature".to_string()),
        available: method
            .overloads
            .iter()
            .map(Overload::describe)
            .collect::<Vec<_>>()
            .join("; "),
    })?;
    let params = method.overloads[index].params.len();
    if params != lookup.arity {
        return Err(EngineError::Arity {
            member: method.name.clone(),
            expected: params,
            given: lookup.arity,
        });
    }
    Ok(index)
}

// ── Static typing ────────────────────────────────────────────────────────

/// Static view of a graph's references: types, resolved paths, purity.
pub struct TypeCx<'a> {
    resolver: Resolver<'a>,
    graph: &'a Graph,
    depth: usize,
    /// Producer errors read as `any` at the consumer.
    lenient: bool,
}

/// A statically resolved path: root type and the steps known before run time.
#[derive(Debug, Clone)]
pub struct StaticPath {
    pub root: Ty,
    pub is_static: bool,
    pub steps: Vec<Rc<ResolvedStep>>,
    /// Some segments could only be resolved at run time.
    pub dynamic: bool,
}

impl StaticPath {
    pub fn ty(&self) -> Ty {
        match (self.dynamic, self.steps.last()) {
            (false, Some(step)) => step.ty.clone(),
            _ => Ty::Any,
        }
    }
}

impl<'a> TypeCx<'a> {
    pub fn new(ctx: &'a EngineContext, graph: &'a Graph) -> Self {
        Self {
            resolver: ctx.resolver(),
            graph,
            depth: 0,
            lenient: false,
        }
    }

    /// A view that types a `NodeOutput` whose producer fails to check as
    /// `any`, so each failure is reported once, at the producer.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    pub fn resolver(&self) -> Resolver<'a> {
        self.resolver
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn self_type(&self) -> Ty {
        Ty::named(self.graph.name.clone())
    }

    pub fn path(&mut self, path: &MemberPath, tag: MemberKind) -> Result<StaticPath, EngineError> {
        let (root, is_static) = match &path.root {
            PathRoot::SelfInstance => (self.self_type(), false),
            PathRoot::Static { ty } => (ty.clone(), true),
            PathRoot::Value { source } => (self.ref_type(source)?, false),
        };
        let steps = self
            .resolver
            .resolve_path(&root, is_static, &path.segments, tag)?;
        Ok(StaticPath {
            dynamic: steps.len() < path.segments.len(),
            root,
            is_static,
            steps,
        })
    }

    pub fn ref_type(&mut self, r: &MemberReference) -> Result<Ty, EngineError> {
        match &r.target {
            Target::None => Err(ResolutionError::Unassigned.into()),
            Target::Literal { value } => Ok(value.runtime_ty()),
            Target::Variable { name } => self
                .graph
                .lookup_variable(r.scope, name)
                .map(|(_, decl)| decl.ty.clone())
                .ok_or_else(|| ResolutionError::UnknownVariable(name.clone()).into()),
            Target::Field { path } | Target::Property { path } | Target::Method { path } => {
                let tag = tag_of(&r.target).unwrap_or(MemberKind::Field);
                Ok(self.path(path, tag)?.ty())
            }
            Target::Type { ty } => {
                if self.resolver.context().type_exists(ty) {
                    Ok(Ty::Type)
                } else {
                    Err(ResolutionError::UnknownType(ty.to_string()).into())
                }
            }
            Target::NodeOutput { node, port } => self.output_type(*node, port),
            Target::SelfReference => Ok(self.self_type()),
        }
    }

    fn output_type(&mut self, node: NodeId, port: &str) -> Result<Ty, EngineError> {
        let graph = self.graph;
        let unknown = || ResolutionError::UnknownOutput {
            node,
            port: port.to_string(),
        };
        let producer = graph
            .behavior(node)
            .and_then(|b| b.as_value())
            .filter(|v| v.outputs().contains(&port))
            .ok_or_else(unknown)?;
        if self.depth > graph.nodes.len() {
            return Err(EngineError::ValueCycle(node));
        }
        self.depth += 1;
        let ty = producer.output_type(port, self);
        self.depth -= 1;
        match ty {
            Err(_) if self.lenient => Ok(Ty::Any),
            ty => ty,
        }
    }
}

impl TypeContext for TypeCx<'_> {
    fn ref_type(&mut self, reference: &MemberReference) -> Result<Ty, EngineError> {
        TypeCx::ref_type(self, reference)
    }

    fn type_exists(&self, ty: &Ty) -> bool {
        self.resolver.context().type_exists(ty)
    }
}

/// Edit-time operation: record the current static type of every reference
/// in `graph`. References that fail to resolve are left untouched. Returns
/// how many recorded types changed.
pub fn annotate_types(ctx: &EngineContext, graph: &mut Graph) -> usize {
    let mut computed: Vec<Option<Ty>> = Vec::new();
    {
        let mut cx = TypeCx::new(ctx, graph);
        for node in &graph.nodes {
            for (_, reference) in node.behavior.value_ports() {
                reference.visit(&mut |r| computed.push(cx.ref_type(r).ok()));
            }
        }
    }
    let mut computed = computed.into_iter();
    let mut changed = 0;
    for node in &mut graph.nodes {
        for reference in node.behavior.value_ports_mut() {
            reference.visit_mut(&mut |r| {
                if let Some(Some(ty)) = computed.next() {
                    if r.resolved_type.as_ref() != Some(&ty) {
                        r.resolved_type = Some(ty);
                        changed += 1;
                    }
                }
            });
        }
    }
    changed
}

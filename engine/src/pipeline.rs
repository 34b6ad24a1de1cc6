// pipeline.rs — Compilation passes and their orchestration
//
// Declares the three compile passes (validate, check, emit), their
// dependency edges, and runs the minimal prefix needed for a terminal pass.
// Diagnostics are accumulated across passes; the run stops after the first
// pass that reports an error, since later passes assume the earlier ones'
// postconditions.
//
// Preconditions: none on the graph; the context holds the host types the
//   graph refers to.
// Postconditions: `state.unit` is set iff the emit pass ran without errors.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: registers the graph's proxy type in the context; calls
//   `on_pass_complete` after each pass for immediate display.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::diag::{self, Diagnostic};
use crate::emit::{CompiledUnit, EmitOptions};
use crate::facade::EngineContext;
use crate::graph::Graph;

// ── Pass descriptors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Validate,
    Check,
    Emit,
}

/// Static metadata about a pass.
pub struct PassDescriptor {
    pub name: &'static str,
    /// Passes whose postconditions this pass relies on.
    pub inputs: &'static [PassId],
    /// Documentation only.
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[],
            invariants: "arena dense, ports in range, no flow or value cycles",
        },
        PassId::Check => PassDescriptor {
            name: "check",
            inputs: &[PassId::Validate],
            invariants: "every reference resolves and every use is well typed",
        },
        PassId::Emit => PassDescriptor {
            name: "emit",
            inputs: &[PassId::Check],
            invariants: "unit text and debug map are deterministic",
        },
    }
}

pub const ALL_PASSES: [PassId; 3] = [PassId::Validate, PassId::Check, PassId::Emit];

/// Passes needed to run `terminal`, in execution order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── State ────────────────────────────────────────────────────────────────

pub struct CompilationState<'g> {
    pub graph: &'g Graph,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub unit: Option<CompiledUnit>,
}

impl<'g> CompilationState<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            diagnostics: Vec::new(),
            has_error: false,
            unit: None,
        }
    }
}

/// The named pass reported at least one error. The diagnostics themselves
/// are in `CompilationState::diagnostics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{} pass failed", descriptor(*.failing_pass).name)]
pub struct PipelineError {
    pub failing_pass: PassId,
}

fn finish_pass(
    state: &mut CompilationState<'_>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = diag::has_errors(&diags);
    debug!(
        pass = descriptor(pass_id).name,
        ms = elapsed.as_secs_f64() * 1000.0,
        diagnostics = diags.len(),
        "pass complete"
    );
    state.diagnostics.extend(diags);
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Runner ───────────────────────────────────────────────────────────────

/// Run the passes needed to produce `terminal`.
pub fn run_pipeline(
    ctx: &EngineContext,
    state: &mut CompilationState<'_>,
    terminal: PassId,
    options: &EmitOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let graph = state.graph;
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Validate => crate::graph::validate::validate(graph),
            PassId::Check => {
                ctx.register_graph(graph);
                crate::check::check(ctx, graph)
            }
            PassId::Emit => {
                let result = crate::emit::emit(ctx, graph, options);
                state.unit = result.unit;
                result.diagnostics
            }
        };
        finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
    }
    info!(
        graph = %graph.name,
        terminal = descriptor(terminal).name,
        warnings = state.diagnostics.len(),
        "pipeline complete"
    );
    Ok(())
}

/// Outcome of a full compile.
#[derive(Debug)]
pub struct CompileResult {
    pub unit: Option<CompiledUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Validate, check and emit `graph`.
pub fn compile(ctx: &EngineContext, graph: &Graph, options: &EmitOptions) -> CompileResult {
    let mut state = CompilationState::new(graph);
    // The error, if any, is already in the diagnostics.
    let _ = run_pipeline(ctx, &mut state, PassId::Emit, options, |_, _| {});
    CompileResult {
        unit: state.unit,
        diagnostics: state.diagnostics,
    }
}

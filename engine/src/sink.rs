// sink.rs — Loading emitted units
//
// A compile sink takes the emitter's output and makes it runnable. The
// script sink parses and lowers the unit, then registers the graph's native
// type (its visible variables and handled events) so the façade prefers it
// over the proxy synthesized from graph data.
//
// Preconditions: `unit.source` was produced by the emitter, or follows the
//   same grammar.
// Postconditions: on success the native type is registered under the unit's
//   name with the unit's fingerprint.
// Failure modes: lex/parse errors, lowering errors, a unit whose declared
//   name differs from the compiled unit's name. All map to E0500.
// Side effects: registers a native type in the context.

use thiserror::Error;
use tracing::debug;

use crate::diag::{codes, Diagnostic, Location};
use crate::emit::debug_map::DebugMap;
use crate::emit::CompiledUnit;
use crate::facade::EngineContext;
use crate::host::{TypeDesc, TypeOrigin};
use crate::script::lower::{lower, LowerError, Program};
use crate::script::parser::parse;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("unit '{unit}' failed to parse: {}", .errors.join("; "))]
    Parse { unit: String, errors: Vec<String> },
    #[error("unit '{unit}' failed to lower: {}", join_lower(.errors))]
    Lower {
        unit: String,
        errors: Vec<LowerError>,
    },
    #[error("unit declares name '{declared}' but was compiled as '{expected}'")]
    NameMismatch { declared: String, expected: String },
}

fn join_lower(errors: &[LowerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SinkError {
    /// One E0500 diagnostic per underlying problem.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        let (unit, messages): (&str, Vec<String>) = match self {
            SinkError::Parse { unit, errors } => (unit, errors.clone()),
            SinkError::Lower { unit, errors } => (unit, errors.iter().map(ToString::to_string).collect()),
            SinkError::NameMismatch { expected, .. } => (expected, vec![self.to_string()]),
        };
        messages
            .into_iter()
            .map(|m| {
                Diagnostic::error(Location::default(), m)
                    .with_code(codes::E0500)
                    .with_cause(format!("loading unit '{unit}'"), None)
            })
            .collect()
    }
}

/// A unit ready to run on the script VM.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub program: Program,
    pub debug_map: DebugMap,
    pub fingerprint: String,
}

impl LoadedUnit {
    pub fn name(&self) -> &str {
        &self.program.name
    }

    /// Native type of the unit: visible variables as fields, handled events.
    pub fn native_type(&self) -> TypeDesc {
        let mut desc = TypeDesc::new(self.program.name.clone(), TypeOrigin::GraphNative);
        for var in self.program.vars.iter().filter(|v| !v.is_hidden()) {
            desc = desc.field(&var.name, var.ty.clone(), var.init.clone());
        }
        for event in self.program.events() {
            desc = desc.event(event, false);
        }
        desc
    }
}

pub trait CompileSink {
    fn load(&self, ctx: &EngineContext, unit: &CompiledUnit) -> Result<LoadedUnit, SinkError>;
}

/// Parses, lowers and registers script units.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptSink;

impl CompileSink for ScriptSink {
    fn load(&self, ctx: &EngineContext, unit: &CompiledUnit) -> Result<LoadedUnit, SinkError> {
        let parsed = parse(&unit.source);
        let ast = match parsed.unit {
            Some(ast) if parsed.errors.is_empty() => ast,
            _ => {
                return Err(SinkError::Parse {
                    unit: unit.name.clone(),
                    errors: parsed.errors.iter().map(|e| e.to_string()).collect(),
                })
            }
        };
        if ast.name.name != unit.name {
            return Err(SinkError::NameMismatch {
                declared: ast.name.name,
                expected: unit.name.clone(),
            });
        }
        let program = lower(&unit.source, &ast).map_err(|errors| SinkError::Lower {
            unit: unit.name.clone(),
            errors,
        })?;
        let loaded = LoadedUnit {
            program,
            debug_map: unit.debug_map.clone(),
            fingerprint: unit.fingerprint.clone(),
        };
        ctx.register_native(loaded.native_type(), loaded.fingerprint.clone());
        debug!(
            unit = %unit.name,
            functions = loaded.program.functions.len(),
            "unit loaded"
        );
        Ok(loaded)
    }
}

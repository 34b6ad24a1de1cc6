// exec.rs — Common driving interface of both backends
//
// The reflection interpreter and the script VM are driven the same way: an
// event fires matching handlers, ticks resume suspended fibers, and the
// observable state (variables, effect trace, diagnostics) is read back the
// same way. Parity tests compare executions only through this trait.

use std::collections::BTreeMap;

use crate::diag::Diagnostic;
use crate::error::EngineError;
use crate::host::HostState;
use crate::sched::HostScheduler;
use crate::value::Value;

pub trait Execution {
    /// Fire every handler of `event` in declaration order. Returns how many
    /// ran; an unknown event fires none. Node failures become diagnostics;
    /// an error here means the execution could not start at all.
    fn trigger(&mut self, event: &str, sched: &mut dyn HostScheduler) -> Result<usize, EngineError>;
    /// Resume the fibers suspended when the tick starts.
    fn tick(&mut self, sched: &mut dyn HostScheduler);
    /// Current value of every visible graph variable, keyed by slot name.
    fn variables(&self) -> BTreeMap<String, Value>;
    fn trace(&self) -> &[String];
    fn diagnostics(&self) -> &[Diagnostic];
    /// No fiber is suspended.
    fn is_idle(&self) -> bool;
}

/// Slot values of the graph instance `this`, for the named slots.
pub(crate) fn slot_values(
    host: &HostState,
    this: &Value,
    slots: impl Iterator<Item = String>,
) -> BTreeMap<String, Value> {
    let object = this.as_object().and_then(|id| host.heap.get(id).ok());
    slots
        .map(|name| {
            let value = object
                .and_then(|o| o.fields.get(&name))
                .cloned()
                .unwrap_or(Value::Null);
            (name, value)
        })
        .collect()
}

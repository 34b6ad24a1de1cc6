// id.rs — Stable identifiers for graph entities and runtime handles
//
// Node and scope ids are persisted with the graph and index its dense
// arenas. Fiber and suspension ids are runtime-only and allocated in
// creation order so tick processing is deterministic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a node; equal to its index in `Graph::nodes`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Stable identifier for a variable scope; scope 0 is the graph root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ScopeId(pub u32);

/// Identifier for an independently suspended execution (interpreter or VM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(pub u32);

/// Handle passed to the host scheduler for one pending suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuspensionHandle(pub u64);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Allocator for runtime ids. Produces monotonically increasing ids in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_fiber: u32,
    next_suspension: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_fiber(&mut self) -> FiberId {
        let id = FiberId(self.next_fiber);
        self.next_fiber += 1;
        id
    }

    pub fn alloc_suspension(&mut self) -> SuspensionHandle {
        let id = SuspensionHandle(self.next_suspension);
        self.next_suspension += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_fiber(), FiberId(0));
        assert_eq!(ids.alloc_fiber(), FiberId(1));
        assert_eq!(ids.alloc_suspension(), SuspensionHandle(0));
        assert_eq!(ids.alloc_fiber(), FiberId(2));
    }

    #[test]
    fn node_id_is_transparent_in_json() {
        let json = serde_json::to_string(&NodeId(7)).unwrap();
        assert_eq!(json, "7");
        assert_eq!(NodeId(7).to_string(), "n7");
    }
}

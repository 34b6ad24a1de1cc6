// emit/debug_map.rs — (line, column) → node mapping of an emitted unit
//
// Every statement the emitter writes on behalf of a node is recorded at its
// first column. Faults raised by compiled code carry the position of the
// statement that raised them; `locate` maps that back to a node, falling back
// to the nearest preceding entry for positions inside multi-line constructs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub line: u32,
    pub col: u32,
    pub node: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugMap {
    entries: BTreeMap<(u32, u32), NodeId>,
}

impl DebugMap {
    pub fn insert(&mut self, line: u32, col: u32, node: NodeId) {
        self.entries.insert((line, col), node);
    }

    pub fn exact(&self, line: u32, col: u32) -> Option<NodeId> {
        self.entries.get(&(line, col)).copied()
    }

    pub fn locate(&self, line: u32, col: u32) -> Option<NodeId> {
        self.exact(line, col)
            .or_else(|| self.entries.range(..=(line, col)).next_back().map(|(_, n)| *n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<DebugEntry> {
        self.entries
            .iter()
            .map(|(&(line, col), &node)| DebugEntry { line, col, node })
            .collect()
    }

    /// All positions mapped to `node`, in source order.
    pub fn positions_of(&self, node: NodeId) -> Vec<(u32, u32)> {
        self.entries
            .iter()
            .filter(|(_, n)| **n == node)
            .map(|(pos, _)| *pos)
            .collect()
    }
}

impl Serialize for DebugMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DebugMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<DebugEntry>::deserialize(deserializer)?;
        Ok(Self {
            entries: entries.into_iter().map(|e| ((e.line, e.col), e.node)).collect(),
        })
    }
}

//! The native-callee table.
//!
//! `CallBuiltin` names its callee by a [`BuiltinId`](crate::ir::BuiltinId)
//! rather than an SSA value — the native function pointer lives in a table
//! the host owns, not in the IR. PIR never resolves or calls through a
//! `BuiltinId` itself; it only stores and compares them. The table below is
//! a placeholder the driver populates from whatever front-end supplies it,
//! kept here so passes have something to query for display purposes
//! (`dump`) without depending on the host's actual function-pointer type.

use pir_index::IndexVec;

use crate::ir::BuiltinId;

/// One entry in the builtin table: a display name plus whatever opaque
/// payload the host associates with this native callee. PIR treats `payload`
/// as inert bytes — it exists only so a front-end building a `BuiltinTable`
/// has somewhere to stash its own handle alongside the display name.
#[derive(Clone, Debug)]
pub struct BuiltinEntry {
    pub name: String,
}

#[derive(Default)]
pub struct BuiltinTable {
    entries: IndexVec<BuiltinId, BuiltinEntry>,
}

impl BuiltinTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>) -> BuiltinId {
        self.entries.push(BuiltinEntry { name: name.into() })
    }

    pub fn name(&self, id: BuiltinId) -> &str {
        &self.entries[id].name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pir_index::Idx;

    #[test]
    fn register_then_lookup() {
        let mut t = BuiltinTable::new();
        let id = t.register("vector.subset");
        assert_eq!(t.name(id), "vector.subset");
        assert_eq!(id, BuiltinId::new(0));
    }
}

//! Module-scoped string interning for variable/formal names.
//!
//! Per the "Global mutable state" design note: the only process-lifetime
//! globals are the `Nil`/`Missing` singletons (see [`crate::ir::value`]);
//! everything else, including the symbol table, is scoped to a [`Module`]
//! rather than kept behind a global static.
//!
//! [`Module`]: crate::ir::Module

use std::collections::HashMap;

use pir_index::{newtype_index, IndexVec};

newtype_index!(pub struct SymbolId { .. });

#[derive(Default)]
pub struct Interner {
    names: IndexVec<SymbolId, Box<str>>,
    lookup: HashMap<Box<str>, SymbolId>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = self.names.push(name.into());
        self.lookup.insert(name.into(), id);
        id
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.names[id]
    }
}

// Two symbols from different interners must never be compared; within a
// single `Module` equality of `SymbolId` is equality of the underlying
// string. Use `Interner::resolve` to get the name back for display.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups() {
        let mut i = Interner::new();
        let a = i.intern("x");
        let b = i.intern("x");
        let c = i.intern("y");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(i.resolve(a), "x");
    }
}

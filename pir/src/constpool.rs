//! The constant pool: constant/source pools are opaque
//! integer-keyed tables provided by the host; PIR only stores indices.
//!
//! `LdConst` carries a [`ConstId`](crate::ir::ConstId) rather than an
//! embedded literal. The host's actual value representation — a boxed R
//! object, a source reference, whatever — never appears in this crate;
//! [`ConstPool`] exists only so the driver and `dump` have something
//! concrete to resolve a `ConstId` against for display, and so tests can
//! construct constants without a real host.

use pir_index::IndexVec;

use crate::ir::ConstId;

/// One constant's host-opaque payload, reduced to whatever a test or the
/// textual front end needs to print or compare it by — the host's real
/// object representation is out of scope (§1's Non-goals: "managing the
/// host's garbage-collected values, treated as opaque handles").
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Integer(i64),
    Logical(bool),
    Symbol(String),
    Opaque(String),
}

#[derive(Default)]
pub struct ConstPool {
    values: IndexVec<ConstId, ConstValue>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: ConstValue) -> ConstId {
        self.values.push(value)
    }

    pub fn get(&self, id: ConstId) -> &ConstValue {
        &self.values[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_then_get() {
        let mut pool = ConstPool::new();
        let id = pool.intern(ConstValue::Integer(3));
        assert_eq!(pool.get(id), &ConstValue::Integer(3));
    }
}

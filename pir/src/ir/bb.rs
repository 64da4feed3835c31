use super::value::{BBId, InstrId};

/// A basic block: a dense id within its owning `CodeBody`, an ordered
/// instruction list, and the successor edges the terminator (if any)
/// implies.
///
/// Invariants enforced by the verifier (`crate::verify`), not by this
/// struct's constructors, since passes build blocks up incrementally:
/// (i) only the last instruction may be a terminator; (ii) `Branch` implies
/// both `next0` and `next1` set; (iii) `Return` implies neither set;
/// (iv) otherwise `next0` is set (fallthrough) and `next1` is `None`.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub instrs: Vec<InstrId>,
    pub next0: Option<BBId>,
    pub next1: Option<BBId>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn successors(&self) -> impl Iterator<Item = BBId> {
        self.next0.into_iter().chain(self.next1)
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

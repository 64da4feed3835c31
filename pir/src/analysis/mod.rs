//! The generic abstract-interpretation framework.
//!
//! A fixed-point solver over a user-supplied abstract state `S`, following
//! the "Abstract-interpretation framework" design note: parameterised by
//! two traits (a state supporting clone and monotone merge-returning-
//! changed, and a transfer function over `(state, instr)`), owning the
//! per-block state array itself and growing it monotonically as new BB ids
//! appear. The worklist is implicit: one full reachable-BBs sweep per
//! iteration, repeated until a sweep changes nothing.

use pir_index::IndexVec;

use crate::cfg;
use crate::ir::{BBId, CodeBody, InstrId};

pub mod scope;

/// A lattice element: must support deep copy ([`Clone`]) and a monotone,
/// in-place join that reports whether it changed anything (§8's "Scope
/// analysis monotonicity": `merge` must return `true` only when the result
/// actually differs from the prior state).
pub trait AnalysisState: Clone {
    fn merge(&mut self, other: &Self) -> bool;
}

/// The transfer function a concrete analysis (scope analysis, or any future
/// one built on this framework) supplies.
pub trait Transfer {
    type State: AnalysisState;

    /// The state flowing into the entry block before any instruction runs.
    fn entry_state(&self) -> Self::State;

    /// Applies the effect of one instruction to `state`, in place, in the
    /// order instructions appear in their block.
    fn apply(&mut self, state: &mut Self::State, body: &CodeBody, instr_id: InstrId);
}

/// The stabilised result of a [`solve`] run: the state flowing into every
/// reachable block, and the joined state at every exit (a block with no
/// successors).
pub struct Solution<S: AnalysisState> {
    pub in_states: IndexVec<BBId, Option<S>>,
    pub exit: Option<S>,
}

impl<S: AnalysisState> Solution<S> {
    pub fn entry_of(&self, bb: BBId) -> Option<&S> {
        self.in_states.get(bb).and_then(|s| s.as_ref())
    }
}

/// Runs `transfer` to a fixed point over every block reachable from `entry`.
/// Requires `transfer`'s state lattice to have finite ascending chains —
/// scope analysis's "unknown" top provides this, as the design note
/// requires.
pub fn solve<T: Transfer>(body: &CodeBody, entry: BBId, transfer: &mut T) -> Solution<T::State> {
    let reachable = cfg::reachable(body, entry);
    let mut in_states: IndexVec<BBId, Option<T::State>> = IndexVec::from_elem_n(None, body.blocks.len());
    let mut exit: Option<T::State> = None;

    in_states[entry] = Some(transfer.entry_state());

    loop {
        let mut changed = false;
        for &bb in &reachable {
            let Some(seed) = in_states[bb].clone() else { continue };
            let mut local = seed;
            for &instr_id in &body.blocks[bb].instrs {
                transfer.apply(&mut local, body, instr_id);
            }
            let successors: Vec<BBId> = body.blocks[bb].successors().collect();
            if successors.is_empty() {
                changed |= merge_into(&mut exit, &local);
            } else {
                for succ in successors {
                    changed |= merge_into(&mut in_states[succ], &local);
                }
            }
        }
        if !changed {
            break;
        }
    }

    Solution { in_states, exit }
}

fn merge_into<S: AnalysisState>(slot: &mut Option<S>, incoming: &S) -> bool {
    match slot {
        Some(existing) => existing.merge(incoming),
        None => {
            *slot = Some(incoming.clone());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, Value};
    use crate::ty::PirType;

    #[derive(Clone, PartialEq, Debug)]
    struct Count(u32);

    impl AnalysisState for Count {
        fn merge(&mut self, other: &Self) -> bool {
            if other.0 > self.0 {
                self.0 = other.0;
                true
            } else {
                false
            }
        }
    }

    struct CountLoads;

    impl Transfer for CountLoads {
        type State = Count;
        fn entry_state(&self) -> Count {
            Count(0)
        }
        fn apply(&mut self, state: &mut Count, body: &CodeBody, instr_id: InstrId) {
            if body.instrs[instr_id].kind.is_load() {
                state.0 += 1;
            }
        }
    }

    #[test]
    fn single_block_counts_loads() {
        let env = Value::Env(pir_index::Idx::new(0));
        let mut body = CodeBody::new(env);
        body.push_instr(body.entry, InstrKind::LdVar { name: pir_index::Idx::new(0), env }, PirType::any());
        body.push_instr(body.entry, InstrKind::LdArg { index: 0, env }, PirType::any());
        body.push_instr(body.entry, InstrKind::Return(Value::Nil), PirType::voyd());
        let sol = solve(&body, body.entry, &mut CountLoads);
        assert_eq!(sol.exit, Some(Count(2)));
    }

    #[test]
    fn diamond_takes_the_max_on_the_merge_lattice() {
        let env = Value::Env(pir_index::Idx::new(0));
        let mut body = CodeBody::new(env);
        let left = body.create_bb();
        let right = body.create_bb();
        let join = body.create_bb();
        let test = body.push_instr(body.entry, InstrKind::AsTest(Value::Nil), PirType::test());
        let mut b = crate::ir::Builder::at(&mut body, body.entry);
        b.branch(Value::Instr(test), left, right);
        b.set_cursor(left);
        b.emit(InstrKind::LdArg { index: 0, env }, PirType::any());
        b.next(join);
        b.set_cursor(right);
        b.next(join);
        b.set_cursor(join);
        b.ret(Value::Nil);
        let sol = solve(&body, body.entry, &mut CountLoads);
        assert_eq!(sol.exit, Some(Count(1)));
    }
}

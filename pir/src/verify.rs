//! Structural and type verification.
//!
//! Runs after the builder (or any pass) produces a `CodeBody` and before a
//! pass that assumes well-typedness (scope analysis, the inliner) consumes
//! it. A verifier failure names
//! the instruction, operand, observed type and expected type rather than
//! panicking, since the driver may choose to abort the pipeline or emit the
//! un-optimised function instead.

use crate::cfg;
use crate::ir::{BBId, CodeBody, InstrId, InstrKind};
use crate::ty::PirType;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VerifierError {
    #[error("{instr:?} argument {operand_index} has type {observed:?}, not a subtype of declared {expected:?}")]
    TypeMismatch { instr: InstrId, operand_index: usize, observed: PirType, expected: PirType },
    #[error("{instr:?} argument {operand_index} is produced in {producer_bb:?}, which is not reachable from the entry block")]
    UnreachableProducer { instr: InstrId, operand_index: usize, producer_bb: BBId },
    #[error("block {bb:?} has a non-terminal instruction {instr:?} in terminator position")]
    MisplacedTerminator { bb: BBId, instr: InstrId },
    #[error("block {bb:?} ends with Branch but its operand has type {observed:?}, not {expected:?}", expected = PirType::test())]
    BranchOperandNotTest { bb: BBId, observed: PirType },
    #[error("block {bb:?} terminates with Branch but has {successors} successor edge(s), expected 2")]
    BranchArity { bb: BBId, successors: usize },
    #[error("block {bb:?} terminates with Return but has {successors} successor edge(s), expected 0")]
    ReturnArity { bb: BBId, successors: usize },
    #[error("block {bb:?} has no terminator but has {successors} successor edge(s), expected exactly 1 (next0 set, next1 unset)")]
    FallthroughArity { bb: BBId, successors: usize },
    #[error("Phi {instr:?} in block {bb:?} has {got} input(s), expected one per predecessor ({want})")]
    PhiArity { bb: BBId, instr: InstrId, want: usize, got: usize },
}

/// Verifies every block reachable from `body.entry`. Returns every violation
/// found rather than stopping at the first one, so a single run reports the
/// full picture (matching §7's "structured report" framing).
pub fn verify(body: &CodeBody) -> Result<(), Vec<VerifierError>> {
    let mut errors = Vec::new();
    let reachable = cfg::reachable(body, body.entry);
    let preds = cfg::Predecessors::compute(body, body.entry);

    for &bb in &reachable {
        check_terminator_discipline(body, bb, &mut errors);
        let block = &body.blocks[bb];
        for (pos, &instr_id) in block.instrs.iter().enumerate() {
            let is_last = pos + 1 == block.instrs.len();
            let kind = &body.instrs[instr_id].kind;
            if kind.is_terminator() && !is_last {
                errors.push(VerifierError::MisplacedTerminator { bb, instr: instr_id });
            }

            if let InstrKind::Phi(inputs) = kind {
                let want = preds.of(bb).len();
                if inputs.len() != want {
                    errors.push(VerifierError::PhiArity { bb, instr: instr_id, want, got: inputs.len() });
                }
            }

            check_operands(body, instr_id, &reachable, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_terminator_discipline(body: &CodeBody, bb: BBId, errors: &mut Vec<VerifierError>) {
    let block = &body.blocks[bb];
    let successors = block.successors().count();
    let terminator = block.instrs.last().map(|&id| &body.instrs[id].kind);

    match terminator {
        Some(InstrKind::Branch(v)) => {
            if successors != 2 {
                errors.push(VerifierError::BranchArity { bb, successors });
            }
            let observed = body.value_ty(*v);
            if observed != PirType::test() {
                errors.push(VerifierError::BranchOperandNotTest { bb, observed });
            }
        }
        Some(InstrKind::Return(_)) => {
            if successors != 0 {
                errors.push(VerifierError::ReturnArity { bb, successors });
            }
        }
        _ => {
            if successors != 1 || block.next1.is_some() {
                errors.push(VerifierError::FallthroughArity { bb, successors });
            }
        }
    }
}

fn check_operands(body: &CodeBody, instr_id: InstrId, reachable: &[BBId], errors: &mut Vec<VerifierError>) {
    let is_phi = matches!(body.instrs[instr_id].kind, InstrKind::Phi(_));
    let mut kind = body.instrs[instr_id].kind.clone();
    let mut operand_index = 0;
    kind.for_each_operand_mut(|v, declared| {
        // Phi inputs are aligned with predecessor edges, not dominance —
        // §8's invariant carves this case out explicitly.
        if !is_phi {
            let observed = body.value_ty(*v);
            if !observed.subtype(&declared) {
                errors.push(VerifierError::TypeMismatch { instr: instr_id, operand_index, observed, expected: declared });
            }
        }
        if let Some(producer_bb) = cfg::producer_bb(body, *v) {
            if !reachable.contains(&producer_bb) {
                errors.push(VerifierError::UnreachableProducer { instr: instr_id, operand_index, producer_bb });
            }
        }
        operand_index += 1;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, ConstId, EnvId, Value};

    fn leaf_body() -> CodeBody {
        CodeBody::new(Value::Env(EnvId::new(0)))
    }

    #[test]
    fn well_typed_return_passes() {
        let mut body = leaf_body();
        let c = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(c)), PirType::voyd());
        assert!(verify(&body).is_ok());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut body = leaf_body();
        let lazy = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::any());
        body.push_instr(body.entry, InstrKind::Unop(crate::ir::UnOp::Neg, Value::Instr(lazy)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Nil), PirType::voyd());
        let errs = verify(&body).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, VerifierError::TypeMismatch { .. })));
    }

    #[test]
    fn branch_without_two_successors_is_reported() {
        let mut body = leaf_body();
        let t = body.push_instr(body.entry, InstrKind::AsTest(Value::Nil), PirType::test());
        // `AsTest` of `Nil` is itself a type error (Nil isn't `logical`),
        // but we only care about branch arity here, so seed `t` with a
        // correct declared-subtype chain via a direct push instead.
        let _ = t;
        let test_val = body.push_instr(body.entry, InstrKind::Binop(BinOp::Eq, Value::Nil, Value::Nil), PirType::logical());
        let as_test = body.push_instr(body.entry, InstrKind::AsTest(Value::Instr(test_val)), PirType::test());
        body.push_instr(body.entry, InstrKind::Branch(Value::Instr(as_test)), PirType::voyd());
        // next1 deliberately left unset: only one successor wired.
        body.blocks[body.entry].next0 = Some(body.entry);
        let errs = verify(&body).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, VerifierError::BranchArity { .. })));
    }

    #[test]
    fn phi_arity_mismatch_is_reported() {
        let mut body = leaf_body();
        let b1 = body.create_bb();
        body.blocks[body.entry].next0 = Some(b1);
        // Two predecessors reaching `b1` would normally require a diamond;
        // here we just assert a Phi with zero inputs against one
        // predecessor is flagged.
        let phi = body.push_instr(b1, InstrKind::Phi(vec![]), PirType::bottom());
        body.push_instr(b1, InstrKind::Return(Value::Instr(phi)), PirType::voyd());
        let errs = verify(&body).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, VerifierError::PhiArity { .. })));
    }
}

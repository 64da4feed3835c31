//! Cast insertion: restores well-typedness after a pass
//! (or the front-end) has produced operands whose actual type doesn't
//! match the instruction's declared argument type.

use crate::ir::{BBId, CodeBody, InstrId, InstrKind, Value};
use crate::ty::PirType;

/// A capability gap: the cast inserter was asked to bridge a type
/// mismatch it has no rule for. Fatal for the enclosing Function only.
#[derive(Debug, thiserror::Error)]
#[error("cannot cast {from:?} to satisfy declared type {to:?}")]
pub struct CastError {
    pub from: PirType,
    pub to: PirType,
}

/// Walks every block of `body` and, for every instruction argument whose
/// producer type is not a subtype of the declared type, prepends an
/// explicit cast and retargets the argument. Phi result types are
/// recomputed as the join of their inputs before their own uses are
/// rewritten by a caller, as required by §4.3.
pub fn insert_casts(body: &mut CodeBody) -> Result<(), CastError> {
    let bb_ids: Vec<_> = body.blocks.indices().collect();
    for bb in bb_ids {
        let mut pos = 0;
        while pos < body.blocks[bb].instrs.len() {
            let instr_id = body.blocks[bb].instrs[pos];
            let mut kind = body.instrs[instr_id].kind.clone();
            let mut prelude = Vec::new();
            let mut err = None;
            kind.for_each_operand_mut(|v, declared| {
                if err.is_some() {
                    return;
                }
                match cast_chain(body, bb, *v, declared, &mut prelude) {
                    Ok(new_v) => *v = new_v,
                    Err(e) => err = Some(e),
                }
            });
            if let Some(e) = err {
                return Err(e);
            }
            body.instrs[instr_id].kind = kind;

            if matches!(body.instrs[instr_id].kind, InstrKind::Phi(_)) {
                recompute_phi_type(body, instr_id);
            }

            // Splice the prelude casts in before `instr_id`, then skip
            // past them (they are already well-typed, being casts
            // themselves, so re-scanning them is wasted work, not wrong).
            let n = prelude.len();
            for (i, id) in prelude.into_iter().enumerate() {
                body.blocks[bb].instrs.insert(pos + i, id);
            }
            pos += n + 1;
        }
    }
    Ok(())
}

/// Repeatedly inserts casts — emitted into `bb`, immediately before the
/// instruction currently being processed — in front of `v` until its type
/// satisfies `declared`, per the three rules of §4.3. Each inserted cast's
/// id is appended to `prelude` in emission order.
fn cast_chain(
    body: &mut CodeBody,
    bb: BBId,
    mut v: Value,
    declared: PirType,
    prelude: &mut Vec<InstrId>,
) -> Result<Value, CastError> {
    loop {
        let actual = body.value_ty(v);
        if actual.subtype(&declared) {
            return Ok(v);
        }
        let PirType::RKind { kinds, maybe_lazy, maybe_missing } = actual else {
            // A native-side actual type failing its (necessarily
            // native-side) declared subtype check: no cast rule applies.
            return Err(CastError { from: actual, to: declared });
        };
        let (kind, result_ty) = if maybe_lazy && !declared.maybe_lazy() {
            (InstrKind::Force(v), PirType::RKind { kinds, maybe_lazy: false, maybe_missing })
        } else if maybe_missing && !declared.maybe_missing() {
            (InstrKind::ChkMissing(v), PirType::RKind { kinds, maybe_lazy, maybe_missing: false })
        } else if actual == PirType::logical() && declared == PirType::test() {
            (InstrKind::AsTest(v), PirType::test())
        } else {
            return Err(CastError { from: actual, to: declared });
        };
        let id = body.push_instr_detached(bb, kind, result_ty);
        prelude.push(id);
        v = Value::Instr(id);
    }
}

fn recompute_phi_type(body: &mut CodeBody, phi_id: InstrId) {
    let inputs = match &body.instrs[phi_id].kind {
        InstrKind::Phi(inputs) => inputs.clone(),
        _ => return,
    };
    let ty = inputs.iter().fold(PirType::bottom(), |acc, v| acc.join(body.value_ty(*v)));
    body.instrs[phi_id].result_ty = ty;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstId, EnvId, Value};
    use pir_index::Idx;

    fn setup() -> CodeBody {
        CodeBody::new(Value::Env(EnvId::new(0)))
    }

    #[test]
    fn force_then_chk_missing_chain() {
        let mut body = setup();
        let lazy_missing = body.push_instr(
            body.entry,
            InstrKind::LdConst(ConstId::new(0)),
            PirType::any(),
        );
        let user = body.push_instr(body.entry, InstrKind::Unop(crate::ir::UnOp::Neg, Value::Instr(lazy_missing)), PirType::val());
        let before_len = body.blocks[body.entry].instrs.len();
        insert_casts(&mut body).unwrap();
        // Force then ChkMissing should have been prepended before `user`,
        // each appearing exactly once — not once spliced in and once
        // appended again at the end of the block.
        let instrs = &body.blocks[body.entry].instrs;
        assert_eq!(instrs.len(), before_len + 2, "each cast must appear exactly once in the block");
        let pos = instrs.iter().position(|&i| i == user).unwrap();
        assert!(pos >= 2, "expected at least 2 casts before the consuming instruction");
        assert!(matches!(body.instrs[instrs[pos - 2]].kind, InstrKind::Force(_)));
        assert!(matches!(body.instrs[instrs[pos - 1]].kind, InstrKind::ChkMissing(_)));
        assert_eq!(pos, instrs.len() - 1, "the consumer must be the last instruction in the block, no duplicate casts after it");
    }

    #[test]
    fn idempotent_on_already_typed_graph() {
        let mut body = setup();
        let c = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(c)), PirType::voyd());
        insert_casts(&mut body).unwrap();
        let before = body.blocks[body.entry].instrs.len();
        insert_casts(&mut body).unwrap();
        assert_eq!(body.blocks[body.entry].instrs.len(), before);
    }
}

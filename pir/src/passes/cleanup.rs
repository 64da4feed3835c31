//! Instruction-level dead code elimination and redundant-check
//! simplification, Promise GC, and CFG compaction, run twice per
//! invocation so a chain of each kind converges within one call (the
//! outer pipeline's fixed point catches anything left over across
//! passes).

use std::collections::{HashMap, HashSet};

use pir_index::{IndexVec, Idx};

use crate::cfg;
use crate::ir::{BBId, CodeBody, Function, InstrId, InstrKind, Promise, PromiseId, Value};
use crate::ty::PirType;

pub struct Cleanup;

impl Default for Cleanup {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleanup {
    pub fn new() -> Self {
        Cleanup
    }

    /// Runs on `function`'s own body only — promise bodies are each their
    /// own Code unit and are cleaned up independently wherever they end up
    /// spliced, matching this pass's single entry-block walk per call.
    pub fn apply(&self, function: &mut Function) -> bool {
        let mut changed = self.run_once(function);
        changed |= self.run_once(function);
        changed
    }

    fn run_once(&self, function: &mut Function) -> bool {
        let mut changed = cleanup_instructions(&mut function.body);
        changed |= gc_promises(function);
        changed |= compact_cfg(&mut function.body);
        renumber(&mut function.body);
        changed
    }
}

fn cleanup_instructions(body: &mut CodeBody) -> bool {
    let mut changed = false;
    let mut used: HashSet<InstrId> = HashSet::new();
    for bb in cfg::reachable(body, body.entry) {
        for &id in &body.blocks[bb].instrs {
            for op in body.instrs[id].kind.operands() {
                if let Value::Instr(u) = op {
                    used.insert(u);
                }
            }
        }
    }

    for bb in cfg::reachable(body, body.entry) {
        let ids: Vec<InstrId> = body.blocks[bb].instrs.clone();
        for id in ids {
            // An earlier decision this sweep (a Phi collapsing to its sole
            // surviving input, say) may already have removed `id`.
            if !body.blocks[bb].instrs.contains(&id) {
                continue;
            }
            let kind = body.instrs[id].kind.clone();
            let effects = kind.effects();

            if !effects.might_io && !effects.changes_env && !kind.is_terminator() && !used.contains(&id) {
                cfg::remove_by_id(body, id);
                changed = true;
                continue;
            }

            match &kind {
                InstrKind::Force(v) if body.value_ty(*v).subtype(&PirType::val_or_missing()) => {
                    cfg::replace_uses(body, Value::Instr(id), *v);
                    cfg::remove_by_id(body, id);
                    changed = true;
                }
                InstrKind::ChkMissing(v) if body.value_ty(*v).subtype(&PirType::val()) => {
                    cfg::replace_uses(body, Value::Instr(id), *v);
                    cfg::remove_by_id(body, id);
                    changed = true;
                }
                InstrKind::ChkClosure(v) if body.value_ty(*v).subtype(&PirType::val()) => {
                    cfg::replace_uses(body, Value::Instr(id), *v);
                    cfg::remove_by_id(body, id);
                    changed = true;
                }
                InstrKind::Phi(inputs) => {
                    let mut dedup: Vec<Value> = Vec::new();
                    for &v in inputs {
                        if !dedup.contains(&v) {
                            dedup.push(v);
                        }
                    }
                    if dedup.len() < inputs.len() {
                        let ty = dedup.iter().fold(PirType::bottom(), |acc, v| acc.join(body.value_ty(*v)));
                        body.instrs[id].kind = InstrKind::Phi(dedup.clone());
                        body.instrs[id].result_ty = ty;
                        changed = true;
                    }
                    if dedup.len() == 1 {
                        cfg::replace_uses(body, Value::Instr(id), dedup[0]);
                        cfg::remove_by_id(body, id);
                        changed = true;
                    }
                }
                _ => {}
            }
        }
    }
    changed
}

/// Marks every Promise still referenced by a surviving `MkArg` and discards
/// the rest, remapping the survivors' ids densely (a straight removal would
/// invalidate every other `PromiseId` in the arena).
fn gc_promises(function: &mut Function) -> bool {
    let mut used: HashSet<PromiseId> = HashSet::new();
    for bb in cfg::reachable(&function.body, function.body.entry) {
        for &id in &function.body.blocks[bb].instrs {
            if let InstrKind::MkArg { promise, .. } = function.body.instrs[id].kind {
                used.insert(promise);
            }
        }
    }

    if used.len() == function.promises.len() {
        return false;
    }

    let mut remap: HashMap<PromiseId, PromiseId> = HashMap::new();
    let mut new_promises: IndexVec<PromiseId, Promise> = IndexVec::new();
    for (old_id, promise) in function.promises.iter_enumerated() {
        if used.contains(&old_id) {
            let new_id = new_promises.next_index();
            let mut promise = promise.clone();
            promise.id = new_id;
            promise.index = new_id.as_u32();
            remap.insert(old_id, new_id);
            new_promises.push(promise);
        }
    }

    for bb in function.body.blocks.indices().collect::<Vec<_>>() {
        for &id in function.body.blocks[bb].instrs.clone().iter() {
            if let InstrKind::MkArg { promise, .. } = &mut function.body.instrs[id].kind {
                if let Some(&new_id) = remap.get(promise) {
                    *promise = new_id;
                }
            }
        }
    }

    function.promises = new_promises;
    true
}

fn merge_fallthrough(body: &mut CodeBody, into: BBId, from: BBId) {
    let tail: Vec<InstrId> = std::mem::take(&mut body.blocks[from].instrs);
    for &id in &tail {
        body.instrs[id].bb = into;
    }
    body.blocks[into].instrs.extend(tail);
    body.blocks[into].next0 = body.blocks[from].next0.take();
    body.blocks[into].next1 = body.blocks[from].next1.take();
}

/// One sweep of the three block-merging rules: a
/// single-predecessor fall-through successor is merged into its
/// predecessor, an empty jump-through block is spliced out, and an empty
/// diamond (`bb`'s two branch targets are both empty and converge on the
/// same next block) collapses into an unconditional jump.
fn compact_cfg(body: &mut CodeBody) -> bool {
    let mut changed = false;
    let snapshot = cfg::reachable(body, body.entry);
    let preds = cfg::Predecessors::compute(body, body.entry);
    let mut removed: HashSet<BBId> = HashSet::new();

    for bb in snapshot {
        if removed.contains(&bb) {
            continue;
        }

        if let (Some(next0), None) = (body.blocks[bb].next0, body.blocks[bb].next1) {
            if !removed.contains(&next0) && preds.of(next0).len() == 1 && preds.of(next0)[0] == bb {
                merge_fallthrough(body, bb, next0);
                removed.insert(next0);
                changed = true;
                continue;
            }
        }

        if let (Some(next0), None) = (body.blocks[bb].next0, body.blocks[bb].next1) {
            if !removed.contains(&next0) && body.blocks[next0].instrs.is_empty() {
                if let (Some(beyond), None) = (body.blocks[next0].next0, body.blocks[next0].next1) {
                    body.blocks[bb].next0 = Some(beyond);
                    body.blocks[next0].next0 = None;
                    removed.insert(next0);
                    changed = true;
                    continue;
                }
            }
        }

        if let (Some(n0), Some(n1)) = (body.blocks[bb].next0, body.blocks[bb].next1) {
            if !removed.contains(&n0) && !removed.contains(&n1) {
                let (b0_empty, b0_next0, b0_next1) =
                    (body.blocks[n0].instrs.is_empty(), body.blocks[n0].next0, body.blocks[n0].next1);
                let (b1_empty, b1_next0, b1_next1) =
                    (body.blocks[n1].instrs.is_empty(), body.blocks[n1].next0, body.blocks[n1].next1);
                if b0_empty && b1_empty && b0_next1.is_none() && b1_next1.is_none() && b0_next0 == b1_next0 {
                    if let Some(&last) = body.blocks[bb].instrs.last() {
                        if matches!(body.instrs[last].kind, InstrKind::Branch(_)) {
                            body.blocks[bb].instrs.pop();
                        }
                    }
                    body.blocks[bb].next0 = b0_next0;
                    body.blocks[bb].next1 = None;
                    body.blocks[n0].next0 = None;
                    body.blocks[n1].next0 = None;
                    removed.insert(n0);
                    removed.insert(n1);
                    changed = true;
                }
            }
        }
    }

    changed
}

/// Rebuilds `body` from a fresh, densely-numbered arena containing only
/// what's still reachable — the "Cyclic graphs" design note's free-list-on-
/// renumber strategy, implemented by reusing [`cfg::clone_subgraph`] rather
/// than hand-rolling a second id-remapping walk.
fn renumber(body: &mut CodeBody) {
    // Starts from a genuinely empty arena (not `CodeBody::new`, which
    // pre-allocates a throwaway entry block) so the clone below leaves no
    // dead block behind — `clone_subgraph` visits `body.entry` first, so
    // the freshly allocated block 0 *is* the new entry.
    let mut fresh = CodeBody { entry: BBId::new(0), blocks: IndexVec::new(), instrs: IndexVec::new(), env: body.env };
    let (new_entry, _, _) = cfg::clone_subgraph(body, body.entry, &mut fresh);
    fresh.entry = new_entry;
    *body = fresh;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, ConstId, EnvParent, Module, Value};
    use pir_index::Idx as _;

    #[test]
    fn deletes_dead_code_and_simplifies_redundant_checks() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let body = &mut module.function_mut(f).body;

        let _dead = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::integer());
        let known_val = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(1)), PirType::val());
        let force = body.push_instr(body.entry, InstrKind::Force(Value::Instr(known_val)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(force)), PirType::voyd());

        let changed = Cleanup::new().apply(module.function_mut(f));
        assert!(changed);

        let body = &module.function(f).body;
        let kinds: Vec<&InstrKind> = body.blocks[body.entry].instrs.iter().map(|&id| &body.instrs[id].kind).collect();
        assert_eq!(kinds.iter().filter(|k| matches!(k, InstrKind::LdConst(c) if c.as_usize() == 0)).count(), 0);
        assert!(!kinds.iter().any(|k| matches!(k, InstrKind::Force(_))));
        assert!(matches!(kinds.last().unwrap(), InstrKind::Return(_)));
    }

    #[test]
    fn merges_a_single_predecessor_fallthrough_block() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let body = &mut module.function_mut(f).body;
        let next = body.create_bb();
        body.blocks[body.entry].next0 = Some(next);
        let c1 = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::integer());
        let c2 = body.push_instr(next, InstrKind::LdConst(ConstId::new(1)), PirType::integer());
        body.push_instr(next, InstrKind::Binop(BinOp::Add, Value::Instr(c1), Value::Instr(c2)), PirType::integer());
        let add = *body.blocks[next].instrs.last().unwrap();
        body.push_instr(next, InstrKind::Return(Value::Instr(add)), PirType::voyd());

        let changed = Cleanup::new().apply(module.function_mut(f));
        assert!(changed);

        let body = &module.function(f).body;
        assert_eq!(body.blocks.len(), 1, "the merged+renumbered function should have a single reachable block");
        let kinds: Vec<&InstrKind> = body.blocks[body.entry].instrs.iter().map(|&id| &body.instrs[id].kind).collect();
        assert!(matches!(kinds.last().unwrap(), InstrKind::Return(_)));
    }
}

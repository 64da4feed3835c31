//! CFG utilities: traversal, predecessor index, and block
//! operations used by every pass below. Visitor ordering is deliberately
//! unspecified beyond "each reachable block exactly once, no unreachable
//! block visited" — where a pass needs a specific order (phi input
//! alignment) it records that order explicitly rather than relying on a
//! traversal's incidental order.

use std::collections::{HashMap, VecDeque};

use pir_index::{BitSet, IndexVec};
use smallvec::SmallVec;

use crate::ir::{BBId, CodeBody, InstrId, Value};

/// Visits every block reachable from `entry` exactly once via
/// breadth-first traversal. No guarantee on the order beyond reachability.
pub fn bfs_visit(body: &CodeBody, entry: BBId, mut visit: impl FnMut(BBId)) {
    let mut seen = BitSet::new_empty(body.blocks.len());
    let mut queue = VecDeque::new();
    seen.insert(entry);
    queue.push_back(entry);
    while let Some(bb) = queue.pop_front() {
        visit(bb);
        for succ in body.blocks[bb].successors() {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
}

/// Depth-first "check" traversal: `check` is invoked once per reachable
/// block; as soon as it returns `false` the walk stops and this function
/// returns `false`. Returns `true` if every reachable block's check passed.
pub fn dfs_check(body: &CodeBody, entry: BBId, mut check: impl FnMut(BBId) -> bool) -> bool {
    let mut seen = BitSet::new_empty(body.blocks.len());
    let mut stack = vec![entry];
    seen.insert(entry);
    while let Some(bb) = stack.pop() {
        if !check(bb) {
            return false;
        }
        for succ in body.blocks[bb].successors() {
            if seen.insert(succ) {
                stack.push(succ);
            }
        }
    }
    true
}

/// Every block reachable from `entry`, in breadth-first order.
pub fn reachable(body: &CodeBody, entry: BBId) -> Vec<BBId> {
    let mut out = Vec::new();
    bfs_visit(body, entry, |bb| out.push(bb));
    out
}

/// A predecessor index, computed once and indexed by `BBId`. Dead (non-
/// reachable) blocks are given an empty predecessor list rather than
/// omitted, so indexing by any valid `BBId` is safe.
#[derive(Clone, Debug)]
pub struct Predecessors(IndexVec<BBId, SmallVec<[BBId; 4]>>);

impl Predecessors {
    pub fn compute(body: &CodeBody, entry: BBId) -> Self {
        let mut preds: IndexVec<BBId, SmallVec<[BBId; 4]>> =
            IndexVec::from_elem_n(SmallVec::new(), body.blocks.len());
        bfs_visit(body, entry, |bb| {
            for succ in body.blocks[bb].successors() {
                preds[succ].push(bb);
            }
        });
        Predecessors(preds)
    }

    pub fn of(&self, bb: BBId) -> &[BBId] {
        &self.0[bb]
    }
}

/// Appends a cloned copy of `src`'s instructions into `dst` as a brand new
/// block with no successors wired — callers wire
/// successors themselves. Operand ids that refer to instructions outside the
/// `remap` table are left as-is: cloning a single block like this is only
/// sound on its own when none of its instructions reference another
/// not-yet-cloned block's defs (straight-line blocks, or a second pass with
/// a complete remap — see [`clone_subgraph`] for the general case used by
/// the inliner).
pub fn clone_instrs(src: &CodeBody, src_bb: BBId, dst: &mut CodeBody, remap: &mut HashMap<InstrId, InstrId>) -> BBId {
    let new_bb = dst.create_bb();
    for &old_id in &src.blocks[src_bb].instrs {
        let old = &src.instrs[old_id];
        let mut kind = old.kind.clone();
        kind.rewrite_operands(|v| remap_value(v, remap));
        let new_id = dst.push_instr(new_bb, kind, old.result_ty);
        remap.insert(old_id, new_id);
    }
    new_bb
}

fn remap_value(v: Value, remap: &HashMap<InstrId, InstrId>) -> Value {
    match v {
        Value::Instr(id) => remap.get(&id).map(|&n| Value::Instr(n)).unwrap_or(v),
        other => other,
    }
}

/// Clones every block reachable from `src_entry` into `dst`, in two passes
/// (shells first, then operand rewriting) so that forward references
/// (loops, a `Phi` whose input is defined in a block visited later) resolve
/// correctly regardless of traversal order. Returns the cloned entry's id
/// in `dst` plus the full block and instruction id remaps, which the
/// inliner uses afterwards to retarget anything that still points at the
/// original callee graph (e.g. `MkArg.promise` back-links).
pub fn clone_subgraph(
    src: &CodeBody,
    src_entry: BBId,
    dst: &mut CodeBody,
) -> (BBId, HashMap<BBId, BBId>, HashMap<InstrId, InstrId>) {
    let order = reachable(src, src_entry);

    let mut bb_remap = HashMap::new();
    let mut instr_remap = HashMap::new();

    // Pass 1: allocate shell blocks and shell instructions (kind is a cheap
    // placeholder; overwritten in pass 2) so every id referenced by a not-
    // yet-visited block already has a destination slot.
    for &old_bb in &order {
        let new_bb = dst.create_bb();
        bb_remap.insert(old_bb, new_bb);
        for &old_id in &src.blocks[old_bb].instrs {
            let old = &src.instrs[old_id];
            let new_id = dst.push_instr(new_bb, old.kind.clone(), old.result_ty);
            instr_remap.insert(old_id, new_id);
        }
    }

    // Pass 2: rewrite operands and successor edges using the now-complete
    // remap tables.
    for &old_bb in &order {
        let new_bb = bb_remap[&old_bb];
        for &old_id in &src.blocks[old_bb].instrs {
            let new_id = instr_remap[&old_id];
            let mut kind = dst.instrs[new_id].kind.clone();
            kind.rewrite_operands(|v| remap_value(v, &instr_remap));
            dst.instrs[new_id].kind = kind;
        }
        let next0 = src.blocks[old_bb].next0.map(|b| bb_remap[&b]);
        let next1 = src.blocks[old_bb].next1.map(|b| bb_remap[&b]);
        dst.blocks[new_bb].next0 = next0;
        dst.blocks[new_bb].next1 = next1;
    }

    (bb_remap[&src_entry], bb_remap, instr_remap)
}

/// `split(bb, pos)`: creates a new block, transfers every instruction of
/// `bb` from `pos` onward into it, rewires `bb`'s successor edges onto the
/// new block, and links `bb -> new_block`. Returns the new block's id.
pub fn split(body: &mut CodeBody, bb: BBId, pos: usize) -> BBId {
    let new_bb = body.create_bb();
    let tail: Vec<InstrId> = body.blocks[bb].instrs.split_off(pos);
    for &id in &tail {
        body.instrs[id].bb = new_bb;
    }
    body.blocks[new_bb].instrs = tail;
    body.blocks[new_bb].next0 = body.blocks[bb].next0.take();
    body.blocks[new_bb].next1 = body.blocks[bb].next1.take();
    body.blocks[bb].next0 = Some(new_bb);
    body.blocks[bb].next1 = None;
    new_bb
}

/// `forInline(inlineeEntry, continuation)`: finds the unique `Return` block
/// reachable from `inlineeEntry`, records its return operand, replaces the
/// terminating `Return` with a fall-through edge to `continuation`, and
/// returns the recorded operand.
///
/// # Panics
/// Panics if the inlinee graph has zero or more than one reachable
/// `Return` — both are a malformed-inlinee programmer error (every Code
/// unit has exactly one `Return` per exit path collapsed by cleanup before
/// inlining runs it this way; a graph with live unreachable returns is not
/// well-formed PIR).
pub fn for_inline(body: &mut CodeBody, inlinee_entry: BBId, continuation: BBId) -> Value {
    let mut return_bb = None;
    for bb in reachable(body, inlinee_entry) {
        if let Some(&last) = body.blocks[bb].instrs.last() {
            if matches!(body.instrs[last].kind, crate::ir::InstrKind::Return(_)) {
                assert!(return_bb.is_none(), "inlinee has more than one reachable Return block");
                return_bb = Some((bb, last));
            }
        }
    }
    let (bb, ret_id) = return_bb.expect("inlinee has no reachable Return block");
    let operand = match body.instrs[ret_id].kind {
        crate::ir::InstrKind::Return(v) => v,
        _ => unreachable!(),
    };
    body.blocks[bb].instrs.pop();
    body.blocks[bb].next0 = Some(continuation);
    body.blocks[bb].next1 = None;
    operand
}

/// Deletes the instruction at `pos` in `bb`'s instruction list. The
/// underlying arena slot is left in place (it is simply no longer
/// referenced by any block); `Cleanup`'s CFG compaction/renumber phase is
/// what actually reclaims dead arena space, per the "Cyclic graphs" design
/// note's free-list-on-renumber strategy.
pub fn remove(body: &mut CodeBody, bb: BBId, pos: usize) {
    body.blocks[bb].instrs.remove(pos);
}

pub fn insert(body: &mut CodeBody, bb: BBId, pos: usize, instr: InstrId) {
    body.blocks[bb].instrs.insert(pos, instr);
}

pub fn replace(body: &mut CodeBody, bb: BBId, pos: usize, instr: InstrId) {
    body.blocks[bb].instrs[pos] = instr;
}

/// Transfers ownership of the instruction at `pos` in `bb` to the end of
/// `dst`, updating its back-pointer.
pub fn move_to(body: &mut CodeBody, bb: BBId, pos: usize, dst: BBId) {
    let id = body.blocks[bb].instrs.remove(pos);
    body.instrs[id].bb = dst;
    body.blocks[dst].instrs.push(id);
}

/// True if `v` refers to an instruction whose producing block is
/// `producer_bb` and `producer_bb` is reachable from `entry` — the
/// dominance-adjacent check the verifier and scope analysis both need
/// without computing full dominance.
pub fn producer_bb(body: &CodeBody, v: Value) -> Option<BBId> {
    match v {
        Value::Instr(id) => Some(body.instrs[id].bb),
        _ => None,
    }
}

pub fn is_reachable(body: &CodeBody, entry: BBId, bb: BBId) -> bool {
    reachable(body, entry).contains(&bb)
}

/// Rewrites every operand across the whole body that currently reads
/// `target` to read `replacement` instead. Walks the body's *current*
/// state, so repeated or out-of-order calls during a pass's sweep still
/// converge on the right answer.
pub fn replace_uses(body: &mut CodeBody, target: Value, replacement: Value) {
    for instr in body.instrs.iter_mut() {
        let mut kind = instr.kind.clone();
        kind.rewrite_operands(|v| if v == target { replacement } else { v });
        instr.kind = kind;
    }
}

/// Removes `id` from whichever block currently lists it, by id rather than
/// position. Same arena-slot-left-in-place semantics as [`remove`].
pub fn remove_by_id(body: &mut CodeBody, id: InstrId) {
    let bb = body.instrs[id].bb;
    body.blocks[bb].instrs.retain(|&i| i != id);
}

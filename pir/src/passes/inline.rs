//! The Inliner: splices a call whose callee closure is
//! syntactically visible directly into its caller, substituting each
//! formal's actual argument in place of its `LdArg`s and folding the
//! callee's own scope away where possible, handling the full
//! strict/first-force/ambiguous-force argument cases.

use std::collections::{HashMap, HashSet};

use crate::analysis::{solve, AnalysisState, Transfer};
use crate::cfg;
use crate::error::CapabilityError;
use crate::ir::{BBId, CodeBody, FunctionId, InstrId, InstrKind, Module, PromiseId, Value};
use crate::ty::PirType;

pub struct Inliner;

impl Default for Inliner {
    fn default() -> Self {
        Self::new()
    }
}

impl Inliner {
    pub fn new() -> Self {
        Inliner
    }

    /// One sweep over `function_id`'s own body: every `Call` whose callee
    /// resolves to a syntactically visible `MkCls`/`MkClsFun` with a
    /// matching formal count is inlined. Calls introduced by the inlining
    /// itself are left for the pipeline's next iteration (§4.8: "a single
    /// pass over the caller").
    pub fn apply(&self, module: &mut Module, function_id: FunctionId) -> Result<bool, CapabilityError> {
        let candidates: Vec<InstrId> = {
            let body = &module.function(function_id).body;
            cfg::reachable(body, body.entry)
                .into_iter()
                .flat_map(|bb| body.blocks[bb].instrs.clone())
                .filter(|&id| matches!(body.instrs[id].kind, InstrKind::Call { .. }))
                .collect()
        };

        let mut changed = false;
        for call_id in candidates {
            if inline_call(module, function_id, call_id)? {
                changed = true;
            }
        }
        Ok(changed)
    }
}

struct Actual {
    strict: Value,
    promise: PromiseId,
    env: Value,
    mkarg_id: InstrId,
}

fn inline_call(module: &mut Module, function_id: FunctionId, call_id: InstrId) -> Result<bool, CapabilityError> {
    let Some((callee_id, call_args, mkcls_env, bb, pos)) = locate_candidate(module, function_id, call_id) else {
        return Ok(false);
    };

    let callee_formals = module.function(callee_id).formals.clone();
    if callee_formals.len() != call_args.len() {
        return Err(CapabilityError::InlineArityMismatch { expected: callee_formals.len(), got: call_args.len() });
    }

    let callee_body = module.function(callee_id).body.clone();
    let callee_promises: Vec<(PromiseId, crate::ir::Promise)> =
        module.function(callee_id).promises.iter_enumerated().map(|(id, p)| (id, p.clone())).collect();
    let callee_local_env = callee_body.env;
    let callee_needs_own_env = needs_own_env(&callee_body);

    let function = module.function_mut(function_id);

    // Step 2: split the caller block right before the call; `c` becomes the
    // first instruction of `tail`.
    let tail = cfg::split(&mut function.body, bb, pos);

    // Steps 3-4: clone the callee's CFG into the caller's arena and wire it
    // in place of the fall-through edge the split just created.
    let (clone_entry, _bb_remap, instr_remap) = cfg::clone_subgraph(&callee_body, callee_body.entry, &mut function.body);
    function.body.blocks[bb].next0 = Some(clone_entry);
    function.body.blocks[bb].next1 = None;

    // Step 8: adopt every callee promise as one of the caller's own,
    // retargeting the clone's `MkArg.promise` back-links to the new ids.
    let mut promise_map: HashMap<PromiseId, PromiseId> = HashMap::new();
    for (old_pid, promise) in &callee_promises {
        let new_pid = function.adopt_promise(promise.body.clone());
        promise_map.insert(*old_pid, new_pid);
    }
    for &new_instr_id in instr_remap.values() {
        if let InstrKind::MkArg { promise, .. } = &mut function.body.instrs[new_instr_id].kind {
            if let Some(&mapped) = promise_map.get(promise) {
                *promise = mapped;
            }
        }
    }

    // Step 10: if the callee still needs its own environment, prepend a
    // fresh MkEnv to the clone's entry (parented on the closure's captured
    // lexical environment) and retarget every reference to the callee's
    // local scope onto it.
    if callee_needs_own_env {
        let mkenv = InstrKind::MkEnv { parent: mkcls_env, names: callee_formals.clone(), values: call_args.clone() };
        let mkenv_id = function.body.push_instr(clone_entry, mkenv, PirType::environment());
        let instrs = &mut function.body.blocks[clone_entry].instrs;
        let last = instrs.pop().expect("just pushed");
        instrs.insert(0, last);
        cfg::replace_uses(&mut function.body, callee_local_env, Value::Instr(mkenv_id));
    }

    // Step 6: per-formal "first LdArg" classification over the clone.
    let first = first_ld_arg_points(&function.body, clone_entry, callee_formals.len());
    let clone_instr_ids: Vec<InstrId> = instr_remap.values().copied().collect();
    let mut resolved: HashSet<InstrId> = HashSet::new();

    // Step 7a: strict/eager actuals substitute directly, no promise involved.
    for &id in &clone_instr_ids {
        let InstrKind::LdArg { index, .. } = function.body.instrs[id].kind else { continue };
        let actual = get_actual(&function.body, &call_args, index, callee_formals.len())?;
        if actual.strict != Value::Missing {
            cfg::replace_uses(&mut function.body, Value::Instr(id), actual.strict);
            cfg::remove_by_id(&mut function.body, id);
            resolved.insert(id);
        }
    }

    // Step 7, unique first-forcing point: splice the promise's own code in
    // place of the LdArg and remember the forced value for later uses of
    // the same formal.
    let mut forced: HashMap<u32, Value> = HashMap::new();
    for &id in &clone_instr_ids {
        if resolved.contains(&id) {
            continue;
        }
        let InstrKind::LdArg { index, .. } = function.body.instrs[id].kind else { continue };
        if !first.get(&id).copied().unwrap_or(false) {
            continue;
        }
        let actual = get_actual(&function.body, &call_args, index, callee_formals.len())?;
        let promise_body = callee_promises
            .iter()
            .find(|(pid, _)| *pid == actual.promise)
            .map(|(_, p)| p.body.clone())
            .expect("MkArg.promise always names one of the callee's own promises");

        let ld_bb = function.body.instrs[id].bb;
        let ld_pos = function.body.blocks[ld_bb].instrs.iter().position(|&i| i == id).expect("LdArg still in its block");
        let continuation = cfg::split(&mut function.body, ld_bb, ld_pos);
        let (promise_entry, _, _) = cfg::clone_subgraph(&promise_body, promise_body.entry, &mut function.body);
        function.body.blocks[ld_bb].next0 = Some(promise_entry);
        function.body.blocks[ld_bb].next1 = None;
        let forced_value = cfg::for_inline(&mut function.body, promise_entry, continuation);
        cfg::replace_uses(&mut function.body, promise_body.env, actual.env);
        cfg::replace_uses(&mut function.body, Value::Instr(id), forced_value);
        cfg::remove_by_id(&mut function.body, id);
        resolved.insert(id);
        forced.insert(index, forced_value);
    }

    // Step 7, ambiguous/second-or-later forcing points: reuse the memoised
    // forced value if one was recorded, otherwise fall back to the raw
    // `MkArg` operand so a later `Force` downstream still evaluates it.
    for &id in &clone_instr_ids {
        if resolved.contains(&id) {
            continue;
        }
        let InstrKind::LdArg { index, .. } = function.body.instrs[id].kind else { continue };
        let actual = get_actual(&function.body, &call_args, index, callee_formals.len())?;
        let replacement = forced.get(&index).copied().unwrap_or(Value::Instr(actual.mkarg_id));
        cfg::replace_uses(&mut function.body, Value::Instr(id), replacement);
        cfg::remove_by_id(&mut function.body, id);
        resolved.insert(id);
    }

    // Step 9: stitch the clone's unique return into `tail`, and rewrite
    // uses of the original Call accordingly.
    let return_value = cfg::for_inline(&mut function.body, clone_entry, tail);
    cfg::replace_uses(&mut function.body, Value::Instr(call_id), return_value);

    // Step 11: the original Call is now dead weight in `tail`.
    cfg::remove_by_id(&mut function.body, call_id);

    Ok(true)
}

fn locate_candidate(
    module: &Module,
    function_id: FunctionId,
    call_id: InstrId,
) -> Option<(FunctionId, Vec<Value>, Value, BBId, usize)> {
    let body = &module.function(function_id).body;
    let bb = body.instrs[call_id].bb;
    let pos = body.blocks[bb].instrs.iter().position(|&i| i == call_id)?;
    let (callee_val, args) = match &body.instrs[call_id].kind {
        InstrKind::Call { callee, args } => (*callee, args.clone()),
        _ => return None,
    };
    let mkcls_id = callee_val.as_instr()?;
    let (fun, env) = match &body.instrs[mkcls_id].kind {
        InstrKind::MkCls { env, fun } => (*fun, *env),
        InstrKind::MkClsFun { env, fun, .. } => (*fun, *env),
        _ => return None,
    };
    Some((fun, args, env, bb, pos))
}

fn get_actual(body: &CodeBody, call_args: &[Value], index: u32, expected: usize) -> Result<Actual, CapabilityError> {
    let actual_value =
        call_args.get(index as usize).copied().ok_or(CapabilityError::InlineArityMismatch { expected, got: call_args.len() })?;
    let mkarg_id = actual_value.as_instr().expect("Call's actuals are always MkArg instructions");
    match body.instrs[mkarg_id].kind {
        InstrKind::MkArg { strict, promise, env } => Ok(Actual { strict, promise, env, mkarg_id }),
        _ => unreachable!("Call's actuals are always MkArg instructions"),
    }
}

/// A Function needs its own environment if it reads by name (`LdVar`/
/// `LdFun`, which `LdArg` deliberately bypasses) or contains an instruction
/// that leaks its environment to opaque host code.
fn needs_own_env(body: &CodeBody) -> bool {
    cfg::reachable(body, body.entry).into_iter().any(|bb| {
        body.blocks[bb].instrs.iter().any(|&id| {
            let kind = &body.instrs[id].kind;
            matches!(kind, InstrKind::LdVar { .. } | InstrKind::LdFun { .. }) || kind.effects().leaks_env
        })
    })
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ArgStatus {
    Unevaluated,
    First(InstrId),
    Ambiguous,
}

#[derive(Clone)]
struct FirstArgState(Vec<ArgStatus>);

impl AnalysisState for FirstArgState {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            let merged = match (&*a, b) {
                (ArgStatus::First(x), ArgStatus::First(y)) if x == y => ArgStatus::First(*x),
                (ArgStatus::Unevaluated, ArgStatus::Unevaluated) => ArgStatus::Unevaluated,
                _ => ArgStatus::Ambiguous,
            };
            if merged != *a {
                *a = merged;
                changed = true;
            }
        }
        changed
    }
}

/// Finds, per formal index, the unique `LdArg` not dominated by another
/// `LdArg` of the same index. Reuses the generic
/// fixed-point solver with a state lattice of one `ArgStatus` per formal;
/// the recorded classification is read off during the *stable* final sweep,
/// same technique `analysis::scope::ScopeTransfer` uses for its `loads` map.
struct FirstArgTransfer {
    first: HashMap<InstrId, bool>,
    formal_count: usize,
}

impl Transfer for FirstArgTransfer {
    type State = FirstArgState;

    fn entry_state(&self) -> FirstArgState {
        FirstArgState(vec![ArgStatus::Unevaluated; self.formal_count])
    }

    fn apply(&mut self, state: &mut FirstArgState, body: &CodeBody, instr_id: InstrId) {
        let InstrKind::LdArg { index, .. } = body.instrs[instr_id].kind else { return };
        let idx = index as usize;
        if state.0[idx] == ArgStatus::Unevaluated {
            state.0[idx] = ArgStatus::First(instr_id);
            self.first.insert(instr_id, true);
        } else {
            self.first.insert(instr_id, false);
        }
    }
}

fn first_ld_arg_points(body: &CodeBody, clone_entry: BBId, formal_count: usize) -> HashMap<InstrId, bool> {
    let mut transfer = FirstArgTransfer { first: HashMap::new(), formal_count };
    solve(body, clone_entry, &mut transfer);
    transfer.first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::EnvParent;
    use pir_index::Idx;

    #[test]
    fn inlines_a_strict_unary_call() {
        // callee(x) { return x } — called with a strict actual.
        let mut module = Module::new();
        let x = module.symbols.intern("x");
        let callee = module.new_function("callee", vec![x], EnvParent::Unknown);
        {
            let body = &mut module.function_mut(callee).body;
            let env = body.env;
            let ld = body.push_instr(body.entry, InstrKind::LdArg { index: 0, env }, PirType::any());
            body.push_instr(body.entry, InstrKind::Return(Value::Instr(ld)), PirType::voyd());
        }

        let caller = module.new_function("caller", vec![], EnvParent::Unknown);
        let caller_env = module.function(caller).body.env;
        let prom = module.function_mut(caller).create_promise();
        let body = &mut module.function_mut(caller).body;
        let c = body.push_instr(body.entry, InstrKind::LdConst(crate::ir::ConstId::new(0)), PirType::integer());
        let arg = body.push_instr(
            body.entry,
            InstrKind::MkArg { strict: Value::Instr(c), promise: prom, env: caller_env },
            PirType::val(),
        );
        let cls = body.push_instr(body.entry, InstrKind::MkCls { env: caller_env, fun: callee }, PirType::val());
        let call = body.push_instr(
            body.entry,
            InstrKind::Call { callee: Value::Instr(cls), args: vec![Value::Instr(arg)] },
            PirType::any(),
        );
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(call)), PirType::voyd());

        let changed = Inliner::new().apply(&mut module, caller).unwrap();
        assert!(changed);

        let body = &module.function(caller).body;
        let all_kinds: Vec<&InstrKind> =
            cfg::reachable(body, body.entry).into_iter().flat_map(|bb| body.blocks[bb].instrs.iter().map(|&id| &body.instrs[id].kind)).collect();
        assert!(!all_kinds.iter().any(|k| matches!(k, InstrKind::Call { .. })));
        assert!(!all_kinds.iter().any(|k| matches!(k, InstrKind::LdArg { .. })));
    }

    #[test]
    fn leaves_an_unknown_callee_call_untouched() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let g = module.symbols.intern("g");
        let env = module.function(f).body.env;
        let body = &mut module.function_mut(f).body;
        let callee = body.push_instr(body.entry, InstrKind::LdVar { name: g, env }, PirType::val());
        let call = body.push_instr(body.entry, InstrKind::Call { callee: Value::Instr(callee), args: vec![] }, PirType::any());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(call)), PirType::voyd());

        let changed = Inliner::new().apply(&mut module, f).unwrap();
        assert!(!changed);
    }
}

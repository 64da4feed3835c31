//! Scope resolution: runs scope analysis, then replaces
//! every load-like instruction whose abstract value is resolved by its
//! concrete producer, a formal index, or (for multiple candidates) a
//! freshly synthesised `Phi`.

use std::collections::HashMap;

use crate::analysis::scope::{AbstractValue, ScopeTransfer, DEFAULT_RECURSION_BOUND};
use crate::cfg;
use crate::ir::{BBId, CodeBody, FunctionId, InstrId, InstrKind, Module, Value};
use crate::ty::PirType;

pub struct ScopeResolution {
    recursion_bound: u32,
}

impl Default for ScopeResolution {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeResolution {
    pub fn new() -> Self {
        ScopeResolution { recursion_bound: DEFAULT_RECURSION_BOUND }
    }

    pub fn with_recursion_bound(mut self, bound: u32) -> Self {
        self.recursion_bound = bound;
        self
    }

    /// Runs the pass on `function_id`'s own body (not its promises — those
    /// are resolved independently once the inliner splices them into a
    /// caller; see `DESIGN.md`). Returns whether anything changed.
    pub fn apply(&self, module: &mut Module, function_id: FunctionId) -> bool {
        let (loads, need_env) = {
            let module_ref: &Module = module;
            let function = module_ref.function(function_id);
            let body = &function.body;
            let mut transfer = ScopeTransfer::new(module_ref, body.env, function.formals.clone())
                .with_recursion_bound(self.recursion_bound);
            let solution = crate::analysis::solve(body, body.entry, &mut transfer);
            let need_env = solution
                .exit
                .as_ref()
                .and_then(|ex| ex.env(body.env))
                .map(|ae| ae.leaked || ae.tainted)
                .unwrap_or(false);
            (transfer.loads, need_env)
        };

        let function = module.function_mut(function_id);
        let local_env = function.body.env;
        let mut changed = resolve_loads(&mut function.body, &loads, need_env);

        if !need_env {
            changed |= delete_local_stores(&mut function.body, local_env);
        }

        changed
    }
}

fn resolve_loads(body: &mut CodeBody, loads: &HashMap<InstrId, AbstractValue>, need_env: bool) -> bool {
    let mut changed = false;
    let order: Vec<(BBId, InstrId)> = cfg::reachable(body, body.entry)
        .into_iter()
        .flat_map(|bb| body.blocks[bb].instrs.clone().into_iter().map(move |id| (bb, id)))
        .collect();

    for (_bb, id) in order {
        if !body.instrs[id].kind.is_load() {
            continue;
        }
        let Some(av) = loads.get(&id) else { continue };

        if let Some(v) = av.single_value() {
            // "replace all uses of i by v; if i does not itself need an
            // environment or v.type is not lazy, delete i" (§4.7). Uses
            // are rewritten unconditionally — `replace_uses` walks the
            // whole body from its *current* state, so it is safe however
            // many times it runs and in whatever order the instructions
            // here are visited.
            let needs_env = body.instrs[id].kind.effects().needs_env;
            let v_ty = body.value_ty(v);
            cfg::replace_uses(body, Value::Instr(id), v);
            if !needs_env || !v_ty.maybe_lazy() {
                cfg::remove_by_id(body, id);
            }
            changed = true;
            continue;
        }

        if let Some(k) = av.single_arg() {
            let env = body.instrs[id].kind.explicit_env().expect("load-like instruction always carries an env operand");
            body.instrs[id].kind = InstrKind::LdArg { index: k, env };
            changed = true;
            continue;
        }

        if let AbstractValue::Set { producers, formals, .. } = av {
            if formals.is_empty() && producers.len() >= 2 {
                let mut candidates: Vec<Value> = producers.iter().copied().collect();
                candidates.sort_by_key(|v| value_sort_key(*v));
                let phi_ty = candidates.iter().fold(PirType::bottom(), |acc, v| acc.join(body.value_ty(*v)));

                // "insert the phi in place if the environment may still be
                // observed (needEnv), otherwise replace in place": when
                // the env may still be observed, the original load's
                // possible side effect (e.g. an LdFun's function-lookup
                // throw) must still run, so it is kept and a *new*
                // instruction carries the resolved value for its uses;
                // otherwise the load is known redundant and is overwritten
                // by the phi directly.
                if need_env {
                    let phi_id = body.push_instr(body.instrs[id].bb, InstrKind::Phi(candidates), phi_ty);
                    cfg::replace_uses(body, Value::Instr(id), Value::Instr(phi_id));
                    insert_after(body, id, phi_id);
                } else {
                    body.instrs[id].kind = InstrKind::Phi(candidates);
                    body.instrs[id].result_ty = phi_ty;
                }
                changed = true;
            }
        }
    }

    changed
}

fn value_sort_key(v: Value) -> (u8, u32) {
    match v {
        Value::Nil => (0, 0),
        Value::Missing => (1, 0),
        Value::Env(e) => (2, e.as_u32()),
        Value::Instr(i) => (3, i.as_u32()),
    }
}

fn insert_after(body: &mut CodeBody, after: InstrId, new_id: InstrId) {
    let bb = body.instrs[after].bb;
    let pos = body.blocks[bb].instrs.iter().position(|&i| i == after).unwrap();
    body.blocks[bb].instrs.retain(|&i| i != new_id);
    body.blocks[bb].instrs.insert(pos + 1, new_id);
}

fn delete_local_stores(body: &mut CodeBody, local_env: Value) -> bool {
    let mut changed = false;
    for bb in body.blocks.indices().collect::<Vec<_>>() {
        let before = body.blocks[bb].instrs.len();
        body.blocks[bb].instrs.retain(|&id| !matches!(&body.instrs[id].kind, InstrKind::StVar { env, .. } if *env == local_env));
        changed |= body.blocks[bb].instrs.len() != before;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, ConstId, EnvParent, Value};
    use pir_index::Idx;

    #[test]
    fn constant_propagation_through_env() {
        // e = MkEnv(par); StVar(e, "x", Const(1)); r = LdVar(e, "x"); Return(r)
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let x = module.symbols.intern("x");
        let local_env = module.function(f).body.env;
        let body = &mut module.function_mut(f).body;
        let c1 = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::integer());
        body.push_instr(
            body.entry,
            InstrKind::StVar { name: x, value: Value::Instr(c1), env: local_env },
            PirType::voyd(),
        );
        let ld = body.push_instr(body.entry, InstrKind::LdVar { name: x, env: local_env }, PirType::any());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(ld)), PirType::voyd());

        let changed = ScopeResolution::new().apply(&mut module, f);
        assert!(changed);

        let body = &module.function(f).body;
        let instrs: Vec<&InstrKind> = body.blocks[body.entry].instrs.iter().map(|&id| &body.instrs[id].kind).collect();
        assert!(!instrs.iter().any(|k| matches!(k, InstrKind::LdVar { .. })));
        assert!(!instrs.iter().any(|k| matches!(k, InstrKind::StVar { .. })));
        assert!(matches!(instrs.last().unwrap(), InstrKind::Return(Value::Instr(id)) if *id == c1));
    }

    #[test]
    fn phi_join_across_branches() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let x = module.symbols.intern("x");
        let local_env = module.function(f).body.env;
        let body = &mut module.function_mut(f).body;

        let left = body.create_bb();
        let right = body.create_bb();
        let merge = body.create_bb();

        let test_val = body.push_instr(body.entry, InstrKind::Binop(BinOp::Eq, Value::Nil, Value::Nil), PirType::logical());
        let test = body.push_instr(body.entry, InstrKind::AsTest(Value::Instr(test_val)), PirType::test());
        let mut b = crate::ir::Builder::at(body, body.entry);
        b.branch(Value::Instr(test), left, right);

        b.set_cursor(left);
        let c1 = b.emit(InstrKind::LdConst(ConstId::new(0)), PirType::integer());
        b.emit(InstrKind::StVar { name: x, value: c1, env: local_env }, PirType::voyd());
        b.next(merge);

        b.set_cursor(right);
        let c2 = b.emit(InstrKind::LdConst(ConstId::new(1)), PirType::integer());
        b.emit(InstrKind::StVar { name: x, value: c2, env: local_env }, PirType::voyd());
        b.next(merge);

        b.set_cursor(merge);
        let ld = b.emit(InstrKind::LdVar { name: x, env: local_env }, PirType::any());
        b.ret(ld);

        let changed = ScopeResolution::new().apply(&mut module, f);
        assert!(changed);

        let body = &module.function(f).body;
        let merge_instrs: Vec<&InstrKind> = body.blocks[merge].instrs.iter().map(|&id| &body.instrs[id].kind).collect();
        assert!(!merge_instrs.iter().any(|k| matches!(k, InstrKind::LdVar { .. })));
        assert!(merge_instrs.iter().any(|k| matches!(k, InstrKind::Phi(inputs) if inputs.len() == 2)));
    }
}

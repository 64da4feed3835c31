//! Scope analysis: the framework of [`super`] instantiated
//! with an abstract value/environment lattice that tracks, for every
//! load-like instruction, the set of concrete producers (or formal
//! indices) a dynamic lookup could resolve to.

use std::collections::{HashMap, HashSet};

use crate::ir::{CodeBody, FunctionId, Instr, InstrId, InstrKind, Module, Value};
use crate::intern::SymbolId;
use crate::ty::PirType;

use super::{AnalysisState, Transfer};

/// §4.6 "Abstract value": either "unknown" (top) or a concrete summary —
/// the set of SSA producers and/or formal indices a load could resolve to,
/// plus the join of their types.
#[derive(Clone, Debug, PartialEq)]
pub enum AbstractValue {
    Unknown,
    Set { producers: HashSet<Value>, formals: HashSet<u32>, ty: PirType },
}

impl AbstractValue {
    pub fn bottom() -> Self {
        AbstractValue::Set { producers: HashSet::new(), formals: HashSet::new(), ty: PirType::bottom() }
    }

    pub fn unknown() -> Self {
        AbstractValue::Unknown
    }

    pub fn from_value(v: Value, ty: PirType) -> Self {
        AbstractValue::Set { producers: HashSet::from([v]), formals: HashSet::new(), ty }
    }

    pub fn from_formal(index: u32, ty: PirType) -> Self {
        AbstractValue::Set { producers: HashSet::new(), formals: HashSet::from([index]), ty }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, AbstractValue::Set { producers, formals, ty } if producers.is_empty() && formals.is_empty() && *ty == PirType::bottom())
    }

    /// `|vals| = 1 ∧ |args| = 0`.
    pub fn single_value(&self) -> Option<Value> {
        match self {
            AbstractValue::Set { producers, formals, .. } if formals.is_empty() && producers.len() == 1 => {
                producers.iter().copied().next()
            }
            _ => None,
        }
    }

    /// `|args| = 1 ∧ |vals| = 0`.
    pub fn single_arg(&self) -> Option<u32> {
        match self {
            AbstractValue::Set { producers, formals, .. } if producers.is_empty() && formals.len() == 1 => {
                formals.iter().copied().next()
            }
            _ => None,
        }
    }

    pub fn producers(&self) -> impl Iterator<Item = Value> + '_ {
        match self {
            AbstractValue::Set { producers, .. } => producers.iter().copied(),
            AbstractValue::Unknown => [].iter().copied(),
        }
    }

    pub fn ty(&self) -> PirType {
        match self {
            AbstractValue::Set { ty, .. } => *ty,
            AbstractValue::Unknown => PirType::any(),
        }
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (AbstractValue::Unknown, _) | (_, AbstractValue::Unknown) => AbstractValue::Unknown,
            (a, b) if a.is_bottom() => b.clone(),
            (a, b) if b.is_bottom() => a.clone(),
            (
                AbstractValue::Set { producers: pa, formals: fa, ty: ta },
                AbstractValue::Set { producers: pb, formals: fb, ty: tb },
            ) => AbstractValue::Set {
                producers: pa.union(pb).copied().collect(),
                formals: fa.union(fb).copied().collect(),
                ty: ta.join(*tb),
            },
        }
    }
}

/// Abstract environment: a taint-on-conflict map from name to
/// abstract value, plus parent-environment knowledge and the `leaked`/
/// `tainted` flags. Taint-on-conflict was chosen over a "parent merge"
/// style: it is monotone, and it terminates.
#[derive(Clone, Debug, PartialEq)]
pub enum EnvParentKnowledge {
    Uninitialised,
    Unknown,
    Known(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AbstractEnvironment {
    bindings: HashMap<SymbolId, AbstractValue>,
    pub parent: EnvParentKnowledge,
    pub leaked: bool,
    pub tainted: bool,
}

impl AbstractEnvironment {
    pub fn new(parent: EnvParentKnowledge) -> Self {
        AbstractEnvironment { bindings: HashMap::new(), parent, leaked: false, tainted: false }
    }

    pub fn get(&self, name: SymbolId) -> AbstractValue {
        if self.tainted {
            return AbstractValue::Unknown;
        }
        self.bindings.get(&name).cloned().unwrap_or(AbstractValue::Unknown)
    }

    pub fn set(&mut self, name: SymbolId, value: AbstractValue) {
        self.bindings.insert(name, value);
    }

    /// Sets `tainted` and taints every entry — a conservative "give up" used
    /// when an instruction with env-mutating effects touches this
    /// environment and scope analysis cannot summarise the mutation.
    pub fn taint(&mut self) {
        self.tainted = true;
        for v in self.bindings.values_mut() {
            *v = AbstractValue::Unknown;
        }
    }

    pub fn merge(&mut self, other: &Self) -> bool {
        let before = self.clone();

        for (name, v) in &other.bindings {
            match self.bindings.get(name) {
                Some(existing) => {
                    let joined = existing.join(v);
                    self.bindings.insert(*name, joined);
                }
                None => {
                    self.bindings.insert(*name, v.clone());
                }
            }
        }
        self.leaked |= other.leaked;
        self.tainted |= other.tainted;
        if self.tainted {
            self.taint();
        }
        self.parent = match (&self.parent, &other.parent) {
            (EnvParentKnowledge::Uninitialised, p) => p.clone(),
            (p, EnvParentKnowledge::Uninitialised) => p.clone(),
            (a, b) if a == b => a.clone(),
            _ => EnvParentKnowledge::Unknown,
        };

        *self != before
    }
}

/// Whether an SSA value definitely refers to a specific `Function`, or two
/// or more distinct functions have been observed flowing to the same
/// closure-holding value (§4.6: "environment map ... per-environment
/// mapping from a closure-holding SSA value to the concrete Function it
/// definitely refers to, or a 'unknown function' sentinel").
#[derive(Clone, Debug, PartialEq)]
pub enum ClosureBinding {
    Known(FunctionId),
    Unknown,
}

/// §4.6 "Environment map": tracks one [`AbstractEnvironment`] per
/// environment-identifying SSA value, plus the closure-binding table. This
/// is the lattice element the fixed-point framework carries between blocks.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ScopeState {
    envs: HashMap<Value, AbstractEnvironment>,
    closures: HashMap<Value, ClosureBinding>,
}

impl ScopeState {
    pub fn env(&self, env: Value) -> Option<&AbstractEnvironment> {
        self.envs.get(&env)
    }

    pub fn env_mut(&mut self, env: Value) -> &mut AbstractEnvironment {
        self.envs.entry(env).or_insert_with(|| AbstractEnvironment::new(EnvParentKnowledge::Uninitialised))
    }

    /// `get(env, name)`: walks from `env` toward its parents, returning the
    /// first non-unknown binding encountered, or `(unknown-parent,
    /// tainted)` if the walk reaches the unknown-parent sentinel.
    pub fn get(&self, mut env: Value, name: SymbolId) -> AbstractValue {
        loop {
            match self.envs.get(&env) {
                Some(ae) => {
                    let v = ae.get(name);
                    if !matches!(v, AbstractValue::Unknown) {
                        return v;
                    }
                    match ae.parent {
                        EnvParentKnowledge::Known(p) => env = p,
                        EnvParentKnowledge::Unknown | EnvParentKnowledge::Uninitialised => return AbstractValue::Unknown,
                    }
                }
                None => return AbstractValue::Unknown,
            }
        }
    }

    pub fn closure_binding(&self, v: Value) -> Option<&ClosureBinding> {
        self.closures.get(&v)
    }

    pub fn bind_closure(&mut self, v: Value, f: FunctionId) {
        self.closures
            .entry(v)
            .and_modify(|b| {
                if *b != ClosureBinding::Known(f) {
                    *b = ClosureBinding::Unknown;
                }
            })
            .or_insert(ClosureBinding::Known(f));
    }
}

impl AnalysisState for ScopeState {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (env, ae) in &other.envs {
            match self.envs.get_mut(env) {
                Some(existing) => changed |= existing.merge(ae),
                None => {
                    self.envs.insert(*env, ae.clone());
                    changed = true;
                }
            }
        }
        for (v, binding) in &other.closures {
            match self.closures.get(v) {
                Some(existing) if existing == binding => {}
                Some(_) => {
                    self.closures.insert(*v, ClosureBinding::Unknown);
                    changed = true;
                }
                None => {
                    self.closures.insert(*v, binding.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

/// The per-instruction facts scope resolution consumes: `loads[i]` records
/// what `apply` computed for every load-like instruction `i`, keyed by
/// instruction id and overwritten on every sweep (only the value from the
/// converged, final sweep is meaningful).
pub type LoadFacts = HashMap<InstrId, AbstractValue>;

/// The call-expansion bound of §4.6/§9: recursive calls to a statically
/// known closure are analysed inline up to this depth; beyond it the call
/// is treated conservatively (tainted).
pub const DEFAULT_RECURSION_BOUND: u32 = 5;

pub struct ScopeTransfer<'m> {
    module: &'m Module,
    local_env: Value,
    formals: Vec<SymbolId>,
    recursion_bound: u32,
    depth: u32,
    /// The entry state to seed with, when this run is a recursive
    /// call-expansion of some caller rather than a fresh top-level
    /// analysis. `None` means "seed the local scope generically from
    /// `formals`", used for the outermost call.
    seed: Option<ScopeState>,
    pub loads: LoadFacts,
}

impl<'m> ScopeTransfer<'m> {
    pub fn new(module: &'m Module, local_env: Value, formals: Vec<SymbolId>) -> Self {
        ScopeTransfer {
            module,
            local_env,
            formals,
            recursion_bound: DEFAULT_RECURSION_BOUND,
            depth: 0,
            seed: None,
            loads: HashMap::new(),
        }
    }

    pub fn with_recursion_bound(mut self, bound: u32) -> Self {
        self.recursion_bound = bound;
        self
    }

    fn nested(module: &'m Module, local_env: Value, formals: Vec<SymbolId>, recursion_bound: u32, depth: u32, seed: ScopeState) -> Self {
        ScopeTransfer { module, local_env, formals, recursion_bound, depth, seed: Some(seed), loads: HashMap::new() }
    }

    fn seeded_parent(&self) -> EnvParentKnowledge {
        Self::parent_of(self.module, self.local_env)
    }

    fn parent_of(module: &Module, env: Value) -> EnvParentKnowledge {
        match env {
            Value::Env(id) => match module.environments.get(id) {
                Some(e) => match e.parent {
                    crate::ir::EnvParent::Known(p) => EnvParentKnowledge::Known(Value::Env(p)),
                    crate::ir::EnvParent::Unknown => EnvParentKnowledge::Unknown,
                },
                None => EnvParentKnowledge::Unknown,
            },
            _ => EnvParentKnowledge::Unknown,
        }
    }
}

impl<'m> Transfer for ScopeTransfer<'m> {
    type State = ScopeState;

    fn entry_state(&self) -> ScopeState {
        if let Some(seed) = &self.seed {
            return seed.clone();
        }
        let mut state = ScopeState::default();
        let mut ae = AbstractEnvironment::new(self.seeded_parent());
        for (i, &name) in self.formals.iter().enumerate() {
            ae.set(name, AbstractValue::from_formal(i as u32, PirType::any()));
        }
        state.envs.insert(self.local_env, ae);
        state
    }

    fn apply(&mut self, state: &mut ScopeState, body: &CodeBody, instr_id: InstrId) {
        let instr: &Instr = &body.instrs[instr_id];
        let result_ty = instr.result_ty;
        match instr.kind.clone() {
            InstrKind::LdVar { name, env } | InstrKind::LdFun { name, env } => {
                let v = state.get(env, name);
                self.loads.insert(instr_id, v);
            }
            InstrKind::LdArg { index, .. } => {
                self.loads.insert(instr_id, AbstractValue::from_formal(index, result_ty));
            }
            InstrKind::MkEnv { parent, names, values } => {
                let here = Value::Instr(instr_id);
                let mut ae = AbstractEnvironment::new(EnvParentKnowledge::Known(parent));
                for (name, v) in names.into_iter().zip(values) {
                    ae.set(name, AbstractValue::from_value(v, body.value_ty(v)));
                }
                state.envs.insert(here, ae);
            }
            InstrKind::StVar { name, value, env } => {
                state.env_mut(env).set(name, AbstractValue::from_value(value, body.value_ty(value)));
            }
            InstrKind::Force(v) => {
                // "Force of a LdVar/LdArg whose current abstract value is
                // not unknown: refine the binding to this Force result ...
                // if the forced operand's type already ⊑ val, this is a
                // no-op" (§4.6). Refining a currently-unknown binding would
                // be unsound against later reads of the original lazy
                // value (§9 open question), so that case is skipped.
                if body.value_ty(v).subtype(&PirType::val()) {
                    return;
                }
                if let Some(id) = v.as_instr() {
                    if let Some(env) = match &body.instrs[id].kind {
                        InstrKind::LdVar { env, .. } | InstrKind::LdArg { env, .. } => Some(*env),
                        _ => None,
                    } {
                        if let Some(name) = body.instrs[id].kind.var_name() {
                            let prior = state.get(env, name);
                            if !matches!(prior, AbstractValue::Unknown) {
                                state.env_mut(env).set(name, AbstractValue::from_value(Value::Instr(instr_id), result_ty));
                            }
                        }
                    }
                }
            }
            InstrKind::MkCls { env: _, fun } | InstrKind::MkClsFun { env: _, fun, .. } => {
                state.bind_closure(Value::Instr(instr_id), fun);
            }
            InstrKind::Call { callee, args } => {
                self.apply_call(state, body, callee, &args);
            }
            _ => {
                let effects = instr.kind.effects();
                if effects.leaks_env {
                    if let Some(env) = instr.kind.explicit_env() {
                        state.env_mut(env).leaked = true;
                    }
                }
                if effects.changes_env {
                    if let Some(env) = instr.kind.explicit_env() {
                        state.env_mut(env).taint();
                    }
                }
            }
        }
    }
}

impl<'m> ScopeTransfer<'m> {
    /// "Call whose callee's definite Function is known and recursion depth
    /// < a fixed bound: recursively run scope analysis on the callee with
    /// the caller's current environment state and the callsite's actual
    /// arguments bound to the callee's formals; merge the callee's exit
    /// state back. ... at the bound, calls fall back to the conservative
    /// 'tainted' path."
    fn apply_call(&mut self, state: &mut ScopeState, body: &CodeBody, callee: Value, args: &[Value]) {
        let known = state.closure_binding(callee).cloned();
        let function = match known {
            Some(ClosureBinding::Known(f)) if self.depth < self.recursion_bound => Some(f),
            _ => None,
        };

        let Some(function_id) = function else {
            state.env_mut(self.local_env).taint();
            return;
        };

        let callee_fn = self.module.function(function_id);

        // Seed the nested run with the caller's current state (so the
        // callee's own free-variable reads still resolve through whatever
        // the caller already knows) plus the callsite's actuals bound to
        // the callee's formals, per §4.6's "recursively run scope analysis
        // on the callee with the caller's current environment state and
        // the callsite's actual arguments bound to the callee's formals".
        let mut seed = state.clone();
        let mut callee_scope = AbstractEnvironment::new(Self::parent_of(self.module, callee_fn.body.env));
        for (formal, &actual) in callee_fn.formals.iter().zip(args) {
            callee_scope.set(*formal, AbstractValue::from_value(actual, body.value_ty(actual)));
        }
        seed.envs.insert(callee_fn.body.env, callee_scope);

        let mut nested =
            ScopeTransfer::nested(self.module, callee_fn.body.env, callee_fn.formals.clone(), self.recursion_bound, self.depth + 1, seed);

        let solution = super::solve(&callee_fn.body, callee_fn.body.entry, &mut nested);
        if let Some(exit) = solution.exit {
            state.merge(&exit);
        } else {
            state.env_mut(self.local_env).taint();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstId, EnvId};
    use pir_index::Idx;

    #[test]
    fn stvar_then_ldvar_resolves_to_single_producer() {
        let mut module = Module::new();
        let x = module.intern("x");
        let env = Value::Env(EnvId::new(0));
        let mut body = CodeBody::new(env);
        let c = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::val());
        body.push_instr(body.entry, InstrKind::StVar { name: x, value: Value::Instr(c), env }, PirType::voyd());
        let ld = body.push_instr(body.entry, InstrKind::LdVar { name: x, env }, PirType::any());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(ld)), PirType::voyd());

        let mut transfer = ScopeTransfer::new(&module, env, vec![]);
        super::super::solve(&body, body.entry, &mut transfer);

        let resolved = transfer.loads.get(&ld).unwrap();
        assert_eq!(resolved.single_value(), Some(Value::Instr(c)));
    }

    #[test]
    fn ldarg_resolves_to_its_formal_index() {
        let mut module = Module::new();
        let x = module.intern("x");
        let env = Value::Env(EnvId::new(0));
        let mut body = CodeBody::new(env);
        let ld = body.push_instr(body.entry, InstrKind::LdArg { index: 0, env }, PirType::any());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(ld)), PirType::voyd());

        let mut transfer = ScopeTransfer::new(&module, env, vec![x]);
        super::super::solve(&body, body.entry, &mut transfer);

        assert_eq!(transfer.loads.get(&ld).unwrap().single_arg(), Some(0));
    }
}

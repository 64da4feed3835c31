//! Driving the three optimisation passes to a fixed point: a conventional
//! schedule is `(inline → scopeResolve → cleanup) × k` with k small
//! (≤ 16) or until no pass reports a change.
//!
//! This module is the one piece of policy `pir-driver` would otherwise
//! have to duplicate: which passes to run, in what order, how many times,
//! and what to do when cast insertion or the verifier rejects the result.

use crate::cast;
use crate::error::PirError;
use crate::ir::{Function, FunctionId, Module};
use crate::passes::{Cleanup, Inliner, ScopeResolution};
use crate::verify;

/// Default bound on `(inline → scope-resolve → cleanup)` repetitions (§6,
/// §9 open questions: "the exact fixpoint ... is driven by a hand-picked
/// small iteration count (≤ 16)").
pub const DEFAULT_MAX_ITERS: u32 = 16;

/// Which of the three passes to run, and in what order, per iteration.
/// `pir-driver`'s `--passes` flag builds one of these from a comma list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Inline,
    ScopeResolve,
    Cleanup,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub passes: Vec<Pass>,
    pub max_iters: u32,
    pub recursion_bound: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            passes: vec![Pass::Inline, Pass::ScopeResolve, Pass::Cleanup],
            max_iters: DEFAULT_MAX_ITERS,
            recursion_bound: crate::analysis::scope::DEFAULT_RECURSION_BOUND,
        }
    }
}

/// Runs `config.passes` in order, repeating the whole sequence until no
/// pass in a full pass reports a change or `config.max_iters` is reached,
/// then runs cast insertion once to restore well-typedness and the
/// verifier to confirm the result.
///
/// Capability gaps (`CapabilityError`) are fatal for `function` only —
/// callers driving a whole `Module` should catch `Err` per-Function and
/// keep going, per §7: "other Functions in the Module proceed".
pub fn optimize(module: &mut Module, function_id: FunctionId, config: &PipelineConfig) -> Result<(), PirError> {
    for iter in 0..config.max_iters {
        let mut changed = false;
        for &pass in &config.passes {
            changed |= run_pass(module, function_id, pass, config.recursion_bound)?;
        }
        log::debug!("pipeline iteration {iter}: changed = {changed}");
        if !changed {
            break;
        }
    }

    // Passes (especially the inliner, which splices promise bodies and
    // rewrites env operands) can leave operands whose actual type is no
    // longer a subtype of their declared type; cast insertion restores
    // well-typedness before the verifier runs (§4.3's stated purpose).
    let function = module.function_mut(function_id);
    cast::insert_casts(&mut function.body)?;
    for promise in function.promises.iter_mut() {
        cast::insert_casts(&mut promise.body)?;
    }

    verify_function(module.function(function_id))?;

    Ok(())
}

fn run_pass(module: &mut Module, function_id: FunctionId, pass: Pass, recursion_bound: u32) -> Result<bool, PirError> {
    match pass {
        Pass::Inline => Ok(Inliner::new().apply(module, function_id)?),
        Pass::ScopeResolve => Ok(ScopeResolution::new().with_recursion_bound(recursion_bound).apply(module, function_id)),
        Pass::Cleanup => Ok(Cleanup::new().apply(module.function_mut(function_id))),
    }
}

fn verify_function(function: &Function) -> Result<(), PirError> {
    verify::verify(&function.body).map_err(PirError::from)?;
    for promise in function.promises.iter() {
        verify::verify(&promise.body).map_err(PirError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstId, EnvParent, InstrKind, Value};
    use crate::ty::PirType;
    use pir_index::Idx;

    #[test]
    fn empty_schedule_is_a_no_op_and_verifies() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let body = &mut module.function_mut(f).body;
        let c = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(c)), PirType::voyd());

        let config = PipelineConfig { passes: vec![], ..PipelineConfig::default() };
        optimize(&mut module, f, &config).unwrap();
    }

    #[test]
    fn conventional_schedule_converges_on_a_trivial_function() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], EnvParent::Unknown);
        let body = &mut module.function_mut(f).body;
        let c = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(c)), PirType::voyd());

        optimize(&mut module, f, &PipelineConfig::default()).unwrap();
    }
}

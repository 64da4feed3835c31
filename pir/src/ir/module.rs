use pir_index::IndexVec;

use crate::intern::Interner;

use super::code::Function;
use super::value::{EnvId, FunctionId, Value};
use crate::intern::SymbolId;

/// An explicit first-class environment. Module-owned, unlike instructions, because
/// environments can be referenced from multiple Functions (a closure's
/// captured environment is visible to both its defining and calling
/// Function) and outlive any single Code unit's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvParent {
    /// This environment's parent is definitely the named Environment.
    Known(EnvId),
    /// The parent is not statically known (e.g. the global environment,
    /// or one reached only through opaque host code).
    Unknown,
}

#[derive(Clone, Debug)]
pub struct Environment {
    pub id: EnvId,
    pub parent: EnvParent,
}

/// Owns every Function and Environment in a compilation unit.
/// Also owns the symbol interner, since names are
/// shared across every Function in the module.
#[derive(Default)]
pub struct Module {
    pub functions: IndexVec<FunctionId, Function>,
    pub environments: IndexVec<EnvId, Environment>,
    pub symbols: Interner,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh Environment with the given parent and returns its id.
    pub fn new_environment(&mut self, parent: EnvParent) -> EnvId {
        let id = self.environments.next_index();
        self.environments.push(Environment { id, parent });
        id
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id]
    }

    pub fn intern(&mut self, name: &str) -> crate::intern::SymbolId {
        self.symbols.intern(name)
    }

    /// Allocates a fresh Function
    /// with the given formal names, whose local scope is a fresh
    /// Environment parented on `parent_env`.
    pub fn new_function(&mut self, name: impl Into<String>, formals: Vec<SymbolId>, parent_env: EnvParent) -> FunctionId {
        let env_id = self.new_environment(parent_env);
        let id = self.functions.next_index();
        self.functions.push(Function::new(id, name, formals, Value::Env(env_id)));
        id
    }
}

use std::fmt;

use pir_index::newtype_index;

use crate::ty::PirType;

newtype_index!(pub struct InstrId { .. });
newtype_index!(pub struct BBId { .. });
newtype_index!(pub struct FunctionId { .. });
newtype_index!(pub struct PromiseId { .. });
newtype_index!(pub struct EnvId { .. });
newtype_index!(pub struct ConstId { .. });
newtype_index!(pub struct BuiltinId { .. });

/// An SSA operand. `Nil` and `Missing` are the two process-global
/// singletons; `Env` names a
/// module-owned [`Environment`](super::module::Environment); `Instr` names
/// an instruction's result within whatever [`CodeBody`](super::code::CodeBody)
/// it was produced in.
///
/// `Value` is `Copy`: it is always just an index, never an owning
/// reference, per the "Cyclic graphs" design note.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Nil,
    Missing,
    Env(EnvId),
    Instr(InstrId),
}

impl Value {
    /// The static type of this operand. For `Instr`, looks up the
    /// producing instruction's declared result type in `instrs` — callers
    /// pass the `instrs` table of whichever `CodeBody` currently owns that
    /// instruction id.
    pub fn ty(&self, instrs: &pir_index::IndexVec<InstrId, super::instr::Instr>) -> PirType {
        match *self {
            Value::Nil => PirType::nil(),
            Value::Missing => PirType::missing(),
            Value::Env(_) => PirType::environment(),
            Value::Instr(id) => instrs[id].result_ty,
        }
    }

    pub fn as_instr(&self) -> Option<InstrId> {
        match *self {
            Value::Instr(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Missing => write!(f, "missing"),
            Value::Env(e) => write!(f, "{e:?}"),
            Value::Instr(i) => write!(f, "{i:?}"),
        }
    }
}

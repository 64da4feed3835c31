//! The SSA value/instruction graph: values, instructions, basic blocks,
//! code bodies, and the builder that assembles them.

mod bb;
mod builder;
mod code;
mod instr;
mod module;
mod value;

pub use bb::BasicBlock;
pub use builder::Builder;
pub use code::{CodeBody, Function, Promise};
pub use instr::{BinOp, Effects, Instr, InstrKind, UnOp};
pub use module::{EnvParent, Environment, Module};
pub use value::{BBId, BuiltinId, ConstId, EnvId, FunctionId, InstrId, PromiseId, Value};

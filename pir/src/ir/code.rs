use pir_index::IndexVec;

use crate::intern::SymbolId;

use super::bb::BasicBlock;
use super::instr::{Instr, InstrKind};
use super::value::{BBId, FunctionId, InstrId, PromiseId, Value};
use crate::ty::PirType;

/// The shared body of a Code unit: one entry
/// block and the arenas that own every block and instruction reachable
/// from it. Both `Function` and `Promise` embed one.
#[derive(Clone, Debug)]
pub struct CodeBody {
    pub entry: BBId,
    pub blocks: IndexVec<BBId, BasicBlock>,
    pub instrs: IndexVec<InstrId, Instr>,
    /// The unit's local scope operand: an `Environment` value, or the
    /// result of whatever instruction constructs/receives it (e.g. an
    /// inlined callee's `MkEnv`, or a formal-argument environment passed
    /// in from the caller).
    pub env: Value,
}

impl CodeBody {
    pub fn new(env: Value) -> Self {
        let mut blocks = IndexVec::new();
        let entry = blocks.push(BasicBlock::new());
        CodeBody { entry, blocks, instrs: IndexVec::new(), env }
    }

    pub fn create_bb(&mut self) -> BBId {
        self.blocks.push(BasicBlock::new())
    }

    /// Appends a new instruction to `bb` and returns its id. Does not
    /// validate that `bb` doesn't already have a terminator — that is the
    /// verifier's job, run explicitly after building or transforming.
    pub fn push_instr(&mut self, bb: BBId, kind: InstrKind, result_ty: PirType) -> InstrId {
        let id = self.instrs.next_index();
        self.instrs.push(Instr { id, bb, result_ty, kind });
        self.blocks[bb].instrs.push(id);
        id
    }

    /// Allocates a new instruction in the arena without appending it to
    /// `bb`'s instruction list. For callers that need to splice the id in at
    /// a specific position themselves (e.g. `cast::cast_chain`, which emits
    /// a chain of casts that `insert_casts` then inserts immediately before
    /// the instruction they feed) — using `push_instr` there would append
    /// the id to the block twice.
    pub fn push_instr_detached(&mut self, bb: BBId, kind: InstrKind, result_ty: PirType) -> InstrId {
        let id = self.instrs.next_index();
        self.instrs.push(Instr { id, bb, result_ty, kind });
        id
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id]
    }

    pub fn value_ty(&self, v: Value) -> PirType {
        v.ty(&self.instrs)
    }
}

/// A Function: an ordered list of formal parameter names plus an owned
/// list of `Promise` code units.
#[derive(Clone, Debug)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub formals: Vec<SymbolId>,
    pub body: CodeBody,
    pub promises: IndexVec<PromiseId, Promise>,
}

impl Function {
    pub fn new(id: FunctionId, name: impl Into<String>, formals: Vec<SymbolId>, env: Value) -> Self {
        Function { id, name: name.into(), formals, body: CodeBody::new(env), promises: IndexVec::new() }
    }

    pub fn create_promise(&mut self) -> PromiseId {
        let index = self.promises.len() as u32;
        let id = self.promises.next_index();
        let env = self.body.env;
        self.promises.push(Promise { id, owner: self.id, index, body: CodeBody::new(env) });
        id
    }

    /// Adopts a pre-built `body` (e.g. cloned out of another Function being
    /// inlined into this one) as a new owned Promise. Unlike
    /// `create_promise`, the body's code is not discarded — this is how
    /// inlining migrates a callee's promises into the caller without losing
    /// their contents.
    pub fn adopt_promise(&mut self, body: CodeBody) -> PromiseId {
        let index = self.promises.len() as u32;
        let id = self.promises.next_index();
        self.promises.push(Promise { id, owner: self.id, index, body });
        id
    }
}

/// A Promise: a code unit representing an unevaluated thunk. Knows its
/// owning Function and its index within that function's promise list.
#[derive(Clone, Debug)]
pub struct Promise {
    pub id: PromiseId,
    pub owner: FunctionId,
    pub index: u32,
    pub body: CodeBody,
}

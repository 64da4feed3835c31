//! The textual dump: one block per line group,
//! instructions printed as `<type> %id = <op> (<args…>)`, phis as
//! `Phi(<args…>)`, an unconditional tail as `goto BB <id>`.
//!
//! The exact spelling is not meaningful in itself — this module picks one
//! concrete rendering, useful for `pir-driver` and for eyeballing a
//! function mid-pipeline, and is not meant to round-trip byte-for-byte
//! with anything.

use std::fmt::Write as _;

use itertools::Itertools as _;

use crate::builtin::BuiltinTable;
use crate::constpool::ConstPool;
use crate::ir::{BBId, CodeBody, InstrId, InstrKind, Module, Value};
use crate::intern::Interner;

/// Everything the dump needs to resolve an otherwise-opaque handle to a
/// display name: the module's symbol table plus the host-owned constant
/// and builtin tables. A driver that never populated a `ConstPool`/
/// `BuiltinTable` can pass empty ones — `LdConst`/`CallBuiltin` operands
/// then print their bare id.
pub struct DumpContext<'a> {
    pub symbols: &'a Interner,
    pub consts: Option<&'a ConstPool>,
    pub builtins: Option<&'a BuiltinTable>,
}

impl<'a> DumpContext<'a> {
    pub fn new(symbols: &'a Interner) -> Self {
        DumpContext { symbols, consts: None, builtins: None }
    }

    pub fn with_consts(mut self, consts: &'a ConstPool) -> Self {
        self.consts = Some(consts);
        self
    }

    pub fn with_builtins(mut self, builtins: &'a BuiltinTable) -> Self {
        self.builtins = Some(builtins);
        self
    }
}

/// Dumps every Function in `module`, concatenated (§6: "module-level dump
/// concatenating all Functions").
pub fn dump_module(module: &Module, ctx: &DumpContext) -> String {
    let mut out = String::new();
    for function in module.functions.iter() {
        dump_function_into(&mut out, function, ctx);
        out.push('\n');
    }
    out
}

pub fn dump_function(function: &crate::ir::Function, ctx: &DumpContext) -> String {
    let mut out = String::new();
    dump_function_into(&mut out, function, ctx);
    out
}

fn dump_function_into(out: &mut String, function: &crate::ir::Function, ctx: &DumpContext) {
    let formals: Vec<&str> = function.formals.iter().map(|&s| ctx.symbols.resolve(s)).collect();
    let _ = writeln!(out, "fn {}({}) {{", function.name, formals.join(", "));
    dump_body(out, &function.body, ctx);
    let _ = writeln!(out, "}}");
    for (idx, promise) in function.promises.iter_enumerated() {
        let _ = writeln!(out, "promise {} of {} {{", idx.as_usize(), function.name);
        dump_body(out, &promise.body, ctx);
        let _ = writeln!(out, "}}");
    }
}

fn dump_body(out: &mut String, body: &CodeBody, ctx: &DumpContext) {
    for bb in body.blocks.indices() {
        dump_block(out, body, bb, ctx);
    }
}

fn dump_block(out: &mut String, body: &CodeBody, bb: BBId, ctx: &DumpContext) {
    let _ = writeln!(out, "  BB{}:", bb.as_usize());
    for &id in &body.blocks[bb].instrs {
        dump_instr(out, body, id, ctx);
    }
    let block = &body.blocks[bb];
    if block.next1.is_none() && block.next0.is_some() && !ends_in_terminator(body, bb) {
        let _ = writeln!(out, "    goto BB{}", block.next0.unwrap().as_usize());
    }
}

fn ends_in_terminator(body: &CodeBody, bb: BBId) -> bool {
    body.blocks[bb]
        .instrs
        .last()
        .map(|&id| body.instrs[id].kind.is_terminator())
        .unwrap_or(false)
}

fn dump_instr(out: &mut String, body: &CodeBody, id: InstrId, ctx: &DumpContext) {
    let instr = &body.instrs[id];
    let ty = format!("{:?}", instr.result_ty);
    let rendered = match &instr.kind {
        InstrKind::Phi(inputs) => format!("Phi({})", join_values(inputs, body, ctx)),
        other => format!("{}({})", op_name(other), join_values(&other.operands(), body, ctx)),
    };
    let _ = writeln!(out, "    {ty} %{} = {rendered}", id.as_usize());
}

fn join_values(values: &[Value], body: &CodeBody, ctx: &DumpContext) -> String {
    values.iter().map(|v| dump_value(*v, body, ctx)).join(", ")
}

fn dump_value(v: Value, body: &CodeBody, ctx: &DumpContext) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Missing => "missing".to_string(),
        Value::Env(e) => format!("env{}", e.as_usize()),
        Value::Instr(id) => {
            if let InstrKind::LdConst(c) = body.instrs[id].kind {
                if let Some(pool) = ctx.consts {
                    return format!("const({:?})", pool.get(c));
                }
            }
            format!("%{}", id.as_usize())
        }
    }
}

fn op_name(kind: &InstrKind) -> String {
    match kind {
        InstrKind::LdConst(_) => "LdConst".to_string(),
        InstrKind::LdVar { .. } => "LdVar".to_string(),
        InstrKind::LdFun { .. } => "LdFun".to_string(),
        InstrKind::LdArg { index, .. } => format!("LdArg<{index}>"),
        InstrKind::StVar { .. } => "StVar".to_string(),
        InstrKind::MkEnv { .. } => "MkEnv".to_string(),
        InstrKind::MkArg { .. } => "MkArg".to_string(),
        InstrKind::MkCls { .. } => "MkCls".to_string(),
        InstrKind::MkClsFun { .. } => "MkClsFun".to_string(),
        InstrKind::Force(_) => "Force".to_string(),
        InstrKind::Call { .. } => "Call".to_string(),
        InstrKind::CallBuiltin { builtin, .. } => format!("CallBuiltin<{}>", builtin.as_usize()),
        InstrKind::Branch(_) => "Branch".to_string(),
        InstrKind::Return(_) => "Return".to_string(),
        InstrKind::Phi(_) => "Phi".to_string(),
        InstrKind::ChkMissing(_) => "ChkMissing".to_string(),
        InstrKind::ChkClosure(_) => "ChkClosure".to_string(),
        InstrKind::AsLogical(_) => "AsLogical".to_string(),
        InstrKind::AsTest(_) => "AsTest".to_string(),
        InstrKind::Binop(op, ..) => format!("Binop<{op}>"),
        InstrKind::Unop(op, _) => format!("Unop<{op:?}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstId, Module, Value};
    use crate::ty::PirType;
    use pir_index::Idx;

    #[test]
    fn dumps_a_trivial_return() {
        let mut module = Module::new();
        let f = module.new_function("f", vec![], crate::ir::EnvParent::Unknown);
        let body = &mut module.function_mut(f).body;
        let c = body.push_instr(body.entry, InstrKind::LdConst(ConstId::new(0)), PirType::val());
        body.push_instr(body.entry, InstrKind::Return(Value::Instr(c)), PirType::voyd());

        let ctx = DumpContext::new(&module.symbols);
        let text = dump_function(module.function(f), &ctx);
        assert!(text.contains("fn f()"));
        assert!(text.contains("Return"));
        assert!(text.contains("LdConst"));
    }
}

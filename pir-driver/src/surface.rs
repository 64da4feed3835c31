//! The textual surface syntax: a minimal, newline-
//! delimited instruction format for building a `Module` from a file without
//! a real host front end. Grammar:
//!
//! ```text
//! program  := item*
//! item     := "fn" ident "(" (ident ("," ident)*)? ")" "{" block* "}"
//!           | "promise" int "of" ident "{" block* "}"
//! block    := ident ":" line*
//! line     := "%" reg "=" opcode "(" arg* ")"
//!           | "branch" value "->" ident "," ident
//!           | "return" value
//!           | "goto" ident
//! ```
//!
//! `value` is `%reg`, `nil`, `missing`, or `env` (the enclosing Code unit's
//! own scope operand — the only environment a Code unit built this way ever
//! carries, since Module-level `Environment`s are otherwise constructed
//! only by the host's real bytecode reader, out of scope here). `//` starts
//! a line comment. A Function's own Promises may be declared anywhere in
//! the file as separate `promise <index> of <function>` items and referred
//! to from `mkarg` by that same index, regardless of declaration order.

use std::collections::HashMap;

use pir::builtin::BuiltinTable;
use pir::constpool::{ConstPool, ConstValue};
use pir::ir::{BBId, BinOp, CodeBody, EnvParent, FunctionId, InstrId, InstrKind, Module, PromiseId, UnOp, Value};
use pir::ty::{PirType, RKinds};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: unexpected end of input")]
    UnexpectedEof { line: usize },
    #[error("line {line}: expected {expected}, found {found}")]
    Unexpected { line: usize, expected: &'static str, found: String },
    #[error("line {line}: unknown opcode `{opcode}`")]
    UnknownOpcode { line: usize, opcode: String },
    #[error("line {line}: register %{reg} used before definition")]
    UndefinedRegister { line: usize, reg: u32 },
    #[error("line {line}: no block labelled `{label}`")]
    UndefinedBlock { line: usize, label: String },
    #[error("line {line}: no function named `{name}`")]
    UndefinedFunction { line: usize, name: String },
    #[error("line {line}: promise index {index} has not been declared for this function")]
    UndefinedPromise { line: usize, index: u32 },
}

/// Everything a parse produces: the `Module` itself plus the host-owned
/// side tables a driver needs to dump it meaningfully,
/// and the Functions in declaration order.
pub struct ParsedProgram {
    pub module: Module,
    pub consts: ConstPool,
    pub builtins: BuiltinTable,
    pub functions: Vec<FunctionId>,
}

pub fn parse(source: &str) -> Result<ParsedProgram, ParseError> {
    let toks = lex(source);
    let mut p = Parser {
        toks: &toks,
        pos: 0,
        module: Module::new(),
        consts: ConstPool::new(),
        builtins: BuiltinTable::new(),
        by_name: HashMap::new(),
        functions: Vec::new(),
        promises: HashMap::new(),
        items: Vec::new(),
    };
    p.register_functions()?;
    p.register_promises()?;
    p.parse_bodies()?;
    Ok(ParsedProgram { module: p.module, consts: p.consts, builtins: p.builtins, functions: p.functions })
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Reg(u32),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Eq,
    Arrow,
    Sym(String),
}

fn lex(source: &str) -> Vec<(Tok, usize)> {
    let mut out = Vec::new();
    let mut line = 1usize;
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                out.push((Tok::LParen, line));
                i += 1;
            }
            ')' => {
                out.push((Tok::RParen, line));
                i += 1;
            }
            '{' => {
                out.push((Tok::LBrace, line));
                i += 1;
            }
            '}' => {
                out.push((Tok::RBrace, line));
                i += 1;
            }
            ',' => {
                out.push((Tok::Comma, line));
                i += 1;
            }
            ':' => {
                out.push((Tok::Colon, line));
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                out.push((Tok::Arrow, line));
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                out.push((Tok::Sym("==".to_string()), line));
                i += 2;
            }
            '=' => {
                out.push((Tok::Eq, line));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                out.push((Tok::Sym("!=".to_string()), line));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                out.push((Tok::Sym("<=".to_string()), line));
                i += 2;
            }
            '<' => {
                out.push((Tok::Sym("<".to_string()), line));
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                out.push((Tok::Sym(">=".to_string()), line));
                i += 2;
            }
            '>' => {
                out.push((Tok::Sym(">".to_string()), line));
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                out.push((Tok::Sym(c.to_string()), line));
                i += 1;
            }
            '%' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                let digits: String = chars[start..j].iter().collect();
                out.push((Tok::Reg(digits.parse().unwrap_or(0)), line));
                i = j;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                let digits: String = chars[start..j].iter().collect();
                out.push((Tok::Int(digits.parse().unwrap_or(0)), line));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let ident: String = chars[start..j].iter().collect();
                out.push((Tok::Ident(ident), line));
                i = j;
            }
            _ => i += 1,
        }
    }
    out
}

/// Which Code unit the instructions currently being parsed belong to.
#[derive(Clone, Copy)]
enum Target {
    Function(FunctionId),
    Promise(FunctionId, PromiseId),
}

enum ItemSpan {
    Function { fid: FunctionId, header_start: usize },
    Promise { owner_name: String, index: u32, header_start: usize },
}

struct CodeCtx {
    regs: HashMap<u32, InstrId>,
    labels: HashMap<String, BBId>,
}

struct Parser<'a> {
    toks: &'a [(Tok, usize)],
    pos: usize,
    module: Module,
    consts: ConstPool,
    builtins: BuiltinTable,
    by_name: HashMap<String, FunctionId>,
    functions: Vec<FunctionId>,
    promises: HashMap<(FunctionId, u32), PromiseId>,
    items: Vec<ItemSpan>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.toks.get(self.pos).or_else(|| self.toks.last()).map(|(_, l)| *l).unwrap_or(1)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Tok, desc: &'static str) -> Result<(), ParseError> {
        let line = self.line();
        match self.bump() {
            Some(t) if &t == want => Ok(()),
            Some(t) => Err(ParseError::Unexpected { line, expected: desc, found: format!("{t:?}") }),
            None => Err(ParseError::UnexpectedEof { line }),
        }
    }

    fn expect_ident(&mut self, desc: &'static str) -> Result<String, ParseError> {
        let line = self.line();
        match self.bump() {
            Some(Tok::Ident(s)) => Ok(s),
            Some(t) => Err(ParseError::Unexpected { line, expected: desc, found: format!("{t:?}") }),
            None => Err(ParseError::UnexpectedEof { line }),
        }
    }

    fn expect_int(&mut self, desc: &'static str) -> Result<i64, ParseError> {
        let line = self.line();
        match self.bump() {
            Some(Tok::Int(n)) => Ok(n),
            Some(t) => Err(ParseError::Unexpected { line, expected: desc, found: format!("{t:?}") }),
            None => Err(ParseError::UnexpectedEof { line }),
        }
    }

    /// Pass 1: register every Function's name/formals (so forward and
    /// mutual references resolve regardless of source order) and remember
    /// where each item's body starts, without interpreting bodies yet.
    fn register_functions(&mut self) -> Result<(), ParseError> {
        self.pos = 0;
        loop {
            match self.peek() {
                None => break,
                Some(Tok::Ident(kw)) if kw == "fn" => {
                    let header_start = self.pos;
                    self.bump();
                    let name = self.expect_ident("function name")?;
                    self.expect(&Tok::LParen, "(")?;
                    let mut formals = Vec::new();
                    if !matches!(self.peek(), Some(Tok::RParen)) {
                        loop {
                            let formal = self.expect_ident("formal name")?;
                            formals.push(self.module.intern(&formal));
                            if matches!(self.peek(), Some(Tok::Comma)) {
                                self.bump();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Tok::RParen, ")")?;
                    let fid = self.module.new_function(name.clone(), formals, EnvParent::Unknown);
                    self.by_name.insert(name, fid);
                    self.functions.push(fid);
                    self.skip_balanced_braces()?;
                    self.items.push(ItemSpan::Function { fid, header_start });
                }
                Some(Tok::Ident(kw)) if kw == "promise" => {
                    let header_start = self.pos;
                    self.bump();
                    let index = self.expect_int("promise index")? as u32;
                    let of = self.expect_ident("`of`")?;
                    if of != "of" {
                        return Err(ParseError::Unexpected { line: self.line(), expected: "`of`", found: of });
                    }
                    let owner_name = self.expect_ident("owning function name")?;
                    self.skip_balanced_braces()?;
                    self.items.push(ItemSpan::Promise { owner_name, index, header_start });
                }
                Some(other) => {
                    return Err(ParseError::Unexpected { line: self.line(), expected: "`fn` or `promise`", found: format!("{other:?}") });
                }
            }
        }
        Ok(())
    }

    /// Advances past one already-opened `{ ... }` block without
    /// interpreting its contents.
    fn skip_balanced_braces(&mut self) -> Result<(), ParseError> {
        self.expect(&Tok::LBrace, "{")?;
        let mut depth = 1u32;
        while depth > 0 {
            match self.bump() {
                Some(Tok::LBrace) => depth += 1,
                Some(Tok::RBrace) => depth -= 1,
                Some(_) => {}
                None => return Err(ParseError::UnexpectedEof { line: self.line() }),
            }
        }
        Ok(())
    }

    /// Pass 2: allocate every declared Promise (now that every owner
    /// Function name resolves), independent of where in the file it was
    /// declared relative to its owner.
    fn register_promises(&mut self) -> Result<(), ParseError> {
        for item in &self.items {
            if let ItemSpan::Promise { owner_name, index, .. } = item {
                let owner = *self
                    .by_name
                    .get(owner_name)
                    .ok_or_else(|| ParseError::UndefinedFunction { line: 0, name: owner_name.clone() })?;
                let pid = self.module.function_mut(owner).create_promise();
                self.promises.insert((owner, *index), pid);
            }
        }
        Ok(())
    }

    /// Pass 3: revisit each item's saved position and parse its blocks.
    fn parse_bodies(&mut self) -> Result<(), ParseError> {
        let items = std::mem::take(&mut self.items);
        for item in &items {
            match item {
                ItemSpan::Function { fid, header_start } => {
                    self.pos = *header_start;
                    self.parse_function_item(*fid)?;
                }
                ItemSpan::Promise { owner_name, index, header_start } => {
                    let owner = *self.by_name.get(owner_name).expect("registered in pass 1");
                    let pid = *self.promises.get(&(owner, *index)).expect("registered in pass 2");
                    self.pos = *header_start;
                    self.parse_promise_item(owner, pid)?;
                }
            }
        }
        self.items = items;
        Ok(())
    }

    fn parse_function_item(&mut self, fid: FunctionId) -> Result<(), ParseError> {
        self.bump(); // "fn"
        self.bump(); // name
        self.expect(&Tok::LParen, "(")?;
        while !matches!(self.peek(), Some(Tok::RParen)) {
            self.bump();
        }
        self.expect(&Tok::RParen, ")")?;
        self.parse_blocks_for(Target::Function(fid))
    }

    fn parse_promise_item(&mut self, owner: FunctionId, pid: PromiseId) -> Result<(), ParseError> {
        self.bump(); // "promise"
        self.bump(); // index
        self.bump(); // "of"
        self.bump(); // owner name
        self.parse_blocks_for(Target::Promise(owner, pid))
    }

    fn body_ref(&self, target: Target) -> &CodeBody {
        match target {
            Target::Function(f) => &self.module.function(f).body,
            Target::Promise(f, p) => &self.module.function(f).promises[p].body,
        }
    }

    fn body_mut(&mut self, target: Target) -> &mut CodeBody {
        match target {
            Target::Function(f) => &mut self.module.function_mut(f).body,
            Target::Promise(f, p) => &mut self.module.function_mut(f).promises[p].body,
        }
    }

    /// Scans (without consuming) the block headers (`ident ":"`) of the
    /// body starting right after the just-consumed `"{"`, in file order,
    /// and allocates one `BBId` per distinct label — the first is the
    /// Code unit's existing entry block, every other is freshly created.
    fn build_label_map(&mut self, target: Target) -> HashMap<String, BBId> {
        let mut labels = Vec::new();
        let mut depth = 1i32;
        let mut i = self.pos;
        while i < self.toks.len() && depth > 0 {
            match &self.toks[i].0 {
                Tok::LBrace => depth += 1,
                Tok::RBrace => depth -= 1,
                Tok::Ident(name) if depth == 1 && matches!(self.toks.get(i + 1), Some((Tok::Colon, _))) => {
                    labels.push(name.clone());
                }
                _ => {}
            }
            i += 1;
        }

        let entry = self.body_ref(target).entry;
        let mut map = HashMap::new();
        for label in labels {
            if map.contains_key(&label) {
                continue;
            }
            let bb = if map.is_empty() { entry } else { self.body_mut(target).create_bb() };
            map.insert(label, bb);
        }
        map
    }

    fn parse_blocks_for(&mut self, target: Target) -> Result<(), ParseError> {
        self.expect(&Tok::LBrace, "{")?;
        let labels = self.build_label_map(target);
        let mut ctx = CodeCtx { regs: HashMap::new(), labels };
        loop {
            match self.peek() {
                Some(Tok::RBrace) => break,
                Some(Tok::Ident(_)) if matches!(self.peek_at(1), Some(Tok::Colon)) => {
                    let label = self.expect_ident("block label")?;
                    self.expect(&Tok::Colon, ":")?;
                    let bb = *ctx
                        .labels
                        .get(&label)
                        .ok_or_else(|| ParseError::UndefinedBlock { line: self.line(), label: label.clone() })?;
                    self.parse_block_lines(target, bb, &mut ctx)?;
                }
                Some(other) => {
                    return Err(ParseError::Unexpected { line: self.line(), expected: "block label", found: format!("{other:?}") });
                }
                None => return Err(ParseError::UnexpectedEof { line: self.line() }),
            }
        }
        self.expect(&Tok::RBrace, "}")
    }

    fn parse_block_lines(&mut self, target: Target, bb: BBId, ctx: &mut CodeCtx) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(Tok::Reg(_)) => self.parse_instr_line(target, bb, ctx)?,
                Some(Tok::Ident(kw)) if kw == "branch" => self.parse_branch_line(target, bb, ctx)?,
                Some(Tok::Ident(kw)) if kw == "return" => self.parse_return_line(target, bb, ctx)?,
                Some(Tok::Ident(kw)) if kw == "goto" => self.parse_goto_line(target, bb, ctx)?,
                Some(Tok::Ident(_)) if matches!(self.peek_at(1), Some(Tok::Colon)) => return Ok(()),
                Some(Tok::RBrace) => return Ok(()),
                Some(other) => {
                    return Err(ParseError::Unexpected { line: self.line(), expected: "instruction or terminator", found: format!("{other:?}") });
                }
                None => return Err(ParseError::UnexpectedEof { line: self.line() }),
            }
        }
    }

    fn parse_instr_line(&mut self, target: Target, bb: BBId, ctx: &mut CodeCtx) -> Result<(), ParseError> {
        let reg = match self.bump() {
            Some(Tok::Reg(n)) => n,
            _ => unreachable!("caller only dispatches here on Tok::Reg"),
        };
        self.expect(&Tok::Eq, "=")?;
        let opcode = self.expect_ident("opcode")?;
        self.expect(&Tok::LParen, "(")?;
        let (kind, ty) = self.parse_opcode(target, &opcode, ctx)?;
        self.expect(&Tok::RParen, ")")?;
        let id = self.body_mut(target).push_instr(bb, kind, ty);
        ctx.regs.insert(reg, id);
        Ok(())
    }

    fn parse_branch_line(&mut self, target: Target, bb: BBId, ctx: &mut CodeCtx) -> Result<(), ParseError> {
        self.bump(); // "branch"
        let test = self.parse_value(target, ctx)?;
        self.expect(&Tok::Arrow, "->")?;
        let then_label = self.expect_ident("then-block label")?;
        self.expect(&Tok::Comma, ",")?;
        let else_label = self.expect_ident("else-block label")?;
        let then_bb = *ctx
            .labels
            .get(&then_label)
            .ok_or_else(|| ParseError::UndefinedBlock { line: self.line(), label: then_label.clone() })?;
        let else_bb = *ctx
            .labels
            .get(&else_label)
            .ok_or_else(|| ParseError::UndefinedBlock { line: self.line(), label: else_label.clone() })?;
        self.body_mut(target).push_instr(bb, InstrKind::Branch(test), PirType::voyd());
        let body = self.body_mut(target);
        body.blocks[bb].next0 = Some(then_bb);
        body.blocks[bb].next1 = Some(else_bb);
        Ok(())
    }

    fn parse_return_line(&mut self, target: Target, bb: BBId, ctx: &mut CodeCtx) -> Result<(), ParseError> {
        self.bump(); // "return"
        let v = self.parse_value(target, ctx)?;
        self.body_mut(target).push_instr(bb, InstrKind::Return(v), PirType::voyd());
        Ok(())
    }

    fn parse_goto_line(&mut self, target: Target, bb: BBId, ctx: &mut CodeCtx) -> Result<(), ParseError> {
        self.bump(); // "goto"
        let label = self.expect_ident("target block label")?;
        let dest = *ctx
            .labels
            .get(&label)
            .ok_or_else(|| ParseError::UndefinedBlock { line: self.line(), label: label.clone() })?;
        self.body_mut(target).blocks[bb].next0 = Some(dest);
        Ok(())
    }

    fn parse_value(&mut self, target: Target, ctx: &CodeCtx) -> Result<Value, ParseError> {
        let line = self.line();
        match self.bump() {
            Some(Tok::Reg(n)) => ctx.regs.get(&n).copied().map(Value::Instr).ok_or(ParseError::UndefinedRegister { line, reg: n }),
            Some(Tok::Ident(s)) if s == "nil" => Ok(Value::Nil),
            Some(Tok::Ident(s)) if s == "missing" => Ok(Value::Missing),
            Some(Tok::Ident(s)) if s == "env" => Ok(self.body_ref(target).env),
            Some(t) => Err(ParseError::Unexpected { line, expected: "value", found: format!("{t:?}") }),
            None => Err(ParseError::UnexpectedEof { line }),
        }
    }

    fn parse_opcode(&mut self, target: Target, opcode: &str, ctx: &mut CodeCtx) -> Result<(InstrKind, PirType), ParseError> {
        match opcode {
            "ldconst" => {
                let line = self.line();
                let (value, ty) = match self.bump() {
                    Some(Tok::Int(n)) => (ConstValue::Integer(n), PirType::integer()),
                    Some(Tok::Ident(s)) if s == "true" => (ConstValue::Logical(true), PirType::logical()),
                    Some(Tok::Ident(s)) if s == "false" => (ConstValue::Logical(false), PirType::logical()),
                    Some(Tok::Ident(s)) => (ConstValue::Symbol(s), PirType::single(RKinds::SYMBOL)),
                    Some(t) => return Err(ParseError::Unexpected { line, expected: "constant", found: format!("{t:?}") }),
                    None => return Err(ParseError::UnexpectedEof { line }),
                };
                let id = self.consts.intern(value);
                Ok((InstrKind::LdConst(id), ty))
            }
            "ldvar" => {
                let env = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let name = self.expect_ident("variable name")?;
                let sym = self.module.intern(&name);
                Ok((InstrKind::LdVar { name: sym, env }, PirType::any()))
            }
            "ldfun" => {
                let env = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let name = self.expect_ident("function name")?;
                let sym = self.module.intern(&name);
                Ok((InstrKind::LdFun { name: sym, env }, PirType::any()))
            }
            "ldarg" => {
                let env = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let index = self.expect_int("argument index")? as u32;
                Ok((InstrKind::LdArg { index, env }, PirType::any()))
            }
            "stvar" => {
                let env = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let name = self.expect_ident("variable name")?;
                let sym = self.module.intern(&name);
                self.expect(&Tok::Comma, ",")?;
                let value = self.parse_value(target, ctx)?;
                Ok((InstrKind::StVar { name: sym, value, env }, PirType::voyd()))
            }
            "mkenv" => {
                let parent = self.parse_value(target, ctx)?;
                let mut names = Vec::new();
                let mut values = Vec::new();
                while matches!(self.peek(), Some(Tok::Comma)) {
                    self.bump();
                    let name = self.expect_ident("binding name")?;
                    self.expect(&Tok::Eq, "=")?;
                    let value = self.parse_value(target, ctx)?;
                    names.push(self.module.intern(&name));
                    values.push(value);
                }
                Ok((InstrKind::MkEnv { parent, names, values }, PirType::environment()))
            }
            "mkarg" => {
                let strict = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let line = self.line();
                let index = self.expect_int("promise index")? as u32;
                self.expect(&Tok::Comma, ",")?;
                let env = self.parse_value(target, ctx)?;
                let owner = match target {
                    Target::Function(f) => f,
                    Target::Promise(f, _) => f,
                };
                let pid = *self.promises.get(&(owner, index)).ok_or(ParseError::UndefinedPromise { line, index })?;
                let ty = if matches!(strict, Value::Missing) { PirType::any() } else { self.body_ref(target).value_ty(strict) };
                Ok((InstrKind::MkArg { strict, promise: pid, env }, ty))
            }
            "mkcls" => {
                let env = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let line = self.line();
                let fname = self.expect_ident("closure's function name")?;
                let fid = *self.by_name.get(&fname).ok_or(ParseError::UndefinedFunction { line, name: fname })?;
                Ok((InstrKind::MkCls { env, fun: fid }, PirType::closure()))
            }
            "mkclsfun" => {
                let env = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let line = self.line();
                let fname = self.expect_ident("closure's function name")?;
                let fid = *self.by_name.get(&fname).ok_or(ParseError::UndefinedFunction { line, name: fname })?;
                self.expect(&Tok::Comma, ",")?;
                let extra = self.parse_value(target, ctx)?;
                Ok((InstrKind::MkClsFun { env, fun: fid, extra }, PirType::closure()))
            }
            "force" => {
                let v = self.parse_value(target, ctx)?;
                Ok((InstrKind::Force(v), PirType::val_or_missing()))
            }
            "call" => {
                let callee = self.parse_value(target, ctx)?;
                let mut args = Vec::new();
                while matches!(self.peek(), Some(Tok::Comma)) {
                    self.bump();
                    args.push(self.parse_value(target, ctx)?);
                }
                Ok((InstrKind::Call { callee, args }, PirType::any()))
            }
            "callbuiltin" => {
                let name = self.expect_ident("builtin name")?;
                let id = self.builtins.register(name);
                let mut args = Vec::new();
                while matches!(self.peek(), Some(Tok::Comma)) {
                    self.bump();
                    args.push(self.parse_value(target, ctx)?);
                }
                Ok((InstrKind::CallBuiltin { builtin: id, args }, PirType::any()))
            }
            "phi" => {
                let mut inputs = vec![self.parse_value(target, ctx)?];
                while matches!(self.peek(), Some(Tok::Comma)) {
                    self.bump();
                    inputs.push(self.parse_value(target, ctx)?);
                }
                let ty = inputs.iter().fold(PirType::bottom(), |acc, v| acc.join(self.body_ref(target).value_ty(*v)));
                Ok((InstrKind::Phi(inputs), ty))
            }
            "chkmissing" => {
                let v = self.parse_value(target, ctx)?;
                Ok((InstrKind::ChkMissing(v), PirType::val()))
            }
            "chkclosure" => {
                let v = self.parse_value(target, ctx)?;
                Ok((InstrKind::ChkClosure(v), PirType::val()))
            }
            "aslogical" => {
                let v = self.parse_value(target, ctx)?;
                Ok((InstrKind::AsLogical(v), PirType::logical()))
            }
            "astest" => {
                let v = self.parse_value(target, ctx)?;
                Ok((InstrKind::AsTest(v), PirType::test()))
            }
            "binop" => {
                let line = self.line();
                let op = match self.bump() {
                    Some(Tok::Sym(s)) => parse_binop(&s).ok_or_else(|| ParseError::Unexpected { line, expected: "binary operator", found: s })?,
                    Some(t) => return Err(ParseError::Unexpected { line, expected: "binary operator", found: format!("{t:?}") }),
                    None => return Err(ParseError::UnexpectedEof { line }),
                };
                self.expect(&Tok::Comma, ",")?;
                let lhs = self.parse_value(target, ctx)?;
                self.expect(&Tok::Comma, ",")?;
                let rhs = self.parse_value(target, ctx)?;
                let ty = if op.produces_logical() { PirType::logical() } else { PirType::integer() };
                Ok((InstrKind::Binop(op, lhs, rhs), ty))
            }
            "unop" => {
                let line = self.line();
                let name = self.expect_ident("unary operator")?;
                let op = match name.as_str() {
                    "neg" => UnOp::Neg,
                    "not" => UnOp::Not,
                    other => return Err(ParseError::Unexpected { line, expected: "`neg` or `not`", found: other.to_string() }),
                };
                self.expect(&Tok::Comma, ",")?;
                let v = self.parse_value(target, ctx)?;
                let ty = if matches!(op, UnOp::Not) { PirType::logical() } else { PirType::integer() };
                Ok((InstrKind::Unop(op, v), ty))
            }
            other => Err(ParseError::UnknownOpcode { line: self.line(), opcode: other.to_string() }),
        }
    }
}

fn parse_binop(s: &str) -> Option<BinOp> {
    match s {
        "+" => Some(BinOp::Add),
        "-" => Some(BinOp::Sub),
        "*" => Some(BinOp::Mul),
        "/" => Some(BinOp::Div),
        "==" => Some(BinOp::Eq),
        "!=" => Some(BinOp::Neq),
        "<" => Some(BinOp::Lt),
        "<=" => Some(BinOp::Lte),
        ">" => Some(BinOp::Gt),
        ">=" => Some(BinOp::Gte),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_trivial_function() {
        let src = "fn f(x) {\n  bb0:\n    %0 = ldconst 1\n    %1 = binop(+, %0, %0)\n    return %1\n}\n";
        let program = parse(src).unwrap();
        assert_eq!(program.functions.len(), 1);
        let f = program.module.function(program.functions[0]);
        assert_eq!(f.name, "f");
        assert_eq!(f.formals.len(), 1);
    }

    #[test]
    fn parses_branch_and_phi_across_blocks() {
        let src = "fn f() {\n\
                   bb0:\n\
                   %0 = ldconst 1\n\
                   %1 = astest(%0)\n\
                   branch %1 -> bb1, bb2\n\
                   bb1:\n\
                   %2 = ldconst 2\n\
                   goto bb3\n\
                   bb2:\n\
                   %3 = ldconst 3\n\
                   goto bb3\n\
                   bb3:\n\
                   %4 = phi(%2, %3)\n\
                   return %4\n\
                   }\n";
        let program = parse(src).unwrap();
        let f = program.module.function(program.functions[0]);
        assert_eq!(f.body.blocks.len(), 4);
    }

    #[test]
    fn resolves_a_promise_declared_before_its_owner() {
        let src = "promise 0 of f {\n  bb0:\n    %0 = ldconst 1\n    return %0\n}\n\
                   fn f(x) {\n  bb0:\n    %0 = mkarg(missing, 0, env)\n    %1 = force(%0)\n    return %1\n}\n";
        let program = parse(src).unwrap();
        let f = program.module.function(program.functions[0]);
        assert_eq!(f.promises.len(), 1);
    }
}

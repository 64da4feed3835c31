use std::fmt;

use crate::intern::SymbolId;
use crate::ty::PirType;

use super::value::{BBId, BuiltinId, ConstId, FunctionId, InstrId, PromiseId, Value};

/// Binary arithmetic/comparison operators. Arithmetic ops are closed over
/// `integer`-ish operands and produce a value; comparisons produce a
/// `logical`. Which is which is fixed by [`BinOp::produces_logical`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinOp {
    pub fn produces_logical(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// The tagged variant over every concrete instruction kind. One enum
/// rather than a class hierarchy, per the "Polymorphism
/// over instructions" design note; fixed-arity variants hold their operands
/// inline, the one variadic family (`MkEnv`, `Call`, `CallBuiltin`, `Phi`)
/// holds a `Vec`.
#[derive(Clone, Debug)]
pub enum InstrKind {
    LdConst(ConstId),
    /// Reads `name` out of `env`. Carries an explicit `env` operand (rather
    /// than relying on the enclosing Code unit's single local-scope value)
    /// so the inliner can retarget a spliced callee's loads when it
    /// prepends a fresh `MkEnv` for a freshly-inlined callee without needing a separate
    /// rewrite pass over instruction kinds that don't expose their scope.
    LdVar { name: SymbolId, env: Value },
    LdFun { name: SymbolId, env: Value },
    /// Reads the `index`-th formal directly, bypassing a name lookup; still
    /// carries `env` so effects tracking and retargeting stay uniform with
    /// `LdVar`/`LdFun`, even though resolution never walks parent scopes.
    LdArg { index: u32, env: Value },
    StVar { name: SymbolId, value: Value, env: Value },
    MkEnv { parent: Value, names: Vec<SymbolId>, values: Vec<Value> },
    MkArg { strict: Value, promise: PromiseId, env: Value },
    MkCls { env: Value, fun: FunctionId },
    /// The three-operand closure constructor: captures an environment, a
    /// definite `Function`, and one extra SSA operand (the original's
    /// "function value" slot, used when the closure literal also needs to
    /// carry a source-reference operand distinct from its environment).
    MkClsFun { env: Value, fun: FunctionId, extra: Value },
    Force(Value),
    Call { callee: Value, args: Vec<Value> },
    CallBuiltin { builtin: BuiltinId, args: Vec<Value> },
    Branch(Value),
    Return(Value),
    Phi(Vec<Value>),
    ChkMissing(Value),
    ChkClosure(Value),
    AsLogical(Value),
    AsTest(Value),
    Binop(BinOp, Value, Value),
    Unop(UnOp, Value),
}

/// The effect bits every instruction declares, derived mechanically from
/// its tag. This is the *only*
/// channel the passes use to reason about side effects — no instruction
/// carries ad hoc effect annotations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    pub might_io: bool,
    pub changes_env: bool,
    pub leaks_env: bool,
    pub needs_env: bool,
}

impl InstrKind {
    pub fn effects(&self) -> Effects {
        use InstrKind::*;
        match self {
            LdConst(_) => Effects::default(),
            LdArg { .. } => Effects { needs_env: true, ..Effects::default() },
            LdVar { .. } => Effects { needs_env: true, ..Effects::default() },
            LdFun { .. } => Effects { might_io: true, changes_env: true, needs_env: true, ..Effects::default() },
            StVar { .. } => Effects { changes_env: true, needs_env: true, ..Effects::default() },
            MkEnv { .. } => Effects { needs_env: false, ..Effects::default() },
            MkArg { .. } => Effects::default(),
            MkCls { .. } | MkClsFun { .. } => Effects::default(),
            Force(_) => Effects { might_io: true, changes_env: true, leaks_env: true, ..Effects::default() },
            Call { .. } => {
                Effects { might_io: true, changes_env: true, leaks_env: true, needs_env: true }
            }
            CallBuiltin { .. } => Effects { might_io: true, changes_env: true, ..Effects::default() },
            Branch(_) | Return(_) | Phi(_) => Effects::default(),
            ChkMissing(_) | ChkClosure(_) => Effects { might_io: true, ..Effects::default() },
            AsLogical(_) => Effects { might_io: true, ..Effects::default() },
            AsTest(_) => Effects::default(),
            Binop(..) | Unop(..) => Effects::default(),
        }
    }

    /// True for LdVar/LdFun/LdArg — the load-like instructions scope
    /// resolution tries to replace with a concrete producer.
    pub fn is_load(&self) -> bool {
        matches!(self, InstrKind::LdVar { .. } | InstrKind::LdFun { .. } | InstrKind::LdArg { .. })
    }

    /// The symbol name a `LdVar`/`LdFun`/`StVar` instruction reads or
    /// writes. `None` for `LdArg` (indexed, not named) and every other tag.
    pub fn var_name(&self) -> Option<SymbolId> {
        match self {
            InstrKind::LdVar { name, .. } | InstrKind::LdFun { name, .. } | InstrKind::StVar { name, .. } => Some(*name),
            _ => None,
        }
    }

    /// True for Branch/Return: a terminator ends its basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(self, InstrKind::Branch(_) | InstrKind::Return(_))
    }

    /// Iterates the operands of this instruction in argument order
    /// (excluding the dedicated `env` operand of environment-touching
    /// instructions, which callers fetch explicitly via [`InstrKind::env_operand`]).
    pub fn operands(&self) -> Vec<Value> {
        use InstrKind::*;
        match self {
            LdConst(_) => vec![],
            LdVar { env, .. } | LdFun { env, .. } | LdArg { env, .. } => vec![*env],
            StVar { value, env, .. } => vec![*value, *env],
            MkEnv { parent, values, .. } => {
                let mut ops = vec![*parent];
                ops.extend(values.iter().copied());
                ops
            }
            MkArg { strict, env, .. } => vec![*strict, *env],
            MkCls { env, .. } => vec![*env],
            MkClsFun { env, extra, .. } => vec![*env, *extra],
            Force(v) => vec![*v],
            Call { callee, args } => {
                let mut ops = vec![*callee];
                ops.extend(args.iter().copied());
                ops
            }
            CallBuiltin { args, .. } => args.clone(),
            Branch(v) | Return(v) => vec![*v],
            Phi(inputs) => inputs.clone(),
            ChkMissing(v) | ChkClosure(v) | AsLogical(v) | AsTest(v) | Unop(_, v) => vec![*v],
            Binop(_, l, r) => vec![*l, *r],
        }
    }

    /// The dedicated environment operand, for instructions that read or
    /// write a specific environment rather than merely carrying the
    /// `needsEnv` marker (e.g. `StVar`'s env is implicit via scope analysis
    /// tracking rather than an explicit operand on the instruction itself
    /// in this simplified encoding — see `env_of` in scope analysis).
    pub fn explicit_env(&self) -> Option<Value> {
        match self {
            InstrKind::LdVar { env, .. } => Some(*env),
            InstrKind::LdFun { env, .. } => Some(*env),
            InstrKind::LdArg { env, .. } => Some(*env),
            InstrKind::StVar { env, .. } => Some(*env),
            InstrKind::MkArg { env, .. } => Some(*env),
            InstrKind::MkCls { env, .. } => Some(*env),
            InstrKind::MkClsFun { env, .. } => Some(*env),
            _ => None,
        }
    }

    pub fn rewrite_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        use InstrKind::*;
        match self {
            LdConst(_) => {}
            LdVar { env, .. } | LdFun { env, .. } | LdArg { env, .. } => *env = f(*env),
            StVar { value, env, .. } => {
                *value = f(*value);
                *env = f(*env);
            }
            MkEnv { parent, values, .. } => {
                *parent = f(*parent);
                for v in values.iter_mut() {
                    *v = f(*v);
                }
            }
            MkArg { strict, env, .. } => {
                *strict = f(*strict);
                *env = f(*env);
            }
            MkCls { env, .. } => *env = f(*env),
            MkClsFun { env, extra, .. } => {
                *env = f(*env);
                *extra = f(*extra);
            }
            Force(v) | Branch(v) | Return(v) | ChkMissing(v) | ChkClosure(v) | AsLogical(v)
            | AsTest(v) | Unop(_, v) => *v = f(*v),
            Call { callee, args } => {
                *callee = f(*callee);
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            CallBuiltin { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Phi(inputs) => {
                for v in inputs.iter_mut() {
                    *v = f(*v);
                }
            }
            Binop(_, l, r) => {
                *l = f(*l);
                *r = f(*r);
            }
        }
    }

    /// Visits every operand together with its declared type for that
    /// argument position, letting the caller mutate
    /// the operand in place. This is the single source of truth cast
    /// insertion and the verifier both walk: a `Phi`'s inputs are excluded
    /// (its result type is the join of its inputs, not the other way
    /// around), and `env` operands are
    /// declared `environment`.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Value, PirType)) {
        use InstrKind::*;
        let env_ty = PirType::environment();
        match self {
            LdConst(_) => {}
            LdVar { env, .. } | LdFun { env, .. } | LdArg { env, .. } => f(env, env_ty),
            StVar { value, env, .. } => {
                f(value, PirType::any());
                f(env, env_ty);
            }
            MkEnv { parent, values, .. } => {
                f(parent, env_ty);
                for v in values.iter_mut() {
                    f(v, PirType::any());
                }
            }
            MkArg { strict, env, .. } => {
                f(strict, PirType::val_or_missing());
                f(env, env_ty);
            }
            MkCls { env, .. } => f(env, env_ty),
            MkClsFun { env, extra, .. } => {
                f(env, env_ty);
                f(extra, PirType::any());
            }
            Force(v) => f(v, PirType::any()),
            Call { callee, args } => {
                f(callee, PirType::val());
                for a in args.iter_mut() {
                    f(a, PirType::any());
                }
            }
            CallBuiltin { args, .. } => {
                for a in args.iter_mut() {
                    f(a, PirType::any());
                }
            }
            Branch(v) => f(v, PirType::test()),
            // Return's operand is unconstrained: the host continuation
            // observes laziness/missing-ness itself. Still visited (as
            // `any`) so the verifier's dominance/reachability check covers
            // it.
            Return(v) => f(v, PirType::any()),
            // Phi inputs are not cast-inserted; the phi's own result type
            // is recomputed as their join instead (§4.3). Still visited
            // (as `any`) for the same reachability-check reason.
            Phi(inputs) => {
                for v in inputs.iter_mut() {
                    f(v, PirType::any());
                }
            }
            ChkMissing(v) => f(v, PirType::val_or_missing()),
            ChkClosure(v) => f(v, PirType::val()),
            AsLogical(v) => f(v, PirType::val()),
            AsTest(v) => f(v, PirType::logical()),
            Unop(_, v) => f(v, PirType::val()),
            Binop(_, l, r) => {
                f(l, PirType::val());
                f(r, PirType::val());
            }
        }
    }
}

/// One SSA instruction. Owns no other value; `bb` and operands are
/// non-owning indices into the enclosing `CodeBody`.
#[derive(Clone, Debug)]
pub struct Instr {
    pub id: InstrId,
    pub bb: BBId,
    pub result_ty: PirType,
    pub kind: InstrKind,
}

impl Instr {
    pub fn effects(&self) -> Effects {
        self.kind.effects()
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
        };
        write!(f, "{s}")
    }
}

//! PIR: an optimising mid-level IR for a lazy, dynamically-typed host
//! language with first-class environments, promises and closures.
//!
//! This crate is the core described by the "PIR core" purpose statement:
//! a typed SSA IR with explicit environment values, a framework for
//! abstract interpretation over that IR, and the scope-resolution and
//! inlining passes built on it. Everything else — the source-bytecode
//! reader, the native code generator, the runtime glue — is external and
//! is represented here only by the opaque interfaces it consumes
//! ([`builtin`], [`constpool`]).

pub mod analysis;
pub mod builtin;
pub mod cast;
pub mod cfg;
pub mod constpool;
pub mod dump;
pub mod error;
pub mod intern;
pub mod ir;
pub mod passes;
pub mod pipeline;
pub mod ty;
pub mod verify;

pub use error::{CapabilityError, PirError};

//! The error tiers this crate surfaces to callers.
//!
//! Programmer errors (violated invariants) stay `panic!`/`debug_assert!` at
//! their call sites — they are never recoverable and are not represented
//! here. The other two tiers get structured types so the driver can match
//! on them: *verifier failures* ([`crate::verify::VerifierError`], surfaced
//! as [`PirError::Verifier`]) and *capability gaps* ([`CapabilityError`]),
//! which are fatal for the one Function that hit them but do not abort the
//! rest of the Module (§7: "other Functions in the Module proceed").

use crate::cast::CastError;
use crate::verify::VerifierError;

/// A capability gap: some pass asked for a transformation it has no rule
/// for. Fatal for the enclosing Function only.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("cast insertion failed: {0}")]
    CastUnsupported(#[from] CastError),
    #[error("inliner: callee expects {expected} formal(s), callsite supplies {got}")]
    InlineArityMismatch { expected: usize, got: usize },
}

/// The union of the two recoverable error tiers, returned by the driver-
/// facing entry points ([`crate::pipeline`]).
#[derive(Debug, thiserror::Error)]
pub enum PirError {
    #[error("verifier reported {} failure(s)", .0.len())]
    Verifier(Vec<VerifierError>),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl From<Vec<VerifierError>> for PirError {
    fn from(errs: Vec<VerifierError>) -> Self {
        PirError::Verifier(errs)
    }
}

/// `From`/`?` does not compose transitively: `CastError` converts to
/// `CapabilityError` (above, via `#[from]`), but a site holding a
/// `Result<_, CastError>` needs its own direct conversion to reach
/// `PirError` with `?`.
impl From<CastError> for PirError {
    fn from(err: CastError) -> Self {
        PirError::Capability(CapabilityError::CastUnsupported(err))
    }
}

//! The PIR type lattice.
//!
//! A [`PirType`] is either a set of R-kinds (the kinds of value the host
//! language's heap can hold) with two orthogonal flags, or a set of
//! "native" kinds used only inside PIR itself (currently just `test`, the
//! 1-bit type `AsTest` produces and `Branch` consumes). The two sides never
//! mix in a single type: a type with native kinds carries no R flags.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// The kinds of host-language value an R-side [`PirType`] may describe.
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RKinds: u16 {
        const NIL         = 1 << 0;
        const SYMBOL      = 1 << 1;
        const LOGICAL     = 1 << 2;
        const CLOSURE     = 1 << 3;
        const INTEGER     = 1 << 4;
        const PROMISE     = 1 << 5;
        const PAIR_CELL   = 1 << 6;
        const CODE        = 1 << 7;
        const ENVIRONMENT = 1 << 8;
    }
}

bitflags! {
    /// Kinds of PIR-native value. Currently just `test`, produced by
    /// `AsTest` and consumed only by `Branch`.
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NativeKinds: u8 {
        const TEST = 1 << 0;
    }
}

/// A PIR type: either an R-side type (an [`RKinds`] set plus the
/// `maybeLazy`/`maybeMissing` flags) or a native-side type (a
/// [`NativeKinds`] set, flags always clear). See the module docs for the
/// no-mixing invariant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum PirType {
    RKind { kinds: RKinds, maybe_lazy: bool, maybe_missing: bool },
    Native(NativeKinds),
}

impl PirType {
    /// The empty R-kind type with both flags clear: the bottom of the
    /// R side of the lattice, and the identity element of [`join`](Self::join).
    pub const fn bottom() -> Self {
        PirType::RKind { kinds: RKinds::empty(), maybe_lazy: false, maybe_missing: false }
    }

    /// Any R-kind, flags clear: "a definitely-forced, definitely-present
    /// value of unknown kind".
    pub const fn val() -> Self {
        PirType::RKind { kinds: RKinds::all(), maybe_lazy: false, maybe_missing: false }
    }

    pub const fn val_or_missing() -> Self {
        PirType::RKind { kinds: RKinds::all(), maybe_lazy: false, maybe_missing: true }
    }

    pub const fn val_or_lazy() -> Self {
        PirType::RKind { kinds: RKinds::all(), maybe_lazy: true, maybe_missing: false }
    }

    /// Any R-kind, possibly lazy, possibly missing: the top of the R side.
    pub const fn any() -> Self {
        PirType::RKind { kinds: RKinds::all(), maybe_lazy: true, maybe_missing: true }
    }

    /// The empty native type: the bottom of the native side.
    pub const fn voyd() -> Self {
        PirType::Native(NativeKinds::empty())
    }

    /// `bottom` with `maybeMissing` set: exactly the distinguished missing
    /// marker, nothing else.
    pub const fn missing() -> Self {
        PirType::RKind { kinds: RKinds::empty(), maybe_lazy: false, maybe_missing: true }
    }

    pub const fn list() -> Self {
        PirType::RKind {
            kinds: RKinds::PAIR_CELL.union(RKinds::NIL),
            maybe_lazy: false,
            maybe_missing: false,
        }
    }

    pub const fn test() -> Self {
        PirType::Native(NativeKinds::TEST)
    }

    pub const fn single(kind: RKinds) -> Self {
        PirType::RKind { kinds: kind, maybe_lazy: false, maybe_missing: false }
    }

    pub const fn nil() -> Self {
        Self::single(RKinds::NIL)
    }

    pub const fn closure() -> Self {
        Self::single(RKinds::CLOSURE)
    }

    pub const fn integer() -> Self {
        Self::single(RKinds::INTEGER)
    }

    pub const fn logical() -> Self {
        Self::single(RKinds::LOGICAL)
    }

    pub const fn environment() -> Self {
        Self::single(RKinds::ENVIRONMENT)
    }

    pub const fn code() -> Self {
        Self::single(RKinds::CODE)
    }

    pub fn maybe_lazy(&self) -> bool {
        matches!(self, PirType::RKind { maybe_lazy: true, .. })
    }

    pub fn maybe_missing(&self) -> bool {
        matches!(self, PirType::RKind { maybe_missing: true, .. })
    }

    /// Is this the R-side bottom (no kinds, no flags)? Used as the identity
    /// test for [`join`](Self::join) when joining across variants is
    /// otherwise a programmer error.
    fn is_r_bottom(&self) -> bool {
        matches!(self, PirType::RKind { kinds, maybe_lazy: false, maybe_missing: false } if kinds.is_empty())
    }

    fn is_native_bottom(&self) -> bool {
        matches!(self, PirType::Native(k) if k.is_empty())
    }

    /// Lattice join (union). The two sides never mix except through an
    /// empty (bottom) operand, which is the join identity on either side.
    ///
    /// # Panics
    /// Joining a non-bottom R-side type with a non-bottom native-side type
    /// is a programmer error (an ill-typed PIR graph) and panics, matching
    /// the "malformed program" fatal failures elsewhere in cast insertion.
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (PirType::RKind { kinds: ka, maybe_lazy: la, maybe_missing: ma },
             PirType::RKind { kinds: kb, maybe_lazy: lb, maybe_missing: mb }) => PirType::RKind {
                kinds: ka | kb,
                maybe_lazy: la || lb,
                maybe_missing: ma || mb,
            },
            (PirType::Native(a), PirType::Native(b)) => PirType::Native(a | b),
            (a, b) if a.is_r_bottom() => b,
            (a, b) if b.is_r_bottom() => a,
            (a, b) if a.is_native_bottom() => b,
            (a, b) if b.is_native_bottom() => a,
            (a, b) => panic!("cannot join incompatible PIR types {a:?} and {b:?}"),
        }
    }

    /// `a ⊑ b`: every value typeable as `self` is also typeable as `other`.
    pub fn subtype(&self, other: &Self) -> bool {
        match (self, other) {
            (
                PirType::RKind { kinds: ka, maybe_lazy: la, maybe_missing: ma },
                PirType::RKind { kinds: kb, maybe_lazy: lb, maybe_missing: mb },
            ) => kb.contains(*ka) && (!*la || *lb) && (!*ma || *mb),
            (PirType::Native(a), PirType::Native(b)) => b.contains(*a),
            (a, _) if a.is_r_bottom() || a.is_native_bottom() => true,
            _ => false,
        }
    }
}

impl fmt::Debug for PirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PirType::RKind { kinds, maybe_lazy, maybe_missing } => {
                write!(f, "{kinds:?}")?;
                if *maybe_lazy {
                    write!(f, "^lazy")?;
                }
                if *maybe_missing {
                    write!(f, "^miss")?;
                }
                Ok(())
            }
            PirType::Native(kinds) => write!(f, "native{kinds:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_is_join_identity() {
        assert_eq!(PirType::bottom().join(PirType::integer()), PirType::integer());
        assert_eq!(PirType::integer().join(PirType::bottom()), PirType::integer());
    }

    #[test]
    fn val_subtype_of_any() {
        assert!(PirType::val().subtype(&PirType::any()));
        assert!(!PirType::any().subtype(&PirType::val()));
    }

    #[test]
    fn missing_is_bottom_with_flag() {
        let m = PirType::missing();
        assert!(m.maybe_missing());
        assert!(!m.maybe_lazy());
        assert!(m.subtype(&PirType::val_or_missing()));
        assert!(!m.subtype(&PirType::val()));
    }

    #[test]
    fn list_is_pair_or_nil() {
        let list = PirType::list();
        assert!(PirType::nil().subtype(&list));
        assert!(PirType::single(RKinds::PAIR_CELL).subtype(&list));
        assert!(!PirType::closure().subtype(&list));
    }

    #[test]
    fn native_and_r_never_join_silently() {
        let result = std::panic::catch_unwind(|| PirType::test().join(PirType::integer()));
        assert!(result.is_err());
    }

    #[test]
    fn native_bottom_joins_with_test() {
        assert_eq!(PirType::voyd().join(PirType::test()), PirType::test());
    }
}

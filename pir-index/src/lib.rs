//! Dense arena indices and index-keyed collections.
//!
//! The PIR compiler represents basic blocks, instructions and promises as
//! small integers into per-`Function` arenas rather than as owning
//! references (see the "Cyclic graphs" design note): a `Phi` can refer to a
//! predecessor's instruction before that instruction even exists as a Rust
//! value, so ownership has to live in one place (the arena) and every other
//! reference has to be an index. This crate provides the index newtype
//! machinery and the two collections built on it that the rest of the
//! workspace uses everywhere: [`IndexVec`] and [`BitSet`].

use std::fmt;

mod bit_set;
mod vec;

pub use bit_set::BitSet;
pub use vec::IndexVec;

/// A type that can be used as a dense index into an [`IndexVec`] or
/// [`BitSet`]. Implemented by the newtypes created with [`newtype_index!`].
pub trait Idx: Copy + Eq + PartialEq + fmt::Debug + 'static {
    fn new(idx: usize) -> Self;
    fn index(self) -> usize;

    fn increment_by(&mut self, amount: usize) {
        *self = self.plus(amount);
    }

    fn plus(self, amount: usize) -> Self {
        Self::new(self.index() + amount)
    }
}

impl Idx for usize {
    #[inline]
    fn new(idx: usize) -> Self {
        idx
    }
    #[inline]
    fn index(self) -> usize {
        self
    }
}

impl Idx for u32 {
    #[inline]
    fn new(idx: usize) -> Self {
        idx as u32
    }
    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Defines a zero-cost newtype wrapping a `u32` that implements [`Idx`].
///
/// Mirrors `rustc_index::newtype_index!`: every id used to cross-reference
/// arena-owned data (`BasicBlockId`, `InstrId`, `PromiseId`, ...) is one of
/// these rather than a bare integer, so a block id can never be passed where
/// an instruction id was expected.
#[macro_export]
macro_rules! newtype_index {
    ($(#[$attr:meta])* $vis:vis struct $name:ident { .. }) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $(#[$attr])*
        $vis struct $name(u32);

        impl $name {
            /// Creates a new index from a raw `u32`.
            #[inline]
            $vis const fn from_u32(v: u32) -> Self {
                $name(v)
            }

            #[inline]
            $vis const fn as_u32(self) -> u32 {
                self.0
            }

            #[inline]
            $vis const fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::Idx for $name {
            #[inline]
            fn new(idx: usize) -> Self {
                $name(idx as u32)
            }
            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}{}", stringify!($name), self.0)
            }
        }
    };
}

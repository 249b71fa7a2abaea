//! Typed heap offsets
//!
//! An `Offset<T>` names a durable object of type `T` inside the heap. It is a
//! plain index: it never dereferences by itself and is resolved to `&T` only
//! through a transaction or a read view, so a stale offset surfaces as an
//! error instead of a dangling pointer.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Typed index of a durable object (0 is null)
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Offset<T> {
    raw: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Offset<T> {
    /// The null offset
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    pub const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn raw(self) -> u64 {
        self.raw
    }

    pub const fn is_null(self) -> bool {
        self.raw == 0
    }

    /// Reinterpret as an offset of another type (checked again on resolve)
    pub const fn cast<U>(self) -> Offset<U> {
        Offset::from_raw(self.raw)
    }
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Offset<T> {}

impl<T> Default for Offset<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> PartialEq for Offset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Offset<T> {}

impl<T> Hash for Offset<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Offset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Offset(null)")
        } else {
            write!(f, "Offset({:#x})", self.raw)
        }
    }
}

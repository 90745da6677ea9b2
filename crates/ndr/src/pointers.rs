//! NDR pointer types
//!
//! NDR supports three pointer semantics:
//!
//! - Reference (`[ref]`): never null, the pointee is embedded in place
//! - Unique (`[unique]`): nullable; a referent id in the fixed part
//!   (0 for null) and the pointee in the deferred part
//! - Full (`[ptr]`): nullable and, in IDL terms, aliasable. Every occurrence
//!   is written with a fresh referent id and its own body.

use crate::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};
use std::ops::{Deref, DerefMut};

/// Pointer semantics, as declared in IDL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Ref,
    Unique,
    Full,
}

/// Common accessors for the pointer wrappers
pub trait NdrPtr {
    type Target;

    const KIND: PointerKind;

    fn is_null(&self) -> bool;

    fn get(&self) -> Option<&Self::Target>;
}

/// Reference pointer - the pointee is written where the pointer is
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefPtr<T>(pub T);

impl<T> RefPtr<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for RefPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for RefPtr<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> NdrPtr for RefPtr<T> {
    type Target = T;

    const KIND: PointerKind = PointerKind::Ref;

    fn is_null(&self) -> bool {
        false
    }

    fn get(&self) -> Option<&T> {
        Some(&self.0)
    }
}

impl<T: NdrEncode> NdrEncode for RefPtr<T> {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        self.0.encode_ndr(w)
    }

    fn ndr_align() -> usize {
        T::ndr_align()
    }
}

impl<T: NdrDecode> NdrDecode for RefPtr<T> {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        self.0.decode_ndr(r)
    }

    fn ndr_align() -> usize {
        T::ndr_align()
    }

    fn ndr_min_size() -> usize {
        T::ndr_min_size()
    }
}

macro_rules! nullable_pointer {
    ($(#[$meta:meta])* $name:ident, $kind:expr, $read:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name<T>(pub Option<Box<T>>);

        impl<T> $name<T> {
            pub fn new(value: T) -> Self {
                Self(Some(Box::new(value)))
            }

            pub fn null() -> Self {
                Self(None)
            }

            pub fn into_option(self) -> Option<T> {
                self.0.map(|b| *b)
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::null()
            }
        }

        impl<T> From<Option<T>> for $name<T> {
            fn from(value: Option<T>) -> Self {
                Self(value.map(Box::new))
            }
        }

        impl<T> NdrPtr for $name<T> {
            type Target = T;

            const KIND: PointerKind = $kind;

            fn is_null(&self) -> bool {
                self.0.is_none()
            }

            fn get(&self) -> Option<&T> {
                self.0.as_deref()
            }
        }

        impl<T: NdrEncode> NdrEncode for $name<T> {
            fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
                w.write_unique(self.0.as_deref())
            }

            fn ndr_align() -> usize {
                4
            }
        }

        impl<T: NdrDecode> NdrDecode for $name<T> {
            fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
                r.$read(&mut self.0)
            }

            fn ndr_align() -> usize {
                4
            }

            fn ndr_min_size() -> usize {
                4
            }
        }
    };
}

nullable_pointer!(
    /// Unique pointer - nullable, no aliasing
    UniquePtr,
    PointerKind::Unique,
    read_unique
);

nullable_pointer!(
    /// Full pointer - nullable; written with a fresh referent per occurrence
    FullPtr,
    PointerKind::Full,
    read_full
);

impl<T: NdrDecode> NdrDecode for Box<T> {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        (**self).decode_ndr(r)
    }

    fn ndr_align() -> usize {
        T::ndr_align()
    }

    fn ndr_min_size() -> usize {
        T::ndr_min_size()
    }
}

impl<T: NdrEncode> NdrEncode for Box<T> {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        (**self).encode_ndr(w)
    }

    fn ndr_align() -> usize {
        T::ndr_align()
    }
}

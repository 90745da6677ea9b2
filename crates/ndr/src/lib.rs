//! NDR (Network Data Representation) runtime library
//!
//! Implements the NDR20 transfer syntax used by DCE RPC and MS-RPCE.
//!
//! # NDR Wire Format
//!
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes),
//!   measured from the start of the stub data
//! - Conformant data (arrays with runtime-determined size) is prefixed
//!   with its max_count
//! - Embedded pointers write a referent id in place; the pointee is written
//!   in a deferred pass after the enclosing fixed part
//! - Strings are conformant varying arrays
//!
//! Every call gets its own [`NdrWriter`] or [`NdrReader`]; referent numbering
//! and the queue of pending pointer bodies live there and nowhere else.

mod arrays;
mod context;
mod decode;
mod encode;
mod error;
mod pointers;
mod primitives;
mod reader;
mod referent;
mod strings;
mod writer;

pub use arrays::{ConformantVaryingArray, VaryingArray};
pub use context::NdrContext;
pub use decode::NdrDecode;
pub use encode::NdrEncode;
pub use error::{NdrError, Result};
pub use pointers::{FullPtr, NdrPtr, PointerKind, RefPtr, UniquePtr};
pub use reader::{DeferredRead, NdrReader};
pub use referent::{ReferentTable, FIRST_REFERENT_ID};
pub use strings::{utf16_byte_len, NdrString, NdrWString};
pub use writer::{DeferredWrite, NdrWriter};

/// Re-export bytes for convenience
pub use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encode a value to stub data with its pointer bodies flushed.
pub fn encode_to_bytes<T: NdrEncode + ?Sized>(value: &T, ctx: NdrContext) -> Result<Bytes> {
    let mut w = NdrWriter::new(ctx);
    value.encode_ndr(&mut w)?;
    w.finish()
}

/// Decode a value from stub data, filling every pointer body.
pub fn decode_from_bytes<T: NdrDecode>(data: Bytes, ctx: NdrContext) -> Result<T> {
    let mut value = T::default();
    {
        let mut r = NdrReader::new(data, ctx);
        value.decode_ndr(&mut r)?;
        r.finish()?;
    }
    Ok(value)
}

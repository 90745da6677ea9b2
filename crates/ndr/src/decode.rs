//! NDR decoding trait

use crate::{NdrReader, Result};

/// Types that can be read from an NDR stream.
///
/// Decoding happens in place so that pointer bodies read during the deferred
/// pass can land in fields of a value whose fixed part was already read.
pub trait NdrDecode: Default {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()>;

    /// Alignment of the type on the wire
    fn ndr_align() -> usize {
        1
    }

    /// Fewest bytes one element can occupy, used to bound conformant sizes
    fn ndr_min_size() -> usize {
        1
    }
}

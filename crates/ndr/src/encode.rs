//! NDR encoding trait

use crate::{NdrWriter, Result};

/// Types that can be written to an NDR stream.
///
/// Implementations write their fixed part and queue pointer bodies on the
/// writer; the caller decides when to flush them.
pub trait NdrEncode {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()>;

    /// Alignment of the type on the wire
    fn ndr_align() -> usize
    where
        Self: Sized,
    {
        1
    }
}

//! NDR stream reader
//!
//! Mirrors [`NdrWriter`](crate::NdrWriter): the fixed part is read first and
//! every non-null pointer queues a body reader; [`NdrReader::read_deferred`]
//! then walks the queued bodies in the order the referent ids were read.

use crate::context::NdrContext;
use crate::decode::NdrDecode;
use crate::error::{NdrError, Result};
use crate::referent::ReferentTable;
use bytes::Bytes;
use tracing::trace;

/// Deferred pointer body queued by [`NdrReader::read_pointer`]
pub type DeferredRead<'a> = Box<dyn FnOnce(&mut NdrReader<'a>) -> Result<()> + 'a>;

macro_rules! read_primitive {
    ($($name:ident($ty:ty, $size:expr) => $get:ident;)*) => {
        $(
            pub fn $name(&mut self) -> Result<$ty> {
                self.read_align($size)?;
                let ctx = self.ctx;
                let mut data = self.take($size)?;
                Ok(ctx.$get(&mut data))
            }
        )*
    };
}

/// NDR reader for a single call.
///
/// `'a` is the lifetime of the destination slots that pending pointer
/// bodies will fill.
pub struct NdrReader<'a> {
    ctx: NdrContext,
    buf: Bytes,
    pos: usize,
    referents: ReferentTable<DeferredRead<'a>>,
}

impl<'a> NdrReader<'a> {
    pub fn new(buf: Bytes, ctx: NdrContext) -> Self {
        Self {
            ctx,
            buf,
            pos: 0,
            referents: ReferentTable::new(),
        }
    }

    pub fn context(&self) -> NdrContext {
        self.ctx
    }

    /// Offset from the start of the stub data
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn pending_referents(&self) -> usize {
        self.referents.pending_len()
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.remaining() < len {
            return Err(NdrError::BufferUnderflow {
                needed: len,
                have: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Skip padding up to the next `alignment` boundary.
    pub fn read_align(&mut self, alignment: usize) -> Result<()> {
        let padding = NdrContext::align_padding(self.pos, alignment);
        self.take(padding).map(|_| ())
    }

    /// Skip the padding a structure carries after its last member.
    pub fn read_trailing_gap(&mut self, alignment: usize) -> Result<()> {
        self.read_align(alignment)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    read_primitive! {
        read_u16(u16, 2) => get_u16;
        read_i16(i16, 2) => get_i16;
        read_u32(u32, 4) => get_u32;
        read_i32(i32, 4) => get_i32;
        read_u64(u64, 8) => get_u64;
        read_i64(i64, 8) => get_i64;
        read_f32(f32, 4) => get_f32;
        read_f64(f64, 8) => get_f64;
    }

    /// Enumerations travel as 16-bit values.
    pub fn read_enum(&mut self) -> Result<u16> {
        self.read_u16()
    }

    /// Raw bytes, no alignment.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if self.remaining() < len {
            return Err(NdrError::BufferUnderflow {
                needed: len,
                have: self.remaining(),
            });
        }
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    /// Conformance (max_count) prefix of a conformant array.
    pub fn read_size(&mut self) -> Result<u64> {
        Ok(u64::from(self.read_u32()?))
    }

    /// Read a conformance prefix and check it against the remaining input.
    ///
    /// `element_size` is the smallest number of bytes one element occupies.
    pub fn read_array_size(&mut self, element_size: usize) -> Result<usize> {
        let count = self.read_size()?;
        self.check_count(count, element_size)
    }

    /// Fail unless `count` elements of `element_size` bytes fit in the input.
    pub fn check_count(&self, count: u64, element_size: usize) -> Result<usize> {
        let remaining = self.remaining();
        let needed = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(element_size.max(1)));
        match needed {
            Some(needed) if needed <= remaining => Ok(count as usize),
            _ => Err(NdrError::BoundsExceeded {
                count,
                element_size,
                remaining,
            }),
        }
    }

    /// Decode a value in place.
    pub fn read<T: NdrDecode>(&mut self, slot: &'a mut T) -> Result<()> {
        slot.decode_ndr(self)
    }

    /// Read a referent id and queue the body that fills `slot`.
    ///
    /// Returns `false` for a null referent, leaving `slot` untouched.
    pub fn read_pointer<T, F>(&mut self, slot: &'a mut T, body: F) -> Result<bool>
    where
        T: ?Sized,
        F: FnOnce(&mut NdrReader<'a>, &'a mut T) -> Result<()> + 'a,
    {
        let referent_id = self.read_u32()?;
        if referent_id == 0 {
            return Ok(false);
        }
        self.referents.observe(referent_id);
        self.defer(referent_id, slot, body);
        Ok(true)
    }

    fn defer<T, F>(&mut self, referent_id: u32, slot: &'a mut T, body: F)
    where
        T: ?Sized,
        F: FnOnce(&mut NdrReader<'a>, &'a mut T) -> Result<()> + 'a,
    {
        self.referents
            .defer(referent_id, Box::new(move |r: &mut NdrReader<'a>| body(r, slot)));
    }

    /// Unique pointer: `None` on a null referent.
    pub fn read_unique<T: NdrDecode + 'a>(&mut self, slot: &'a mut Option<T>) -> Result<()> {
        *slot = None;
        self.read_pointer(slot, |r, slot| slot.insert(T::default()).decode_ndr(r))?;
        Ok(())
    }

    /// Full pointer: like unique, but a repeated referent id is rejected
    /// since writers here never alias.
    pub fn read_full<T: NdrDecode + 'a>(&mut self, slot: &'a mut Option<T>) -> Result<()> {
        *slot = None;
        let referent_id = self.read_u32()?;
        if referent_id == 0 {
            return Ok(());
        }
        if !self.referents.observe(referent_id) {
            return Err(NdrError::InvalidPointer(referent_id));
        }
        self.defer(referent_id, slot, |r, slot| slot.insert(T::default()).decode_ndr(r));
        Ok(())
    }

    /// Fill queued pointer bodies in the order their referents were read.
    pub fn read_deferred(&mut self) -> Result<()> {
        let pending = self.referents.take_pending();
        for (referent_id, body) in pending {
            trace!(referent_id, position = self.pos, "reading deferred referent");
            body(self)?;
            self.read_deferred()?;
        }
        Ok(())
    }

    /// Drain any remaining bodies. Trailing bytes are allowed (stub padding).
    pub fn finish(mut self) -> Result<()> {
        self.read_deferred()?;
        if self.remaining() > 0 {
            trace!(remaining = self.remaining(), "trailing stub bytes ignored");
        }
        Ok(())
    }
}

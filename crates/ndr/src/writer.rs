//! NDR stream writer
//!
//! The writer produces stub data in two passes per top-level parameter: the
//! fixed part, in which every pointer is represented by its referent id, and
//! the deferred part, in which the queued pointer bodies are written in the
//! order the pointers were encountered.
//!
//! ```text
//! fixed part:     | flags | ref id A | ref id B |
//! deferred part:  | body A | (bodies queued by A) | body B |
//! ```

use crate::context::NdrContext;
use crate::encode::NdrEncode;
use crate::error::{NdrError, Result};
use crate::referent::ReferentTable;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Deferred pointer body queued by [`NdrWriter::write_pointer`]
pub type DeferredWrite<'a> = Box<dyn FnOnce(&mut NdrWriter<'a>) -> Result<()> + 'a>;

macro_rules! write_primitive {
    ($($name:ident($ty:ty, $align:expr) => $put:ident;)*) => {
        $(
            pub fn $name(&mut self, value: $ty) {
                self.write_align($align);
                self.ctx.$put(&mut self.buf, value);
            }
        )*
    };
}

/// NDR writer for a single call.
///
/// The lifetime `'a` is the lifetime of the values whose pointer bodies are
/// still queued. A writer is created per call and dropped with it.
pub struct NdrWriter<'a> {
    ctx: NdrContext,
    buf: BytesMut,
    referents: ReferentTable<DeferredWrite<'a>>,
}

impl<'a> NdrWriter<'a> {
    pub fn new(ctx: NdrContext) -> Self {
        Self {
            ctx,
            buf: BytesMut::with_capacity(256),
            referents: ReferentTable::new(),
        }
    }

    pub fn context(&self) -> NdrContext {
        self.ctx
    }

    /// Offset from the start of the stub data
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Number of pointer bodies waiting for [`write_deferred`](Self::write_deferred)
    pub fn pending_referents(&self) -> usize {
        self.referents.pending_len()
    }

    /// Pad with zeros up to the next `alignment` boundary.
    pub fn write_align(&mut self, alignment: usize) {
        let padding = NdrContext::align_padding(self.position(), alignment);
        self.buf.put_bytes(0, padding);
    }

    /// Pad a structure out to its overall alignment after its last member.
    pub fn write_trailing_gap(&mut self, alignment: usize) {
        self.write_align(alignment);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    write_primitive! {
        write_u16(u16, 2) => put_u16;
        write_i16(i16, 2) => put_i16;
        write_u32(u32, 4) => put_u32;
        write_i32(i32, 4) => put_i32;
        write_u64(u64, 8) => put_u64;
        write_i64(i64, 8) => put_i64;
        write_f32(f32, 4) => put_f32;
        write_f64(f64, 8) => put_f64;
    }

    /// Enumerations travel as 16-bit values.
    pub fn write_enum(&mut self, value: u16) {
        self.write_u16(value);
    }

    /// Raw bytes, no alignment.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Conformance (max_count) prefix of a conformant array.
    pub fn write_size(&mut self, count: u64) -> Result<()> {
        let count = u32::try_from(count).map_err(|_| NdrError::SizeOverflow(count))?;
        self.write_u32(count);
        Ok(())
    }

    /// Encode a value in place.
    pub fn write<T: NdrEncode + ?Sized>(&mut self, value: &'a T) -> Result<()> {
        value.encode_ndr(self)
    }

    /// Write a pointer's referent id and queue its body.
    ///
    /// `None` writes referent id 0 and queues nothing. `Some` writes a fresh
    /// nonzero id; `body` runs during the next
    /// [`write_deferred`](Self::write_deferred).
    pub fn write_pointer<T, F>(&mut self, value: Option<&'a T>, body: F) -> Result<()>
    where
        T: ?Sized,
        F: FnOnce(&mut NdrWriter<'a>, &'a T) -> Result<()> + 'a,
    {
        let Some(value) = value else {
            self.write_null_pointer();
            return Ok(());
        };
        let referent_id = self.referents.allocate();
        self.write_u32(referent_id);
        self.referents
            .defer(referent_id, Box::new(move |w: &mut NdrWriter<'a>| body(w, value)));
        Ok(())
    }

    /// Referent id 0, no body.
    pub fn write_null_pointer(&mut self) {
        self.write_u32(0);
    }

    /// Unique pointer to an encodable value.
    pub fn write_unique<T: NdrEncode + ?Sized>(&mut self, value: Option<&'a T>) -> Result<()> {
        self.write_pointer(value, |w, v| v.encode_ndr(w))
    }

    /// Flush queued pointer bodies in encounter order.
    ///
    /// Pointers met while a body is written are flushed right after that
    /// body, before its next sibling.
    pub fn write_deferred(&mut self) -> Result<()> {
        let pending = self.referents.take_pending();
        for (referent_id, body) in pending {
            trace!(referent_id, position = self.position(), "writing deferred referent");
            body(self)?;
            self.write_deferred()?;
        }
        Ok(())
    }

    /// Flush any remaining bodies and return the stub data.
    pub fn finish(mut self) -> Result<Bytes> {
        self.write_deferred()?;
        Ok(self.buf.freeze())
    }
}

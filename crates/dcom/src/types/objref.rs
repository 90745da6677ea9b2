//! Marshaled interface pointers (MS-DCOM 2.2.14, 2.2.18)
//!
//! An [`InterfacePointer`] carries a hand-marshaled OBJREF as opaque bytes.
//! Decoding the OBJREF itself is left to the caller.

use msrpc_ndr::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter};

/// OBJREF signature, "MEOW" read as a little-endian u32
pub const OBJREF_SIGNATURE: u32 = 0x574F454D;

/// OBJREF flags indicating the variant type
pub mod objref_flags {
    pub const OBJREF_STANDARD: u32 = 0x00000001;
    pub const OBJREF_HANDLER: u32 = 0x00000002;
    pub const OBJREF_CUSTOM: u32 = 0x00000004;
    pub const OBJREF_EXTENDED: u32 = 0x00000008;
}

/// MInterfacePointer: `ulCntData` followed by that many bytes of OBJREF
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfacePointer {
    pub data: Vec<u8>,
}

impl InterfacePointer {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// OBJREF variant flags, if the data starts with a valid OBJREF header
    pub fn objref_flags(&self) -> Option<u32> {
        let header = self.data.get(..8)?;
        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != OBJREF_SIGNATURE {
            return None;
        }
        Some(u32::from_le_bytes([header[4], header[5], header[6], header[7]]))
    }
}

impl NdrEncode for InterfacePointer {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        let count = self.data.len() as u64;
        w.write_size(count)?;
        w.write_size(count)?;
        w.write_bytes(&self.data);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for InterfacePointer {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        let max_count = r.read_array_size(1)?;
        let count = r.read_u32()?;
        if count as usize != max_count {
            return Err(NdrError::ArraySizeMismatch {
                expected: max_count,
                got: count as usize,
            });
        }
        self.data = r.read_bytes(max_count)?.to_vec();
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        8
    }
}

//! ORPC envelope types (MS-DCOM 2.2.13, 2.2.14)
//!
//! Every ORPC request starts with an [`OrpcThis`] and every response with an
//! [`OrpcThat`]. Both may carry an [`OrpcExtentArray`] of opaque extensions.

use super::identifiers::generate_uuid;
use msrpc_dcerpc::Uuid;
use msrpc_ndr::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter};

/// COM version structure (MS-DCOM 2.2.11)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComVersion {
    pub major: u16,
    pub minor: u16,
}

impl ComVersion {
    pub const SIZE: usize = 4;

    /// DCOM version 5.1 (Windows 2000)
    pub const DCOM_5_1: Self = Self { major: 5, minor: 1 };
    /// DCOM version 5.4 (Windows XP/2003)
    pub const DCOM_5_4: Self = Self { major: 5, minor: 4 };
    /// DCOM version 5.6 (Windows Vista)
    pub const DCOM_5_6: Self = Self { major: 5, minor: 6 };
    /// DCOM version 5.7 (Windows 7)
    pub const DCOM_5_7: Self = Self { major: 5, minor: 7 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl Default for ComVersion {
    fn default() -> Self {
        Self::DCOM_5_7
    }
}

impl NdrEncode for ComVersion {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_u16(self.major);
        w.write_u16(self.minor);
        Ok(())
    }

    fn ndr_align() -> usize {
        2
    }
}

impl NdrDecode for ComVersion {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        self.major = r.read_u16()?;
        self.minor = r.read_u16()?;
        Ok(())
    }

    fn ndr_align() -> usize {
        2
    }

    fn ndr_min_size() -> usize {
        Self::SIZE
    }
}

/// One ORPC extension: a format GUID and opaque data.
///
/// On the wire the data is padded to a multiple of 8 bytes and `size`
/// records the unpadded length.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrpcExtent {
    pub id: Uuid,
    pub data: Vec<u8>,
}

impl OrpcExtent {
    pub fn new(id: Uuid, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

impl NdrEncode for OrpcExtent {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        let size = u32::try_from(self.data.len())
            .map_err(|_| NdrError::SizeOverflow(self.data.len() as u64))?;
        let padded = (u64::from(size) + 7) & !7;
        // conformant struct: the array's max_count leads
        w.write_size(padded)?;
        self.id.write_to(w);
        w.write_u32(size);
        w.write_bytes(&self.data);
        w.write_bytes(&[0u8; 8][..(padded - u64::from(size)) as usize]);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for OrpcExtent {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        let padded = r.read_array_size(1)?;
        self.id = Uuid::read_from(r)?;
        let size = r.read_u32()?;
        if size as usize > padded {
            return Err(NdrError::ConformanceMismatch {
                max_count: padded as u32,
                actual_count: size,
            });
        }
        let data = r.read_bytes(padded)?;
        self.data = data[..size as usize].to_vec();
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        24
    }
}

/// ORPC_EXTENT_ARRAY
///
/// The wire array holds `(size + 1) & !1` unique pointers; slots past the
/// extents are null.
#[derive(Clone, Debug, Default)]
pub struct OrpcExtentArray {
    slots: Vec<Option<OrpcExtent>>,
}

impl OrpcExtentArray {
    pub fn new(extents: Vec<OrpcExtent>) -> Self {
        Self {
            slots: extents.into_iter().map(Some).collect(),
        }
    }

    pub fn push(&mut self, extent: OrpcExtent) {
        self.slots.push(Some(extent));
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrpcExtent> {
        self.slots.iter().flatten()
    }

    /// Extension with format `id`, if present
    pub fn find(&self, id: &Uuid) -> Option<&OrpcExtent> {
        self.iter().find(|extent| extent.id == *id)
    }

    /// Number of non-null extents
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for OrpcExtentArray {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for OrpcExtentArray {}

impl NdrEncode for OrpcExtentArray {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        let size = self.len() as u64;
        let slots = (size + 1) & !1;
        w.write_align(4);
        w.write_size(size)?;
        w.write_u32(0);
        let extents = (slots > 0).then_some(&self.slots);
        w.write_pointer(extents, move |w, extents| {
            w.write_size(slots)?;
            let mut written = 0;
            for extent in extents.iter().flatten() {
                w.write_unique(Some(extent))?;
                written += 1;
            }
            for _ in written..slots {
                w.write_null_pointer();
            }
            Ok(())
        })
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for OrpcExtentArray {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_align(4)?;
        let size = r.read_u32()?;
        let _reserved = r.read_u32()?;
        self.slots.clear();
        r.read_pointer(&mut self.slots, move |r, slots| {
            let count = r.read_array_size(4)?;
            if (count as u64) < u64::from(size) {
                return Err(NdrError::ConformanceMismatch {
                    max_count: count as u32,
                    actual_count: size,
                });
            }
            slots.resize_with(count, || None);
            for slot in slots {
                r.read_unique(slot)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        12
    }
}

/// ORPCTHIS: the implicit first argument of every ORPC request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrpcThis {
    pub version: ComVersion,
    /// Zero for ORPC calls
    pub flags: u32,
    /// Causality id shared by every call made on behalf of one logical call
    pub causality_id: Uuid,
    pub extensions: Option<OrpcExtentArray>,
}

impl OrpcThis {
    /// Envelope with a fresh causality id
    pub fn new() -> Self {
        Self::with_causality(generate_uuid())
    }

    /// Envelope continuing an existing causality
    pub fn with_causality(causality_id: Uuid) -> Self {
        Self {
            version: ComVersion::DCOM_5_7,
            flags: 0,
            causality_id,
            extensions: None,
        }
    }

    pub fn with_extension(mut self, extent: OrpcExtent) -> Self {
        self.extensions.get_or_insert_with(OrpcExtentArray::default).push(extent);
        self
    }
}

impl Default for OrpcThis {
    fn default() -> Self {
        Self::with_causality(Uuid::NIL)
    }
}

impl NdrEncode for OrpcThis {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_align(4);
        w.write(&self.version)?;
        w.write_u32(self.flags);
        w.write_u32(0);
        self.causality_id.write_to(w);
        w.write_unique(self.extensions.as_ref())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for OrpcThis {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_align(4)?;
        r.read(&mut self.version)?;
        self.flags = r.read_u32()?;
        let _reserved = r.read_u32()?;
        self.causality_id = Uuid::read_from(r)?;
        r.read_unique(&mut self.extensions)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        32
    }
}

/// ORPCTHAT: the implicit first result of every ORPC response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrpcThat {
    pub flags: u32,
    pub extensions: Option<OrpcExtentArray>,
}

impl OrpcThat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extent: OrpcExtent) -> Self {
        self.extensions.get_or_insert_with(OrpcExtentArray::default).push(extent);
        self
    }
}

impl NdrEncode for OrpcThat {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_align(4);
        w.write_u32(self.flags);
        w.write_unique(self.extensions.as_ref())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for OrpcThat {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_align(4)?;
        self.flags = r.read_u32()?;
        r.read_unique(&mut self.extensions)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        8
    }
}

/// Well-known extension format GUIDs
pub mod extent_ids {
    /// Error information extension (MS-DCOM 2.2.21.2)
    pub const ERROR_INFO: &str = "0000031c-0000-0000-c000-000000000046";
    /// Context extension (MS-DCOM 2.2.21.4)
    pub const CONTEXT: &str = "00000334-0000-0000-c000-000000000046";
}

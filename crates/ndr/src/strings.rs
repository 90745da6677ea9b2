//! NDR string encodings
//!
//! Wide strings are conformant varying arrays of UTF-16 code units:
//!
//! ```text
//! max_count: u32    # Capacity in code units
//! offset: u32       # Always 0
//! actual_count: u32 # Transmitted code units
//! units[actual_count]
//! ```
//!
//! Two forms are used. The `[string]` form counts and transmits a
//! terminating NUL. The length-prefixed form carries no terminator; its byte
//! length travels in a sibling field of the enclosing structure (as in
//! `RPC_UNICODE_STRING`).

use crate::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};

/// Bytes occupied by `s` as UTF-16, for sibling length fields.
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

impl<'a> NdrWriter<'a> {
    /// NUL-terminated wide string.
    pub fn write_utf16_nstring(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
        self.write_utf16_units(&units, units.len() as u64)
    }

    /// Wide string without terminator; the byte length travels separately.
    pub fn write_utf16_string(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_utf16_units(&units, units.len() as u64)
    }

    /// Wide string without terminator whose capacity exceeds its length.
    pub fn write_utf16_string_with_capacity(&mut self, value: &str, capacity: u64) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_utf16_units(&units, capacity.max(units.len() as u64))
    }

    fn write_utf16_units(&mut self, units: &[u16], max_count: u64) -> Result<()> {
        self.write_size(max_count)?;
        self.write_variance(0, units.len() as u64)?;
        for unit in units {
            self.write_u16(*unit);
        }
        Ok(())
    }

    /// Unique pointer to a `[string]`; the empty string is sent as null.
    pub fn write_unique_utf16_nstring(&mut self, value: &'a str) -> Result<()> {
        let value = (!value.is_empty()).then_some(value);
        self.write_pointer(value, |w, s| w.write_utf16_nstring(s))
    }
}

impl<'a> NdrReader<'a> {
    /// NUL-terminated wide string. A missing terminator is tolerated.
    pub fn read_utf16_nstring(&mut self) -> Result<String> {
        let mut units = self.read_utf16_units()?;
        match units.pop() {
            Some(0) | None => {}
            Some(last) => units.push(last),
        }
        Ok(String::from_utf16(&units)?)
    }

    /// Wide string without terminator.
    pub fn read_utf16_string(&mut self) -> Result<String> {
        let units = self.read_utf16_units()?;
        Ok(String::from_utf16(&units)?)
    }

    fn read_utf16_units(&mut self) -> Result<Vec<u16>> {
        let max_count = self.read_size()?;
        let (offset, count) = self.read_variance(Some(max_count), 2)?;
        if offset != 0 {
            return Err(NdrError::InvalidOffset {
                offset,
                max_count: u32::try_from(max_count)
                    .map_err(|_| NdrError::SizeOverflow(max_count))?,
            });
        }
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(self.read_u16()?);
        }
        Ok(units)
    }

    /// Unique pointer to a `[string]`; a null referent reads as `""`.
    pub fn read_unique_utf16_nstring(&mut self, slot: &'a mut String) -> Result<()> {
        slot.clear();
        self.read_pointer(slot, |r, slot| {
            *slot = r.read_utf16_nstring()?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Wide `[string]` value (NUL-terminated on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NdrWString(pub String);

impl NdrWString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for NdrWString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NdrWString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl NdrEncode for NdrWString {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        w.write_utf16_nstring(&self.0)
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrWString {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        self.0 = r.read_utf16_nstring()?;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        12
    }
}

/// ANSI `[string]` value (NUL-terminated bytes)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NdrString(pub String);

impl NdrString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NdrString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl NdrEncode for NdrString {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        let len = self.0.len() as u64 + 1;
        w.write_size(len)?;
        w.write_variance(0, len)?;
        w.write_bytes(self.0.as_bytes());
        w.write_u8(0);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrString {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        let max_count = r.read_size()?;
        let (offset, count) = r.read_variance(Some(max_count), 1)?;
        if offset != 0 {
            return Err(NdrError::InvalidOffset {
                offset,
                max_count: u32::try_from(max_count)
                    .map_err(|_| NdrError::SizeOverflow(max_count))?,
            });
        }
        let data = r.read_bytes(count)?;
        let text = match data.split_last() {
            Some((0, text)) => text,
            _ => &data[..],
        };
        self.0 = String::from_utf8(text.to_vec())?;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        12
    }
}

//! NDR array types
//!
//! - Fixed arrays (`[T; N]`): elements only
//! - Conformant arrays (`Vec<T>`): max_count prefix, then elements
//! - Varying arrays: offset and actual_count, then the transmitted elements
//! - Conformant varying arrays: max_count, offset, actual_count, elements
//!
//! Every count read from the wire is checked against the remaining input
//! before anything is allocated.

use crate::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};

impl<T: NdrEncode, const N: usize> NdrEncode for [T; N] {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        for elem in self {
            elem.encode_ndr(w)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        T::ndr_align()
    }
}

impl<T: NdrDecode, const N: usize> NdrDecode for [T; N]
where
    [T; N]: Default,
{
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        for elem in self.iter_mut() {
            elem.decode_ndr(r)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        T::ndr_align()
    }

    fn ndr_min_size() -> usize {
        T::ndr_min_size() * N
    }
}

/// Conformant array: `max_count` followed by the elements.
impl<T: NdrEncode> NdrEncode for Vec<T> {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        w.write_size(self.len() as u64)?;
        for elem in self {
            elem.encode_ndr(w)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for Vec<T> {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        let count = r.read_array_size(T::ndr_min_size())?;
        decode_elements(self, count, r)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        4
    }
}

fn decode_elements<'a, T: NdrDecode>(
    elements: &'a mut Vec<T>,
    count: usize,
    r: &mut NdrReader<'a>,
) -> Result<()> {
    elements.clear();
    elements.resize_with(count, T::default);
    for elem in elements.iter_mut() {
        elem.decode_ndr(r)?;
    }
    Ok(())
}

impl<'a> NdrWriter<'a> {
    /// Variance (offset, actual_count) of a varying array.
    pub fn write_variance(&mut self, offset: u32, actual_count: u64) -> Result<()> {
        self.write_u32(offset);
        self.write_size(actual_count)
    }
}

impl<'a> NdrReader<'a> {
    /// Read variance and check it against the conformance and the input.
    pub fn read_variance(&mut self, max_count: Option<u64>, element_size: usize) -> Result<(u32, usize)> {
        let offset = self.read_u32()?;
        let actual_count = self.read_u32()?;
        if let Some(max_count) = max_count {
            if u64::from(offset) + u64::from(actual_count) > max_count {
                return Err(NdrError::ConformanceMismatch {
                    max_count: u32::try_from(max_count)
                        .map_err(|_| NdrError::SizeOverflow(max_count))?,
                    actual_count: offset.saturating_add(actual_count),
                });
            }
        }
        let actual_count = self.check_count(u64::from(actual_count), element_size)?;
        Ok((offset, actual_count))
    }
}

/// Varying array - a window of a fixed-capacity array
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VaryingArray<T> {
    pub offset: u32,
    pub elements: Vec<T>,
}

impl<T> VaryingArray<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self {
            offset: 0,
            elements,
        }
    }
}

impl<T: NdrEncode> NdrEncode for VaryingArray<T> {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        w.write_variance(self.offset, self.elements.len() as u64)?;
        for elem in &self.elements {
            elem.encode_ndr(w)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for VaryingArray<T> {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        let (offset, count) = r.read_variance(None, T::ndr_min_size())?;
        self.offset = offset;
        decode_elements(&mut self.elements, count, r)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        8
    }
}

/// Conformant varying array - capacity and transmitted window both on the wire
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantVaryingArray<T> {
    pub max_count: u32,
    pub offset: u32,
    pub elements: Vec<T>,
}

impl<T> ConformantVaryingArray<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self {
            // oversized vectors fail in write_size at encode time
            max_count: u32::try_from(elements.len()).unwrap_or(u32::MAX),
            offset: 0,
            elements,
        }
    }

    pub fn with_max(max_count: u32, elements: Vec<T>) -> Self {
        Self {
            max_count,
            offset: 0,
            elements,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T: NdrEncode> NdrEncode for ConformantVaryingArray<T> {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
        // capacity never below what is actually sent
        let needed = u64::from(self.offset) + self.elements.len() as u64;
        w.write_size(needed.max(u64::from(self.max_count)))?;
        w.write_variance(self.offset, self.elements.len() as u64)?;
        for elem in &self.elements {
            elem.encode_ndr(w)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for ConformantVaryingArray<T> {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
        let max_count = r.read_size()?;
        let (offset, count) = r.read_variance(Some(max_count), T::ndr_min_size())?;
        self.max_count =
            u32::try_from(max_count).map_err(|_| NdrError::SizeOverflow(max_count))?;
        self.offset = offset;
        decode_elements(&mut self.elements, count, r)
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        12
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NdrContext;

    #[test]
    fn test_conformant_array_wire_layout() {
        let values: Vec<u16> = vec![1, 2, 3];
        let mut w = NdrWriter::new(NdrContext::new());
        values.encode_ndr(&mut w).unwrap();
        let data = w.finish().unwrap();
        assert_eq!(data.as_ref(), &[3, 0, 0, 0, 1, 0, 2, 0, 3, 0]);

        let mut decoded: Vec<u16> = Vec::new();
        {
            let mut r = NdrReader::new(data, NdrContext::new());
            decoded.decode_ndr(&mut r).unwrap();
            r.finish().unwrap();
        }
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_conformant_array_claiming_too_much() {
        let data = bytes::Bytes::from_static(&[0x00, 0x00, 0x01, 0x00, 1, 0, 0, 0]);
        let mut decoded: Vec<u32> = Vec::new();
        let mut r = NdrReader::new(data, NdrContext::new());
        let err = decoded.decode_ndr(&mut r).unwrap_err();
        assert!(matches!(err, NdrError::BoundsExceeded { count: 0x10000, .. }));
    }

    #[test]
    fn test_conformant_varying_roundtrip() {
        let array = ConformantVaryingArray::with_max(10, vec![7u32, 8]);
        let mut w = NdrWriter::new(NdrContext::new());
        array.encode_ndr(&mut w).unwrap();
        let data = w.finish().unwrap();
        assert_eq!(data.len(), 12 + 8);

        let mut decoded = ConformantVaryingArray::<u32>::default();
        {
            let mut r = NdrReader::new(data, NdrContext::new());
            decoded.decode_ndr(&mut r).unwrap();
        }
        assert_eq!(decoded, array);
    }

    #[test]
    fn test_conformant_varying_full_range_capacity() {
        let array = ConformantVaryingArray::with_max(u32::MAX, vec![1u16, 2, 3]);
        assert_eq!(ConformantVaryingArray::new(vec![1u16, 2, 3]).max_count, 3);
        let mut w = NdrWriter::new(NdrContext::new());
        array.encode_ndr(&mut w).unwrap();
        let data = w.finish().unwrap();
        assert_eq!(&data[..4], &[0xff, 0xff, 0xff, 0xff]);

        let mut decoded = ConformantVaryingArray::<u16>::default();
        {
            let mut r = NdrReader::new(data, NdrContext::new());
            decoded.decode_ndr(&mut r).unwrap();
        }
        assert_eq!(decoded.max_count, u32::MAX);
        assert_eq!(decoded.elements, vec![1, 2, 3]);
    }

    #[test]
    fn test_variance_beyond_conformance() {
        let mut w = NdrWriter::new(NdrContext::new());
        w.write_size(1).unwrap();
        w.write_variance(0, 2).unwrap();
        w.write_u32(1);
        w.write_u32(2);
        let data = w.finish().unwrap();

        let mut decoded = ConformantVaryingArray::<u32>::default();
        let mut r = NdrReader::new(data, NdrContext::new());
        assert!(matches!(
            decoded.decode_ndr(&mut r),
            Err(NdrError::ConformanceMismatch { max_count: 1, actual_count: 2 })
        ));
    }

    #[test]
    fn test_fixed_array() {
        let array = [1u8, 2, 3, 4];
        let mut w = NdrWriter::new(NdrContext::new());
        array.encode_ndr(&mut w).unwrap();
        let data = w.finish().unwrap();
        assert_eq!(data.as_ref(), &array);

        let mut decoded = [0u8; 4];
        {
            let mut r = NdrReader::new(data, NdrContext::new());
            decoded.decode_ndr(&mut r).unwrap();
        }
        assert_eq!(decoded, array);
    }
}

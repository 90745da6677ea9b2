//! NDR primitive type implementations
//!
//! | MIDL Type      | Rust Type | Size | Alignment |
//! |----------------|-----------|------|-----------|
//! | boolean        | bool      | 1    | 1         |
//! | byte/char      | u8        | 1    | 1         |
//! | small          | i8        | 1    | 1         |
//! | short          | i16       | 2    | 2         |
//! | long/int       | i32       | 4    | 4         |
//! | hyper          | i64       | 8    | 8         |
//! | unsigned short | u16       | 2    | 2         |
//! | unsigned long  | u32       | 4    | 4         |
//! | unsigned hyper | u64       | 8    | 8         |
//! | float          | f32       | 4    | 4         |
//! | double         | f64       | 8    | 8         |
//! | wchar_t        | u16       | 2    | 2         |
//! | error_status_t | u32       | 4    | 4         |
//! | enum           | u16       | 2    | 2         |

use crate::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};

macro_rules! impl_ndr_primitive {
    ($($ty:ty => $size:expr, $write:ident, $read:ident;)*) => {
        $(
            impl NdrEncode for $ty {
                fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> Result<()> {
                    w.$write(*self);
                    Ok(())
                }

                fn ndr_align() -> usize {
                    $size
                }
            }

            impl NdrDecode for $ty {
                fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> Result<()> {
                    *self = r.$read()?;
                    Ok(())
                }

                fn ndr_align() -> usize {
                    $size
                }

                fn ndr_min_size() -> usize {
                    $size
                }
            }
        )*
    };
}

impl_ndr_primitive! {
    u8 => 1, write_u8, read_u8;
    i8 => 1, write_i8, read_i8;
    bool => 1, write_bool, read_bool;
    u16 => 2, write_u16, read_u16;
    i16 => 2, write_i16, read_i16;
    u32 => 4, write_u32, read_u32;
    i32 => 4, write_i32, read_i32;
    u64 => 8, write_u64, read_u64;
    i64 => 8, write_i64, read_i64;
    f32 => 4, write_f32, read_f32;
    f64 => 8, write_f64, read_f64;
}

//! NDR error types

use thiserror::Error;

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Not enough input left for a fixed-size read
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// A conformant size claims more elements than the input can hold
    #[error("buffer overflow for size: {count} elements of {element_size} bytes, {remaining} bytes remaining")]
    BoundsExceeded {
        count: u64,
        element_size: usize,
        remaining: usize,
    },

    /// Size does not fit the 32-bit NDR conformance field
    #[error("size {0} does not fit in a 32-bit conformance value")]
    SizeOverflow(u64),

    /// Invalid pointer - unexpected referent ID
    #[error("invalid pointer: referent ID {0:#010x}")]
    InvalidPointer(u32),

    /// Array size mismatch
    #[error("array size mismatch: expected {expected}, got {got}")]
    ArraySizeMismatch { expected: usize, got: usize },

    /// Conformance mismatch
    #[error("conformance mismatch: max_count={max_count}, actual_count={actual_count}")]
    ConformanceMismatch { max_count: u32, actual_count: u32 },

    /// Varying array offset outside the conformant bounds
    #[error("variance offset {offset} out of range for max_count {max_count}")]
    InvalidOffset { offset: u32, max_count: u32 },

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// UTF-16 decoding error
    #[error("UTF-16 error: {0}")]
    Utf16Error(#[from] std::string::FromUtf16Error),
}

impl NdrError {
    /// True for errors raised because the input was shorter than claimed.
    pub fn is_bounds(&self) -> bool {
        matches!(
            self,
            NdrError::BufferUnderflow { .. } | NdrError::BoundsExceeded { .. }
        )
    }
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;

//! Error types for the capture codec.

use std::path::PathBuf;

use thiserror::Error;

/// Failures moving bytes out of the capture device.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// A chunk transfer returned a different length than requested.
    #[error("Transfer at {address:#010x} returned {actual} bytes, expected {requested}")]
    LengthMismatch {
        address: u32,
        requested: usize,
        actual: usize,
    },

    #[error("Capture region size {size:#x} is not a non-zero multiple of 4")]
    BadRegion { size: u32 },

    #[error("Read pointer {pointer:#010x} lies outside the capture region")]
    PointerOutOfRange { pointer: u32 },

    #[error("Extraction of {count} bytes is not a whole number of words")]
    Misaligned { count: usize },

    #[error("Extraction of {count} bytes exceeds the {size}-byte capture region")]
    Oversized { count: usize, size: u32 },
}

/// Malformed capture data. Fatal for the trace being decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown record type {tag} in word {word:#010x} at index {index}")]
    UnknownType { word: u32, tag: u8, index: usize },

    #[error("DATA record at index {index} claims {length} bytes, more than precede it")]
    Underflow { index: usize, length: u16 },

    #[error("DATA record at index {index} claims {length} bytes, past the end of the buffer")]
    Truncated { index: usize, length: u16 },

    #[error("Capture buffer of {length} bytes is not a whole number of words")]
    PartialWord { length: usize },
}

/// Unusable session parameters, reported before any capture data is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported output format for {0:?} (expected .usb, .raw or .txt)")]
    UnsupportedExtension(PathBuf),

    #[error("Unknown capture speed {0:?} (expected high, full or low)")]
    UnknownSpeed(String),
}

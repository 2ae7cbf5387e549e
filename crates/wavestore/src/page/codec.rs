//! Page body codecs.
//!
//! The page tier calls out to a [`Compressor`] with a simple contract:
//! `decompress(compress(body), body.len()) == body` for every body.

use crate::error::{Result, WaveError};
use std::sync::Arc;

/// Lossless byte compressor used for page bodies.
pub trait Compressor: Send + Sync {
    /// Compresses `input`.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `input`, which must expand to exactly `expected_len` bytes.
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>>;

    /// Tag recorded in page directories for bodies written by this codec.
    fn compression_type(&self) -> CompressionType {
        CompressionType::Custom
    }
}

/// Codec identifier recorded in page directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// Bodies are stored as-is.
    Raw = 0,
    /// LZ4 block compression.
    #[default]
    Lz4 = 1,
    /// Caller-supplied codec; readers must be handed the same codec.
    Custom = 0xff,
}

impl CompressionType {
    /// Creates a CompressionType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::Lz4),
            0xff => Some(Self::Custom),
            _ => None,
        }
    }

    /// Returns the built-in codec for this compression type, or `None` for
    /// [`Custom`](Self::Custom).
    pub fn codec(self) -> Option<Arc<dyn Compressor>> {
        match self {
            Self::Raw => Some(Arc::new(RawCodec)),
            Self::Lz4 => Some(Arc::new(Lz4Codec)),
            Self::Custom => None,
        }
    }
}

/// Identity codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Compressor for RawCodec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if input.len() != expected_len {
            return Err(WaveError::DecompressionError(format!(
                "expected {} bytes, got {}",
                expected_len,
                input.len()
            )));
        }
        Ok(input.to_vec())
    }

    fn compression_type(&self) -> CompressionType {
        CompressionType::Raw
    }
}

/// LZ4 block codec. The uncompressed size is not embedded in the output;
/// the page directory supplies it on decompression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl Compressor for Lz4Codec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(input))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let output = lz4_flex::block::decompress(input, expected_len)
            .map_err(|e| WaveError::DecompressionError(e.to_string()))?;
        if output.len() != expected_len {
            return Err(WaveError::DecompressionError(format!(
                "expected {} bytes, got {}",
                expected_len,
                output.len()
            )));
        }
        Ok(output)
    }

    fn compression_type(&self) -> CompressionType {
        CompressionType::Lz4
    }
}

//! Block compression primitives and stream framing
//!
//! A compressed package body is a sequence of blocks, each a big-endian
//! `u32` length followed by that many bytes of payload. A payload is one
//! self-contained LZ4 block with its little-endian decompressed size
//! prepended.

use crate::error::{OtaError, OtaResult};

/// Length of the big-endian block length prefix
pub const BLOCK_HEADER_LEN: usize = 4;

/// Slack kept in the staging queue beyond one compressed block
pub const DECOMPRESS_PADDING: usize = 400;

/// Length of the decompressed-size prefix inside a block payload
const SIZE_PREFIX_LEN: usize = 4;

/// Decompresses one self-contained block
pub trait BlockDecompressor {
    /// Decompress `input` into `output`, replacing its content
    ///
    /// Returns the decompressed length.
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> OtaResult<usize>;
}

impl<T: BlockDecompressor + ?Sized> BlockDecompressor for Box<T> {
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> OtaResult<usize> {
        (**self).decompress(input, output)
    }
}

/// LZ4 block decompressor with an output size cap
#[derive(Debug, Clone)]
pub struct Lz4BlockDecompressor {
    max_output: usize,
}

impl Lz4BlockDecompressor {
    /// Create a decompressor refusing blocks that expand beyond `max_output`
    pub fn new(max_output: usize) -> Self {
        Self { max_output }
    }

    /// Output size cap
    pub fn max_output(&self) -> usize {
        self.max_output
    }
}

impl BlockDecompressor for Lz4BlockDecompressor {
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>) -> OtaResult<usize> {
        let Some((size, body)) = input.split_first_chunk::<SIZE_PREFIX_LEN>() else {
            return Err(OtaError::Decompress(format!(
                "block of {} bytes has no size prefix",
                input.len()
            )));
        };
        let size = u32::from_le_bytes(*size) as usize;
        if size > self.max_output {
            return Err(OtaError::Decompress(format!(
                "block expands to {} bytes, limit is {}",
                size, self.max_output
            )));
        }

        output.clear();
        output.resize(size, 0);
        let written = lz4_flex::block::decompress_into(body, output)
            .map_err(|e| OtaError::Decompress(e.to_string()))?;
        if written != size {
            return Err(OtaError::Decompress(format!(
                "block declared {} bytes but produced {}",
                size, written
            )));
        }
        Ok(written)
    }
}

/// Compress one block into its self-contained payload form
pub fn compress_block(raw: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress_prepend_size(raw)
}

/// Compress `raw` into a framed block stream, `block_size` raw bytes per block
pub fn compress_stream(raw: &[u8], block_size: usize) -> OtaResult<Vec<u8>> {
    if block_size == 0 {
        return Err(OtaError::Config("block size must be non-zero".to_string()));
    }

    let mut out = Vec::with_capacity(raw.len() / 2 + BLOCK_HEADER_LEN);
    for chunk in raw.chunks(block_size) {
        append_block(&mut out, &compress_block(chunk))?;
    }
    Ok(out)
}

/// Append `payload` to `stream` with its big-endian length prefix
pub fn append_block(stream: &mut Vec<u8>, payload: &[u8]) -> OtaResult<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| OtaError::Config(format!("block of {} bytes is too large", payload.len())))?;
    stream.extend_from_slice(&len.to_be_bytes());
    stream.extend_from_slice(payload);
    Ok(())
}

/// Whether a block length prefix marks the end of the stream
///
/// A non-zero leading byte (erased flash or `0xFF` padding) or an all-zero
/// prefix (zero padding) both terminate.
pub fn is_end_marker(prefix: [u8; BLOCK_HEADER_LEN]) -> bool {
    prefix[0] != 0 || prefix == [0; BLOCK_HEADER_LEN]
}

//! Block decompression stage
//!
//! Package bytes are read into a staging queue, optionally decrypted on the
//! way in, then peeled off one length-prefixed block at a time. Bytes of a
//! block that is not yet complete stay queued for the next cycle.

use bytes::{Buf, BytesMut};
use tracing::debug;

use super::{TransformJob, TransformReport, TransformStage, alloc_buffer};
use crate::compress::{BLOCK_HEADER_LEN, BlockDecompressor, DECOMPRESS_PADDING, is_end_marker};
use crate::crypto::{AES_BLOCK_LEN, CbcDecrypt};
use crate::error::{OtaError, OtaResult};
use crate::flash::PartitionStore;
use crate::progress::{Progress, ProgressPhase};

/// Decodes a framed, block-compressed package
pub struct BlockStage {
    queue: BytesMut,
    capacity: usize,
    output: Vec<u8>,
    cipher: Option<Box<dyn CbcDecrypt>>,
    decompressor: Box<dyn BlockDecompressor>,
}

impl BlockStage {
    /// Stage sized for blocks of up to `chunk_size` raw bytes
    pub fn new(
        chunk_size: usize,
        cipher: Option<Box<dyn CbcDecrypt>>,
        decompressor: Box<dyn BlockDecompressor>,
    ) -> OtaResult<Self> {
        let capacity = staging_capacity(chunk_size);
        Ok(Self {
            queue: BytesMut::with_capacity(capacity),
            capacity,
            output: alloc_buffer("decompress output", chunk_size)?,
            cipher,
            decompressor,
        })
    }

    /// Staging queue capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes to request from the package for the next cycle
    fn refill_len(&self, remaining: usize) -> usize {
        let mut want = self.capacity.saturating_sub(self.queue.len());
        if self.cipher.is_some() {
            want -= want % AES_BLOCK_LEN;
        }
        want.min(remaining)
    }
}

/// Staging queue capacity for a given chunk size
pub fn staging_capacity(chunk_size: usize) -> usize {
    chunk_size + BLOCK_HEADER_LEN + DECOMPRESS_PADDING + AES_BLOCK_LEN
}

impl std::fmt::Debug for BlockStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStage")
            .field("capacity", &self.capacity)
            .field("queued", &self.queue.len())
            .field("decrypting", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl TransformStage for BlockStage {
    fn run<S: PartitionStore + ?Sized>(
        &mut self,
        store: &mut S,
        job: &TransformJob,
        progress: &mut dyn FnMut(&Progress),
    ) -> OtaResult<TransformReport> {
        let total = job.size_package;
        if self.cipher.is_some() && total % AES_BLOCK_LEN != 0 {
            return Err(OtaError::InvalidCiphertextLength(total));
        }

        let mut source = job.source();
        let mut sink = job.sink();
        let mut consumed = 0usize;
        let mut blocks = 0u64;
        self.queue.clear();

        loop {
            let want = self.refill_len(source.remaining());
            if want > 0 {
                let start = self.queue.len();
                self.queue.resize(start + want, 0);
                let fresh = &mut self.queue[start..];
                source.read_next(&*store, fresh)?;
                if let Some(cipher) = self.cipher.as_mut() {
                    cipher.decrypt_in_place(fresh)?;
                }
            }

            if self.queue.len() < BLOCK_HEADER_LEN {
                debug!("{} trailing bytes after last block", self.queue.len());
                break;
            }

            let mut prefix = [0u8; BLOCK_HEADER_LEN];
            prefix.copy_from_slice(&self.queue[..BLOCK_HEADER_LEN]);
            if is_end_marker(prefix) {
                debug!("End of block stream after {} bytes", consumed);
                break;
            }

            let declared = u32::from_be_bytes(prefix) as usize;
            let available = self.queue.len() - BLOCK_HEADER_LEN;
            if declared > available {
                return Err(OtaError::MalformedStream {
                    declared,
                    available,
                });
            }

            self.queue.advance(BLOCK_HEADER_LEN);
            let block = self.queue.split_to(declared);
            let len = self.decompressor.decompress(&block, &mut self.output)?;
            drop(block);

            sink.write_next(store, &self.output[..len])?;
            consumed += BLOCK_HEADER_LEN + declared;
            blocks += 1;

            debug!(
                "Block {}: {} -> {} bytes at 0x{:08x}",
                blocks,
                declared,
                len,
                sink.written() - len
            );
            progress(&Progress::new(
                ProgressPhase::Transforming,
                consumed as u64,
                total as u64,
            ));

            if source.remaining() == 0 && self.queue.len() < BLOCK_HEADER_LEN {
                break;
            }
        }

        Ok(TransformReport {
            bytes_read: source.consumed() as u64,
            bytes_written: sink.written() as u64,
            writes: sink.writes() as u64,
            blocks,
        })
    }
}

//! Chunked copy stage, optionally CBC decrypting each chunk in place

use tracing::debug;

use super::{TransformJob, TransformReport, TransformStage, alloc_buffer};
use crate::crypto::{AES_BLOCK_LEN, CbcDecrypt};
use crate::error::{OtaError, OtaResult};
use crate::flash::PartitionStore;
use crate::progress::{Progress, ProgressPhase};

/// Copies the package body to the destination in fixed-size chunks
pub struct CopyStage {
    buf: Vec<u8>,
    cipher: Option<Box<dyn CbcDecrypt>>,
}

impl CopyStage {
    /// Stage reading `chunk_size` bytes per cycle
    pub fn new(chunk_size: usize, cipher: Option<Box<dyn CbcDecrypt>>) -> OtaResult<Self> {
        Ok(Self {
            buf: alloc_buffer("copy chunk", chunk_size)?,
            cipher,
        })
    }

    /// Bytes read per cycle
    pub fn chunk_size(&self) -> usize {
        self.buf.len()
    }

    /// Whether chunks are decrypted
    pub fn is_decrypting(&self) -> bool {
        self.cipher.is_some()
    }
}

impl std::fmt::Debug for CopyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyStage")
            .field("chunk_size", &self.buf.len())
            .field("decrypting", &self.cipher.is_some())
            .finish()
    }
}

impl TransformStage for CopyStage {
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

        while source.remaining() > 0 {
            let len = source.remaining().min(self.buf.len());
            let chunk = &mut self.buf[..len];

            source.read_next(&*store, chunk)?;
            if let Some(cipher) = self.cipher.as_mut() {
                cipher.decrypt_in_place(chunk)?;
            }
            sink.write_next(store, chunk)?;

            debug!(
                "Copied {} bytes to {} ({}/{})",
                len,
                job.destination.name,
                source.consumed(),
                total
            );
            progress(&Progress::new(
                ProgressPhase::Transforming,
                source.consumed() as u64,
                total as u64,
            ));
        }

        Ok(TransformReport {
            bytes_read: source.consumed() as u64,
            bytes_written: sink.written() as u64,
            writes: sink.writes() as u64,
            blocks: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Aes256CbcDecryptor, Aes256CbcEncryptor, KeyMaterial};
    use crate::flash::{MemoryFlash, Partition};
    use crate::header::body_offset;

    fn setup(body: &[u8]) -> OtaResult<(MemoryFlash, TransformJob)> {
        let download = Partition::new("download", 0, 8192);
        let app = Partition::new("app", 8192, 8192);
        let mut flash = MemoryFlash::new(vec![download.clone(), app.clone()]);
        flash.write(&download, body_offset(), body)?;
        flash.clear_logs();
        let job = TransformJob {
            download,
            destination: app,
            size_package: body.len(),
        };
        Ok((flash, job))
    }

    #[test]
    fn test_plain_copy_chunking() -> OtaResult<()> {
        let body: Vec<u8> = (0..330u32).map(|i| (i % 251) as u8).collect();
        let (mut flash, job) = setup(&body)?;
        let mut stage = CopyStage::new(64, None)?;
        let mut reports = Vec::new();

        let report = stage.run(&mut flash, &job, &mut |p| reports.push(*p))?;

        assert_eq!(report.bytes_written, 330);
        assert_eq!(report.writes, 6);
        assert_eq!(flash.write_log().last().map(|w| w.len), Some(10));
        assert_eq!(flash.partition_bytes("app").map(|b| &b[..330]), Some(&body[..]));
        assert_eq!(reports.len(), 6);
        assert_eq!(reports.last().map(Progress::percent), Some(100));
        Ok(())
    }

    #[test]
    fn test_decrypting_copy() -> OtaResult<()> {
        let material = KeyMaterial::new([9; 32], [3; 16]);
        let plain: Vec<u8> = (0..500u32).map(|i| (i * 7) as u8).collect();
        let body = Aes256CbcEncryptor::new(&material)?.encrypt_padded(&plain);
        let (mut flash, job) = setup(&body)?;

        let mut stage = CopyStage::new(128, Some(Box::new(Aes256CbcDecryptor::new(&material)?)))?;
        stage.run(&mut flash, &job, &mut |_| {})?;

        let app = flash.partition_bytes("app").map(<[u8]>::to_vec).unwrap_or_default();
        assert_eq!(&app[..500], &plain[..]);
        Ok(())
    }

    #[test]
    fn test_unaligned_ciphertext_rejected_before_writes() -> OtaResult<()> {
        let material = KeyMaterial::new([9; 32], [3; 16]);
        let (mut flash, job) = setup(&[0u8; 100])?;
        let mut stage = CopyStage::new(64, Some(Box::new(Aes256CbcDecryptor::new(&material)?)))?;

        assert!(matches!(
            stage.run(&mut flash, &job, &mut |_| {}),
            Err(OtaError::InvalidCiphertextLength(100))
        ));
        assert!(flash.write_log().is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_package() -> OtaResult<()> {
        let (mut flash, job) = setup(&[])?;
        let report = CopyStage::new(64, None)?.run(&mut flash, &job, &mut |_| {})?;
        assert_eq!(report, TransformReport::default());
        Ok(())
    }
}

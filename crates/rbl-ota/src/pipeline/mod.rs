//! Transform pipeline: package body in the download partition to raw image
//! in the destination partition
//!
//! The pipeline is chosen once per upgrade from the header algorithm:
//!
//! | Algorithm           | Stage                          |
//! |---------------------|--------------------------------|
//! | `None`              | [`CopyStage`], plain copy      |
//! | `Aes`               | [`CopyStage`], CBC decrypt     |
//! | `Compression`       | [`BlockStage`]                 |
//! | `AesAndCompression` | [`BlockStage`], CBC decrypt    |
//!
//! Stages own their buffers, so every exit path releases them.

pub mod blocks;
pub mod copy;
pub mod sink;
pub mod source;

pub use blocks::BlockStage;
pub use copy::CopyStage;
pub use sink::PartitionSink;
pub use source::PackageSource;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compress::Lz4BlockDecompressor;
use crate::config::OtaConfig;
use crate::crypto::{Aes256CbcDecryptor, CbcDecrypt, KeyProvider};
use crate::error::{OtaError, OtaResult};
use crate::flash::{Partition, PartitionStore};
use crate::header::{Algorithm, RblHeader, body_offset};
use crate::progress::Progress;

/// Where a transform reads from and writes to
#[derive(Debug, Clone)]
pub struct TransformJob {
    /// Download partition holding the package
    pub download: Partition,
    /// Destination partition, erased beforehand
    pub destination: Partition,
    /// Package body size
    pub size_package: usize,
}

impl TransformJob {
    /// Job for the package described by `header`
    pub fn new(download: Partition, destination: Partition, header: &RblHeader) -> Self {
        Self {
            download,
            destination,
            size_package: header.size_package as usize,
        }
    }

    pub(crate) fn source(&self) -> PackageSource {
        PackageSource::new(self.download.clone(), body_offset(), self.size_package)
    }

    pub(crate) fn sink(&self) -> PartitionSink {
        PartitionSink::new(self.destination.clone())
    }
}

/// Outcome of a successful transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    /// Package bytes consumed from the download partition
    pub bytes_read: u64,
    /// Image bytes written to the destination
    pub bytes_written: u64,
    /// Destination write operations issued
    pub writes: u64,
    /// Compressed blocks decoded
    pub blocks: u64,
}

/// A runnable transform stage
pub trait TransformStage {
    /// Stream the package described by `job` into its destination
    fn run<S: PartitionStore + ?Sized>(
        &mut self,
        store: &mut S,
        job: &TransformJob,
        progress: &mut dyn FnMut(&Progress),
    ) -> OtaResult<TransformReport>;
}

/// Transform selected for one upgrade
#[derive(Debug)]
pub enum Transform {
    /// Plain copy
    None(CopyStage),
    /// CBC decrypt while copying
    Aes(CopyStage),
    /// Decompress blocks
    Compression(BlockStage),
    /// CBC decrypt, then decompress blocks
    AesAndCompression(BlockStage),
}

impl Transform {
    /// Build the stage for `algorithm`
    ///
    /// Key material is requested from `keys` only for encrypted packages.
    pub fn build<K: KeyProvider + ?Sized>(
        algorithm: Algorithm,
        config: &OtaConfig,
        keys: &mut K,
    ) -> OtaResult<Self> {
        let cipher = if algorithm.is_encrypted() {
            let material = keys.provide()?;
            let cipher: Box<dyn CbcDecrypt> = Box::new(Aes256CbcDecryptor::new(&material)?);
            Some(cipher)
        } else {
            None
        };

        debug!(
            "Building {} transform, chunk size {}",
            algorithm, config.chunk_size
        );

        Ok(match algorithm {
            Algorithm::None => Transform::None(CopyStage::new(config.chunk_size, None)?),
            Algorithm::Aes => Transform::Aes(CopyStage::new(config.chunk_size, cipher)?),
            Algorithm::Compression => Transform::Compression(BlockStage::new(
                config.chunk_size,
                None,
                Box::new(Lz4BlockDecompressor::new(config.max_block_size)),
            )?),
            Algorithm::AesAndCompression => Transform::AesAndCompression(BlockStage::new(
                config.chunk_size,
                cipher,
                Box::new(Lz4BlockDecompressor::new(config.max_block_size)),
            )?),
        })
    }

    /// Algorithm this transform handles
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Transform::None(_) => Algorithm::None,
            Transform::Aes(_) => Algorithm::Aes,
            Transform::Compression(_) => Algorithm::Compression,
            Transform::AesAndCompression(_) => Algorithm::AesAndCompression,
        }
    }
}

impl TransformStage for Transform {
    fn run<S: PartitionStore + ?Sized>(
        &mut self,
        store: &mut S,
        job: &TransformJob,
        progress: &mut dyn FnMut(&Progress),
    ) -> OtaResult<TransformReport> {
        match self {
            Transform::None(stage) | Transform::Aes(stage) => stage.run(store, job, progress),
            Transform::Compression(stage) | Transform::AesAndCompression(stage) => {
                stage.run(store, job, progress)
            }
        }
    }
}

/// Allocate a zeroed buffer, reporting failure instead of aborting
pub(crate) fn alloc_buffer(what: &'static str, size: usize) -> OtaResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| OtaError::AllocationFailure { what, size })?;
    buf.resize(size, 0);
    Ok(buf)
}

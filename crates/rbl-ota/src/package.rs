//! Host-side package builder
//!
//! Produces the exact bytes the engine expects to find in the download
//! partition: a sealed header followed by the package body.

use tracing::info;

use crate::checksum::{Crc32, FnvHash};
use crate::compress::compress_stream;
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::crypto::{Aes256CbcEncryptor, KeyMaterial};
use crate::error::{OtaError, OtaResult};
use crate::header::{Algorithm, RblHeader};

/// A built package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Sealed header
    pub header: RblHeader,
    /// Package body as stored after the header
    pub body: Vec<u8>,
}

impl Package {
    /// Header followed by body, ready to be written at the top of the
    /// download partition
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(crate::header::HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Total encoded length
    pub fn len(&self) -> usize {
        crate::header::HEADER_LEN + self.body.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Builds rbl packages from raw firmware images
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    partition: String,
    version: String,
    sn: String,
    timestamp: u32,
    compress: bool,
    block_size: usize,
    key: Option<KeyMaterial>,
}

impl PackageBuilder {
    /// Package targeting `partition`, labelled `version`
    pub fn new(partition: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            version: version.into(),
            sn: String::new(),
            timestamp: 0,
            compress: false,
            block_size: DEFAULT_CHUNK_SIZE,
            key: None,
        }
    }

    /// Product serial stored in the header
    pub fn sn(mut self, sn: impl Into<String>) -> Self {
        self.sn = sn.into();
        self
    }

    /// Build timestamp stored in the header
    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Block-compress the image
    ///
    /// `block_size` must not exceed the engine chunk size.
    pub fn compress(mut self, block_size: usize) -> Self {
        self.compress = true;
        self.block_size = block_size;
        self
    }

    /// Encrypt the body with AES-256-CBC
    pub fn encrypt(mut self, key: KeyMaterial) -> Self {
        self.key = Some(key);
        self
    }

    /// Algorithm the built package will declare
    pub fn algorithm(&self) -> Algorithm {
        match (self.key.is_some(), self.compress) {
            (false, false) => Algorithm::None,
            (true, false) => Algorithm::Aes,
            (false, true) => Algorithm::Compression,
            (true, true) => Algorithm::AesAndCompression,
        }
    }

    /// Build a package from `image`
    pub fn build(&self, image: &[u8]) -> OtaResult<Package> {
        let size_raw = u32::try_from(image.len())
            .map_err(|_| OtaError::Config(format!("image of {} bytes is too large", image.len())))?;

        let mut body = if self.compress {
            compress_stream(image, self.block_size)?
        } else {
            image.to_vec()
        };
        if let Some(key) = &self.key {
            body = Aes256CbcEncryptor::new(key)?.encrypt_padded(&body);
        }
        let size_package = u32::try_from(body.len()).map_err(|_| {
            OtaError::Config(format!("package of {} bytes is too large", body.len()))
        })?;

        let algorithm = self.algorithm();
        let mut header = RblHeader {
            algo: algorithm.bits(),
            timestamp: self.timestamp,
            crc32: Crc32::checksum(&body),
            hash: FnvHash::hash(image),
            size_raw,
            size_package,
            ..RblHeader::default()
        };
        header.set_name(&self.partition);
        header.set_version(&self.version);
        header.set_sn(&self.sn);
        header.seal();

        info!(
            "Built {} package for {} version {}: {} -> {} bytes",
            algorithm, self.partition, self.version, size_raw, size_package
        );
        Ok(Package { header, body })
    }
}

//! Engine configuration and flash layout descriptions

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{AES_BLOCK_LEN, KeyMaterial};
use crate::error::{OtaError, OtaResult};
use crate::flash::Partition;

/// Default name of the download partition
pub const DEFAULT_DOWNLOAD_PARTITION: &str = "download";

/// Default pipeline chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default cap on the decompressed size of one block
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Configuration for the OTA engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Name of the partition holding staged packages
    pub download_partition: String,

    /// Bytes read from the download partition per pipeline cycle
    pub chunk_size: usize,

    /// CRC-check the download partition before erasing anything
    pub verify_download_before_upgrade: bool,

    /// Largest decompressed block accepted
    pub max_block_size: usize,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            download_partition: DEFAULT_DOWNLOAD_PARTITION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_download_before_upgrade: true,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

impl OtaConfig {
    /// Check value ranges
    pub fn validate(&self) -> OtaResult<()> {
        if self.download_partition.is_empty() {
            return Err(OtaError::Config(
                "download_partition must not be empty".to_string(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_size % AES_BLOCK_LEN != 0 {
            return Err(OtaError::Config(format!(
                "chunk_size must be a non-zero multiple of {}, got {}",
                AES_BLOCK_LEN, self.chunk_size
            )));
        }
        if self.max_block_size == 0 {
            return Err(OtaError::Config(
                "max_block_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> OtaResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> OtaResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            OtaError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

/// AES key and IV in hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// 64 hex digits
    pub key: String,
    /// 32 hex digits
    pub iv: String,
}

impl KeyConfig {
    /// Decode into key material
    pub fn material(&self) -> OtaResult<KeyMaterial> {
        KeyMaterial::from_hex(&self.key, &self.iv)
    }
}

/// Partition layout of a flash image plus engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLayout {
    /// Partitions, by absolute offset
    pub partitions: Vec<Partition>,

    /// Package decryption key, if packages are encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aes: Option<KeyConfig>,

    /// Engine settings
    #[serde(default)]
    pub ota: OtaConfig,
}

impl FlashLayout {
    /// Check partitions and engine settings
    pub fn validate(&self) -> OtaResult<()> {
        self.ota.validate()?;

        if self.partitions.is_empty() {
            return Err(OtaError::Config("layout has no partitions".to_string()));
        }

        let mut sorted: Vec<&Partition> = self.partitions.iter().collect();
        sorted.sort_by_key(|p| p.offset);
        for pair in sorted.windows(2) {
            if pair[0].end() > pair[1].offset {
                return Err(OtaError::Config(format!(
                    "partitions {} and {} overlap",
                    pair[0], pair[1]
                )));
            }
        }

        for (i, part) in self.partitions.iter().enumerate() {
            if part.len == 0 {
                return Err(OtaError::Config(format!("partition {} is empty", part.name)));
            }
            if self.partitions[..i].iter().any(|p| p.name == part.name) {
                return Err(OtaError::Config(format!(
                    "duplicate partition name {}",
                    part.name
                )));
            }
        }

        if !self
            .partitions
            .iter()
            .any(|p| p.name == self.ota.download_partition)
        {
            return Err(OtaError::PartitionNotFound(
                self.ota.download_partition.clone(),
            ));
        }
        Ok(())
    }

    /// Total flash size covered by the layout
    pub fn flash_size(&self) -> usize {
        self.partitions.iter().map(Partition::end).max().unwrap_or(0)
    }

    /// Look up a partition by name
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Parse and validate a JSON layout
    pub fn from_json_str(json: &str) -> OtaResult<Self> {
        let layout: Self = serde_json::from_str(json)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Load and validate a JSON layout file
    pub fn load(path: impl AsRef<Path>) -> OtaResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            OtaError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

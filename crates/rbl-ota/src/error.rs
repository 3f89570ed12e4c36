//! Error types for OTA upgrade operations

use thiserror::Error;

/// Errors raised by the partition store collaborators
#[derive(Error, Debug)]
pub enum FlashError {
    /// Access outside the partition bounds
    #[error("Access out of bounds on partition '{partition}': offset {offset}, len {len}, partition size {size}")]
    OutOfBounds {
        /// Partition name
        partition: String,
        /// Partition-relative offset of the access
        offset: usize,
        /// Length of the access
        len: usize,
        /// Partition length
        size: usize,
    },

    /// Write or erase attempted while the flash is write-protected
    #[error("Flash is write-protected, refusing to modify partition '{0}'")]
    WriteProtected(String),

    /// Backing storage I/O error
    #[error("Flash I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while checking, transforming or committing a firmware upgrade
#[derive(Error, Debug)]
pub enum OtaError {
    /// The partition store reported an empty partition table
    #[error("Partition table not found")]
    PartitionTableNotFound,

    /// A named partition does not exist
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    /// The firmware header CRC32 does not match its content
    #[error("Firmware header CRC32 mismatch on '{partition}' (calc: {calculated:08x} != hdr: {expected:08x})")]
    ChecksumMismatch {
        /// Partition the header was read from
        partition: String,
        /// CRC32 computed over the header bytes
        calculated: u32,
        /// `info_crc32` stored in the header
        expected: u32,
    },

    /// The payload CRC32 or hash does not match the header
    #[error("Firmware verification failed on '{partition}' (calc: {calculated:08x} != hdr: {expected:08x})")]
    VerifyFailed {
        /// Partition that was verified
        partition: String,
        /// Checksum computed over the payload
        calculated: u32,
        /// Checksum stored in the header
        expected: u32,
    },

    /// The header algorithm bitmask is not supported
    #[error("Unsupported firmware algorithm: 0x{0:04x}")]
    UnsupportedAlgo(u16),

    /// A pipeline buffer could not be allocated
    #[error("Buffer allocation failed: {what} ({size} bytes)")]
    AllocationFailure {
        /// Buffer that failed
        what: &'static str,
        /// Requested size in bytes
        size: usize,
    },

    /// Partition read, write or erase failed
    #[error("Partition I/O error: {0}")]
    Io(#[from] FlashError),

    /// A compressed block declares more bytes than are buffered
    #[error("Malformed compressed stream: block declares {declared} bytes, {available} available")]
    MalformedStream {
        /// Length from the block prefix
        declared: usize,
        /// Bytes available in the staging queue after the prefix
        available: usize,
    },

    /// The download partition was used where a destination partition is required
    #[error("The download partition '{0}' cannot be a header write target")]
    DownloadPartitionTarget(String),

    /// The payload covered by a verification is smaller than one read window
    #[error("Payload on '{partition}' is {size} bytes, at least {min} required")]
    PayloadTooSmall {
        /// Partition that was verified
        partition: String,
        /// Payload size from the header
        size: usize,
        /// Minimum size
        min: usize,
    },

    /// Ciphertext length is not a multiple of the AES block size
    #[error("Ciphertext length {0} is not a multiple of the AES block size")]
    InvalidCiphertextLength(usize),

    /// The key provisioning hook failed
    #[error("Key provisioning failed: {0}")]
    KeyProvisioning(String),

    /// The block decompressor rejected its input
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// An engine operation was called before a successful `init`
    #[error("OTA engine is not initialized")]
    NotInitialized,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for OtaError {
    fn from(e: serde_json::Error) -> Self {
        OtaError::Config(e.to_string())
    }
}

/// Result type for OTA operations
pub type OtaResult<T> = std::result::Result<T, OtaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OtaError::ChecksumMismatch {
            partition: "app".to_string(),
            calculated: 0xdead_beef,
            expected: 0x0000_0001,
        };
        let msg = err.to_string();
        assert!(msg.contains("app"));
        assert!(msg.contains("deadbeef"));
        assert!(msg.contains("00000001"));

        let err = OtaError::UnsupportedAlgo(0x0101);
        assert_eq!(err.to_string(), "Unsupported firmware algorithm: 0x0101");
    }

    #[test]
    fn test_error_from_flash() {
        let flash_err = FlashError::WriteProtected("app".to_string());
        let ota_err: OtaError = flash_err.into();
        assert!(matches!(ota_err, OtaError::Io(FlashError::WriteProtected(_))));
    }

    #[test]
    fn test_error_from_json() {
        let json_result: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        match json_result {
            Err(json_err) => {
                let ota_err: OtaError = json_err.into();
                assert!(matches!(ota_err, OtaError::Config(_)));
            }
            Ok(_) => panic!("Expected error"),
        }
    }
}

//! Error types for otactl

use rbl_ota::OtaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid flash image: {0}")]
    InvalidImage(String),
}

/// Process exit code for a failed command
pub fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(cli) = error.downcast_ref::<CliError>() {
        return match cli {
            CliError::PartitionNotFound(_) => 2,
            CliError::VerificationFailed(_) => 3,
            CliError::InvalidConfiguration(_) | CliError::InvalidImage(_) => 4,
        };
    }

    match error.downcast_ref::<OtaError>() {
        Some(OtaError::PartitionNotFound(_) | OtaError::PartitionTableNotFound) => 2,
        Some(
            OtaError::ChecksumMismatch { .. }
            | OtaError::VerifyFailed { .. }
            | OtaError::PayloadTooSmall { .. },
        ) => 3,
        Some(OtaError::Config(_)) => 4,
        Some(_) => 5,
        None => 1,
    }
}

//! Upgrade progress reporting

use serde::{Deserialize, Serialize};

/// Phase an upgrade is in when progress is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Checking the staged package
    VerifyingDownload,

    /// Erasing the destination partition
    Erasing,

    /// Copying, decrypting or decompressing into the destination
    Transforming,

    /// Checking the installed image
    VerifyingDestination,

    /// Writing the destination header
    Committing,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProgressPhase::VerifyingDownload => "verifying download",
            ProgressPhase::Erasing => "erasing",
            ProgressPhase::Transforming => "transforming",
            ProgressPhase::VerifyingDestination => "verifying destination",
            ProgressPhase::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// A single progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase
    pub phase: ProgressPhase,

    /// Bytes processed in this phase
    pub bytes_done: u64,

    /// Bytes this phase will process
    pub bytes_total: u64,
}

impl Progress {
    /// Create a report
    pub fn new(phase: ProgressPhase, bytes_done: u64, bytes_total: u64) -> Self {
        Self {
            phase,
            bytes_done,
            bytes_total,
        }
    }

    /// Completion percentage, 0 to 100
    pub fn percent(&self) -> u8 {
        if self.bytes_total == 0 {
            return 100;
        }
        let done = self.bytes_done.min(self.bytes_total);
        ((done * 100) / self.bytes_total) as u8
    }
}

/// Receives progress reports
pub type ProgressObserver = Box<dyn FnMut(&Progress) + Send>;

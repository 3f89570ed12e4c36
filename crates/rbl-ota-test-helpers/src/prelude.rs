//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use rbl_ota_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_some};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{
    APP, DOWNLOAD, PARTITION_SIZE, app_partition, download_partition, firmware_image,
    incompressible_image, stage, staged_flash, standard_layout, test_key, test_key_hex,
};

#[cfg(feature = "mock")]
pub use crate::mock::{CountingKeys, Fault, FaultyFlash};

pub use crate::{assert_bytes_eq, assert_err_matches};

/// Result type for tests that use `?`
pub type TestResult = Result<(), Box<dyn std::error::Error>>;

//! Firmware OTA upgrade engine for rbl packages
//!
//! A new firmware package is staged in a *download* partition, optionally
//! AES-256-CBC encrypted and/or block compressed. This crate decides whether
//! it differs from the installed firmware, streams it into the destination
//! partition, verifies the result and commits the firmware header.
//!
//! # Architecture
//!
//! - [`header`]: rbl header codec and algorithm selector
//! - [`verify`]: CRC32 / FNV verification of partition payloads
//! - [`decision`]: upgrade-needed check
//! - [`pipeline`]: copy, decrypt and decompress stages
//! - [`engine`]: upgrade state machine
//! - [`flash`]: partition store traits and an in-memory NOR model
//! - [`crypto`], [`compress`], [`checksum`]: primitives
//! - [`package`]: host-side package builder
//! - [`config`], [`progress`], [`error`]
//!
//! # Example
//!
//! ```
//! use rbl_ota::prelude::*;
//!
//! # fn example() -> Result<(), OtaError> {
//! let download = Partition::new("download", 0x10000, 0x10000);
//! let mut flash = MemoryFlash::new(vec![Partition::new("app", 0, 0x10000), download.clone()]);
//!
//! let image = vec![0x5Au8; 4000];
//! let package = PackageBuilder::new("app", "1.0.0").compress(4096).build(&image)?;
//! flash.write(&download, 0, &package.to_bytes())?;
//!
//! let mut engine = OtaEngine::new(flash, NoKeys, OtaConfig::default())?;
//! match engine.run()? {
//!     UpgradeOutcome::Upgraded(report) => println!("installed {}", report.version),
//!     UpgradeOutcome::UpToDate | UpgradeOutcome::NoPackage => println!("nothing to do"),
//! }
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod checksum;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod decision;
pub mod engine;
pub mod error;
pub mod flash;
pub mod header;
pub mod package;
pub mod pipeline;
pub mod prelude;
pub mod progress;
pub mod verify;

pub use config::{FlashLayout, KeyConfig, OtaConfig};
pub use crypto::{KeyMaterial, KeyProvider, NoKeys, StaticKeyProvider};
pub use decision::{has_package, needs_upgrade};
pub use engine::{OtaEngine, UpgradeOutcome, UpgradeReport, UpgradeState};
pub use error::{FlashError, OtaError, OtaResult};
pub use flash::{MemoryFlash, Partition, PartitionRole, PartitionStore, WriteProtect};
pub use header::{
    AlgoFlags, Algorithm, HEADER_LEN, RblHeader, body_offset, read_header, write_header,
};
pub use package::{Package, PackageBuilder};
pub use pipeline::{Transform, TransformJob, TransformReport, TransformStage};
pub use progress::{Progress, ProgressPhase};
pub use verify::{verify, verify_payload};

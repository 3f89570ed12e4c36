//! Convenience re-exports for common OTA types

pub use crate::checksum::{Crc32, FnvHash};
pub use crate::config::{FlashLayout, KeyConfig, OtaConfig};
pub use crate::crypto::{KeyMaterial, KeyProvider, NoKeys, StaticKeyProvider};
pub use crate::engine::{OtaEngine, UpgradeOutcome, UpgradeReport, UpgradeState};
pub use crate::error::{FlashError, OtaError, OtaResult};
pub use crate::flash::{MemoryFlash, Partition, PartitionRole, PartitionStore, WriteProtect};
pub use crate::header::{Algorithm, HEADER_LEN, RblHeader};
pub use crate::package::{Package, PackageBuilder};
pub use crate::pipeline::TransformReport;
pub use crate::progress::{Progress, ProgressPhase};

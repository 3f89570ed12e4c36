//! Flash partitions and the in-memory reference device

pub mod memory;
pub mod partition;

pub use memory::{ERASED_BYTE, MemoryFlash, WriteRecord};
pub use partition::{Partition, PartitionRole, PartitionStore, WriteProtect};

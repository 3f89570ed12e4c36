//! Flash partition model and the partition store collaborator traits
//!
//! The engine never touches raw flash addresses. It looks partitions up by
//! name and performs partition-relative reads, writes and erases through
//! [`PartitionStore`]. Write-protection is a separate toggle ([`WriteProtect`]).

use serde::{Deserialize, Serialize};

use crate::error::FlashError;
use crate::header::HEADER_LEN;

/// A named, offset/length flash region
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    /// Partition name as used in firmware headers
    pub name: String,

    /// Absolute base offset on the flash device
    pub offset: usize,

    /// Partition length in bytes
    #[serde(alias = "length")]
    pub len: usize,
}

impl Partition {
    /// Create a partition description
    pub fn new(name: impl Into<String>, offset: usize, len: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            len,
        }
    }

    /// Absolute end offset (exclusive)
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }

    /// Check that `offset..offset + len` lies inside the partition
    pub fn check_range(&self, offset: usize, len: usize) -> Result<(), FlashError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(FlashError::OutOfBounds {
                partition: self.name.clone(),
                offset,
                len,
                size: self.len,
            }),
        }
    }

    /// Partition-relative offset of the firmware header for the given role
    ///
    /// Returns `None` when the partition is too small to hold a header.
    pub fn header_offset(&self, role: PartitionRole) -> Option<usize> {
        match role {
            PartitionRole::Download => (self.len >= HEADER_LEN).then_some(0),
            PartitionRole::Destination => self.len.checked_sub(HEADER_LEN),
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [0x{:08x}..0x{:08x}]",
            self.name,
            self.offset,
            self.end()
        )
    }
}

/// Role of a partition in an upgrade, which decides where its header lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionRole {
    /// Staging partition: header on top, package body right after it
    Download,
    /// Any other partition: payload from offset 0, header at the bottom
    Destination,
}

impl std::fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionRole::Download => write!(f, "download"),
            PartitionRole::Destination => write!(f, "destination"),
        }
    }
}

/// Named flash regions with partition-relative byte access
///
/// Every call blocks until the flash operation completes.
pub trait PartitionStore {
    /// Discover the partition table, returning the number of partitions found
    fn init(&mut self) -> usize;

    /// Look up a partition by name
    fn find(&self, name: &str) -> Option<Partition>;

    /// Read `buf.len()` bytes starting at the partition-relative `offset`
    fn read(&self, partition: &Partition, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at the partition-relative `offset`
    ///
    /// The target range must be erased beforehand.
    fn write(&mut self, partition: &Partition, offset: usize, data: &[u8])
    -> Result<(), FlashError>;

    /// Erase the whole partition
    fn erase_all(&mut self, partition: &Partition) -> Result<(), FlashError>;
}

/// Flash write-protection toggle
pub trait WriteProtect {
    /// Enable (`true`) or disable (`false`) write-protection
    fn set_write_protect(&mut self, enabled: bool);
}

impl<T: PartitionStore + ?Sized> PartitionStore for &mut T {
    fn init(&mut self) -> usize {
        (**self).init()
    }

    fn find(&self, name: &str) -> Option<Partition> {
        (**self).find(name)
    }

    fn read(&self, partition: &Partition, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(partition, offset, buf)
    }

    fn write(
        &mut self,
        partition: &Partition,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FlashError> {
        (**self).write(partition, offset, data)
    }

    fn erase_all(&mut self, partition: &Partition) -> Result<(), FlashError> {
        (**self).erase_all(partition)
    }
}

impl<T: WriteProtect + ?Sized> WriteProtect for &mut T {
    fn set_write_protect(&mut self, enabled: bool) {
        (**self).set_write_protect(enabled);
    }
}

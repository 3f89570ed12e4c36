//! Sequential reader over the package body in the download partition

use crate::error::OtaResult;
use crate::flash::{Partition, PartitionStore};

/// Reads `size` bytes from a partition, starting at a fixed body offset
#[derive(Debug, Clone)]
pub struct PackageSource {
    partition: Partition,
    start: usize,
    size: usize,
    consumed: usize,
}

impl PackageSource {
    /// Reader over `partition[start..start + size]`
    pub fn new(partition: Partition, start: usize, size: usize) -> Self {
        Self {
            partition,
            start,
            size,
            consumed: 0,
        }
    }

    /// Bytes read so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.size - self.consumed
    }

    /// Total package size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fill `buf` with the next bytes of the package
    ///
    /// `buf` must not be longer than [`remaining`](Self::remaining).
    pub fn read_next<S: PartitionStore + ?Sized>(
        &mut self,
        store: &S,
        buf: &mut [u8],
    ) -> OtaResult<()> {
        debug_assert!(buf.len() <= self.remaining());
        store.read(&self.partition, self.start + self.consumed, buf)?;
        self.consumed += buf.len();
        Ok(())
    }
}

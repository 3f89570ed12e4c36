//! Sequential writer into the destination partition

use crate::error::{FlashError, OtaResult};
use crate::flash::{Partition, PartitionStore};
use crate::header::HEADER_LEN;

/// Writes at a running offset from the start of a destination partition
///
/// The trailing header area of the partition is never written.
#[derive(Debug, Clone)]
pub struct PartitionSink {
    partition: Partition,
    offset: usize,
    limit: usize,
    writes: usize,
}

impl PartitionSink {
    /// Writer over everything below the header area of `partition`
    pub fn new(partition: Partition) -> Self {
        let limit = partition.len.saturating_sub(HEADER_LEN);
        Self {
            partition,
            offset: 0,
            limit,
            writes: 0,
        }
    }

    /// Bytes written so far
    pub fn written(&self) -> usize {
        self.offset
    }

    /// Number of write operations issued
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Append `data` at the running offset
    pub fn write_next<S: PartitionStore + ?Sized>(
        &mut self,
        store: &mut S,
        data: &[u8],
    ) -> OtaResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.offset + data.len() > self.limit {
            return Err(FlashError::OutOfBounds {
                partition: self.partition.name.clone(),
                offset: self.offset,
                len: data.len(),
                size: self.limit,
            }
            .into());
        }
        store.write(&self.partition, self.offset, data)?;
        self.offset += data.len();
        self.writes += 1;
        Ok(())
    }
}

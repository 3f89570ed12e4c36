//! In-memory NOR flash model
//!
//! [`MemoryFlash`] backs host tools and tests. It follows NOR programming
//! rules: erase sets every byte to `0xFF`, programming can only clear bits.
//! While write-protected every write and erase is rejected.

use tracing::debug;

use crate::error::{FlashError, OtaError, OtaResult};
use crate::flash::partition::{Partition, PartitionStore, WriteProtect};

/// Value of an erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

/// One recorded program operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Partition name
    pub partition: String,
    /// Partition-relative offset
    pub offset: usize,
    /// Number of bytes programmed
    pub len: usize,
}

/// Flash device held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    data: Vec<u8>,
    partitions: Vec<Partition>,
    protected: bool,
    writes: Vec<WriteRecord>,
    erases: Vec<String>,
    protect_history: Vec<bool>,
}

impl MemoryFlash {
    /// Create an erased flash device just large enough for `partitions`
    pub fn new(partitions: Vec<Partition>) -> Self {
        let size = partitions.iter().map(Partition::end).max().unwrap_or(0);
        Self {
            data: vec![ERASED_BYTE; size],
            partitions,
            protected: false,
            writes: Vec::new(),
            erases: Vec::new(),
            protect_history: Vec::new(),
        }
    }

    /// Wrap an existing flash image
    ///
    /// Fails with [`OtaError::Config`] when a partition lies outside the image.
    pub fn from_image(image: Vec<u8>, partitions: Vec<Partition>) -> OtaResult<Self> {
        if let Some(part) = partitions.iter().find(|p| p.end() > image.len()) {
            return Err(OtaError::Config(format!(
                "partition {} exceeds the {} byte flash image",
                part,
                image.len()
            )));
        }

        Ok(Self {
            data: image,
            partitions,
            protected: false,
            writes: Vec::new(),
            erases: Vec::new(),
            protect_history: Vec::new(),
        })
    }

    /// Raw flash contents
    pub fn image(&self) -> &[u8] {
        &self.data
    }

    /// Consume the device, returning the raw flash contents
    pub fn into_image(self) -> Vec<u8> {
        self.data
    }

    /// Contents of a partition, if it exists
    pub fn partition_bytes(&self, name: &str) -> Option<&[u8]> {
        let part = self.partitions.iter().find(|p| p.name == name)?;
        self.data.get(part.offset..part.end())
    }

    /// Configured partitions
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Whether write-protection is currently enabled
    pub fn is_write_protected(&self) -> bool {
        self.protected
    }

    /// Every program operation since creation, in order
    pub fn write_log(&self) -> &[WriteRecord] {
        &self.writes
    }

    /// Program operations that targeted `partition`
    pub fn writes_to(&self, partition: &str) -> Vec<&WriteRecord> {
        self.writes
            .iter()
            .filter(|w| w.partition == partition)
            .collect()
    }

    /// Names of erased partitions, in erase order
    pub fn erase_log(&self) -> &[String] {
        &self.erases
    }

    /// Every write-protect toggle, in order
    pub fn protect_history(&self) -> &[bool] {
        &self.protect_history
    }

    /// Forget recorded writes, erases and protect toggles
    pub fn clear_logs(&mut self) {
        self.writes.clear();
        self.erases.clear();
        self.protect_history.clear();
    }

    fn span(
        &self,
        partition: &Partition,
        offset: usize,
        len: usize,
    ) -> Result<std::ops::Range<usize>, FlashError> {
        partition.check_range(offset, len)?;
        let start = partition.offset + offset;
        let end = start + len;
        if end > self.data.len() {
            return Err(FlashError::OutOfBounds {
                partition: partition.name.clone(),
                offset,
                len,
                size: partition.len,
            });
        }
        Ok(start..end)
    }
}

impl PartitionStore for MemoryFlash {
    fn init(&mut self) -> usize {
        self.partitions.len()
    }

    fn find(&self, name: &str) -> Option<Partition> {
        self.partitions.iter().find(|p| p.name == name).cloned()
    }

    fn read(&self, partition: &Partition, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let span = self.span(partition, offset, buf.len())?;
        let src = self.data.get(span).ok_or_else(|| FlashError::OutOfBounds {
            partition: partition.name.clone(),
            offset,
            len: buf.len(),
            size: partition.len,
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(
        &mut self,
        partition: &Partition,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FlashError> {
        if self.protected {
            return Err(FlashError::WriteProtected(partition.name.clone()));
        }

        let span = self.span(partition, offset, data.len())?;
        for (dst, src) in self.data[span].iter_mut().zip(data) {
            *dst &= *src;
        }

        self.writes.push(WriteRecord {
            partition: partition.name.clone(),
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn erase_all(&mut self, partition: &Partition) -> Result<(), FlashError> {
        if self.protected {
            return Err(FlashError::WriteProtected(partition.name.clone()));
        }

        let span = self.span(partition, 0, partition.len)?;
        self.data[span].fill(ERASED_BYTE);
        self.erases.push(partition.name.clone());
        debug!("Erased partition {}", partition);
        Ok(())
    }
}

impl WriteProtect for MemoryFlash {
    fn set_write_protect(&mut self, enabled: bool) {
        self.protected = enabled;
        self.protect_history.push(enabled);
    }
}

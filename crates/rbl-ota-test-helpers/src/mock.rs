//! Fault-injecting collaborators.

use std::io;

use rbl_ota::crypto::{KeyMaterial, KeyProvider};
use rbl_ota::{FlashError, OtaError, OtaResult, Partition, PartitionStore, WriteProtect};

/// Which operation a [`FaultyFlash`] should fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the n-th write (0-based) to the named partition
    Write {
        /// Partition name
        partition: String,
        /// Index of the failing write
        nth: usize,
    },
    /// Fail every erase of the named partition
    Erase(String),
    /// Fail every read of the named partition at or beyond `offset`
    Read {
        /// Partition name
        partition: String,
        /// First failing offset
        offset: usize,
    },
    /// Report an empty partition table
    NoPartitionTable,
}

/// Partition store wrapper that injects failures
#[derive(Debug)]
pub struct FaultyFlash<F> {
    inner: F,
    faults: Vec<Fault>,
    writes_seen: Vec<(String, usize)>,
}

impl<F> FaultyFlash<F> {
    /// Wrap `inner` without any faults
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            faults: Vec::new(),
            writes_seen: Vec::new(),
        }
    }

    /// Add a fault
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Wrapped store
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Unwrap the store
    pub fn into_inner(self) -> F {
        self.inner
    }

    fn injected(partition: &Partition, what: &str) -> FlashError {
        FlashError::Io(io::Error::other(format!(
            "injected {} failure on {}",
            what, partition.name
        )))
    }

    fn write_count(&mut self, partition: &str) -> usize {
        if let Some(entry) = self.writes_seen.iter_mut().find(|(p, _)| p == partition) {
            entry.1 += 1;
            entry.1 - 1
        } else {
            self.writes_seen.push((partition.to_string(), 1));
            0
        }
    }
}

impl<F: PartitionStore> PartitionStore for FaultyFlash<F> {
    fn init(&mut self) -> usize {
        if self.faults.contains(&Fault::NoPartitionTable) {
            return 0;
        }
        self.inner.init()
    }

    fn find(&self, name: &str) -> Option<Partition> {
        self.inner.find(name)
    }

    fn read(&self, partition: &Partition, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let failing = self.faults.iter().any(|f| {
            matches!(f, Fault::Read { partition: p, offset: at }
                if *p == partition.name && offset + buf.len() > *at)
        });
        if failing {
            return Err(Self::injected(partition, "read"));
        }
        self.inner.read(partition, offset, buf)
    }

    fn write(
        &mut self,
        partition: &Partition,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FlashError> {
        let index = self.write_count(&partition.name);
        let failing = self.faults.iter().any(|f| {
            matches!(f, Fault::Write { partition: p, nth } if *p == partition.name && *nth == index)
        });
        if failing {
            return Err(Self::injected(partition, "write"));
        }
        self.inner.write(partition, offset, data)
    }

    fn erase_all(&mut self, partition: &Partition) -> Result<(), FlashError> {
        if self.faults.contains(&Fault::Erase(partition.name.clone())) {
            return Err(Self::injected(partition, "erase"));
        }
        self.inner.erase_all(partition)
    }
}

impl<F: WriteProtect> WriteProtect for FaultyFlash<F> {
    fn set_write_protect(&mut self, enabled: bool) {
        self.inner.set_write_protect(enabled);
    }
}

/// Key provider that counts how often it is asked
#[derive(Debug, Clone)]
pub struct CountingKeys {
    material: Option<KeyMaterial>,
    calls: usize,
}

impl CountingKeys {
    /// Provide `material` on every request
    pub fn new(material: KeyMaterial) -> Self {
        Self {
            material: Some(material),
            calls: 0,
        }
    }

    /// Fail every request
    pub fn failing() -> Self {
        Self {
            material: None,
            calls: 0,
        }
    }

    /// Number of requests so far
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl KeyProvider for CountingKeys {
    fn provide(&mut self) -> OtaResult<KeyMaterial> {
        self.calls += 1;
        self.material
            .clone()
            .ok_or_else(|| OtaError::KeyProvisioning("key store unavailable".to_string()))
    }
}

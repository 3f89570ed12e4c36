//! Streaming checksum primitives
//!
//! [`Crc32`] covers headers and stored package bodies; [`FnvHash`] covers the
//! raw installed image.

/// Seed and offset basis of the image hash
pub const FNV_SEED: u32 = 0x811C_9DC5;

/// FNV 32-bit prime
pub const FNV_PRIME: u32 = 0x0100_0193;

/// Seedable IEEE CRC32 accumulator
#[derive(Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Start a fresh CRC
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Continue from a previously finalized CRC value
    pub fn with_seed(seed: u32) -> Self {
        Self {
            hasher: crc32fast::Hasher::new_with_initial(seed),
        }
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Final CRC value
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }

    /// One-shot CRC over `data`
    pub fn checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32").finish_non_exhaustive()
    }
}

/// FNV-1a 32-bit streaming hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnvHash {
    state: u32,
}

impl FnvHash {
    /// Start from [`FNV_SEED`]
    pub fn new() -> Self {
        Self::with_seed(FNV_SEED)
    }

    /// Start from an arbitrary state
    pub fn with_seed(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state ^= u32::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    /// Current hash value
    pub fn finish(&self) -> u32 {
        self.state
    }

    /// One-shot hash over `data`
    pub fn hash(data: &[u8]) -> u32 {
        let mut h = Self::new();
        h.update(data);
        h.finish()
    }
}

impl Default for FnvHash {
    fn default() -> Self {
        Self::new()
    }
}

//! rbl firmware header codec
//!
//! Every firmware image carries a fixed 96-byte little-endian header. In the
//! download partition the header sits at the top and the package body
//! follows it; in every other partition the header sits at the very end and
//! the raw image starts at offset 0.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::checksum::Crc32;
use crate::error::{OtaError, OtaResult};
use crate::flash::{Partition, PartitionRole, PartitionStore};

/// Size of the encoded header in bytes
pub const HEADER_LEN: usize = 96;

/// Bytes covered by `info_crc32`
pub const HEADER_CRC_SPAN: usize = HEADER_LEN - 4;

/// Header magic
pub const RBL_MAGIC: [u8; 4] = *b"RBL\0";

/// Width of the NUL-padded `name` field
pub const NAME_LEN: usize = 16;

/// Width of the NUL-padded `version` field
pub const VERSION_LEN: usize = 24;

/// Width of the NUL-padded `sn` field
pub const SN_LEN: usize = 24;

bitflags! {
    /// Raw `algo` bitmask as stored in the header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AlgoFlags: u16 {
        /// XOR obfuscation (not supported)
        const XOR = 0x0001;
        /// AES-256-CBC encryption
        const AES256 = 0x0002;
        /// gzip compression (not supported)
        const GZIP = 0x0100;
        /// Block compression
        const COMPRESS = 0x0200;
        /// FastLZ compression (not supported)
        const FASTLZ = 0x0300;

        /// Crypt nibble
        const CRYPT_MASK = 0x000F;
        /// Compression nibble
        const CMPRS_MASK = 0x0F00;
    }
}

/// Supported package transformation, parsed from [`AlgoFlags`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Plain copy
    None,
    /// AES-256-CBC encrypted
    Aes,
    /// Block compressed
    Compression,
    /// Block compressed, then AES-256-CBC encrypted
    AesAndCompression,
}

impl Algorithm {
    /// Parse a raw `algo` field
    ///
    /// Any bit outside the two supported selectors, or an unsupported value
    /// inside either nibble, yields [`OtaError::UnsupportedAlgo`].
    pub fn from_bits(bits: u16) -> OtaResult<Self> {
        let flags = AlgoFlags::from_bits_retain(bits);
        let crypt = flags & AlgoFlags::CRYPT_MASK;
        let cmprs = flags & AlgoFlags::CMPRS_MASK;

        if flags.bits() & !(AlgoFlags::CRYPT_MASK | AlgoFlags::CMPRS_MASK).bits() != 0 {
            return Err(OtaError::UnsupportedAlgo(bits));
        }

        let aes = match crypt.bits() {
            0 => false,
            b if b == AlgoFlags::AES256.bits() => true,
            _ => return Err(OtaError::UnsupportedAlgo(bits)),
        };
        let compressed = match cmprs.bits() {
            0 => false,
            b if b == AlgoFlags::COMPRESS.bits() => true,
            _ => return Err(OtaError::UnsupportedAlgo(bits)),
        };

        Ok(match (aes, compressed) {
            (false, false) => Algorithm::None,
            (true, false) => Algorithm::Aes,
            (false, true) => Algorithm::Compression,
            (true, true) => Algorithm::AesAndCompression,
        })
    }

    /// Raw bitmask for this algorithm
    pub fn bits(self) -> u16 {
        self.flags().bits()
    }

    /// Bitmask for this algorithm
    pub fn flags(self) -> AlgoFlags {
        match self {
            Algorithm::None => AlgoFlags::empty(),
            Algorithm::Aes => AlgoFlags::AES256,
            Algorithm::Compression => AlgoFlags::COMPRESS,
            Algorithm::AesAndCompression => AlgoFlags::AES256 | AlgoFlags::COMPRESS,
        }
    }

    /// Whether the package body is encrypted
    pub fn is_encrypted(self) -> bool {
        matches!(self, Algorithm::Aes | Algorithm::AesAndCompression)
    }

    /// Whether the package body is block compressed
    pub fn is_compressed(self) -> bool {
        matches!(self, Algorithm::Compression | Algorithm::AesAndCompression)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::None => write!(f, "none"),
            Algorithm::Aes => write!(f, "aes256"),
            Algorithm::Compression => write!(f, "compress"),
            Algorithm::AesAndCompression => write!(f, "aes256+compress"),
        }
    }
}

/// Decoded rbl header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RblHeader {
    /// Magic, informational only
    pub magic: [u8; 4],
    /// Algorithm bitmask
    pub algo: u16,
    /// Reserved, carried verbatim
    pub algo2: u16,
    /// Build timestamp in seconds
    pub timestamp: u32,
    /// Target partition name, NUL padded
    pub name: [u8; NAME_LEN],
    /// Firmware version, NUL padded
    pub version: [u8; VERSION_LEN],
    /// Product serial, NUL padded
    pub sn: [u8; SN_LEN],
    /// CRC32 over the stored package body
    pub crc32: u32,
    /// FNV hash over the raw image
    pub hash: u32,
    /// Raw image size
    pub size_raw: u32,
    /// Stored package body size
    pub size_package: u32,
    /// CRC32 over the first 92 header bytes
    pub info_crc32: u32,
}

impl Default for RblHeader {
    fn default() -> Self {
        Self {
            magic: RBL_MAGIC,
            algo: 0,
            algo2: 0,
            timestamp: 0,
            name: [0; NAME_LEN],
            version: [0; VERSION_LEN],
            sn: [0; SN_LEN],
            crc32: 0,
            hash: 0,
            size_raw: 0,
            size_package: 0,
            info_crc32: 0,
        }
    }
}

fn le_u16(bytes: &[u8; HEADER_LEN], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8; HEADER_LEN], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn fixed<const N: usize>(bytes: &[u8; HEADER_LEN], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

fn padded<const N: usize>(value: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let src = value.as_bytes();
    let len = src.len().min(N);
    out[..len].copy_from_slice(&src[..len]);
    out
}

fn unpadded(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

impl RblHeader {
    /// Decode a header, without checking `info_crc32`
    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            magic: fixed(bytes, 0),
            algo: le_u16(bytes, 4),
            algo2: le_u16(bytes, 6),
            timestamp: le_u32(bytes, 8),
            name: fixed(bytes, 12),
            version: fixed(bytes, 28),
            sn: fixed(bytes, 52),
            crc32: le_u32(bytes, 76),
            hash: le_u32(bytes, 80),
            size_raw: le_u32(bytes, 84),
            size_package: le_u32(bytes, 88),
            info_crc32: le_u32(bytes, 92),
        }
    }

    /// Encode the header
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..6].copy_from_slice(&self.algo.to_le_bytes());
        out[6..8].copy_from_slice(&self.algo2.to_le_bytes());
        out[8..12].copy_from_slice(&self.timestamp.to_le_bytes());
        out[12..28].copy_from_slice(&self.name);
        out[28..52].copy_from_slice(&self.version);
        out[52..76].copy_from_slice(&self.sn);
        out[76..80].copy_from_slice(&self.crc32.to_le_bytes());
        out[80..84].copy_from_slice(&self.hash.to_le_bytes());
        out[84..88].copy_from_slice(&self.size_raw.to_le_bytes());
        out[88..92].copy_from_slice(&self.size_package.to_le_bytes());
        out[92..96].copy_from_slice(&self.info_crc32.to_le_bytes());
        out
    }

    /// CRC32 over the first 92 encoded bytes
    pub fn compute_info_crc32(&self) -> u32 {
        let bytes = self.to_bytes();
        Crc32::checksum(&bytes[..HEADER_CRC_SPAN])
    }

    /// Recompute and store `info_crc32`
    pub fn seal(&mut self) {
        self.info_crc32 = self.compute_info_crc32();
    }

    /// Whether `info_crc32` matches the header content
    pub fn is_sealed(&self) -> bool {
        self.info_crc32 == self.compute_info_crc32()
    }

    /// Parsed algorithm
    pub fn algorithm(&self) -> OtaResult<Algorithm> {
        Algorithm::from_bits(self.algo)
    }

    /// Target partition name
    pub fn name(&self) -> String {
        unpadded(&self.name)
    }

    /// Firmware version string
    pub fn version(&self) -> String {
        unpadded(&self.version)
    }

    /// Product serial string
    pub fn sn(&self) -> String {
        unpadded(&self.sn)
    }

    /// Set the target partition name, truncated to 16 bytes
    pub fn set_name(&mut self, name: &str) {
        self.name = padded(name);
    }

    /// Set the version string, truncated to 24 bytes
    pub fn set_version(&mut self, version: &str) {
        self.version = padded(version);
    }

    /// Set the product serial, truncated to 24 bytes
    pub fn set_sn(&mut self, sn: &str) {
        self.sn = padded(sn);
    }
}

/// Serializable summary used by host tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSummary {
    /// Target partition name
    pub name: String,
    /// Version string
    pub version: String,
    /// Product serial
    pub sn: String,
    /// Raw algorithm bitmask
    pub algo: u16,
    /// Build timestamp
    pub timestamp: u32,
    /// Package body CRC32
    pub crc32: u32,
    /// Raw image hash
    pub hash: u32,
    /// Raw image size
    pub size_raw: u32,
    /// Package body size
    pub size_package: u32,
    /// Whether `info_crc32` matches
    pub sealed: bool,
}

impl From<&RblHeader> for HeaderSummary {
    fn from(header: &RblHeader) -> Self {
        Self {
            name: header.name(),
            version: header.version(),
            sn: header.sn(),
            algo: header.algo,
            timestamp: header.timestamp,
            crc32: header.crc32,
            hash: header.hash,
            size_raw: header.size_raw,
            size_package: header.size_package,
            sealed: header.is_sealed(),
        }
    }
}

/// Offset of the package body inside the download partition
pub fn body_offset() -> usize {
    HEADER_LEN
}

fn header_offset(partition: &Partition, role: PartitionRole) -> OtaResult<usize> {
    partition.header_offset(role).ok_or_else(|| {
        OtaError::Io(crate::error::FlashError::OutOfBounds {
            partition: partition.name.clone(),
            offset: 0,
            len: HEADER_LEN,
            size: partition.len,
        })
    })
}

/// Read and validate the header of `partition`
pub fn read_header<S: PartitionStore + ?Sized>(
    store: &S,
    partition: &Partition,
    role: PartitionRole,
) -> OtaResult<RblHeader> {
    let offset = header_offset(partition, role)?;
    let mut raw = [0u8; HEADER_LEN];
    store.read(partition, offset, &mut raw)?;

    let header = RblHeader::from_bytes(&raw);
    let calculated = Crc32::checksum(&raw[..HEADER_CRC_SPAN]);
    if calculated != header.info_crc32 {
        warn!(
            "Header CRC32 mismatch on {} (calc: {:08x} != hdr: {:08x})",
            partition.name, calculated, header.info_crc32
        );
        return Err(OtaError::ChecksumMismatch {
            partition: partition.name.clone(),
            calculated,
            expected: header.info_crc32,
        });
    }

    Ok(header)
}

/// Write `header` to the bottom of a destination partition
///
/// The header bytes must be erased beforehand. The download partition is
/// never a valid target and is rejected before any flash access.
pub fn write_header<S: PartitionStore + ?Sized>(
    store: &mut S,
    partition: &Partition,
    role: PartitionRole,
    header: &RblHeader,
) -> OtaResult<()> {
    if role == PartitionRole::Download {
        return Err(OtaError::DownloadPartitionTarget(partition.name.clone()));
    }
    let offset = header_offset(partition, role)?;
    store.write(partition, offset, &header.to_bytes())?;
    Ok(())
}

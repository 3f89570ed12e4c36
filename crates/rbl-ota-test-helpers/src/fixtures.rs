//! Firmware images, keys and staged flash layouts.

use rbl_ota::crypto::KeyMaterial;
use rbl_ota::{MemoryFlash, Package, Partition, PartitionStore, WriteProtect};

/// Name of the destination partition in [`standard_layout`]
pub const APP: &str = "app";

/// Name of the download partition in [`standard_layout`]
pub const DOWNLOAD: &str = "download";

/// Size of each partition in [`standard_layout`]
pub const PARTITION_SIZE: usize = 64 * 1024;

/// Two 64 KiB partitions: `app` at 0, `download` right after it
pub fn standard_layout() -> Vec<Partition> {
    vec![
        Partition::new(APP, 0, PARTITION_SIZE),
        Partition::new(DOWNLOAD, PARTITION_SIZE, PARTITION_SIZE),
    ]
}

/// The download partition of [`standard_layout`]
pub fn download_partition() -> Partition {
    Partition::new(DOWNLOAD, PARTITION_SIZE, PARTITION_SIZE)
}

/// The destination partition of [`standard_layout`]
pub fn app_partition() -> Partition {
    Partition::new(APP, 0, PARTITION_SIZE)
}

/// Compressible firmware-like image: short repeating runs with a seed-dependent
/// pattern
pub fn firmware_image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i / 7) as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Pseudo-random image that LZ4 cannot shrink
pub fn incompressible_image(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Fixed AES key material for tests
pub fn test_key() -> KeyMaterial {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(7).wrapping_add(1);
    }
    KeyMaterial::new(key, [0xA5; 16])
}

/// Hex form of [`test_key`], as `(key, iv)`
pub fn test_key_hex() -> (String, String) {
    let key = test_key();
    (hex_string(key.key()), hex_string(key.iv()))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Flash with [`standard_layout`] and `package` staged in the download
/// partition; the write log is cleared afterwards
pub fn staged_flash(package: &Package) -> MemoryFlash {
    let mut flash = MemoryFlash::new(standard_layout());
    stage(&mut flash, &download_partition(), package);
    flash
}

/// Stage `package` at the top of `download`, then clear the write, erase
/// and protect logs
///
/// Write-protection is lifted while staging and restored afterwards.
///
/// # Panics
///
/// Panics if the package does not fit.
pub fn stage(flash: &mut MemoryFlash, download: &Partition, package: &Package) {
    let protected = flash.is_write_protected();
    flash.set_write_protect(false);
    flash.erase_all(download).unwrap();
    flash.write(download, 0, &package.to_bytes()).unwrap();
    flash.set_write_protect(protected);
    flash.clear_logs();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images_are_deterministic() {
        assert_eq!(firmware_image(100, 1), firmware_image(100, 1));
        assert_ne!(firmware_image(100, 1), firmware_image(100, 2));
        assert_eq!(incompressible_image(64, 9), incompressible_image(64, 9));
    }

    #[test]
    fn test_key_hex_lengths() {
        let (key, iv) = test_key_hex();
        assert_eq!(key.len(), 64);
        assert_eq!(iv.len(), 32);
        assert!(KeyMaterial::from_hex(&key, &iv).is_ok());
    }
}

//! Firmware verification
//!
//! The download partition is checked with a CRC32 over the stored package
//! body. Any other partition is checked with the FNV hash over the raw image.
//! Both read the payload in small fixed windows.

use tracing::{error, info};

use crate::checksum::{Crc32, FnvHash};
use crate::error::{OtaError, OtaResult};
use crate::flash::{Partition, PartitionRole, PartitionStore};
use crate::header::{RblHeader, body_offset, read_header};

/// Bytes read per verification window
pub const VERIFY_WINDOW: usize = 32;

enum Digest {
    Crc(Crc32),
    Fnv(FnvHash),
}

impl Digest {
    fn update(&mut self, data: &[u8]) {
        match self {
            Digest::Crc(crc) => crc.update(data),
            Digest::Fnv(fnv) => fnv.update(data),
        }
    }

    fn finish(self) -> u32 {
        match self {
            Digest::Crc(crc) => crc.finalize(),
            Digest::Fnv(fnv) => fnv.finish(),
        }
    }
}

/// Verify the payload of `partition` against its own header
///
/// Returns the header on success.
pub fn verify<S: PartitionStore + ?Sized>(
    store: &S,
    partition: &Partition,
    role: PartitionRole,
) -> OtaResult<RblHeader> {
    let header = read_header(store, partition, role)?;
    verify_payload(store, partition, role, &header)?;
    Ok(header)
}

/// Verify the payload of `partition` against `header`
///
/// Used on a freshly written destination, whose own header is only
/// committed after this check passes.
pub fn verify_payload<S: PartitionStore + ?Sized>(
    store: &S,
    partition: &Partition,
    role: PartitionRole,
    header: &RblHeader,
) -> OtaResult<()> {
    let (start, size, expected, mut digest) = match role {
        PartitionRole::Download => (
            body_offset(),
            header.size_package as usize,
            header.crc32,
            Digest::Crc(Crc32::new()),
        ),
        PartitionRole::Destination => (
            0,
            header.size_raw as usize,
            header.hash,
            Digest::Fnv(FnvHash::new()),
        ),
    };

    if size < VERIFY_WINDOW {
        return Err(OtaError::PayloadTooSmall {
            partition: partition.name.clone(),
            size,
            min: VERIFY_WINDOW,
        });
    }
    partition.check_range(start, size)?;

    let mut window = [0u8; VERIFY_WINDOW];
    let mut done = 0;
    while done < size {
        let len = (size - done).min(VERIFY_WINDOW);
        store.read(partition, start + done, &mut window[..len])?;
        digest.update(&window[..len]);
        done += len;
    }

    let calculated = digest.finish();
    if calculated != expected {
        error!(
            "Verify firmware failed on {} (calc: {:08x} != hdr: {:08x})",
            partition.name, calculated, expected
        );
        return Err(OtaError::VerifyFailed {
            partition: partition.name.clone(),
            calculated,
            expected,
        });
    }

    info!(
        "Verified firmware on {}: version {}, timestamp {}",
        partition.name,
        header.version(),
        header.timestamp
    );
    Ok(())
}

//! Upgrade decision

use tracing::{info, warn};

use crate::error::OtaResult;
use crate::flash::{ERASED_BYTE, Partition, PartitionRole, PartitionStore};
use crate::header::read_header;

/// Bytes at the top of the download partition checked for erased flash
pub const BLANK_CHECK_LEN: usize = 32;

/// Whether anything is staged in `download`
///
/// A download partition whose first bytes are all erased holds no package.
pub fn has_package<S: PartitionStore + ?Sized>(
    store: &S,
    download: &Partition,
) -> OtaResult<bool> {
    let mut top = [0u8; BLANK_CHECK_LEN];
    store.read(download, 0, &mut top)?;
    if top.iter().all(|&b| b == ERASED_BYTE) {
        info!("Download partition {} is erased, no package staged", download.name);
        return Ok(false);
    }
    Ok(true)
}

/// Whether the package in `download` differs from the installed firmware
///
/// An unreadable download header is an error. An unreadable installed header,
/// including a missing destination partition, forces the upgrade.
pub fn needs_upgrade<S: PartitionStore + ?Sized>(
    store: &S,
    download: &Partition,
) -> OtaResult<bool> {
    let staged = read_header(store, download, PartitionRole::Download)?;
    let target = staged.name();

    let Some(dest) = store.find(&target) else {
        warn!("Destination partition {} not found, forcing upgrade", target);
        return Ok(true);
    };

    let installed = match read_header(store, &dest, PartitionRole::Destination) {
        Ok(header) => header,
        Err(e) => {
            warn!("Installed firmware header on {} unreadable ({}), forcing upgrade", target, e);
            return Ok(true);
        }
    };

    if installed.to_bytes() == staged.to_bytes() {
        info!("Firmware on {} is up to date: version {}", target, installed.version());
        Ok(false)
    } else {
        info!(
            "Upgrade available for {}: {} -> {}",
            target,
            installed.version(),
            staged.version()
        );
        Ok(true)
    }
}

//! `otactl stage`: write a package into the download partition

use anyhow::{Context, Result};
use rbl_ota::{MemoryFlash, PartitionStore, RblHeader, WriteProtect, HEADER_LEN};
use tracing::info;

use crate::commands::{StageArgs, find_partition, load_image, load_layout, save_image};
use crate::error::CliError;
use crate::output;

/// Execute stage command
pub fn execute(args: &StageArgs, json: bool) -> Result<()> {
    let layout = load_layout(&args.flash.layout)?;
    let mut flash = if args.create && !args.flash.image.exists() {
        info!("Creating erased image {}", args.flash.image.display());
        MemoryFlash::new(layout.partitions.clone())
    } else {
        load_image(&args.flash.image, &layout)?
    };

    let package = std::fs::read(&args.package)
        .with_context(|| format!("failed to read package {}", args.package.display()))?;
    let Some(header_bytes) = package.first_chunk::<HEADER_LEN>() else {
        return Err(CliError::InvalidImage(format!(
            "{} is shorter than an rbl header",
            args.package.display()
        ))
        .into());
    };
    let header = RblHeader::from_bytes(header_bytes);
    if !header.is_sealed() {
        return Err(CliError::InvalidImage(format!(
            "{} does not start with a valid rbl header",
            args.package.display()
        ))
        .into());
    }

    let download = find_partition(&layout, &layout.ota.download_partition)?.clone();
    flash.set_write_protect(false);
    let staged = flash
        .erase_all(&download)
        .and_then(|()| flash.write(&download, 0, &package));
    flash.set_write_protect(true);
    staged.with_context(|| format!("failed to stage package into {}", download.name))?;

    save_image(&args.flash.image, &flash)?;
    output::print_success(
        &format!(
            "Staged {} version {} ({} bytes) into {}",
            header.name(),
            header.version(),
            package.len(),
            download.name
        ),
        json,
    );
    Ok(())
}

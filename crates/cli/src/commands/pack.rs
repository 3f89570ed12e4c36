//! `otactl pack`: build an rbl package from a raw image

use anyhow::{Context, Result};
use rbl_ota::PackageBuilder;
use rbl_ota::config::DEFAULT_CHUNK_SIZE;
use rbl_ota::header::HeaderSummary;

use crate::commands::{PackArgs, load_layout};
use crate::error::CliError;
use crate::output::{self, PartitionHeader};

/// Execute pack command
pub fn execute(args: &PackArgs, json: bool) -> Result<()> {
    let layout = args.layout.as_deref().map(load_layout).transpose()?;
    let chunk_size = layout
        .as_ref()
        .map_or(DEFAULT_CHUNK_SIZE, |l| l.ota.chunk_size);

    let mut builder = PackageBuilder::new(&args.partition, &args.version)
        .sn(&args.sn)
        .timestamp(args.timestamp);

    if args.compress {
        let block_size = args.block_size.unwrap_or(chunk_size);
        if block_size == 0 || block_size > chunk_size {
            return Err(CliError::InvalidConfiguration(format!(
                "block size {} must be between 1 and the chunk size {}",
                block_size, chunk_size
            ))
            .into());
        }
        builder = builder.compress(block_size);
    }

    if args.encrypt {
        let keys = layout
            .as_ref()
            .and_then(|l| l.aes.as_ref())
            .ok_or_else(|| {
                CliError::InvalidConfiguration("layout has no AES key".to_string())
            })?;
        builder = builder.encrypt(keys.material()?);
    }

    let image = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let package = builder.build(&image)?;
    std::fs::write(&args.output, package.to_bytes())
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    output::print_headers(
        &[PartitionHeader {
            partition: args.output.display().to_string(),
            role: "package".to_string(),
            offset: 0,
            len: package.len(),
            header: Some(HeaderSummary::from(&package.header)),
            error: None,
        }],
        json,
    );
    Ok(())
}

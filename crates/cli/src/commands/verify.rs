//! `otactl verify`: check a partition's payload against its header

use anyhow::Result;
use rbl_ota::OtaError;

use crate::commands::{VerifyArgs, open_engine};
use crate::error::CliError;
use crate::output;

/// Execute verify command
pub fn execute(args: &VerifyArgs, json: bool) -> Result<()> {
    let (layout, engine) = open_engine(&args.flash)?;
    let name = args
        .partition
        .as_deref()
        .unwrap_or(&layout.ota.download_partition);

    match engine.verify(name) {
        Ok(header) => {
            output::print_success(
                &format!(
                    "{} holds a valid {} image, version {} ({} bytes)",
                    name,
                    header.name(),
                    header.version(),
                    header.size_raw
                ),
                json,
            );
            Ok(())
        }
        Err(e @ (OtaError::VerifyFailed { .. } | OtaError::ChecksumMismatch { .. })) => {
            Err(CliError::VerificationFailed(e.to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

//! `otactl check`: report whether the staged package needs installing

use anyhow::Result;
use rbl_ota::header::HeaderSummary;

use crate::commands::{CheckArgs, open_engine};
use crate::output;

/// Execute check command
pub fn execute(args: &CheckArgs, json: bool) -> Result<()> {
    let (layout, engine) = open_engine(&args.flash)?;
    if !engine.has_package()? {
        output::print_no_package(json);
        return Ok(());
    }

    let staged = engine.read_header(&layout.ota.download_partition)?;
    let needs_upgrade = engine.needs_upgrade()?;

    output::print_check(&HeaderSummary::from(&staged), needs_upgrade, json);
    Ok(())
}

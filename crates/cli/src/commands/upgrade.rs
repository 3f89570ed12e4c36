//! `otactl upgrade`: install the staged package

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rbl_ota::{OtaEngine, Progress};
use tracing::warn;

use crate::commands::{UpgradeArgs, key_provider, load_image, load_layout, save_image};
use crate::output;

/// Execute upgrade command
pub fn execute(args: &UpgradeArgs, json: bool) -> Result<()> {
    let mut layout = load_layout(&args.flash.layout)?;
    if args.no_precheck {
        layout.ota.verify_download_before_upgrade = false;
    }
    let flash = load_image(&args.flash.image, &layout)?;
    let mut engine = OtaEngine::new(flash, key_provider(&layout)?, layout.ota.clone())?;

    let bar = (!json).then(|| {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:>22} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
        {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bar
    });
    if let Some(bar) = bar.clone() {
        engine.set_progress_observer(move |p: &Progress| {
            bar.set_message(p.phase.to_string());
            bar.set_length(p.bytes_total);
            bar.set_position(p.bytes_done);
        });
    }

    let result = engine.run();
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let state = engine.state().clone();
    let (flash, _) = engine.into_parts();
    if args.dry_run {
        output::print_warning("Dry run, image file left unchanged", json);
    } else {
        save_image(&args.flash.image, &flash)?;
    }

    match result {
        Ok(outcome) => {
            output::print_outcome(&outcome, json);
            Ok(())
        }
        Err(e) => {
            warn!("Upgrade attempt ended: {}", state);
            Err(e.into())
        }
    }
}

//! otactl - rbl firmware package tool
//!
//! Packs firmware images into rbl packages, stages them into the download
//! partition of a raw flash image and runs the OTA engine over that image.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::*;

#[derive(Parser)]
#[command(name = "otactl")]
#[command(about = "rbl OTA tool - Pack, stage, inspect and apply firmware packages")]
#[command(version)]
#[command(long_about = "
otactl works on raw flash image files described by a JSON partition layout.
It builds rbl packages, stages them into the download partition and runs the
same upgrade engine a device runs at boot.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package from a raw firmware image
    Pack(PackArgs),

    /// Write a package into the download partition of an image
    Stage(StageArgs),

    /// Show partition headers
    Inspect(InspectArgs),

    /// Verify a partition against its header
    Verify(VerifyArgs),

    /// Report whether the staged package needs installing
    Check(CheckArgs),

    /// Install the staged package
    Upgrade(UpgradeArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("otactl={},rbl_ota={}", log_level, log_level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            std::process::exit(error::exit_code(&e));
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Pack(args) => commands::pack::execute(args, cli.json),
        Commands::Stage(args) => commands::stage::execute(args, cli.json),
        Commands::Inspect(args) => commands::inspect::execute(args, cli.json),
        Commands::Verify(args) => commands::verify::execute(args, cli.json),
        Commands::Check(args) => commands::check::execute(args, cli.json),
        Commands::Upgrade(args) => commands::upgrade::execute(args, cli.json),
    }
}

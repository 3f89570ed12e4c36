//! Command implementations for otactl

pub mod check;
pub mod inspect;
pub mod pack;
pub mod stage;
pub mod upgrade;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use rbl_ota::{FlashLayout, KeyProvider, MemoryFlash, NoKeys, OtaEngine, StaticKeyProvider};
use tracing::{debug, info};

use crate::error::CliError;

/// Engine type used by every command that touches a flash image
pub type ImageEngine = OtaEngine<MemoryFlash, Box<dyn KeyProvider>>;

/// Flash image file and the layout describing it
#[derive(Args, Debug, Clone)]
pub struct FlashArgs {
    /// Raw flash image file
    #[arg(short, long, env = "OTACTL_IMAGE")]
    pub image: PathBuf,

    /// JSON partition layout
    #[arg(short, long, env = "OTACTL_LAYOUT")]
    pub layout: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PackArgs {
    /// Raw firmware image to package
    pub input: PathBuf,

    /// Output package file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Destination partition name stored in the header
    #[arg(short, long)]
    pub partition: String,

    /// Firmware version stored in the header
    #[arg(long = "fw-version")]
    pub version: String,

    /// Product serial stored in the header
    #[arg(long, default_value = "")]
    pub sn: String,

    /// Build timestamp stored in the header
    #[arg(long, default_value_t = 0)]
    pub timestamp: u32,

    /// Block-compress the image
    #[arg(short, long)]
    pub compress: bool,

    /// Raw bytes per compressed block, defaults to the layout chunk size
    #[arg(long, requires = "compress")]
    pub block_size: Option<usize>,

    /// Encrypt with the AES key from the layout
    #[arg(short, long, requires = "layout")]
    pub encrypt: bool,

    /// Layout supplying the key and chunk size
    #[arg(short, long)]
    pub layout: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    #[command(flatten)]
    pub flash: FlashArgs,

    /// Package file to stage
    pub package: PathBuf,

    /// Create an erased image if the file does not exist
    #[arg(long)]
    pub create: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub flash: FlashArgs,

    /// Only inspect this partition
    pub partition: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub flash: FlashArgs,

    /// Partition to verify, defaults to the download partition
    pub partition: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub flash: FlashArgs,
}

#[derive(Args, Debug, Clone)]
pub struct UpgradeArgs {
    #[command(flatten)]
    pub flash: FlashArgs,

    /// Skip verifying the staged package before erasing the destination
    #[arg(long)]
    pub no_precheck: bool,

    /// Run the upgrade without writing the image back
    #[arg(long)]
    pub dry_run: bool,
}

/// Load and validate a layout file
pub fn load_layout(path: &Path) -> Result<FlashLayout> {
    FlashLayout::load(path).with_context(|| format!("failed to load layout {}", path.display()))
}

/// Load a flash image matching `layout`
pub fn load_image(path: &Path, layout: &FlashLayout) -> Result<MemoryFlash> {
    let image =
        std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let size = layout.flash_size();
    if image.len() < size {
        return Err(CliError::InvalidImage(format!(
            "{} is {} bytes but the layout needs {}",
            path.display(),
            image.len(),
            size
        ))
        .into());
    }
    debug!("Loaded {} byte image from {}", image.len(), path.display());
    Ok(MemoryFlash::from_image(image, layout.partitions.clone())?)
}

/// Write a flash image back to disk
pub fn save_image(path: &Path, flash: &MemoryFlash) -> Result<()> {
    std::fs::write(path, flash.image())
        .with_context(|| format!("failed to write image {}", path.display()))?;
    info!("Wrote {} byte image to {}", flash.image().len(), path.display());
    Ok(())
}

/// Key provider for `layout`
pub fn key_provider(layout: &FlashLayout) -> Result<Box<dyn KeyProvider>> {
    match &layout.aes {
        Some(keys) => Ok(Box::new(StaticKeyProvider::new(keys.material()?))),
        None => Ok(Box::new(NoKeys)),
    }
}

/// Open the image and build an initialized engine over it
pub fn open_engine(args: &FlashArgs) -> Result<(FlashLayout, ImageEngine)> {
    let layout = load_layout(&args.layout)?;
    let flash = load_image(&args.image, &layout)?;
    let keys = key_provider(&layout)?;
    let mut engine = OtaEngine::new(flash, keys, layout.ota.clone())?;
    engine.init().context("failed to initialize OTA engine")?;
    Ok((layout, engine))
}

/// Partition by name, or a [`CliError::PartitionNotFound`]
pub fn find_partition<'a>(
    layout: &'a FlashLayout,
    name: &str,
) -> Result<&'a rbl_ota::Partition> {
    layout
        .partition(name)
        .ok_or_else(|| CliError::PartitionNotFound(name.to_string()).into())
}

//! Upgrade orchestrator
//!
//! [`OtaEngine`] drives one upgrade attempt through
//! `Init -> CheckUpgrade -> Upgrading -> Verifying -> Committing -> Done`.
//! Any failure after the upgrade starts leaves the engine in
//! [`UpgradeState::Failed`]. There is no rollback: the destination is erased
//! before the new image is written, so a failed attempt leaves it unusable
//! until the next successful upgrade.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::OtaConfig;
use crate::crypto::KeyProvider;
use crate::decision;
use crate::error::{FlashError, OtaError, OtaResult};
use crate::flash::{Partition, PartitionRole, PartitionStore, WriteProtect};
use crate::header::{self, HEADER_LEN, RblHeader};
use crate::pipeline::{Transform, TransformJob, TransformReport, TransformStage};
use crate::progress::{Progress, ProgressObserver, ProgressPhase};
use crate::verify;

/// Upgrade state machine states
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpgradeState {
    /// No attempt started
    #[default]
    Init,

    /// Comparing the staged package with the installed firmware
    CheckUpgrade,

    /// Erasing the destination and streaming the package into it
    Upgrading,

    /// Checking the installed image
    Verifying,

    /// Writing the destination header
    Committing,

    /// Attempt finished, firmware is current
    Done,

    /// Attempt failed
    Failed {
        /// Error description
        reason: String,
    },
}

impl UpgradeState {
    /// Whether an attempt is in progress
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            UpgradeState::CheckUpgrade
                | UpgradeState::Upgrading
                | UpgradeState::Verifying
                | UpgradeState::Committing
        )
    }

    /// Whether the last attempt failed
    pub fn is_failed(&self) -> bool {
        matches!(self, UpgradeState::Failed { .. })
    }
}

impl std::fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeState::Init => write!(f, "init"),
            UpgradeState::CheckUpgrade => write!(f, "check-upgrade"),
            UpgradeState::Upgrading => write!(f, "upgrading"),
            UpgradeState::Verifying => write!(f, "verifying"),
            UpgradeState::Committing => write!(f, "committing"),
            UpgradeState::Done => write!(f, "done"),
            UpgradeState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Summary of a committed upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeReport {
    /// Destination partition
    pub partition: String,
    /// Installed version
    pub version: String,
    /// Raw algorithm bitmask of the package
    pub algo: u16,
    /// Pipeline statistics
    pub transform: TransformReport,
}

/// Result of [`OtaEngine::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeOutcome {
    /// Download partition is erased, nothing is staged
    NoPackage,
    /// Installed firmware already matches the staged package
    UpToDate,
    /// New firmware installed and committed
    Upgraded(UpgradeReport),
}

/// Disables write-protection for its lifetime
struct WriteUnprotected<'a, F: WriteProtect> {
    flash: &'a mut F,
}

impl<'a, F: WriteProtect> WriteUnprotected<'a, F> {
    fn new(flash: &'a mut F) -> Self {
        flash.set_write_protect(false);
        Self { flash }
    }
}

impl<F: WriteProtect> Drop for WriteUnprotected<'_, F> {
    fn drop(&mut self) {
        self.flash.set_write_protect(true);
    }
}

impl<F: WriteProtect> Deref for WriteUnprotected<'_, F> {
    type Target = F;

    fn deref(&self) -> &F {
        self.flash
    }
}

impl<F: WriteProtect> DerefMut for WriteUnprotected<'_, F> {
    fn deref_mut(&mut self) -> &mut F {
        self.flash
    }
}

fn notify(observer: &mut Option<ProgressObserver>, progress: &Progress) {
    debug!(
        "Progress: {} {}/{} ({}%)",
        progress.phase,
        progress.bytes_done,
        progress.bytes_total,
        progress.percent()
    );
    if let Some(callback) = observer.as_mut() {
        callback(progress);
    }
}

/// OTA upgrade engine over a partition store and a key provider
pub struct OtaEngine<F, K> {
    flash: F,
    keys: K,
    config: OtaConfig,
    download: Option<Partition>,
    state: UpgradeState,
    observer: Option<ProgressObserver>,
}

impl<F, K> OtaEngine<F, K>
where
    F: PartitionStore + WriteProtect,
    K: KeyProvider,
{
    /// Create an engine; call [`init`](Self::init) before anything else
    pub fn new(flash: F, keys: K, config: OtaConfig) -> OtaResult<Self> {
        config.validate()?;
        Ok(Self {
            flash,
            keys,
            config,
            download: None,
            state: UpgradeState::Init,
            observer: None,
        })
    }

    /// Discover partitions and locate the download partition
    ///
    /// Once this succeeds, further calls do nothing.
    pub fn init(&mut self) -> OtaResult<()> {
        if self.download.is_some() {
            return Ok(());
        }

        let count = self.flash.init();
        if count == 0 {
            error!("Initialize OTA failed: partition table not found");
            return Err(OtaError::PartitionTableNotFound);
        }

        let name = &self.config.download_partition;
        let download = self.flash.find(name).ok_or_else(|| {
            error!("Initialize OTA failed: download partition {} not found", name);
            OtaError::PartitionNotFound(name.clone())
        })?;

        info!(
            "OTA initialized: {} partitions, download partition {}",
            count, download
        );
        self.download = Some(download);
        Ok(())
    }

    /// Whether [`init`](Self::init) has succeeded
    pub fn is_initialized(&self) -> bool {
        self.download.is_some()
    }

    /// Current state
    pub fn state(&self) -> &UpgradeState {
        &self.state
    }

    /// Engine configuration
    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Install a progress observer
    pub fn set_progress_observer(&mut self, observer: impl FnMut(&Progress) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Underlying partition store
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Release the partition store and key provider
    pub fn into_parts(self) -> (F, K) {
        (self.flash, self.keys)
    }

    /// Offset of the package body inside the download partition
    pub fn body_offset(&self) -> usize {
        header::body_offset()
    }

    fn download(&self) -> OtaResult<&Partition> {
        self.download.as_ref().ok_or(OtaError::NotInitialized)
    }

    fn lookup(&self, name: &str) -> OtaResult<(Partition, PartitionRole)> {
        let download = self.download()?;
        if name == download.name {
            return Ok((download.clone(), PartitionRole::Download));
        }
        let partition = self
            .flash
            .find(name)
            .ok_or_else(|| OtaError::PartitionNotFound(name.to_string()))?;
        Ok((partition, PartitionRole::Destination))
    }

    /// Read and validate the firmware header of a partition
    pub fn read_header(&self, name: &str) -> OtaResult<RblHeader> {
        let (partition, role) = self.lookup(name)?;
        header::read_header(&self.flash, &partition, role)
    }

    /// Write a firmware header to the bottom of a destination partition
    ///
    /// The header area must be erased.
    pub fn write_header(&mut self, name: &str, header: &RblHeader) -> OtaResult<()> {
        let (partition, role) = self.lookup(name)?;
        if role == PartitionRole::Download {
            return Err(OtaError::DownloadPartitionTarget(partition.name));
        }
        let mut flash = WriteUnprotected::new(&mut self.flash);
        header::write_header(&mut *flash, &partition, role, header)
    }

    /// Verify the firmware in a partition against its header
    pub fn verify(&self, name: &str) -> OtaResult<RblHeader> {
        let (partition, role) = self.lookup(name)?;
        verify::verify(&self.flash, &partition, role)
    }

    /// Whether anything is staged in the download partition
    pub fn has_package(&self) -> OtaResult<bool> {
        decision::has_package(&self.flash, self.download()?)
    }

    /// Whether the staged package differs from the installed firmware
    pub fn needs_upgrade(&self) -> OtaResult<bool> {
        decision::needs_upgrade(&self.flash, self.download()?)
    }

    /// Run a complete attempt: check, upgrade, verify and commit
    pub fn run(&mut self) -> OtaResult<UpgradeOutcome> {
        self.init()?;

        match self.has_package() {
            Ok(true) => {}
            Ok(false) => {
                info!("No firmware package staged, nothing to do");
                self.transition(UpgradeState::Done);
                return Ok(UpgradeOutcome::NoPackage);
            }
            Err(e) => return Err(self.fail(e)),
        }

        self.transition(UpgradeState::CheckUpgrade);
        match self.check() {
            Ok(true) => {}
            Ok(false) => {
                info!("Firmware is up to date, no upgrade required");
                self.transition(UpgradeState::Done);
                return Ok(UpgradeOutcome::UpToDate);
            }
            Err(e) => return Err(self.fail(e)),
        }

        self.upgrade().map(UpgradeOutcome::Upgraded)
    }

    fn check(&mut self) -> OtaResult<bool> {
        if !self.needs_upgrade()? {
            return Ok(false);
        }

        if self.config.verify_download_before_upgrade {
            let download = self.download()?.clone();
            notify(
                &mut self.observer,
                &Progress::new(ProgressPhase::VerifyingDownload, 0, download.len as u64),
            );
            verify::verify(&self.flash, &download, PartitionRole::Download)?;
        }
        Ok(true)
    }

    /// Upgrade the partition named by the staged package, then verify and
    /// commit it
    pub fn upgrade(&mut self) -> OtaResult<UpgradeReport> {
        let download = self.download()?.clone();
        self.transition(UpgradeState::Upgrading);

        match self.upgrade_from(&download) {
            Ok(report) => {
                info!(
                    "OTA upgrade of {} to version {} complete",
                    report.partition, report.version
                );
                self.transition(UpgradeState::Done);
                Ok(report)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn upgrade_from(&mut self, download: &Partition) -> OtaResult<UpgradeReport> {
        let staged = header::read_header(&self.flash, download, PartitionRole::Download)?;
        let algorithm = staged.algorithm()?;
        let target = staged.name();

        let dest = self
            .flash
            .find(&target)
            .ok_or_else(|| OtaError::PartitionNotFound(target.clone()))?;
        if dest.name == download.name {
            return Err(OtaError::DownloadPartitionTarget(dest.name));
        }
        if dest.header_offset(PartitionRole::Destination).is_none() {
            warn!("Destination partition {} cannot hold a firmware header", dest);
            return Err(FlashError::OutOfBounds {
                partition: dest.name,
                offset: 0,
                len: HEADER_LEN,
                size: dest.len,
            }
            .into());
        }

        let mut transform = Transform::build(algorithm, &self.config, &mut self.keys)?;
        let job = TransformJob::new(download.clone(), dest.clone(), &staged);
        let observer = &mut self.observer;

        let mut flash = WriteUnprotected::new(&mut self.flash);

        info!(
            "OTA upgrading {} to version {} ({}, {} bytes)",
            dest.name,
            staged.version(),
            algorithm,
            staged.size_package
        );
        notify(
            observer,
            &Progress::new(ProgressPhase::Erasing, 0, dest.len as u64),
        );
        flash.erase_all(&dest)?;

        let transform_report =
            transform.run(&mut *flash, &job, &mut |p: &Progress| notify(observer, p))?;

        self.state = UpgradeState::Verifying;
        debug!("OTA state: {}", self.state);
        notify(
            observer,
            &Progress::new(ProgressPhase::VerifyingDestination, 0, u64::from(staged.size_raw)),
        );
        verify::verify_payload(&*flash, &dest, PartitionRole::Destination, &staged)?;

        self.state = UpgradeState::Committing;
        debug!("OTA state: {}", self.state);
        notify(
            observer,
            &Progress::new(ProgressPhase::Committing, 0, HEADER_LEN as u64),
        );
        header::write_header(&mut *flash, &dest, PartitionRole::Destination, &staged)?;

        Ok(UpgradeReport {
            partition: dest.name,
            version: staged.version(),
            algo: staged.algo,
            transform: transform_report,
        })
    }

    fn transition(&mut self, state: UpgradeState) {
        debug!("OTA state: {} -> {}", self.state, state);
        self.state = state;
    }

    fn fail(&mut self, e: OtaError) -> OtaError {
        error!("OTA upgrade failed in state {}: {}", self.state, e);
        self.state = UpgradeState::Failed {
            reason: e.to_string(),
        };
        e
    }
}

impl<F, K> std::fmt::Debug for OtaEngine<F, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtaEngine")
            .field("config", &self.config)
            .field("download", &self.download)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

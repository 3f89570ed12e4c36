//! Integration tests for the complete upgrade lifecycle

use std::sync::{Arc, Mutex};

use rbl_ota::checksum::{Crc32, FnvHash};
use rbl_ota::compress::{append_block, compress_block};
use rbl_ota::crypto::Aes256CbcEncryptor;
use rbl_ota::prelude::*;
use rbl_ota_test_helpers::prelude::*;

type Engine<F = MemoryFlash, K = NoKeys> = OtaEngine<F, K>;

fn engine_with(flash: MemoryFlash, config: OtaConfig) -> Engine {
    must(OtaEngine::new(flash, NoKeys, config))
}

fn keyed_engine<F: PartitionStore + WriteProtect>(
    flash: F,
    config: OtaConfig,
) -> Engine<F, CountingKeys> {
    must(OtaEngine::new(flash, CountingKeys::new(test_key()), config))
}

/// Package with a hand-made body, sealed against `raw`
fn custom_package(algo: u16, body: Vec<u8>, raw: &[u8]) -> Package {
    let mut header = RblHeader {
        algo,
        crc32: Crc32::checksum(&body),
        hash: FnvHash::hash(raw),
        size_raw: raw.len() as u32,
        size_package: body.len() as u32,
        ..RblHeader::default()
    };
    header.set_name(APP);
    header.set_version("custom");
    header.seal();
    Package { header, body }
}

fn app_bytes(flash: &MemoryFlash, len: usize) -> Vec<u8> {
    must_some(flash.partition_bytes(APP), "app partition")[..len].to_vec()
}

fn upgraded(outcome: UpgradeOutcome) -> UpgradeReport {
    match outcome {
        UpgradeOutcome::Upgraded(report) => report,
        other => panic!("Expected an upgrade, got {:?}", other),
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_plain_upgrade_chunk_writes() -> TestResult {
        let config = OtaConfig::default();
        let chunk = config.chunk_size;
        let image = firmware_image(3 * chunk + 10, 1);
        let package = PackageBuilder::new(APP, "1.0.0").build(&image)?;
        let mut engine = engine_with(staged_flash(&package), config);

        let report = upgraded(engine.run()?);
        assert_eq!(report.transform.writes, 4);
        assert_eq!(report.transform.bytes_written, (3 * chunk + 10) as u64);

        let (flash, _) = engine.into_parts();
        let writes = flash.writes_to(APP);
        let lens: Vec<usize> = writes.iter().map(|w| w.len).collect();
        assert_eq!(lens, vec![chunk, chunk, chunk, 10, HEADER_LEN]);
        assert_eq!(writes[4].offset, PARTITION_SIZE - HEADER_LEN);
        assert_bytes_eq!(&app_bytes(&flash, image.len()), &image);
        Ok(())
    }

    #[test]
    fn test_second_run_is_up_to_date() -> TestResult {
        let package = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(5000, 2))?;
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());

        upgraded(engine.run()?);
        assert!(!engine.needs_upgrade()?);
        assert!(!engine.needs_upgrade()?);
        assert_eq!(engine.run()?, UpgradeOutcome::UpToDate);
        assert_eq!(engine.state(), &UpgradeState::Done);
        Ok(())
    }

    #[test]
    fn test_needs_upgrade_is_idempotent_and_pure() -> TestResult {
        let package = PackageBuilder::new(APP, "2.0.0").build(&firmware_image(900, 3))?;
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());
        engine.init()?;

        let first = engine.needs_upgrade()?;
        let second = engine.needs_upgrade()?;
        assert!(first);
        assert_eq!(first, second);
        assert!(engine.flash().write_log().is_empty());
        assert!(engine.flash().erase_log().is_empty());
        Ok(())
    }

    #[test]
    fn test_newer_package_replaces_installed() -> TestResult {
        let old = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(3000, 4))?;
        let new = PackageBuilder::new(APP, "1.1.0").build(&firmware_image(3500, 5))?;
        let mut engine = engine_with(staged_flash(&old), OtaConfig::default());
        upgraded(engine.run()?);

        let (mut flash, _) = engine.into_parts();
        stage(&mut flash, &download_partition(), &new);
        let mut engine = engine_with(flash, OtaConfig::default());

        assert!(engine.needs_upgrade().is_err(), "not initialized yet");
        engine.init()?;
        assert!(engine.needs_upgrade()?);
        let report = upgraded(engine.run()?);
        assert_eq!(report.version, "1.1.0");
        assert_eq!(engine.read_header(APP)?.version(), "1.1.0");
        Ok(())
    }

    #[test]
    fn test_progress_observer() -> TestResult {
        let package = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(10_000, 6))?;
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.set_progress_observer(move |p| {
            if let Ok(mut v) = sink.lock() {
                v.push(*p);
            }
        });

        upgraded(engine.run()?);

        let seen = must(seen.lock());
        let phases: Vec<ProgressPhase> = seen.iter().map(|p| p.phase).collect();
        assert_eq!(phases.first(), Some(&ProgressPhase::VerifyingDownload));
        assert!(phases.contains(&ProgressPhase::Erasing));
        assert_eq!(phases.last(), Some(&ProgressPhase::Committing));

        let transforming: Vec<&Progress> = seen
            .iter()
            .filter(|p| p.phase == ProgressPhase::Transforming)
            .collect();
        assert_eq!(transforming.len(), 3);
        assert!(transforming.windows(2).all(|w| w[0].bytes_done < w[1].bytes_done));
        assert_eq!(must_some(transforming.last(), "transform progress").percent(), 100);
        Ok(())
    }
}

mod algorithms {
    use super::*;

    #[test]
    fn test_aes_upgrade() -> TestResult {
        let image = firmware_image(9000, 7);
        let package = PackageBuilder::new(APP, "1.0.0")
            .encrypt(test_key())
            .build(&image)?;
        let mut engine = keyed_engine(staged_flash(&package), OtaConfig::default());

        let report = upgraded(engine.run()?);
        assert_eq!(report.algo, Algorithm::Aes.bits());

        let (flash, keys) = engine.into_parts();
        assert_eq!(keys.calls(), 1);
        assert_bytes_eq!(&app_bytes(&flash, image.len()), &image);
        Ok(())
    }

    #[test]
    fn test_compressed_upgrade() -> TestResult {
        let image = firmware_image(20_000, 8);
        let package = PackageBuilder::new(APP, "1.0.0").compress(4096).build(&image)?;
        assert!(package.body.len() < image.len());
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());

        let report = upgraded(engine.run()?);
        assert_eq!(report.transform.blocks, 5);

        let (flash, _) = engine.into_parts();
        assert_bytes_eq!(&app_bytes(&flash, image.len()), &image);
        Ok(())
    }

    #[test]
    fn test_compressed_encrypted_upgrade() -> TestResult {
        let image = firmware_image(15_000, 9);
        let package = PackageBuilder::new(APP, "3.0.0")
            .compress(4096)
            .encrypt(test_key())
            .build(&image)?;
        let mut engine = keyed_engine(staged_flash(&package), OtaConfig::default());

        upgraded(engine.run()?);

        let (flash, keys) = engine.into_parts();
        assert_eq!(keys.calls(), 1);
        assert_bytes_eq!(&app_bytes(&flash, image.len()), &image);
        Ok(())
    }

    #[test]
    fn test_two_block_encrypted_stream() -> TestResult {
        let first = incompressible_image(100, 1);
        let second = incompressible_image(50, 2);
        let mut stream = Vec::new();
        append_block(&mut stream, &compress_block(&first))?;
        append_block(&mut stream, &compress_block(&second))?;
        let body = Aes256CbcEncryptor::new(&test_key())?.encrypt_padded(&stream);

        let mut raw = first.clone();
        raw.extend_from_slice(&second);
        let package = custom_package(Algorithm::AesAndCompression.bits(), body, &raw);
        let mut engine = keyed_engine(staged_flash(&package), OtaConfig::default());

        let report = upgraded(engine.run()?);
        assert_eq!(report.transform.blocks, 2);

        let (flash, _) = engine.into_parts();
        let writes = flash.writes_to(APP);
        assert_eq!((writes[0].offset, writes[0].len), (0, 100));
        assert_eq!((writes[1].offset, writes[1].len), (100, 50));
        assert_bytes_eq!(&app_bytes(&flash, 150), &raw);
        Ok(())
    }

    #[test]
    fn test_blocks_straddle_refill_boundary() -> TestResult {
        let config = OtaConfig {
            chunk_size: 64,
            ..OtaConfig::default()
        };
        let image = incompressible_image(1500, 3);
        let package = PackageBuilder::new(APP, "1.0.0")
            .compress(300)
            .encrypt(test_key())
            .build(&image)?;
        let mut engine = keyed_engine(staged_flash(&package), config);

        let report = upgraded(engine.run()?);
        assert_eq!(report.transform.blocks, 5);

        let (flash, _) = engine.into_parts();
        assert_bytes_eq!(&app_bytes(&flash, image.len()), &image);
        Ok(())
    }
}

mod failures {
    use super::*;

    fn corrupt(package: &Package, at: usize) -> Package {
        let mut corrupted = package.clone();
        corrupted.body[at] ^= 0x5A;
        corrupted
    }

    #[test]
    fn test_corrupt_package_rejected_before_erase() -> TestResult {
        let package = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(4000, 10))?;
        let mut engine = engine_with(staged_flash(&corrupt(&package, 1234)), OtaConfig::default());

        assert_err_matches!(engine.run(), OtaError::VerifyFailed { .. });
        assert!(engine.state().is_failed());
        assert!(engine.flash().erase_log().is_empty());
        Ok(())
    }

    #[test]
    fn test_corrupt_package_never_committed() -> TestResult {
        let config = OtaConfig {
            verify_download_before_upgrade: false,
            ..OtaConfig::default()
        };
        let package = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(4000, 11))?;
        let mut engine = engine_with(staged_flash(&corrupt(&package, 99)), config);

        assert_err_matches!(
            engine.run(),
            OtaError::VerifyFailed { ref partition, .. } if partition == APP
        );
        assert!(matches!(engine.state(), UpgradeState::Failed { reason } if reason.contains("verification")));
        assert_err_matches!(engine.read_header(APP), OtaError::ChecksumMismatch { .. });

        let flash = engine.flash();
        assert!(flash.is_write_protected());
        assert!(
            flash
                .writes_to(APP)
                .iter()
                .all(|w| w.offset != PARTITION_SIZE - HEADER_LEN)
        );
        Ok(())
    }

    #[test]
    fn test_unsupported_algorithm_never_erases() -> TestResult {
        let raw = firmware_image(256, 12);
        let package = custom_package(0x0100, raw.clone(), &raw);
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());

        assert_err_matches!(engine.run(), OtaError::UnsupportedAlgo(0x0100));
        assert!(engine.flash().erase_log().is_empty());
        assert!(engine.flash().write_log().is_empty());
        Ok(())
    }

    #[test]
    fn test_unaligned_ciphertext() -> TestResult {
        let raw = firmware_image(100, 13);
        let package = custom_package(Algorithm::Aes.bits(), raw.clone(), &raw);
        let mut engine = keyed_engine(staged_flash(&package), OtaConfig::default());

        assert_err_matches!(engine.run(), OtaError::InvalidCiphertextLength(100));
        assert!(engine.flash().is_write_protected());
        Ok(())
    }

    #[test]
    fn test_malformed_block_stream() -> TestResult {
        let mut body = 5000u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0u8; 60]);
        let package = custom_package(Algorithm::Compression.bits(), body, &[0u8; 64]);
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());

        assert_err_matches!(
            engine.run(),
            OtaError::MalformedStream { declared: 5000, available: 60 }
        );
        assert!(engine.state().is_failed());
        Ok(())
    }

    #[test]
    fn test_missing_destination_partition() -> TestResult {
        let raw = firmware_image(512, 14);
        let mut package = custom_package(0, raw.clone(), &raw);
        package.header.set_name("bootloader");
        package.header.seal();
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());

        engine.init()?;
        assert!(engine.needs_upgrade()?);
        assert_err_matches!(engine.run(), OtaError::PartitionNotFound(ref name) if name == "bootloader");
        Ok(())
    }

    #[test]
    fn test_package_targeting_download_partition() -> TestResult {
        let raw = firmware_image(512, 15);
        let mut package = custom_package(0, raw.clone(), &raw);
        package.header.set_name(DOWNLOAD);
        package.header.seal();
        let mut engine = engine_with(staged_flash(&package), OtaConfig::default());

        assert_err_matches!(engine.run(), OtaError::DownloadPartitionTarget(_));
        Ok(())
    }

    #[test]
    fn test_write_failure_restores_protection() -> TestResult {
        let package = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(9000, 16))?;
        let flash = FaultyFlash::new(staged_flash(&package)).with_fault(Fault::Write {
            partition: APP.to_string(),
            nth: 1,
        });
        let mut engine = keyed_engine(flash, OtaConfig::default());

        assert_err_matches!(engine.run(), OtaError::Io(FlashError::Io(_)));
        assert!(engine.state().is_failed());

        let (flash, _) = engine.into_parts();
        let inner = flash.into_inner();
        assert_eq!(inner.protect_history(), &[false, true]);
        assert!(inner.is_write_protected());
        Ok(())
    }

    #[test]
    fn test_erase_failure_restores_protection() -> TestResult {
        let package = PackageBuilder::new(APP, "1.0.0").build(&firmware_image(1000, 17))?;
        let flash =
            FaultyFlash::new(staged_flash(&package)).with_fault(Fault::Erase(APP.to_string()));
        let mut engine = keyed_engine(flash, OtaConfig::default());

        assert_err_matches!(engine.run(), OtaError::Io(_));
        assert!(engine.flash().inner().is_write_protected());
        assert!(engine.flash().inner().write_log().is_empty());
        Ok(())
    }

    #[test]
    fn test_key_provisioning_failure() -> TestResult {
        let package = PackageBuilder::new(APP, "1.0.0")
            .encrypt(test_key())
            .build(&firmware_image(1000, 18))?;
        let mut engine = must(OtaEngine::new(
            staged_flash(&package),
            CountingKeys::failing(),
            OtaConfig::default(),
        ));

        assert_err_matches!(engine.run(), OtaError::KeyProvisioning(_));
        assert!(engine.flash().erase_log().is_empty());
        Ok(())
    }

    #[test]
    fn test_partition_table_missing() -> TestResult {
        let flash = FaultyFlash::new(MemoryFlash::new(standard_layout()))
            .with_fault(Fault::NoPartitionTable);
        let mut engine = keyed_engine(flash, OtaConfig::default());

        assert_err_matches!(engine.init(), OtaError::PartitionTableNotFound);
        assert!(!engine.is_initialized());
        Ok(())
    }

    #[test]
    fn test_download_header_unreadable() -> TestResult {
        let mut flash = MemoryFlash::new(standard_layout());
        flash.write(&download_partition(), 0, b"not an rbl header")?;
        let mut engine = engine_with(flash, OtaConfig::default());
        engine.init()?;
        assert_err_matches!(engine.needs_upgrade(), OtaError::ChecksumMismatch { .. });
        assert_err_matches!(engine.run(), OtaError::ChecksumMismatch { .. });
        assert!(engine.state().is_failed());
        Ok(())
    }
}

mod blank_download {
    use super::*;

    #[test]
    fn test_erased_download_reports_no_package() -> TestResult {
        let mut flash = MemoryFlash::new(standard_layout());
        flash.write(&app_partition(), 0, &firmware_image(256, 4))?;
        flash.clear_logs();
        let mut engine = engine_with(flash, OtaConfig::default());

        assert_eq!(engine.run()?, UpgradeOutcome::NoPackage);
        assert_eq!(engine.state(), &UpgradeState::Done);
        assert!(!engine.has_package()?);

        let (flash, _) = engine.into_parts();
        assert!(flash.erase_log().is_empty());
        assert!(flash.write_log().is_empty());
        assert_bytes_eq!(&app_bytes(&flash, 256), &firmware_image(256, 4));
        Ok(())
    }

    #[test]
    fn test_package_after_blank_boot() -> TestResult {
        let package = PackageBuilder::new(APP, "2.0.0").build(&firmware_image(900, 9))?;
        let mut flash = MemoryFlash::new(standard_layout());
        let mut engine = engine_with(flash.clone(), OtaConfig::default());
        assert_eq!(engine.run()?, UpgradeOutcome::NoPackage);

        stage(&mut flash, &download_partition(), &package);
        let mut engine = engine_with(flash, OtaConfig::default());
        let report = upgraded(engine.run()?);
        assert_eq!(report.version, "2.0.0");
        Ok(())
    }
}

mod header_access {
    use super::*;

    #[test]
    fn test_write_header_to_destination() -> TestResult {
        let mut engine = engine_with(MemoryFlash::new(standard_layout()), OtaConfig::default());
        engine.init()?;

        let mut header = RblHeader::default();
        header.set_name(APP);
        header.set_version("manual");
        header.seal();
        engine.write_header(APP, &header)?;

        assert_eq!(engine.read_header(APP)?, header);
        assert!(engine.flash().is_write_protected());
        assert_err_matches!(engine.write_header(DOWNLOAD, &header), OtaError::DownloadPartitionTarget(_));
        assert_eq!(engine.body_offset(), HEADER_LEN);
        Ok(())
    }

    #[test]
    fn test_unknown_partition() -> TestResult {
        let mut engine = engine_with(MemoryFlash::new(standard_layout()), OtaConfig::default());
        engine.init()?;
        assert_err_matches!(engine.verify("nvram"), OtaError::PartitionNotFound(_));
        Ok(())
    }
}

//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use rbl_ota::header::HeaderSummary;
use rbl_ota::{Algorithm, UpgradeOutcome};
use serde::Serialize;
use serde_json::json;

/// Header state of one partition, as reported by `inspect`
#[derive(Debug, Clone, Serialize)]
pub struct PartitionHeader {
    pub partition: String,
    pub role: String,
    pub offset: usize,
    pub len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn print_json(value: &serde_json::Value, what: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format {} as JSON: {}", what, e),
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "chain": error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
            "type": error_type_name(error)
        }
    });
    print_json(&error_json, "error");
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print the headers found in each partition
pub fn print_headers(headers: &[PartitionHeader], json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "partitions": headers
            }),
            "headers",
        );
        return;
    }

    if headers.is_empty() {
        println!("{}", "No partitions".yellow());
        return;
    }

    for entry in headers {
        println!(
            "{} {} ({}, 0x{:08x}+0x{:x})",
            "Partition:".bold(),
            entry.partition.bold(),
            entry.role,
            entry.offset,
            entry.len
        );
        match (&entry.header, &entry.error) {
            (Some(header), _) => print_header_human(header),
            (None, Some(error)) => println!("  {} {}", "●".red(), error.dimmed()),
            (None, None) => println!("  {}", "No header".dimmed()),
        }
    }
}

fn print_header_human(header: &HeaderSummary) {
    let algorithm = Algorithm::from_bits(header.algo)
        .map(|a| a.to_string())
        .unwrap_or_else(|_| format!("unsupported (0x{:04x})", header.algo));

    println!("  {} {}", "●".green(), header.name.bold());
    println!("    Version: {}", header.version);
    if !header.sn.is_empty() {
        println!("    Serial: {}", header.sn);
    }
    println!("    Algorithm: {}", algorithm);
    println!("    Timestamp: {}", header.timestamp);
    println!(
        "    Size: {} bytes raw, {} bytes packaged",
        header.size_raw, header.size_package
    );
    println!("    CRC32: 0x{:08x}  Hash: 0x{:08x}", header.crc32, header.hash);
}

/// Print the result of an update check
pub fn print_check(staged: &HeaderSummary, needs_upgrade: bool, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "needs_upgrade": needs_upgrade,
                "staged": staged
            }),
            "check result",
        );
    } else if needs_upgrade {
        println!(
            "{} {} version {} is staged and differs from the installed firmware",
            "●".yellow(),
            staged.name.bold(),
            staged.version
        );
    } else {
        println!(
            "{} {} is up to date (version {})",
            "✓".green(),
            staged.name.bold(),
            staged.version
        );
    }
}

/// Print a check result for an erased download partition
pub fn print_no_package(json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "needs_upgrade": false,
                "staged": null
            }),
            "check result",
        );
    } else {
        print_warning("No package staged in the download partition", false);
    }
}

/// Print the outcome of an upgrade run
pub fn print_outcome(outcome: &UpgradeOutcome, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "outcome": outcome
            }),
            "upgrade outcome",
        );
        return;
    }

    match outcome {
        UpgradeOutcome::NoPackage => {
            print_warning("No package staged in the download partition", false)
        }
        UpgradeOutcome::UpToDate => print_success("Firmware is up to date", false),
        UpgradeOutcome::Upgraded(report) => {
            print_success(
                &format!(
                    "Upgraded {} to version {}",
                    report.partition, report.version
                ),
                false,
            );
            println!(
                "  Read {} bytes, wrote {} bytes in {} writes",
                report.transform.bytes_read,
                report.transform.bytes_written,
                report.transform.writes
            );
            if report.transform.blocks > 0 {
                println!("  Decoded {} blocks", report.transform.blocks);
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "message": message
            }),
            "success message",
        );
    } else {
        println!("{} {}", "✓".green(), message);
    }
}

/// Print warning message
pub fn print_warning(message: &str, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "warning": message
            }),
            "warning message",
        );
    } else {
        println!("{} {}", "⚠".yellow(), message);
    }
}

/// Get error type name for JSON output
fn error_type_name(error: &Error) -> String {
    format!("{:?}", error.root_cause())
        .split(['(', ' ', '{'])
        .next()
        .unwrap_or("Unknown")
        .to_string()
}

//! `otactl inspect`: show the rbl header of each partition

use anyhow::Result;
use rbl_ota::header::HeaderSummary;
use rbl_ota::{PartitionRole, read_header};

use crate::commands::{InspectArgs, find_partition, load_image, load_layout};
use crate::output::{self, PartitionHeader};

/// Execute inspect command
pub fn execute(args: &InspectArgs, json: bool) -> Result<()> {
    let layout = load_layout(&args.flash.layout)?;
    let flash = load_image(&args.flash.image, &layout)?;

    let partitions = match &args.partition {
        Some(name) => vec![find_partition(&layout, name)?.clone()],
        None => layout.partitions.clone(),
    };

    let headers: Vec<PartitionHeader> = partitions
        .into_iter()
        .map(|partition| {
            let role = if partition.name == layout.ota.download_partition {
                PartitionRole::Download
            } else {
                PartitionRole::Destination
            };
            let (header, error) = match read_header(&flash, &partition, role) {
                Ok(header) => (Some(HeaderSummary::from(&header)), None),
                Err(e) => (None, Some(e.to_string())),
            };
            PartitionHeader {
                role: match role {
                    PartitionRole::Download => "download",
                    PartitionRole::Destination => "destination",
                }
                .to_string(),
                offset: partition.offset,
                len: partition.len,
                partition: partition.name,
                header,
                error,
            }
        })
        .collect();

    output::print_headers(&headers, json);
    Ok(())
}

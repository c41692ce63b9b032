// HciTiming - GPL-3.0-or-later
// This file is part of HciTiming.
//
// Copyright (C) 2025 Daniel Freiermuth
//
// HciTiming is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// HciTiming is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with HciTiming.  If not, see <https://www.gnu.org/licenses/>.

//! Parser for the analyzer's tab-separated field output.
//!
//! The analyzer is run with `-T fields -E header=y`, so the first line names
//! the columns and every following line is one frame.

pub mod packet;

pub use packet::{parse_int, qualify_field, Packet, HANDLE_FIELDS};

use crate::error::{Result, SnoopError};

pub const FRAME_NUMBER: &str = "frame.number";
pub const FRAME_TIME_EPOCH: &str = "frame.time_epoch";
pub const FRAME_PROTOCOLS: &str = "frame.protocols";
pub const FRAME_INFO: &str = "_ws.col.Info";

/// Parse the complete standard output of the analyzer into packets.
///
/// Columns are matched by header name, so their order does not matter.
/// Separators inside the last column are kept as part of its value.
pub fn parse_fields_output(output: &str) -> Result<Vec<Packet>> {
    profiling::scope!("parse_fields_output");

    let mut lines = output.lines().enumerate();
    let header: Vec<&str> = loop {
        match lines.next() {
            Some((_, line)) if line.trim().is_empty() => {}
            Some((_, line)) => break line.split('\t').map(str::trim).collect(),
            None => {
                return Err(SnoopError::ExternalToolError(
                    "no output (expected a header line)".to_string(),
                ))
            }
        }
    };

    if !header.contains(&FRAME_TIME_EPOCH) {
        return Err(SnoopError::ExternalToolError(format!(
            "output header lacks the {FRAME_TIME_EPOCH} column: {}",
            header.join(" ")
        )));
    }

    let mut packets = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;
        let packet = parse_line(&header, line, packets.len() + 1)
            .map_err(|reason| SnoopError::ExternalToolError(format!("line {line_number}: {reason}")))?;
        packets.push(packet);
    }

    tracing::debug!("Parsed {} packets from analyzer output", packets.len());
    Ok(packets)
}

fn parse_line(header: &[&str], line: &str, fallback_seq: usize) -> std::result::Result<Packet, String> {
    let mut packet = Packet::new(fallback_seq, 0.0);
    let mut timestamp = None;

    for (name, value) in header.iter().zip(line.splitn(header.len(), '\t')) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match *name {
            FRAME_NUMBER => {
                packet.seq = value
                    .parse()
                    .map_err(|e| format!("invalid {FRAME_NUMBER} {value:?}: {e}"))?;
            }
            FRAME_TIME_EPOCH => {
                let ts: f64 = value
                    .parse()
                    .map_err(|e| format!("invalid {FRAME_TIME_EPOCH} {value:?}: {e}"))?;
                if !ts.is_finite() {
                    return Err(format!("invalid {FRAME_TIME_EPOCH} {value:?}"));
                }
                timestamp = Some(ts);
            }
            FRAME_PROTOCOLS => {
                packet.layers = value.split(':').map(str::to_string).collect();
            }
            FRAME_INFO => packet.summary = Some(value.to_string()),
            _ => {
                packet.fields.insert((*name).to_string(), value.to_string());
            }
        }
    }

    packet.timestamp = timestamp.ok_or_else(|| format!("missing {FRAME_TIME_EPOCH}"))?;
    Ok(packet)
}

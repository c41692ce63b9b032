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

//! Connection timing for Bluetooth HCI snoop logs.
//!
//! Dissection is delegated to Wireshark's `tshark`; this crate runs it,
//! parses the exported fields and tracks connectivity events (ACL set-up,
//! SDP, A2DP, AVRCP, HFP, RFCOMM, disconnect) to report how long each step
//! of a connection took.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod parser;
pub mod report;
pub mod timeline;
pub mod tshark;

pub use config::GlobalConfig;
pub use error::{Result, SnoopError};

use event::EventCatalog;
use parser::Packet;
use std::path::PathBuf;
use tshark::Tshark;

/// What to summarize and how
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// The btsnoop_hci.log to analyze
    pub input: PathBuf,
    /// Append per-event details to the report
    pub verbose: bool,
    /// Flat timeline instead of per-connection tables
    pub timeline: bool,
    /// Analyzer binary, overrides the config file
    pub tshark: Option<PathBuf>,
}

/// Run the analyzer on the input file and build the textual report.
pub fn summarize(options: &Options, config: &GlobalConfig) -> Result<String> {
    tshark::check_input(&options.input)?;

    let program = options.tshark.as_deref().or(config.tshark.as_deref());
    let analyzer = Tshark::locate(program)?;

    let catalog = config.catalog();
    let fields = tshark::field_list(&catalog);
    let output = analyzer.run(&options.input, &fields)?;
    let packets = parser::parse_fields_output(&output)?;

    analyze(&packets, &catalog, options)
}

/// Build the report for already parsed packets.
pub fn analyze(packets: &[Packet], catalog: &EventCatalog, options: &Options) -> Result<String> {
    if options.timeline {
        let events = timeline::dissect_timeline(packets, catalog)?;
        Ok(report::render_timeline(&events, options.verbose))
    } else {
        let connections = connection::parse_connections(packets, catalog)?;
        Ok(report::render_connections(&connections, options.verbose))
    }
}

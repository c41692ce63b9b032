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

//! Connection-agnostic timeline of a capture.
//!
//! Unlike [`crate::connection`], packets are not routed by connection handle:
//! every tracker sees every packet. Useful for captures where the ACL link was
//! set up before logging started.

use crate::error::Result;
use crate::event::catalog::{ACL_CREATE, ACL_REQUEST};
use crate::event::{ConnectivityEvent, EventCatalog};
use crate::parser::Packet;

/// Events tracked once: the first occurrence wins
const SINGLE_SHOT: [&str; 7] = [
    ACL_CREATE,
    ACL_REQUEST,
    "a2dp",
    "avrcp",
    "avrcp capability",
    "rfcomm ch20",
    "rfcomm ch21",
];

/// Events that may happen many times; every completed instance is listed
const REPEATING: [&str; 3] = ["sdp", "hfp", "rfcomm hfp"];

/// Dissect the capture into a flat list of events sorted by start time.
///
/// Keys missing from the catalog are skipped, so a trimmed-down catalog from
/// the config file still works.
pub fn dissect_timeline(packets: &[Packet], catalog: &EventCatalog) -> Result<Vec<ConnectivityEvent>> {
    profiling::scope!("dissect_timeline");

    let mut single: Vec<ConnectivityEvent> = SINGLE_SHOT
        .iter()
        .filter_map(|key| catalog.create(key).ok())
        .collect();
    let mut repeating: Vec<Vec<ConnectivityEvent>> = REPEATING
        .iter()
        .filter_map(|key| catalog.create(key).ok())
        .map(|event| vec![event])
        .collect();

    for packet in packets {
        for event in &mut single {
            event.update(packet);
        }
        for list in &mut repeating {
            let Some(current) = list.last_mut() else {
                continue;
            };
            current.update(packet);
            if current.is_finished() {
                let next = catalog.create(current.key())?;
                list.push(next);
            }
        }
    }
    tracing::info!("Timeline done at packet {}", packets.len());

    let mut events: Vec<ConnectivityEvent> = single
        .into_iter()
        .filter(|event| event.start_time().is_some())
        .collect();
    for mut list in repeating {
        // The last instance is still waiting for its start or finish
        list.pop();
        events.extend(list);
    }
    events.sort_by(|a, b| start_key(a).total_cmp(&start_key(b)));
    Ok(events)
}

fn start_key(event: &ConnectivityEvent) -> f64 {
    event.start_time().unwrap_or(f64::INFINITY)
}

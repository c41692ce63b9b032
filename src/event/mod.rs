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

//! Connectivity events and the state machine that tracks them.
//!
//! An event (e.g. "A2DP stream set-up") starts on a packet matching its start
//! filter, collects relevant packets while in progress, and finishes on a
//! packet matching its finish filter. Events without a finish filter are
//! single-packet events.

pub mod catalog;
pub mod filter;

pub use catalog::EventCatalog;
pub use filter::{Criterion, Expected, KeyField, KeyLocation, PacketFilter};

use crate::parser::Packet;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Static description of an event kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDef {
    /// Short lookup key, e.g. `a2dp` or `acl create`
    pub key: String,
    /// Display name, e.g. `Bluetooth A2DP`
    pub name: String,
    pub start: PacketFilter,
    /// Empty for single-packet events
    #[serde(default)]
    pub finish: PacketFilter,
    #[serde(default)]
    pub relevant: PacketFilter,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_fields: Vec<KeyField>,
}

impl EventDef {
    /// Every fully qualified field this definition inspects
    pub fn referenced_fields(&self) -> impl Iterator<Item = String> + '_ {
        self.start
            .criteria()
            .iter()
            .chain(self.finish.criteria())
            .chain(self.relevant.criteria())
            .filter_map(Criterion::qualified_field)
            .chain(self.key_fields.iter().map(KeyField::qualified_field))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    NotStarted,
    InProgress,
    Finished,
}

/// A packet that contributed to an event
#[derive(Debug, Clone, PartialEq)]
pub struct RelevantPacket {
    pub seq: usize,
    pub timestamp: f64,
    pub summary: Option<String>,
}

/// One instance of an event kind, driven packet by packet
#[derive(Debug, Clone)]
pub struct ConnectivityEvent {
    def: Arc<EventDef>,
    state: EventState,
    start_time: Option<f64>,
    finish_time: Option<f64>,
    relevant_packets: Vec<RelevantPacket>,
    key_values: Vec<String>,
}

impl ConnectivityEvent {
    #[must_use]
    pub const fn new(def: Arc<EventDef>) -> Self {
        Self {
            def,
            state: EventState::NotStarted,
            start_time: None,
            finish_time: None,
            relevant_packets: Vec::new(),
            key_values: Vec::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.def.key
    }

    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.def.name
    }

    /// Display name including key-field values, e.g. `Bluetooth HFP (AT+BRSF; AT+BRSF)`
    #[must_use]
    pub fn name(&self) -> String {
        if self.key_values.is_empty() {
            self.def.name.clone()
        } else {
            format!("{} ({})", self.def.name, self.key_values.join("; "))
        }
    }

    #[must_use]
    pub const fn state(&self) -> EventState {
        self.state
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, EventState::Finished)
    }

    #[must_use]
    pub const fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    #[must_use]
    pub const fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    #[must_use]
    pub fn key_values(&self) -> &[String] {
        &self.key_values
    }

    #[must_use]
    pub fn relevant_packets(&self) -> &[RelevantPacket] {
        &self.relevant_packets
    }

    /// Feed the next packet of the capture into the state machine.
    pub fn update(&mut self, packet: &Packet) {
        match self.state {
            EventState::NotStarted => {
                if !self.def.start.eval(packet) {
                    return;
                }
                let single_packet = self.def.finish.is_empty();
                self.start_time = Some(packet.timestamp);
                self.record(packet, true, single_packet);
                self.state = EventState::InProgress;
                if single_packet {
                    self.finish_time = Some(packet.timestamp);
                    self.state = EventState::Finished;
                }
            }
            EventState::InProgress => {
                if self.def.finish.eval(packet) {
                    self.finish_time = Some(packet.timestamp);
                    self.record(packet, false, true);
                    self.state = EventState::Finished;
                } else if self.def.relevant.eval(packet) {
                    self.record(packet, false, false);
                }
            }
            EventState::Finished => {}
        }
    }

    fn record(&mut self, packet: &Packet, is_start: bool, is_finish: bool) {
        self.relevant_packets.push(RelevantPacket {
            seq: packet.seq,
            timestamp: packet.timestamp,
            summary: packet.summary.clone(),
        });

        for key_field in &self.def.key_fields {
            if !key_field.applies(is_start, is_finish) {
                continue;
            }
            if let Some(value) = packet.field(&key_field.layer, &key_field.field) {
                self.key_values.push(value.to_string());
            }
        }
    }

    /// Human readable summary, times relative to `origin`.
    ///
    /// In verbose mode every relevant packet is listed with its capture time.
    #[must_use]
    pub fn summary_lines(&self, origin: f64, verbose: bool) -> Vec<String> {
        let name = self.name();
        let mut lines = vec![match (self.state, self.start_time, self.finish_time) {
            (EventState::Finished, Some(start), Some(finish)) => format!(
                "Event {name} started at T+{:.6}, finished at T+{:.6}, total {:.6} seconds.",
                start - origin,
                finish - origin,
                finish - start
            ),
            (EventState::InProgress | EventState::Finished, Some(start), _) => {
                format!("Event {name} started at T+{:.6}, not finished.", start - origin)
            }
            _ => format!("Event {name} not started."),
        }];

        let indices: Vec<String> = self
            .relevant_packets
            .iter()
            .map(|p| p.seq.to_string())
            .collect();
        lines.push(format!(
            "{} relevant packets found, index {}",
            self.relevant_packets.len(),
            indices.join(", ")
        ));

        if verbose {
            for packet in &self.relevant_packets {
                lines.push(format!(
                    "Packet #{} [{}] {}",
                    packet.seq,
                    format_capture_time(packet.timestamp),
                    packet.summary.as_deref().unwrap_or("(no summary)")
                ));
            }
        }
        lines
    }
}

/// Render a capture timestamp as UTC wall-clock time
fn format_capture_time(timestamp: f64) -> String {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).map_or_else(
        || format!("{timestamp:.6}"),
        |dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
    )
}

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

//! Textual rendering of connection timing.

use crate::connection::BluetoothConnection;
use crate::event::ConnectivityEvent;

const TABLE_HEADER: &str = "Event Name\tStart Time\tElapsed Time";

/// One row of the timing table; `-1.0` marks a missing timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRow {
    pub name: String,
    pub start: f64,
    pub finish: f64,
}

/// Reference point of a table: the start of its first event
fn origin(events: &[&ConnectivityEvent]) -> f64 {
    events
        .first()
        .and_then(|event| event.start_time())
        .unwrap_or_else(|| {
            if !events.is_empty() {
                tracing::warn!("The first event has not started, timing relative to 0");
            }
            0.0
        })
}

/// Times of every event relative to the first one.
#[must_use]
pub fn time_table(events: &[&ConnectivityEvent]) -> Vec<TimeRow> {
    let origin = origin(events);
    events
        .iter()
        .map(|event| {
            let mut name = event.name();
            if event.finish_time().is_none() {
                name.push_str(" (Not Finished)");
            }
            TimeRow {
                name,
                start: event.start_time().map_or(-1.0, |t| t - origin),
                finish: event.finish_time().map_or(-1.0, |t| t - origin),
            }
        })
        .collect()
}

fn table_lines(events: &[&ConnectivityEvent], verbose: bool) -> Vec<String> {
    let mut lines = vec![TABLE_HEADER.to_string()];
    lines.extend(
        time_table(events)
            .into_iter()
            .map(|row| format!("{}\t{:.6}\t{:.6}", row.name, row.start, row.finish)),
    );

    if verbose {
        let origin = origin(events);
        lines.extend(events.iter().flat_map(|event| event.summary_lines(origin, true)));
    }
    lines
}

/// One line per entry, each newline terminated
fn join_lines(lines: &[String]) -> String {
    lines.iter().fold(String::new(), |mut out, line| {
        out.push_str(line);
        out.push('\n');
        out
    })
}

/// Per-connection report.
///
/// Verbose mode only appends lines, the normal report is always a prefix of
/// each connection's verbose section.
#[must_use]
pub fn render_connections(connections: &[BluetoothConnection], verbose: bool) -> String {
    if connections.is_empty() {
        return "No connections found.\n".to_string();
    }

    let mut lines = Vec::new();
    for connection in connections {
        lines.push("=== Connection ===".to_string());
        lines.push(connection.summary_line());
        lines.extend(table_lines(&connection.events(), verbose));
    }
    join_lines(&lines)
}

/// Flat timeline report
#[must_use]
pub fn render_timeline(events: &[ConnectivityEvent], verbose: bool) -> String {
    if events.is_empty() {
        return "No events found.\n".to_string();
    }

    let refs: Vec<&ConnectivityEvent> = events.iter().collect();
    let mut lines = vec!["=== Timeline ===".to_string()];
    lines.extend(table_lines(&refs, verbose));
    join_lines(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCatalog;
    use crate::parser::Packet;

    fn avrcp(seq: usize, ts: f64, ctype: &str) -> Packet {
        Packet::new(seq, ts)
            .with_layer("btavrcp")
            .with_field("btavrcp.ctype", ctype)
            .with_field("btavrcp.notification.event_id", "0x0d")
    }

    #[test]
    fn test_time_table_relative_to_first_event() {
        let catalog = EventCatalog::default();
        let mut first = catalog.create("avrcp").unwrap();
        first.update(&avrcp(1, 50.0, "0x03"));
        first.update(&avrcp(2, 50.25, "0x0f"));

        let mut second = catalog.create("avrcp").unwrap();
        second.update(&avrcp(3, 51.0, "0x03"));

        let never = catalog.create("a2dp").unwrap();

        let rows = time_table(&[&first, &second, &never]);
        assert_eq!(
            rows,
            vec![
                TimeRow {
                    name: "Bluetooth AVRCP".to_string(),
                    start: 0.0,
                    finish: 0.25,
                },
                TimeRow {
                    name: "Bluetooth AVRCP (Not Finished)".to_string(),
                    start: 1.0,
                    finish: -1.0,
                },
                TimeRow {
                    name: "Bluetooth A2DP (Not Finished)".to_string(),
                    start: -1.0,
                    finish: -1.0,
                },
            ]
        );
    }

    #[test]
    fn test_connection_rendering() {
        let catalog = EventCatalog::default();
        let packets = [
            Packet::new(1, 10.0)
                .with_layer("bthci_cmd")
                .with_field("bthci_cmd.opcode", "0x0405"),
            Packet::new(2, 10.25)
                .with_layer("bthci_evt")
                .with_field("bthci_evt.code", "0x03")
                .with_field("bthci_evt.status", "0x00")
                .with_field("bthci_evt.connection_handle", "0x0001")
                .with_field("bthci_evt.bd_addr", "aa:bb:cc:dd:ee:ff"),
        ];
        let connections = crate::connection::parse_connections(&packets, &catalog).unwrap();

        let plain = render_connections(&connections, false);
        assert_eq!(
            plain,
            "=== Connection ===\n\
             Connection handle 0x1, BT addr aa:bb:cc:dd:ee:ff, not disconnected.\n\
             Event Name\tStart Time\tElapsed Time\n\
             Bluetooth ACL Create Connection (0x0001; aa:bb:cc:dd:ee:ff)\t0.000000\t0.250000\n"
        );

        let verbose = render_connections(&connections, true);
        assert!(verbose.starts_with(&plain));
        assert!(verbose.ends_with(
            "2 relevant packets found, index 1, 2\n\
             Packet #1 [1970-01-01 00:00:10.000000] (no summary)\n\
             Packet #2 [1970-01-01 00:00:10.250000] (no summary)\n"
        ));
    }

    #[test]
    fn test_empty_reports() {
        assert_eq!(render_connections(&[], false), "No connections found.\n");
        assert_eq!(render_timeline(&[], true), "No events found.\n");
    }

    #[test]
    fn test_timeline_rendering() {
        let catalog = EventCatalog::default();
        let mut event = catalog.create("avrcp").unwrap();
        event.update(&avrcp(1, 50.0, "0x03"));
        event.update(&avrcp(2, 50.5, "0x0f"));

        let plain = render_timeline(std::slice::from_ref(&event), false);
        assert_eq!(
            plain,
            "=== Timeline ===\nEvent Name\tStart Time\tElapsed Time\nBluetooth AVRCP\t0.000000\t0.500000\n"
        );

        let verbose = render_timeline(std::slice::from_ref(&event), true);
        assert!(verbose.starts_with(&plain));
        assert!(verbose.contains("2 relevant packets found, index 1, 2"));
    }
}

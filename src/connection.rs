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

//! Grouping of events by ACL connection.
//!
//! A connection starts with a finished ACL connect event (either an outgoing
//! Create Connection or an incoming Connection Request, both completed by a
//! successful Connection Complete) and ends with Disconnection Complete. All
//! packets carrying the connection's handle are routed to it.

use crate::error::{Result, SnoopError};
use crate::event::catalog::{ACL_CREATE, ACL_DISCONNECT, ACL_REQUEST};
use crate::event::{ConnectivityEvent, EventCatalog};
use crate::parser::{parse_int, Packet};

/// All events of one event kind within a connection.
///
/// The last entry is always the instance still waiting for packets.
#[derive(Debug, Clone)]
struct EventTrack {
    key: String,
    events: Vec<ConnectivityEvent>,
}

#[derive(Debug, Clone)]
pub struct BluetoothConnection {
    acl_connect: ConnectivityEvent,
    handle: u16,
    bd_addr: String,
    tracks: Vec<EventTrack>,
    disconnect: ConnectivityEvent,
}

impl BluetoothConnection {
    /// Open a connection from a finished ACL connect event.
    ///
    /// The event's key values must hold the connection handle followed by the
    /// remote address.
    pub fn new(acl_connect: ConnectivityEvent, catalog: &EventCatalog) -> Result<Self> {
        let [handle, bd_addr, ..] = acl_connect.key_values() else {
            return Err(SnoopError::Connection(format!(
                "{} carries no handle and address",
                acl_connect.base_name()
            )));
        };
        let handle = parse_int(handle)
            .and_then(|h| u16::try_from(h).ok())
            .ok_or_else(|| SnoopError::Connection(format!("invalid ACL connection handle {handle:?}")))?;
        let bd_addr = bd_addr.clone();

        let tracks = catalog
            .profile_keys()
            .into_iter()
            .map(|key| {
                let first = catalog.create(&key)?;
                Ok(EventTrack {
                    key,
                    events: vec![first],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let disconnect = catalog.create(ACL_DISCONNECT)?;

        Ok(Self {
            acl_connect,
            handle,
            bd_addr,
            tracks,
            disconnect,
        })
    }

    #[must_use]
    pub const fn handle(&self) -> u16 {
        self.handle
    }

    #[must_use]
    pub fn bd_addr(&self) -> &str {
        &self.bd_addr
    }

    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        self.disconnect.is_finished()
    }

    /// Offer a packet to this connection.
    ///
    /// Returns `true` when the connection is open and the packet carries its
    /// handle.
    pub fn update(&mut self, packet: &Packet, catalog: &EventCatalog) -> Result<bool> {
        if self.is_disconnected() || packet.connection_handle() != Some(self.handle) {
            return Ok(false);
        }

        for track in &mut self.tracks {
            let Some(current) = track.events.last_mut() else {
                continue;
            };
            current.update(packet);
            if current.is_finished() {
                track.events.push(catalog.create(&track.key)?);
            }
        }

        self.disconnect.update(packet);
        if self.disconnect.is_finished() {
            tracing::info!("Disconnected! handle = {:#x}", self.handle);
        }
        Ok(true)
    }

    /// Events so far: the ACL connect event, every finished profile event
    /// ordered by start time, then the disconnect event if it happened.
    #[must_use]
    pub fn events(&self) -> Vec<&ConnectivityEvent> {
        let mut profile: Vec<&ConnectivityEvent> = self
            .tracks
            .iter()
            .flat_map(|track| {
                let done = track.events.len().saturating_sub(1);
                &track.events[..done]
            })
            .collect();
        // Stable, so ties keep catalog order
        profile.sort_by(|a, b| start_key(a).total_cmp(&start_key(b)));

        let mut events = Vec::with_capacity(profile.len() + 2);
        events.push(&self.acl_connect);
        events.extend(profile);
        if self.disconnect.is_finished() {
            events.push(&self.disconnect);
        }
        events
    }

    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "Connection handle {:#x}, BT addr {},{} disconnected.",
            self.handle,
            self.bd_addr,
            if self.is_disconnected() { "" } else { " not" }
        )
    }
}

fn start_key(event: &ConnectivityEvent) -> f64 {
    event.start_time().unwrap_or(f64::INFINITY)
}

/// Split a capture into connections, in the order they were opened.
pub fn parse_connections(packets: &[Packet], catalog: &EventCatalog) -> Result<Vec<BluetoothConnection>> {
    profiling::scope!("parse_connections");

    let mut connections: Vec<BluetoothConnection> = Vec::new();
    let mut acl_create = catalog.create(ACL_CREATE)?;
    let mut acl_request = catalog.create(ACL_REQUEST)?;

    for packet in packets {
        for connection in &mut connections {
            if connection.is_disconnected() {
                continue;
            }
            if connection.update(packet, catalog)? {
                break;
            }
        }

        acl_create.update(packet);
        acl_request.update(packet);

        let acl_event = if acl_create.is_finished() {
            std::mem::replace(&mut acl_create, catalog.create(ACL_CREATE)?)
        } else if acl_request.is_finished() {
            std::mem::replace(&mut acl_request, catalog.create(ACL_REQUEST)?)
        } else {
            continue;
        };
        // Whichever one completed, both trackers start over
        acl_create = catalog.create(ACL_CREATE)?;
        acl_request = catalog.create(ACL_REQUEST)?;

        tracing::info!(
            "Found new {} event at packet #{}, creating new connection",
            acl_event.base_name(),
            packet.seq
        );
        match BluetoothConnection::new(acl_event, catalog) {
            Ok(connection) => connections.push(connection),
            Err(e @ SnoopError::Connection(_)) => {
                tracing::warn!("Failed to create new connection: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!("Found {} connections", connections.len());
    Ok(connections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(seq: usize, ts: f64, opcode: &str) -> Packet {
        Packet::new(seq, ts)
            .with_layer("bluetooth")
            .with_layer("bthci_cmd")
            .with_field("bthci_cmd.opcode", opcode)
    }

    fn evt(seq: usize, ts: f64, code: &str) -> Packet {
        Packet::new(seq, ts)
            .with_layer("bluetooth")
            .with_layer("bthci_evt")
            .with_field("bthci_evt.code", code)
    }

    fn connection_complete(seq: usize, ts: f64, handle: &str, addr: &str) -> Packet {
        evt(seq, ts, "0x03")
            .with_field("bthci_evt.status", "0x00")
            .with_field("bthci_evt.connection_handle", handle)
            .with_field("bthci_evt.bd_addr", addr)
    }

    fn acl(seq: usize, ts: f64, handle: &str, layer: &str) -> Packet {
        Packet::new(seq, ts)
            .with_layer("bluetooth")
            .with_layer("bthci_acl")
            .with_layer("btl2cap")
            .with_layer(layer)
            .with_field("bthci_acl.chandle", handle)
    }

    fn outgoing_session() -> Vec<Packet> {
        vec![
            cmd(1, 100.0, "0x0405"),
            connection_complete(2, 100.5, "0x0003", "00:11:22:33:44:55"),
            acl(3, 101.0, "0x0003", "btsdp")
                .with_field("btsdp.pdu", "0x06")
                .with_field("btsdp.continuation_state_length", "0")
                .with_field("btsdp.service_search_pattern", "0x110b"),
            acl(4, 101.2, "0x0003", "btsdp")
                .with_field("btsdp.pdu", "0x07")
                .with_field("btsdp.continuation_state_length", "0"),
            acl(5, 101.5, "0x0003", "btavdtp")
                .with_field("btavdtp.message_type", "0x00")
                .with_field("btavdtp.signal_id", "0x01"),
            acl(6, 101.6, "0x0003", "btavdtp")
                .with_field("btavdtp.message_type", "0x02")
                .with_field("btavdtp.signal_id", "0x01"),
            acl(7, 102.0, "0x0003", "btavdtp")
                .with_field("btavdtp.message_type", "0x02")
                .with_field("btavdtp.signal_id", "0x06"),
            acl(8, 103.0, "0x0009", "btavdtp")
                .with_field("btavdtp.message_type", "0x00")
                .with_field("btavdtp.signal_id", "0x01"),
            evt(9, 104.0, "0x05").with_field("bthci_evt.connection_handle", "0x0003"),
        ]
    }

    #[test]
    fn test_single_connection_events() {
        let catalog = EventCatalog::default();
        let connections = parse_connections(&outgoing_session(), &catalog).unwrap();
        assert_eq!(connections.len(), 1);

        let connection = &connections[0];
        assert_eq!(connection.handle(), 3);
        assert_eq!(connection.bd_addr(), "00:11:22:33:44:55");
        assert!(connection.is_disconnected());

        let names: Vec<String> = connection.events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "Bluetooth ACL Create Connection (0x0003; 00:11:22:33:44:55)",
                "Bluetooth SDP (0x110b)",
                "Bluetooth A2DP",
                "Bluetooth ACL Disconnect",
            ]
        );

        let a2dp = connection.events()[2];
        let seqs: Vec<usize> = a2dp.relevant_packets().iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![5, 6, 7]);
    }

    #[test]
    fn test_summary_line() {
        let catalog = EventCatalog::default();
        let packets = outgoing_session();

        let open = parse_connections(&packets[..8], &catalog).unwrap();
        assert_eq!(
            open[0].summary_line(),
            "Connection handle 0x3, BT addr 00:11:22:33:44:55, not disconnected."
        );

        let closed = parse_connections(&packets, &catalog).unwrap();
        assert_eq!(
            closed[0].summary_line(),
            "Connection handle 0x3, BT addr 00:11:22:33:44:55, disconnected."
        );
    }

    #[test]
    fn test_incoming_connection_request() {
        let catalog = EventCatalog::default();
        let packets = vec![
            evt(1, 5.0, "0x04").with_field("bthci_evt.bd_addr", "aa:bb:cc:dd:ee:ff"),
            cmd(2, 5.1, "0x0409"),
            connection_complete(3, 5.3, "0x000b", "aa:bb:cc:dd:ee:ff"),
        ];
        let connections = parse_connections(&packets, &catalog).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].handle(), 0x0b);
        assert_eq!(
            connections[0].events()[0].base_name(),
            "Bluetooth ACL Connection Request"
        );
    }

    #[test]
    fn test_failed_connection_is_skipped() {
        let catalog = EventCatalog::default();
        // Connection Complete without handle or address cannot open a connection
        let packets = vec![
            cmd(1, 1.0, "0x0405"),
            evt(2, 1.5, "0x03").with_field("bthci_evt.status", "0x00"),
            cmd(3, 2.0, "0x0405"),
            connection_complete(4, 2.5, "0x0001", "11:22:33:44:55:66"),
        ];
        let connections = parse_connections(&packets, &catalog).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].handle(), 1);
    }

    #[test]
    fn test_two_connections_route_by_handle() {
        let catalog = EventCatalog::default();
        let packets = vec![
            cmd(1, 1.0, "0x0405"),
            connection_complete(2, 1.5, "0x0001", "11:11:11:11:11:11"),
            cmd(3, 2.0, "0x0405"),
            connection_complete(4, 2.5, "0x0002", "22:22:22:22:22:22"),
            acl(5, 3.0, "0x0002", "btavdtp")
                .with_field("btavdtp.message_type", "0x00")
                .with_field("btavdtp.signal_id", "0x01"),
            acl(6, 3.5, "0x0002", "btavdtp")
                .with_field("btavdtp.message_type", "0x02")
                .with_field("btavdtp.signal_id", "0x06"),
            evt(7, 4.0, "0x05").with_field("bthci_evt.connection_handle", "0x0001"),
        ];
        let connections = parse_connections(&packets, &catalog).unwrap();
        assert_eq!(connections.len(), 2);

        assert!(connections[0].is_disconnected());
        assert_eq!(connections[0].events().len(), 2);

        assert!(!connections[1].is_disconnected());
        let names: Vec<&str> = connections[1].events().iter().map(|e| e.base_name()).collect();
        assert_eq!(names, vec!["Bluetooth ACL Create Connection", "Bluetooth A2DP"]);
    }

    #[test]
    fn test_new_requires_handle_and_address() {
        let catalog = EventCatalog::default();
        let event = catalog.create(ACL_CREATE).unwrap();
        let err = BluetoothConnection::new(event, &catalog).unwrap_err();
        assert!(matches!(err, SnoopError::Connection(_)));
    }
}

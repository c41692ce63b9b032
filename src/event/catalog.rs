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

//! The catalog of Bluetooth connectivity events we know how to recognize.

use super::{ConnectivityEvent, Criterion, EventDef, KeyField, KeyLocation, PacketFilter};
use crate::error::{Result, SnoopError};
use std::sync::Arc;

/// Prefix of the catalog keys that open or close ACL links
pub const ACL_PREFIX: &str = "acl ";
pub const ACL_CREATE: &str = "acl create";
pub const ACL_REQUEST: &str = "acl request";
pub const ACL_DISCONNECT: &str = "acl disconnect";

// HCI opcodes and event codes
const HCI_CREATE_CONNECTION: i64 = 0x0405;
const HCI_EVT_CONNECTION_COMPLETE: i64 = 0x03;
const HCI_EVT_CONNECTION_REQUEST: i64 = 0x04;
const HCI_EVT_DISCONNECTION_COMPLETE: i64 = 0x05;

/// Ordered set of event definitions, looked up by key
#[derive(Debug, Clone)]
pub struct EventCatalog {
    defs: Vec<Arc<EventDef>>,
}

impl EventCatalog {
    #[must_use]
    pub fn new(defs: Vec<EventDef>) -> Self {
        Self {
            defs: defs.into_iter().map(Arc::new).collect(),
        }
    }

    /// Definitions in catalog order
    pub fn defs(&self) -> impl Iterator<Item = &EventDef> {
        self.defs.iter().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<EventDef>> {
        self.defs.iter().find(|def| def.key.eq_ignore_ascii_case(key))
    }

    /// Create a fresh, not yet started event. Keys are case insensitive.
    pub fn create(&self, key: &str) -> Result<ConnectivityEvent> {
        self.get(key)
            .map(|def| ConnectivityEvent::new(Arc::clone(def)))
            .ok_or_else(|| SnoopError::UnknownEvent(key.to_string()))
    }

    /// Keys of the events tracked inside a connection (everything but ACL set-up/teardown)
    #[must_use]
    pub fn profile_keys(&self) -> Vec<String> {
        self.defs
            .iter()
            .filter(|def| !def.key.to_ascii_lowercase().starts_with(ACL_PREFIX))
            .map(|def| def.key.clone())
            .collect()
    }

    /// Every field any definition inspects, deduplicated, in first-use order
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for field in self.defs.iter().flat_map(|def| def.referenced_fields()) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    /// Definitions as plain data, e.g. for writing them to a config file
    #[must_use]
    pub fn to_defs(&self) -> Vec<EventDef> {
        self.defs().cloned().collect()
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::new(builtin_events())
    }
}

fn def(
    key: &str,
    name: &str,
    start: Vec<Criterion>,
    finish: Vec<Criterion>,
    relevant: Vec<Criterion>,
    key_fields: Vec<KeyField>,
) -> EventDef {
    EventDef {
        key: key.to_string(),
        name: name.to_string(),
        start: PacketFilter::new(start),
        finish: PacketFilter::new(finish),
        relevant: PacketFilter::new(relevant),
        key_fields,
    }
}

fn connection_complete() -> Vec<Criterion> {
    vec![
        Criterion::int("bthci_evt", "code", HCI_EVT_CONNECTION_COMPLETE),
        Criterion::int("bthci_evt", "status", 0x00),
    ]
}

/// Handle and remote address, both read from Connection Complete
fn acl_key_fields() -> Vec<KeyField> {
    vec![
        KeyField::new("bthci_evt", "connection_handle", KeyLocation::Finish),
        KeyField::new("bthci_evt", "bd_addr", KeyLocation::Finish),
    ]
}

fn rfcomm_channel(key: &str, name: &str, channel: i64) -> EventDef {
    def(
        key,
        name,
        // PN command
        vec![
            Criterion::int("btrfcomm", "mcc.cmd", 0x20),
            Criterion::int("btrfcomm", "mcc.channel", channel),
        ],
        // MSC command
        vec![
            Criterion::int("btrfcomm", "mcc.cmd", 0x38),
            Criterion::int("btrfcomm", "mcc.channel", channel),
        ],
        vec![Criterion::layer("btrfcomm")],
        Vec::new(),
    )
}

/// The built-in event definitions
#[must_use]
pub fn builtin_events() -> Vec<EventDef> {
    vec![
        def(
            ACL_CREATE,
            "Bluetooth ACL Create Connection",
            vec![Criterion::int("bthci_cmd", "opcode", HCI_CREATE_CONNECTION)],
            connection_complete(),
            Vec::new(),
            acl_key_fields(),
        ),
        def(
            ACL_REQUEST,
            "Bluetooth ACL Connection Request",
            vec![Criterion::int("bthci_evt", "code", HCI_EVT_CONNECTION_REQUEST)],
            connection_complete(),
            Vec::new(),
            acl_key_fields(),
        ),
        def(
            ACL_DISCONNECT,
            "Bluetooth ACL Disconnect",
            vec![Criterion::int("bthci_evt", "code", HCI_EVT_DISCONNECTION_COMPLETE)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        ),
        def(
            "a2dp",
            "Bluetooth A2DP",
            // DISCOVER command
            vec![
                Criterion::int("btavdtp", "message_type", 0x00),
                Criterion::int("btavdtp", "signal_id", 0x01),
            ],
            // OPEN accepted
            vec![
                Criterion::int("btavdtp", "message_type", 0x02),
                Criterion::int("btavdtp", "signal_id", 0x06),
            ],
            vec![Criterion::layer("btavdtp")],
            Vec::new(),
        ),
        def(
            "hfp",
            "Bluetooth HFP",
            vec![Criterion::text("bthfp", "command_line_prefix", "AT")],
            vec![Criterion::int("bthfp", "at_cmd.type", 0x0d0a)],
            vec![Criterion::layer("bthfp")],
            vec![
                KeyField::new("bthfp", "bthfp.at_cmd", KeyLocation::Start),
                KeyField::new("bthfp", "bthfp.at_cmd", KeyLocation::Finish),
            ],
        ),
        def(
            "avrcp",
            "Bluetooth AVRCP",
            // NOTIFY command, INTERIM response for volume changed
            vec![
                Criterion::int("btavrcp", "ctype", 0x3),
                Criterion::int("btavrcp", "notification.event_id", 0x0d),
            ],
            vec![
                Criterion::int("btavrcp", "ctype", 0xf),
                Criterion::int("btavrcp", "notification.event_id", 0x0d),
            ],
            vec![Criterion::layer("btavrcp")],
            Vec::new(),
        ),
        rfcomm_channel("rfcomm ch20", "Bluetooth RFCOMM CH20", 20),
        rfcomm_channel("rfcomm ch21", "Bluetooth RFCOMM CH21", 21),
        def(
            "sdp",
            "Bluetooth SDP",
            // ServiceSearchAttribute request/response without continuation
            vec![
                Criterion::int("btsdp", "pdu", 0x06),
                Criterion::int("btsdp", "continuation_state_length", 0),
            ],
            vec![
                Criterion::int("btsdp", "pdu", 0x07),
                Criterion::int("btsdp", "continuation_state_length", 0),
            ],
            vec![Criterion::layer("btsdp")],
            vec![KeyField::new("btsdp", "service_search_pattern", KeyLocation::Start)],
        ),
        def(
            "avrcp capability",
            "Bluetooth AVRCP GetCapabilities",
            // STATUS / STABLE for the EventsSupported capability
            vec![
                Criterion::int("btavrcp", "ctype", 0x1),
                Criterion::int("btavrcp", "capability", 0x03),
            ],
            vec![
                Criterion::int("btavrcp", "ctype", 0xc),
                Criterion::int("btavrcp", "capability", 0x03),
            ],
            vec![Criterion::layer("btavrcp")],
            Vec::new(),
        ),
        def(
            "rfcomm hfp",
            "Bluetooth HFP RFCOMM",
            vec![Criterion::int("btrfcomm", "channel", 3)],
            vec![Criterion::int("btrfcomm", "len", 0)],
            vec![Criterion::layer("bthfp")],
            Vec::new(),
        ),
    ]
}

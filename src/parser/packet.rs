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

//! A single dissected frame as reported by the external analyzer.

use std::collections::HashMap;

/// Fields carrying the ACL connection handle, in lookup order.
pub const HANDLE_FIELDS: [&str; 3] = [
    "bthci_acl.chandle",
    "bthci_evt.connection_handle",
    "bthci_cmd.connection_handle",
];

/// One frame of the snoop log, reduced to the fields we asked the analyzer for
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// 1-based frame number
    pub seq: usize,
    /// Capture time in seconds since the epoch
    pub timestamp: f64,
    /// Protocol stack of the frame, outermost first (e.g. `bluetooth`, `hci_h4`, `bthci_evt`)
    pub layers: Vec<String>,
    /// Fully qualified field name to textual value; absent fields are not stored
    pub fields: HashMap<String, String>,
    /// The analyzer's one-line summary of the frame
    pub summary: Option<String>,
}

impl Packet {
    #[must_use]
    pub fn new(seq: usize, timestamp: f64) -> Self {
        Self {
            seq,
            timestamp,
            layers: Vec::new(),
            fields: HashMap::new(),
            summary: None,
        }
    }

    /// Builder-style helper for adding a protocol layer
    #[must_use]
    pub fn with_layer(mut self, layer: &str) -> Self {
        self.layers.push(layer.to_string());
        self
    }

    /// Builder-style helper for adding a field value
    #[must_use]
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.iter().any(|l| l == layer)
    }

    /// Look up a field of `layer`.
    ///
    /// `field` may be relative (`opcode`) or already qualified (`bthci_cmd.opcode`).
    #[must_use]
    pub fn field(&self, layer: &str, field: &str) -> Option<&str> {
        self.fields
            .get(&qualify_field(layer, field))
            .map(String::as_str)
    }

    /// The ACL connection handle this frame refers to, if any.
    #[must_use]
    pub fn connection_handle(&self) -> Option<u16> {
        HANDLE_FIELDS
            .iter()
            .find_map(|name| self.fields.get(*name))
            .and_then(|value| parse_int(value))
            .and_then(|handle| u16::try_from(handle).ok())
    }
}

/// Prefix `field` with `layer.` unless it already carries that prefix.
#[must_use]
pub fn qualify_field(layer: &str, field: &str) -> String {
    match field.strip_prefix(layer) {
        Some(rest) if rest.starts_with('.') => field.to_string(),
        _ => format!("{layer}.{field}"),
    }
}

/// Parse an integer the way the analyzer prints them.
///
/// Accepts `0x`, `0o` and `0b` prefixes, plain decimal otherwise, with an
/// optional leading sign. The sign goes before the prefix, and decimal
/// literals other than zero cannot start with `0`.
#[must_use]
pub fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, unsigned) = text.strip_prefix('-').map_or_else(
        || (false, text.strip_prefix('+').unwrap_or(text)),
        |rest| (true, rest),
    );

    let prefix = unsigned.get(..2).map(str::to_ascii_lowercase);
    let (digits, radix) = match prefix.as_deref() {
        Some("0x") => (&unsigned[2..], 16),
        Some("0o") => (&unsigned[2..], 8),
        Some("0b") => (&unsigned[2..], 2),
        _ => {
            if unsigned.starts_with('0') && unsigned.bytes().any(|b| b != b'0') {
                return None;
            }
            (unsigned, 10)
        }
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

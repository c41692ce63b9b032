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

//! Packet filters and key-field definitions used by event definitions.

use crate::parser::{parse_int, qualify_field, Packet};
use serde::{Deserialize, Serialize};

/// Value a field has to carry for a criterion to hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    /// Compared numerically; the field text is parsed with prefix guessing
    Int(i64),
    /// Compared verbatim
    Text(String),
}

impl Expected {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Int(expected) => parse_int(value) == Some(*expected),
            Self::Text(expected) => value == expected,
        }
    }
}

/// One `(layer, field, expected value)` condition.
///
/// A criterion without a field only requires the layer. A criterion without
/// an expected value only requires the field to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub layer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expected>,
}

impl Criterion {
    /// Layer presence only
    #[must_use]
    pub fn layer(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            field: None,
            value: None,
        }
    }

    #[must_use]
    pub fn int(layer: &str, field: &str, value: i64) -> Self {
        Self {
            layer: layer.to_string(),
            field: Some(field.to_string()),
            value: Some(Expected::Int(value)),
        }
    }

    #[must_use]
    pub fn text(layer: &str, field: &str, value: &str) -> Self {
        Self {
            layer: layer.to_string(),
            field: Some(field.to_string()),
            value: Some(Expected::Text(value.to_string())),
        }
    }

    /// Fully qualified field name, if the criterion inspects a field
    #[must_use]
    pub fn qualified_field(&self) -> Option<String> {
        self.field
            .as_deref()
            .map(|field| qualify_field(&self.layer, field))
    }
}

/// Outcome of checking a single criterion
enum Verdict {
    Reject,
    /// Stop evaluating, the packet passes
    Accept,
    /// This criterion holds, look at the next one
    Continue,
}

/// Ordered list of criteria a packet has to satisfy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketFilter {
    criteria: Vec<Criterion>,
}

impl PacketFilter {
    #[must_use]
    pub const fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    /// A filter that accepts nothing
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            criteria: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Check a packet against the criteria.
    ///
    /// An empty filter rejects everything. Criteria are checked in order and
    /// a criterion that names no field, or no expected value, ends the check
    /// with acceptance once its layer (and field) are present.
    #[must_use]
    pub fn eval(&self, packet: &Packet) -> bool {
        if self.criteria.is_empty() {
            return false;
        }

        for criterion in &self.criteria {
            match check(criterion, packet) {
                Verdict::Reject => return false,
                Verdict::Accept => return true,
                Verdict::Continue => {}
            }
        }
        true
    }
}

fn check(criterion: &Criterion, packet: &Packet) -> Verdict {
    if !packet.has_layer(&criterion.layer) {
        return Verdict::Reject;
    }
    let Some(field) = criterion.field.as_deref() else {
        return Verdict::Accept;
    };
    let Some(value) = packet.field(&criterion.layer, field) else {
        return Verdict::Reject;
    };
    match &criterion.value {
        None => Verdict::Accept,
        Some(expected) if expected.matches(value) => Verdict::Continue,
        Some(_) => Verdict::Reject,
    }
}

/// Which recorded packets of an event a key field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLocation {
    /// The packet that started the event
    Start,
    /// The packet that finished the event
    Finish,
    /// Every recorded packet
    Any,
}

/// A field whose values identify an event instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    pub layer: String,
    pub field: String,
    pub location: KeyLocation,
}

impl KeyField {
    #[must_use]
    pub fn new(layer: &str, field: &str, location: KeyLocation) -> Self {
        Self {
            layer: layer.to_string(),
            field: field.to_string(),
            location,
        }
    }

    #[must_use]
    pub fn qualified_field(&self) -> String {
        qualify_field(&self.layer, &self.field)
    }

    /// Whether a packet recorded at the given position is a source for this key
    #[must_use]
    pub const fn applies(&self, is_start: bool, is_finish: bool) -> bool {
        match self.location {
            KeyLocation::Any => true,
            KeyLocation::Start => is_start,
            KeyLocation::Finish => is_finish,
        }
    }
}

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

use crate::error::{Result, SnoopError};
use crate::event::catalog::{builtin_events, ACL_PREFIX};
use crate::event::{EventCatalog, EventDef};
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// Display-filter field names: dot separated lowercase identifiers
static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_-]+)*$").expect("valid regex literal")
});

/// User configuration stored in the config directory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    /// Analyzer binary to run instead of `tshark` from `PATH`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tshark: Option<PathBuf>,

    /// Replacement for the built-in event catalog; link set-up and teardown
    /// events it leaves out are taken from the built-in one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventDef>>,
}

impl GlobalConfig {
    /// Get the path to the default config file
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hcitiming").join("config.json"))
    }

    /// Load config from an explicit file, or from the default location.
    ///
    /// A missing default file means defaults; a missing explicit file is an
    /// error. A file that exists but does not parse is always an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("No config found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        tracing::info!("Loading config from {}", path.display());
        let contents = std::fs::read_to_string(&path).map_err(|e| SnoopError::Config {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let config = Self::from_json(&contents).map_err(|reason| SnoopError::Config {
            path: path.clone(),
            reason,
        })?;

        if let Some(events) = &config.events {
            tracing::info!("Loaded {} event definitions", events.len());
        }
        Ok(config)
    }

    /// Parse and validate a config document
    pub fn from_json(contents: &str) -> std::result::Result<Self, String> {
        let config: Self = serde_json::from_str(contents).map_err(|e| e.to_string())?;
        if let Some(events) = &config.events {
            validate_events(events)?;
        }
        Ok(config)
    }

    /// The event catalog in effect: the configured one, or the built-in defaults
    #[must_use]
    pub fn catalog(&self) -> EventCatalog {
        self.events
            .clone()
            .map_or_else(EventCatalog::default, |events| {
                EventCatalog::new(with_acl_events(events))
            })
    }
}

/// Append the built-in ACL events a configured catalog does not define.
///
/// Connections are opened and closed by these, so a catalog that only lists
/// profile events still yields connections.
fn with_acl_events(mut events: Vec<EventDef>) -> Vec<EventDef> {
    for acl in builtin_events()
        .into_iter()
        .filter(|def| def.key.starts_with(ACL_PREFIX))
    {
        if !events.iter().any(|def| def.key.eq_ignore_ascii_case(&acl.key)) {
            tracing::debug!("Using built-in definition of {:?}", acl.key);
            events.push(acl);
        }
    }
    events
}

fn validate_events(events: &[EventDef]) -> std::result::Result<(), String> {
    let mut keys: Vec<String> = Vec::new();
    for def in events {
        let key = def.key.to_ascii_lowercase();
        if keys.contains(&key) {
            return Err(format!("duplicate event key {:?}", def.key));
        }
        if def.start.is_empty() {
            return Err(format!("event {:?} has no start criteria", def.key));
        }
        for field in def.referenced_fields() {
            if !FIELD_NAME.is_match(&field).unwrap_or(false) {
                return Err(format!("event {:?}: invalid field name {field:?}", def.key));
            }
        }
        keys.push(key);
    }
    Ok(())
}

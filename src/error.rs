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

//! Error taxonomy shared by the library and the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while summarizing a snoop log.
///
/// Only [`SnoopError::Connection`] is recoverable: it is logged and the
/// packet stream continues. All other variants end the run.
#[derive(Debug, Error)]
pub enum SnoopError {
    /// The external analyzer could not be located or executed.
    #[error("{tool} is not available: {reason}")]
    DependencyMissing { tool: String, reason: String },

    /// The btsnoop log does not exist or cannot be read.
    #[error("cannot read input file {}: {reason}", path.display())]
    InputNotFound { path: PathBuf, reason: String },

    /// The analyzer exited non-zero or printed something we cannot parse.
    #[error("external tool failed: {0}")]
    ExternalToolError(String),

    /// The config file exists but is not usable.
    #[error("invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    /// An event key that the catalog does not define.
    #[error("the event {0:?} is not defined in the event catalog")]
    UnknownEvent(String),

    /// An ACL connect event that does not carry a usable handle and address.
    #[error("cannot create connection: {0}")]
    Connection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SnoopError {
    /// Process exit code reported by the CLI for this error.
    ///
    /// 2 is left to clap, which uses it for usage errors.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InputNotFound { .. } => 3,
            Self::DependencyMissing { .. } => 4,
            Self::ExternalToolError(_) => 5,
            Self::Config { .. } | Self::UnknownEvent(_) => 6,
            Self::Connection(_) | Self::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnoopError>;

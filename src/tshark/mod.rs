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

//! Invocation of the external analyzer (`tshark`).
//!
//! All protocol dissection happens in the analyzer; we only ask it for a
//! fixed set of fields in tab-separated form and hand the text to
//! [`crate::parser`].

use crate::error::{Result, SnoopError};
use crate::event::EventCatalog;
use crate::parser::{FRAME_INFO, FRAME_NUMBER, FRAME_PROTOCOLS, FRAME_TIME_EPOCH, HANDLE_FIELDS};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const TSHARK: &str = "tshark";

/// A located analyzer binary, ready to run
#[derive(Debug, Clone)]
pub struct Tshark {
    program: PathBuf,
}

impl Tshark {
    /// Locate the analyzer.
    ///
    /// An explicit program is used as given when it contains a path
    /// separator, otherwise it is searched on `PATH` like the default name.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        let program = explicit.unwrap_or_else(|| Path::new(TSHARK));
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        let program = resolve_program(program, &path_var)?;
        tracing::debug!("Using analyzer {}", program.display());
        Ok(Self { program })
    }

    /// Run the analyzer on `input` and return its standard output.
    pub fn run(&self, input: &Path, fields: &[String]) -> Result<String> {
        profiling::scope!("Tshark::run");
        check_input(input)?;

        let args = build_args(input, fields);
        tracing::info!(
            "Running {} on {} ({} fields)",
            self.program.display(),
            input.display(),
            fields.len()
        );
        tracing::debug!("Arguments: {args:?}");

        let start_time = std::time::Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) {
                    SnoopError::DependencyMissing {
                        tool: self.program.display().to_string(),
                        reason: e.to_string(),
                    }
                } else {
                    SnoopError::Io(e)
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let stderr = stderr.trim();
            return Err(SnoopError::ExternalToolError(if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                format!("{} exited with {}: {stderr}", self.program.display(), output.status)
            }));
        }
        if !stderr.trim().is_empty() {
            tracing::debug!("Analyzer stderr: {}", stderr.trim());
        }

        tracing::info!(
            "Analyzer produced {} bytes in {:.2}s",
            output.stdout.len(),
            start_time.elapsed().as_secs_f64()
        );
        String::from_utf8(output.stdout)
            .map_err(|e| SnoopError::ExternalToolError(format!("output is not valid UTF-8: {e}")))
    }
}

/// Resolve a program name against a `PATH`-style search list.
pub fn resolve_program(program: &Path, path_var: &OsStr) -> Result<PathBuf> {
    let missing = |reason: String| SnoopError::DependencyMissing {
        tool: program.display().to_string(),
        reason,
    };

    if program.components().count() > 1 || program.is_absolute() {
        return if is_executable(program) {
            Ok(program.to_path_buf())
        } else {
            Err(missing("not an executable file".to_string()))
        };
    }

    let file_name = with_exe_suffix(program.as_os_str());
    std::env::split_paths(path_var)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| missing("not found on PATH; install Wireshark or pass --tshark".to_string()))
}

fn with_exe_suffix(name: &OsStr) -> OsString {
    let mut name = name.to_os_string();
    let suffix = std::env::consts::EXE_SUFFIX;
    if !suffix.is_empty() && !name.to_string_lossy().ends_with(suffix) {
        name.push(suffix);
    }
    name
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.metadata().is_ok_and(|m| m.is_file())
}

/// The input must be an existing, readable regular file.
pub fn check_input(input: &Path) -> Result<()> {
    let not_found = |reason: String| SnoopError::InputNotFound {
        path: input.to_path_buf(),
        reason,
    };
    let metadata = std::fs::metadata(input).map_err(|e| not_found(e.to_string()))?;
    if !metadata.is_file() {
        return Err(not_found("not a regular file".to_string()));
    }
    File::open(input).map_err(|e| not_found(e.to_string()))?;
    Ok(())
}

/// Fields requested from the analyzer: frame metadata, connection handles,
/// everything the catalog inspects, and the summary column last.
#[must_use]
pub fn field_list(catalog: &EventCatalog) -> Vec<String> {
    let mut fields: Vec<String> = [FRAME_NUMBER, FRAME_TIME_EPOCH, FRAME_PROTOCOLS]
        .iter()
        .chain(HANDLE_FIELDS.iter())
        .map(|f| (*f).to_string())
        .collect();
    for field in catalog.referenced_fields() {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    // Last, so stray separators in the summary cannot shift other columns
    fields.push(FRAME_INFO.to_string());
    fields
}

/// Command line for a fields export of `input`.
#[must_use]
pub fn build_args(input: &Path, fields: &[String]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-r".into(),
        input.as_os_str().to_os_string(),
        // No name resolution, keeps addresses raw and the run offline
        "-n".into(),
        "-T".into(),
        "fields".into(),
        "-E".into(),
        "header=y".into(),
        "-E".into(),
        "separator=/t".into(),
        "-E".into(),
        "occurrence=f".into(),
        "-E".into(),
        "quote=n".into(),
    ];
    for field in fields {
        args.push("-e".into());
        args.push(field.into());
    }
    args
}

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

//! End-to-end runs against a stand-in analyzer.
//!
//! The stand-in is a shell script that prints a recorded fields export, so
//! these tests exercise process spawning, output parsing and reporting
//! without Wireshark being installed.
#![cfg(unix)]

use hcitiming::{summarize, GlobalConfig, Options, SnoopError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::TempDir;

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/connection.tsv");

// Writing an executable while another test forks can make exec fail with
// ETXTBSY, so script creation and spawning are serialized.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

struct Workspace {
    dir: TempDir,
    input: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("btsnoop_hci.log");
        // btsnoop magic and header; the stand-in never reads it
        let mut header = b"btsnoop\0".to_vec();
        header.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0x03, 0xea]);
        fs::write(&input, header).unwrap();
        Self { dir, input }
    }

    fn tshark(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join("tshark");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn replaying_tshark(&self) -> PathBuf {
        let args_file = self.dir.path().join("args.txt");
        self.tshark(&format!(
            "printf '%s\\n' \"$@\" > '{}'\nexec cat '{FIXTURE}'",
            args_file.display()
        ))
    }

    fn options(&self, tshark: &Path) -> Options {
        Options {
            input: self.input.clone(),
            tshark: Some(tshark.to_path_buf()),
            ..Options::default()
        }
    }
}

fn run(options: &Options) -> Result<String, SnoopError> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    summarize(options, &GlobalConfig::default())
}

/// Event names of the first table in a report
fn table_names(report: &str) -> Vec<String> {
    report
        .lines()
        .skip_while(|line| !line.starts_with("Event Name\t"))
        .skip(1)
        .take_while(|line| line.contains('\t'))
        .filter_map(|line| line.split('\t').next())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_reports_known_connection_events() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.replaying_tshark()
    };

    let report = run(&ws.options(&tshark)).unwrap();
    assert!(report.starts_with("=== Connection ===\n"));
    assert!(report.contains("Connection handle 0x3, BT addr 00:1a:7d:da:71:13, disconnected."));
    assert_eq!(
        table_names(&report),
        vec![
            "Bluetooth ACL Create Connection (0x0003; 00:1a:7d:da:71:13)",
            "Bluetooth SDP (0x110b)",
            "Bluetooth A2DP",
            "Bluetooth AVRCP",
            "Bluetooth HFP (+BRSF; +BRSF)",
            "Bluetooth ACL Disconnect",
        ]
    );
    assert!(report.contains("Bluetooth A2DP\t1.500000\t1.720000\n"));
    assert_eq!(report.matches("=== Connection ===").count(), 1);
}

#[test]
fn test_passes_input_and_fields_to_analyzer() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.replaying_tshark()
    };
    run(&ws.options(&tshark)).unwrap();

    let args = fs::read_to_string(ws.dir.path().join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(args[0], "-r");
    assert_eq!(Path::new(args[1]), ws.input);
    assert!(args.windows(2).any(|w| w == ["-T", "fields"]));
    assert!(args.windows(2).any(|w| w == ["-e", "frame.time_epoch"]));
    assert!(args.windows(2).any(|w| w == ["-e", "btavdtp.signal_id"]));
    assert_eq!(args.last(), Some(&"_ws.col.Info"));
}

#[test]
fn test_output_is_idempotent() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.replaying_tshark()
    };
    let options = ws.options(&tshark);

    let first = run(&options).unwrap();
    let second = run(&options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_verbose_output_is_a_superset() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.replaying_tshark()
    };
    let plain = run(&ws.options(&tshark)).unwrap();
    let verbose = run(&Options {
        verbose: true,
        ..ws.options(&tshark)
    })
    .unwrap();

    assert!(verbose.len() > plain.len());
    assert_eq!(table_names(&plain), table_names(&verbose));
    for line in plain.lines() {
        assert!(verbose.lines().any(|v| v == line), "missing in verbose output: {line}");
    }
    assert!(verbose.contains("Event Bluetooth A2DP started at T+1.500000, finished at T+1.720000"));
    assert!(verbose.contains("Packet #12 [2023-11-14 22:13:21.720000] Rcvd ResponseAccept - Open"));
}

#[test]
fn test_timeline_mode() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.replaying_tshark()
    };
    let report = run(&Options {
        timeline: true,
        ..ws.options(&tshark)
    })
    .unwrap();

    assert!(report.starts_with("=== Timeline ===\n"));
    assert_eq!(
        table_names(&report),
        vec![
            "Bluetooth ACL Create Connection (0x0003; 00:1a:7d:da:71:13)",
            "Bluetooth SDP (0x110b)",
            "Bluetooth A2DP",
            "Bluetooth AVRCP",
            "Bluetooth HFP (+BRSF; +BRSF)",
        ]
    );
}

#[test]
fn test_missing_input_file() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.replaying_tshark()
    };
    let options = Options {
        input: ws.dir.path().join("no_such_btsnoop_hci.log"),
        ..ws.options(&tshark)
    };

    let err = run(&options).unwrap_err();
    assert!(matches!(err, SnoopError::InputNotFound { .. }), "{err}");
    assert_ne!(err.exit_code(), 0);
}

#[test]
fn test_missing_analyzer() {
    let ws = Workspace::new();
    let options = ws.options(&ws.dir.path().join("bin").join("tshark"));

    let err = run(&options).unwrap_err();
    assert!(matches!(err, SnoopError::DependencyMissing { .. }), "{err}");
    assert_ne!(err.exit_code(), 0);
}

#[test]
fn test_analyzer_failure() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.tshark("echo \"tshark: The file isn't a capture file in a format TShark understands.\" >&2\nexit 2")
    };

    let err = run(&ws.options(&tshark)).unwrap_err();
    assert!(matches!(err, SnoopError::ExternalToolError(_)), "{err}");
    assert!(err.to_string().contains("isn't a capture file"), "{err}");
    assert_ne!(err.exit_code(), 0);
}

#[test]
fn test_unparseable_analyzer_output() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.tshark("echo 'Capturing on btsnoop'")
    };

    let err = run(&ws.options(&tshark)).unwrap_err();
    assert!(matches!(err, SnoopError::ExternalToolError(_)), "{err}");
}

#[test]
fn test_capture_without_connections() {
    let ws = Workspace::new();
    let tshark = {
        let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        ws.tshark("printf 'frame.number\\tframe.time_epoch\\tframe.protocols\\n1\\t1700000000.0\\tbluetooth:hci_h4:bthci_cmd\\n'")
    };

    let report = run(&ws.options(&tshark)).unwrap();
    assert_eq!(report, "No connections found.\n");
}

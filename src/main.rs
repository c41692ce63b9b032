/// `HciTiming` - Bluetooth connection timing from HCI snoop logs
///
/// Copyright (C) 2025 Daniel Freiermuth
///
/// This program is free software: you can redistribute it and/or modify
/// it under the terms of the GNU General Public License as published by
/// the Free Software Foundation, either version 3 of the License, or
/// (at your option) any later version.
///
/// This program is distributed in the hope that it will be useful,
/// but WITHOUT ANY WARRANTY; without even the implied warranty of
/// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
/// GNU General Public License for more details.
///
/// You should have received a copy of the GNU General Public License
/// along with this program.  If not, see <https://www.gnu.org/licenses/>.
use anyhow::Context;
use clap::Parser;
use hcitiming::{summarize, GlobalConfig, Options, SnoopError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "ram-profiling")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser, Debug)]
#[command(name = "hcitiming")]
#[command(version = VERSION)]
#[command(about = "Break down Bluetooth connection timing from a btsnoop_hci.log using tshark", long_about = None)]
struct Args {
    /// Path to the btsnoop_hci.log to analyze
    #[arg(value_name = "FILE", required_unless_present = "print_events")]
    file: Option<PathBuf>,

    /// Print per-event details and relevant packets
    #[arg(short, long)]
    verbose: bool,

    /// tshark binary to run (default: tshark from PATH)
    #[arg(long, value_name = "PATH")]
    tshark: Option<PathBuf>,

    /// Config file (default: <config dir>/hcitiming/config.json)
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Print one flat timeline instead of a table per connection
    #[arg(long)]
    timeline: bool,

    /// Print the effective event catalog as config JSON and exit
    #[arg(long)]
    print_events: bool,

    /// Path for the DHAT heap profiling output (only used when built with --features ram-profiling)
    #[cfg(feature = "ram-profiling")]
    #[arg(
        long = "profile-output",
        value_name = "PROFILE_FILE",
        default_value = "dhat-heap.json"
    )]
    profile_output: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr, stdout carries the report only
    // Set RUST_LOG environment variable to override (e.g., RUST_LOG=debug)
    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("hcitiming starting up (version {VERSION})");

    #[cfg(feature = "ram-profiling")]
    let _profiler = {
        tracing::info!("RAM profiling enabled, output: {:?}", args.profile_output);
        dhat::Profiler::builder()
            .file_name(args.profile_output.clone())
            .build()
    };

    #[cfg(feature = "cpu-profiling")]
    {
        tracing::info!("CPU profiling enabled with Tracy - run Tracy profiler to connect");
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<SnoopError>()
                .map_or(1, SnoopError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = GlobalConfig::load(args.config.as_deref())?;

    if args.print_events {
        let dump = GlobalConfig {
            tshark: None,
            events: Some(config.catalog().to_defs()),
        };
        let json = serde_json::to_string_pretty(&dump).context("failed to serialize event catalog")?;
        println!("{json}");
        return Ok(());
    }

    let Some(input) = args.file.clone() else {
        anyhow::bail!("no input file given");
    };
    let options = Options {
        input,
        verbose: args.verbose,
        timeline: args.timeline,
        tshark: args.tshark.clone(),
    };

    let report = summarize(&options, &config)?;
    print!("{report}");
    Ok(())
}

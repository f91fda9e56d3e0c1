// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// A minimal line-oriented REPL shell over the Governor (§6 external
/// interfaces): not part of the core contract, just enough to exercise it
/// from a terminal.
#[derive(Parser, Debug)]
#[command(
    name = "vox",
    about = "Local, on-device voice-assistant Governor core",
    version,
    long_about = None,
)]
pub struct Cli {
    /// Path to a YAML config file (overrides auto-discovery).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the effective configuration and exit.
    #[arg(long)]
    pub show_config: bool,

    /// Run a single query non-interactively and exit (instead of starting
    /// the REPL loop).
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use vox_core::{Governor, GovernorEvent, GovernorOutcome};
use vox_memory::MemoryStore;
use vox_tools::{CalculatorTool, MemorySearchTool, ToolRegistry};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = vox_config::load(cli.config.as_deref())?;

    if cli.show_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let session_id = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
    let memory = MemoryStore::init(
        session_id,
        config.memory.storage_dir.clone(),
        config.memory.max_entries,
    )
    .context("initializing memory store")?;
    let memory = Arc::new(Mutex::new(memory));

    // Both worked-example tools are registered at startup (§4.3.1); a
    // production deployment would register platform-provided tools here too.
    let mut tools = ToolRegistry::new();
    tools
        .register(CalculatorTool)
        .context("registering calculator_compute")?;
    tools
        .register(MemorySearchTool::new(memory.clone()))
        .context("registering memory_search")?;

    let mut governor = Governor::new(
        config.governor.clone(),
        config.sampler.clone(),
        config.context_manager.clone(),
        tools,
        Some(memory),
    );

    tracing::info!(model = %config.inference.model_path, "loading model");
    governor
        .load_model(&config.inference)
        .context("loading inference model")?;

    if let Some(query) = cli.query {
        run_turn(&mut governor, &query);
        return Ok(());
    }

    run_repl(&mut governor)
}

fn run_repl(governor: &mut Governor) -> anyhow::Result<()> {
    println!("vox ready. Type a message and press enter (Ctrl-D to quit).");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        let bytes = stdin.lock().read_line(&mut line)?;
        if bytes == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        run_turn(governor, line);
    }
    Ok(())
}

fn run_turn(governor: &mut Governor, query: &str) {
    let outcome = governor.execute(
        query,
        |event| match event {
            GovernorEvent::ToolCall { name } => tracing::info!(tool = %name, "calling tool"),
            GovernorEvent::ToolResult { name, .. } => tracing::debug!(tool = %name, "tool result"),
            GovernorEvent::ToolError { name, message } => {
                tracing::warn!(tool = %name, error = %message, "tool error")
            }
            _ => {}
        },
        |piece| {
            print!("{piece}");
            io::stdout().flush().ok();
        },
    );

    match outcome {
        Ok(GovernorOutcome::Success(_)) => println!(),
        Ok(GovernorOutcome::NeedClarification) => println!("\n(needs clarification)"),
        Ok(GovernorOutcome::Timeout) => println!("\n(timed out)"),
        Err(err) => eprintln!("\nerror: {err}"),
    }
}

/// Mirrors the reference crate's CLI entry point: `RUST_LOG` wins if set,
/// otherwise `-v`/`-vv` escalate verbosity; no logging is ever written to
/// stdout since the REPL shares that stream with model output.
fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .with(filter)
        .try_init();
}

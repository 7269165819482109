//! NavGuard Agent - fusion and alerting on the wearable
//!
//! Runs the NavGuard engine on tokio:
//! - Sensor input arrives as JSON lines on stdin (see `input`)
//! - One status line per tick goes to stdout
//! - Emergency notifications go through an external sender command
//! - Logs go to stderr, filtered by `RUST_LOG`

mod devices;
mod input;

use anyhow::{Context, Result};
use clap::Parser;
use devices::{CommandGateway, Gateway, LogActuators, LogGateway};
use navguard_core::{Config, NavAgent, StatusLine};
use navguard_env::TokioContext;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// NavGuard wearable agent
#[derive(Parser, Debug)]
#[command(name = "navguard-agent")]
#[command(about = "Fuse wearable sensor input into navigation guidance and fall alerts", long_about = None)]
struct Args {
    /// Configuration file (JSON); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print status lines as JSON
    #[arg(long)]
    json: bool,

    /// Notification sender, run as `<command> <contact> <message>`
    #[arg(long)]
    notify_command: Option<String>,

    /// Stop once stdin closes instead of waiting for Ctrl-C
    #[arg(long)]
    exit_on_eof: bool,
}

fn print_status(line: &StatusLine, json: bool) {
    if json {
        match serde_json::to_string(line) {
            Ok(text) => println!("{}", text),
            Err(e) => warn!("Failed to encode status line: {}", e),
        }
    } else {
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            let config = Config::default();
            config.validate().context("built-in configuration")?;
            config
        }
    };

    let gateway = match args.notify_command.as_deref().and_then(CommandGateway::parse) {
        Some(command) => Gateway::Command(command),
        None => Gateway::Log(LogGateway),
    };

    info!("NavGuard Agent v0.1.0");
    info!(
        "tick {}ms, staleness {}ms, cancel window {}ms, contact {}",
        config.tick_period_ms,
        config.staleness_timeout_ms,
        config.alert.cancel_window_ms,
        config.notification.contact
    );

    let context = TokioContext::shared();
    let (agent, inputs) = NavAgent::new(Arc::clone(&context), Arc::new(gateway), Arc::new(LogActuators), &config);

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let mut agent = agent.with_status(status_tx);

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(line) = status_rx.recv().await {
            print_status(&line, json);
        }
    });

    let feed = async {
        let routed = input::pump(context.as_ref(), BufReader::new(tokio::io::stdin()), &inputs).await?;
        info!("Input closed after {} lines", routed);
        if !args.exit_on_eof {
            tokio::signal::ctrl_c().await?;
        }
        anyhow::Ok(())
    };

    tokio::select! {
        _ = agent.run() => {}
        result = feed => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    let stats = agent.into_stats();
    info!(
        "Stopped after {} ticks: {} transitions, {} alert sessions, {} notification attempts",
        stats.ticks,
        stats.transitions,
        stats.sessions.len(),
        stats.send_attempts
    );

    // Agent dropped its status sender; let the printer flush what is queued
    drop(inputs);
    let _ = printer.await;
    Ok(())
}

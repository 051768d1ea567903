//! Agentcraft Emergence — attractor discovery host
//!
//! Usage:
//!   agentcraft-emergence --telemetry ./logs/telemetry.ndjson --state-dir ./state
//!
//! Tails the telemetry file, classifies the agents' behavior into emergent
//! attractors, and prints the phase directive whenever it changes.

use agentcraft_core::shared_tool_log;
use agentcraft_emergence::config::EmergenceConfig;
use agentcraft_emergence::engine::EmergenceEngine;
use agentcraft_emergence::watcher::TelemetryTailer;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentcraft-emergence",
    about = "Emergent attractor discovery and adaptive directives"
)]
struct Cli {
    /// NDJSON telemetry file to follow (tool records, positions, health, ...)
    #[arg(long)]
    telemetry: Option<String>,

    /// Path to config file (TOML). Default: ./emergence.toml
    #[arg(long)]
    config: Option<String>,

    /// Directory for the active directive and its history log
    #[arg(long)]
    state_dir: Option<String>,

    /// Landscape snapshot file, restored at startup
    #[arg(long)]
    snapshot: Option<String>,

    /// Telemetry poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Dump default config as TOML and exit.
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.dump_config {
        println!("{}", EmergenceConfig::default().to_toml());
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentcraft=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = cli
        .config
        .map(|p| expand_tilde(&p))
        .unwrap_or_else(|| PathBuf::from("emergence.toml"));
    let mut config = EmergenceConfig::load(&config_path);
    if let Some(dir) = cli.state_dir {
        config.directive.state_dir = Some(expand_tilde(&dir));
    }
    if let Some(snapshot) = cli.snapshot {
        config.landscape.snapshot_path = Some(expand_tilde(&snapshot));
    }

    let telemetry = cli
        .telemetry
        .map(|p| expand_tilde(&p))
        .ok_or_else(|| anyhow::anyhow!("--telemetry <file> is required"))?;

    let engine = Arc::new(EmergenceEngine::new(config)?);
    let tool_log = shared_tool_log();
    engine.connect_tool_logs(tool_log.clone());

    let printer = Arc::clone(engine.directives());
    engine.landscape().subscribe_discovery(move |_| {
        println!("{}\n", printer.phase_directive());
    });
    let printer = Arc::clone(engine.directives());
    engine.landscape().subscribe_transition(move |_, _| {
        println!("{}\n", printer.phase_directive());
    });

    println!("{}\n", engine.directives().phase_directive());

    let tailer = TelemetryTailer::new(telemetry, tool_log, Duration::from_millis(cli.poll_ms));
    let tail_task = tokio::spawn(tailer.run(Arc::clone(&engine)));
    engine.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    engine.stop();
    tail_task.abort();

    let landscape = engine.landscape().landscape();
    info!(
        "Final landscape: {} attractors, {} transitions",
        landscape.attractors.len(),
        landscape.transitions.len()
    );
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

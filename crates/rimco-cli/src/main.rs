//! `rimco` – the telemetry bridge binary.
//!
//! 1. Initialises tracing (before the tokio runtime, so the OTLP exporter
//!    can stay synchronous).
//! 2. Loads `config/rimco.toml` (or `--config <path>`) plus `RIMCO_*`
//!    overrides, and merges the persisted `topics.json` over `[channels]`.
//! 3. Connects to rosbridge, starts the bridge loop and the cockpit server.
//! 4. On **Ctrl-C** stops the loop, which flushes the snapshot and logs.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use tracing::{error, info};

use rimco_cockpit::{AppState, CockpitServer};
use rimco_memory::{LayoutStore, SnapshotCache};
use rimco_middleware::RosbridgeSource;
use rimco_middleware::rosbridge::DEFAULT_RECONNECT_DELAY;
use rimco_perception::TrackProjector;
use rimco_runtime::bridge::load_topics;
use rimco_runtime::telemetry::init_tracing;
use rimco_runtime::{ActionStreamProxy, Bridge, BridgeOptions, DiagnosticsMonitor};
use rimco_types::RimcoError;

use crate::config::{Args, Config};

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_tracing("rimco");
    print_banner();

    let path = args.config;
    let cfg = match config::load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    println!("  Config   {}", path.display().to_string().bold());
    println!("  Robot    {}", cfg.rosbridge_url.bold());
    println!("  Viewers  {}", format!("http://localhost:{}", cfg.http_port).bold());
    println!();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(mut cfg: Config) -> Result<(), RimcoError> {
    // One identifier shared by every track log of this run.
    let session_id = Utc::now().format("%Y-%m-%d_%H").to_string();
    info!(session = %session_id, "starting bridge");

    let topics_path = cfg.topics_path();
    cfg.channels.extend(load_topics(&topics_path).await);

    let source = Arc::new(RosbridgeSource::connect(cfg.rosbridge_url.clone(), DEFAULT_RECONNECT_DELAY));
    let cache = SnapshotCache::load(cfg.snapshot_path()).await;
    let tracks = TrackProjector::new(
        std::mem::take(&mut cfg.tracks),
        cfg.tracks_dir(),
        &session_id,
        cfg.track_max_bytes(),
    );
    let monitor = DiagnosticsMonitor::new(cfg.monitoring_dir(), cfg.monitoring_max_bytes());

    let options = BridgeOptions {
        flush_interval: cfg.flush_interval(),
        monitoring_channel: cfg.monitoring_channel.clone(),
        settings: cfg.settings.clone(),
        channels: std::mem::take(&mut cfg.channels),
        topics_path: Some(topics_path),
        ..BridgeOptions::default()
    };
    let (bridge, handle) = Bridge::new(source, cache, tracks, monitor, options);
    let bridge_task = tokio::spawn(bridge.run());

    let server = CockpitServer::new(AppState {
        bridge: handle.clone(),
        actions: ActionStreamProxy::new(cfg.action.clone()),
        layouts: LayoutStore::new(cfg.layouts_dir()),
    })
    .with_port(cfg.http_port)
    .with_keepalive(cfg.keepalive_interval());

    let outcome = tokio::select! {
        result = server.run() => result,
        signal = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – flushing state …".yellow().bold());
            signal.map_err(|e| RimcoError::Transport(format!("signal handler: {e}")))
        }
    };

    if let Err(e) = handle.shutdown().await {
        error!(error = %e, "bridge was already stopped");
    }
    let _ = bridge_task.await;
    println!("{}", "  ✓ Snapshot and logs flushed.".green());
    outcome
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___  _                "#.bold().cyan());
    println!("{}", r#"  / _ \(_)_ _  _______   "#.bold().cyan());
    println!("{}", r#" / , _/ /  ' \/ __/ _ \  "#.bold().cyan());
    println!("{}", r#"/_/|_/_/_/_/_/\__/\___/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "rimco".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot telemetry bridge");
    println!();
}

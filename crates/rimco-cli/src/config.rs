//! Bridge configuration – reads `config/rimco.toml`.
//!
//! Every field has a default, so a missing file or an empty one yields a
//! working bridge against `ws://localhost:9090`.
//!
//! ```toml
//! http_port = 8080
//! rosbridge_url = "ws://robot.local:9090"
//!
//! [channels]
//! "/battery/voltage" = "std_msgs/msg/Float32"
//!
//! [tracks.gnss]
//! source = "navsat"
//! pose_topic = "/fix"
//! color = "#2563eb"
//!
//! [tracks.odom]
//! source = "odometry"
//! pose_topic = "/odometry/local"
//! origin = [50.0, 13.0]
//! display_name = "Wheel odometry"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use rimco_memory::BYTES_PER_MB;
use rimco_perception::TrackConfig;
use rimco_runtime::ActionConfig;
use rimco_types::RimcoError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/rimco.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port of the viewer HTTP/WebSocket server.
    pub http_port: u16,
    /// rosbridge v2 endpoint.
    pub rosbridge_url: String,
    /// Snapshot file, track logs and monitoring logs.
    pub data_dir: PathBuf,
    /// `topics.json` and `layouts/`.
    pub config_dir: PathBuf,
    pub flush_interval_ms: u64,
    pub keepalive_interval_ms: u64,
    pub monitoring_max_mbytes: u64,
    pub track_max_mbytes: u64,
    pub monitoring_channel: String,
    /// Forwarded verbatim to viewers.
    pub settings: Value,
    /// Initial value channels, name → message type.
    pub channels: BTreeMap<String, String>,
    pub tracks: BTreeMap<String, TrackConfig>,
    pub action: ActionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            rosbridge_url: "ws://localhost:9090".into(),
            data_dir: PathBuf::from("data"),
            config_dir: PathBuf::from("config"),
            flush_interval_ms: 5_000,
            keepalive_interval_ms: 30_000,
            monitoring_max_mbytes: 5,
            track_max_mbytes: 10,
            monitoring_channel: "/monitoring".into(),
            settings: serde_json::json!({ "stale_ttl_ms": 10_000 }),
            channels: BTreeMap::new(),
            tracks: BTreeMap::new(),
            action: ActionConfig::default(),
        }
    }
}

impl Config {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("last.json")
    }

    pub fn topics_path(&self) -> PathBuf {
        self.config_dir.join("topics.json")
    }

    pub fn layouts_dir(&self) -> PathBuf {
        self.config_dir.join("layouts")
    }

    pub fn tracks_dir(&self) -> PathBuf {
        self.data_dir.join("tracks")
    }

    pub fn monitoring_dir(&self) -> PathBuf {
        self.data_dir.join("monitoring")
    }

    /// Never zero; a zero period would spin the flush timer.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    pub fn monitoring_max_bytes(&self) -> u64 {
        self.monitoring_max_mbytes * BYTES_PER_MB
    }

    pub fn track_max_bytes(&self) -> u64 {
        self.track_max_mbytes * BYTES_PER_MB
    }
}

/// Command-line arguments of the `rimco` binary.
#[derive(Debug, Parser)]
#[command(name = "rimco", version, about = "Robot telemetry bridge")]
pub struct Args {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// Load the config at `path` and apply environment overrides.
///
/// A missing file yields the defaults; an unreadable or invalid one is an
/// error.
pub fn load_from(path: &Path) -> Result<Config, RimcoError> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| RimcoError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| RimcoError::Config(format!("failed to parse {}: {e}", path.display())))?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `RIMCO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RIMCO_HTTP_PORT` | `http_port` |
/// | `RIMCO_ROSBRIDGE_URL` (or `ROSBRIDGE_URL`) | `rosbridge_url` |
/// | `RIMCO_DATA_DIR` | `data_dir` |
///
/// Invalid numeric values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("RIMCO_HTTP_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.http_port = port;
    }
    if let Some(url) = var("RIMCO_ROSBRIDGE_URL").or_else(|| var("ROSBRIDGE_URL")) {
        cfg.rosbridge_url = url;
    }
    if let Some(dir) = var("RIMCO_DATA_DIR") {
        cfg.data_dir = PathBuf::from(dir);
    }
}

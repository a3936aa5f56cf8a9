//! Layered configuration loading for tabreel.
//!
//! # Configuration Philosophy
//!
//! - **Infrastructure** (`PathsConfig`, `BindConfig`, `TelemetryConfig`):
//!   things that physically cannot change at runtime.
//! - **Recording** (`RecordingConfig`): tunables that seed the session core
//!   (flush threshold and interval, pending-request TTL, stop timeout).
//!
//! # Usage
//!
//! ```rust,no_run
//! use reelconf::TabreelConfig;
//!
//! let config = TabreelConfig::load().expect("Failed to load config");
//! println!("Blob store: {}", config.paths.store_path().display());
//! println!("Listening on: {}", config.bind.http_addr);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins), deep-merged as TOML tables:
//! 1. `/etc/tabreel/config.toml` (system)
//! 2. `~/.config/tabreel/config.toml` (user)
//! 3. `./tabreel.toml` (local override, or the path given on the CLI)
//! 4. Environment variables (`TABREEL_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/tabreel"
//! store_dir = "~/.local/share/tabreel/blobs"
//!
//! [bind]
//! http_addr = "127.0.0.1:7413"
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [recording]
//! flush_threshold = 50
//! flush_interval_ms = 10000
//! pending_ttl_ms = 120000
//! stop_timeout_ms = 5000
//! ```

pub mod infra;
pub mod loader;
pub mod recording;

pub use infra::{BindConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use recording::RecordingConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete tabreel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TabreelConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

impl TabreelConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/tabreel/config.toml`
    /// 3. `~/.config/tabreel/config.toml`
    /// 4. `./tabreel.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing `./tabreel.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually so unset optional values still show up as comments
        let mut output = String::new();

        output.push_str("# tabreel configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.paths.state_dir.display()
        ));
        output.push_str(&format!(
            "store_dir = \"{}\"\n",
            self.paths.store_path().display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("http_addr = \"{}\"\n", self.bind.http_addr));

        output.push_str("\n[telemetry]\n");
        match &self.telemetry.otlp_endpoint {
            Some(endpoint) => output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint)),
            None => output.push_str("# otlp_endpoint = \"127.0.0.1:4317\"\n"),
        }
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[recording]\n");
        output.push_str(&format!(
            "flush_threshold = {}\n",
            self.recording.flush_threshold
        ));
        output.push_str(&format!(
            "flush_interval_ms = {}\n",
            self.recording.flush_interval_ms
        ));
        output.push_str(&format!(
            "pending_ttl_ms = {}\n",
            self.recording.pending_ttl_ms
        ));
        output.push_str(&format!(
            "stop_timeout_ms = {}\n",
            self.recording.stop_timeout_ms
        ));
        output.push_str(&format!(
            "broadcast_capacity = {}\n",
            self.recording.broadcast_capacity
        ));

        output
    }
}

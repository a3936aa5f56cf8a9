//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for tabreel state and recorded data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state.
    /// Default: ~/.local/share/tabreel
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Blob store directory. Follows `state_dir` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/tabreel"))
            .unwrap_or_else(|| PathBuf::from(".local/share/tabreel"))
    }

    /// Resolved blob store directory.
    pub fn store_path(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("blobs"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            store_dir: None,
        }
    }
}

/// Network bind addresses for this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP and WebSocket listener.
    /// Default: 127.0.0.1:7413
    #[serde(default = "BindConfig::default_http_addr")]
    pub http_addr: String,
}

impl BindConfig {
    fn default_http_addr() -> String {
        "127.0.0.1:7413".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_addr: Self::default_http_addr(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Export is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Log filter directive (trace, debug, info, or a full EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_defaults() {
        let paths = PathsConfig::default();
        assert!(paths.state_dir.to_string_lossy().contains("tabreel"));
        assert_eq!(paths.store_path(), paths.state_dir.join("blobs"));
    }

    #[test]
    fn test_explicit_store_dir_wins() {
        let paths = PathsConfig {
            state_dir: PathBuf::from("/var/lib/tabreel"),
            store_dir: Some(PathBuf::from("/mnt/reels")),
        };
        assert_eq!(paths.store_path(), PathBuf::from("/mnt/reels"));
    }

    #[test]
    fn test_bind_defaults() {
        assert_eq!(BindConfig::default().http_addr, "127.0.0.1:7413");
    }

    #[test]
    fn test_telemetry_defaults() {
        let telemetry = TelemetryConfig::default();
        assert!(telemetry.otlp_endpoint.is_none());
        assert_eq!(telemetry.log_level, "info");
    }
}

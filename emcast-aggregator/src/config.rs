//! Configuration for the aggregator service.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Teardown behavior.
    pub shutdown: ShutdownConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the three listeners bind to.
    pub bind_ip: String,
    /// Framed messaging / introduction port.
    pub message_port: u16,
    /// Raw stream data port.
    pub stream_port: u16,
    /// Raw remote-control port.
    pub rc_port: u16,
    /// Discovery probe port.
    pub probe_port: u16,
}

/// Teardown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for an offline status, per round, in ms.
    pub wait_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            message_port: emcast_core::ports::MESSAGE_PORT,
            stream_port: emcast_core::ports::STREAM_PORT,
            rc_port: emcast_core::ports::RC_PORT,
            probe_port: emcast_core::ports::PROBE_PORT,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { wait_ms: 2000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AggregatorConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

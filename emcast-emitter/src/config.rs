//! Configuration for the emitter.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Who this emitter is.
    pub identity: IdentityConfig,
    /// Network settings.
    pub network: NetworkConfig,
    /// Capture settings.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Id announced in the introduction and discovery tag.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the probe responder binds to.
    pub bind_ip: String,
    /// Aggregator address. Empty means idle and wait to be probed.
    pub aggregator_ip: String,
    /// Aggregator messaging port.
    pub message_port: u16,
    /// Aggregator stream data port.
    pub stream_port: u16,
    /// Aggregator remote-control port.
    pub rc_port: u16,
    /// Local probe port to answer discovery on.
    pub probe_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frame shape announced to the aggregator, `{H}x{W}[x{C}]`.
    pub shape: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { id: "0".into() }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            aggregator_ip: String::new(),
            message_port: emcast_core::ports::MESSAGE_PORT,
            stream_port: emcast_core::ports::STREAM_PORT,
            rc_port: emcast_core::ports::RC_PORT,
            probe_port: emcast_core::ports::PROBE_PORT,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            shape: "480x640x3".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl EmitterConfig {
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

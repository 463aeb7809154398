//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_ACQUISITION_SAMPLE_RATE, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! Acquisition settings are validated here, before any of them can reach a
//! sample source: an out-of-range packet size is rejected at configuration
//! time, not when the first hardware register write would happen.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Largest packet size (samples per channel per frame) the acquisition
/// pipeline accepts. Matches the width of the hardware packet-size register.
pub const MAX_PACKET_SIZE: usize = 1023;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub acquisition: AcquisitionConfig,
    pub export: ExportConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Acquisition defaults used when a start request does not override them.
///
/// ## Fields:
/// - `sample_rate`: samples per second per channel
/// - `packet_size`: samples per channel in one frame (0..=1023)
/// - `channel_count`: number of channels produced per frame
/// - `emulate`: synthesize waveforms instead of reading acquisition hardware
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub sample_rate: u32,
    pub packet_size: usize,
    pub channel_count: usize,
    pub emulate: bool,
}

/// Export settings for CSV files written at the end of timed sessions or on
/// an explicit `save_to_csv` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub directory: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            acquisition: AcquisitionConfig {
                sample_rate: 1000, // samples/second, per channel
                packet_size: 100,  // samples per channel per frame
                channel_count: 8,  // hardware demultiplexer width
                emulate: true,
            },
            export: ExportConfig {
                directory: "exports".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, then config.toml, then APP_* env
    /// variables, with HOST/PORT handled separately for deployment platforms.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.acquisition.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.acquisition.packet_size > MAX_PACKET_SIZE {
            return Err(anyhow::anyhow!(
                "Packet size must be between 0 and {}, got {}",
                MAX_PACKET_SIZE,
                self.acquisition.packet_size
            ));
        }

        if self.acquisition.channel_count == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }

        if self.export.directory.is_empty() {
            return Err(anyhow::anyhow!("Export directory cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime updates).
    ///
    /// Only the fields present in the JSON are touched; the updated
    /// configuration is re-validated before being accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(acquisition) = partial_config.get("acquisition") {
            if let Some(rate) = acquisition.get("sample_rate").and_then(|v| v.as_u64()) {
                self.acquisition.sample_rate = rate as u32;
            }
            if let Some(size) = acquisition.get("packet_size").and_then(|v| v.as_u64()) {
                self.acquisition.packet_size = size as usize;
            }
            if let Some(channels) = acquisition.get("channel_count").and_then(|v| v.as_u64()) {
                self.acquisition.channel_count = channels as usize;
            }
            if let Some(emulate) = acquisition.get("emulate").and_then(|v| v.as_bool()) {
                self.acquisition.emulate = emulate;
            }
        }

        if let Some(export) = partial_config.get("export") {
            if let Some(directory) = export.get("directory").and_then(|v| v.as_str()) {
                self.export.directory = directory.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}

/*!
Configuration management for the MantisCam control client.
*/

use crate::client::{ClientOptions, DEFAULT_SAFEGUARD_MARKER};
use crate::health::DEFAULT_THROTTLE;
use crate::transport::Endpoints;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol::{DEFAULT_CMD_PUB_PORT, DEFAULT_CMD_SUB_PORT, DEFAULT_FRAME_SUB_PORT};
use shared::shm::DEFAULT_SHM_ROOT;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            camera: CameraConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            host: self.camera.host.clone(),
            cmd_pub_port: self.camera.cmd_pub_port,
            cmd_sub_port: self.camera.cmd_sub_port,
            frame_sub_port: self.camera.frame_sub_port,
        }
    }

    /// Client options built from the camera and timing sections
    pub fn client_options(&self) -> ClientOptions {
        let camera = &self.camera;
        let timing = &self.timing;
        ClientOptions {
            device_sn: camera.device_sn.clone(),
            shm_root: camera.shm_root.clone(),
            initial_exposure_ms: camera.initial_exposure_ms,
            send_defaults_on_connect: camera.send_defaults_on_connect,
            safeguard_marker: camera.safeguard_marker.clone(),
            force_safeguard: camera.force_safeguard,
            poll_step: Duration::from_millis(timing.poll_step_ms),
            command_delay: Duration::from_millis(timing.command_delay_ms),
            send_retry_delay: Duration::from_millis(timing.send_retry_delay_ms),
            exposure_timeout: Duration::from_millis(timing.exposure_timeout_ms),
            frame_timeout: Duration::from_millis(timing.frame_timeout_ms),
            record_start_timeout: Duration::from_millis(timing.record_start_timeout_ms),
            catalog_timeout: Duration::from_millis(timing.catalog_timeout_ms),
        }
    }

    pub fn health_throttle(&self) -> Duration {
        Duration::from_millis(self.timing.health_throttle_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Backend host
    pub host: String,

    /// Port the backend receives commands on; our publisher connects here
    pub cmd_pub_port: u16,

    /// Port the backend publishes command echoes and telemetry on
    pub cmd_sub_port: u16,

    /// Port the backend publishes frames on
    pub frame_sub_port: u16,

    /// Serial reported to the health registry until the camera reports one
    pub device_sn: String,

    /// Directory holding named shared-memory segments
    pub shm_root: PathBuf,

    /// Exposure sent on connect, in ms
    pub initial_exposure_ms: f64,

    /// Send initial exposure and timestamp file naming on connect
    pub send_defaults_on_connect: bool,

    /// Sensor family marker of cameras that do not echo exposure
    pub safeguard_marker: String,

    /// Force the timing safeguard on or off regardless of camera identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_safeguard: Option<bool>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            cmd_pub_port: DEFAULT_CMD_PUB_PORT,
            cmd_sub_port: DEFAULT_CMD_SUB_PORT,
            frame_sub_port: DEFAULT_FRAME_SUB_PORT,
            device_sn: String::new(),
            shm_root: PathBuf::from(DEFAULT_SHM_ROOT),
            initial_exposure_ms: 50.0,
            send_defaults_on_connect: true,
            safeguard_marker: DEFAULT_SAFEGUARD_MARKER.to_string(),
            force_safeguard: None,
        }
    }
}

/// Polling and timeout configuration, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_step_ms: u64,
    pub command_delay_ms: u64,
    pub send_retry_delay_ms: u64,
    pub exposure_timeout_ms: u64,
    pub frame_timeout_ms: u64,
    pub record_start_timeout_ms: u64,
    pub catalog_timeout_ms: u64,
    pub health_throttle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_step_ms: 25,
            command_delay_ms: 10,
            send_retry_delay_ms: 50,
            exposure_timeout_ms: 10_000,
            frame_timeout_ms: 5_000,
            record_start_timeout_ms: 5_000,
            catalog_timeout_ms: 2_000,
            health_throttle_ms: DEFAULT_THROTTLE.as_millis() as u64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.camera.force_safeguard = Some(true);
        original_config.camera.device_sn = "MC-0042".to_string();

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        // Save and load
        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.camera.host, "127.0.0.1");
        assert_eq!(config.camera.cmd_pub_port, 60000);
        assert_eq!(config.camera.cmd_sub_port, 60001);
        assert_eq!(config.camera.frame_sub_port, 60011);
        assert_eq!(config.camera.shm_root, PathBuf::from("/dev/shm"));
        assert!(config.camera.force_safeguard.is_none());

        assert_eq!(config.timing.poll_step_ms, 25);
        assert_eq!(config.health_throttle(), Duration::from_millis(2500));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [camera]
            host = "10.0.0.5"
            force_safeguard = false

            [timing]
            exposure_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.host, "10.0.0.5");
        assert_eq!(config.camera.cmd_sub_port, 60001);
        assert_eq!(config.logging.level, "info");

        let options = config.client_options();
        assert_eq!(options.force_safeguard, Some(false));
        assert_eq!(options.exposure_timeout, Duration::from_millis(2500));
        assert_eq!(options.poll_step, Duration::from_millis(25));
        assert_eq!(config.endpoints().url(config.camera.frame_sub_port), "tcp://10.0.0.5:60011");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::new());
    }
}

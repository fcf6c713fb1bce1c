//! Station configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/xmcd_daq.toml` (or any path given to [`StationConfig::load_from`])
//! 2. Environment variables prefixed with `XMCD_DAQ_`, `__` separating nested keys
//!
//! Every section has defaults, so an empty file (or no file) yields the
//! station's standard settings.
//!
//! # Example
//! ```no_run
//! use xmcd_daq::config::StationConfig;
//!
//! // XMCD_DAQ_SCAN__BRACKET_PERIOD=10 overrides [scan] bracket_period
//! let config = StationConfig::load()?;
//! config.validate()?;
//! println!("Station: {}", config.application.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use anyhow::Context;
use daq_core::capabilities::DeviceRole;
use daq_core::error::DaqError;
use daq_experiment::{PulseTrainSettings, ScanSettings};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/xmcd_daq.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "XMCD_DAQ_";

/// Top-level station configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub application: ApplicationConfig,
    /// Device definitions, one per role
    pub devices: Vec<DeviceDefinition>,
    pub exposure: ExposureConfig,
    pub scan: ScanConfig,
    pub pulse_train: PulseTrainConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "XMCD station".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// One station device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Role the device plays (magnet, helicity, waveplate, detector, digital-io)
    pub role: DeviceRole,
    /// Device name; defaults to the role's standard name
    #[serde(default)]
    pub name: Option<String>,
    /// Driver backing the device (currently only "mock")
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration (dynamic)
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

impl DeviceDefinition {
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.role.default_name())
    }
}

/// Exposure feedback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub target_peak: f64,
    /// Detector ceiling in seconds
    pub max_exposure_s: f64,
    pub seed_exposure_s: f64,
    pub warmup_iterations: u32,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        let scan = ScanSettings::default();
        Self {
            target_peak: scan.target_peak,
            max_exposure_s: scan.max_exposure_s,
            seed_exposure_s: scan.seed_exposure_s,
            warmup_iterations: scan.warmup_iterations,
        }
    }
}

/// Scan trajectory and bracketing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub bracket_period: usize,
    pub bracket_accumulations: u32,
    pub normal_accumulations: u32,
    pub probe_accumulations: u32,
    #[serde(with = "humantime_serde")]
    pub helicity_settle: Duration,
    /// Start of the hysteresis branch (A)
    pub sweep_high: f64,
    /// Seam between the coarse and fine segments (A)
    pub sweep_low: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let scan = ScanSettings::default();
        Self {
            bracket_period: scan.bracket_period,
            bracket_accumulations: scan.bracket_accumulations,
            normal_accumulations: scan.normal_accumulations,
            probe_accumulations: scan.probe_accumulations,
            helicity_settle: scan.helicity_settle,
            sweep_high: 0.6,
            sweep_low: 0.15,
        }
    }
}

/// Pulse-train generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseTrainConfig {
    /// Default train frequency (software timing)
    pub frequency_hz: f64,
    pub active_port: u32,
    pub shutter_line: String,
    pub trigger_command: String,
    #[serde(with = "humantime_serde")]
    pub arm_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub disarm_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Completion bound; derived from each request when absent
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for PulseTrainConfig {
    fn default() -> Self {
        let settings = PulseTrainSettings::default();
        Self {
            frequency_hz: 10.0,
            active_port: settings.active_port,
            shutter_line: settings.shutter_line,
            trigger_command: settings.trigger_command,
            arm_settle: settings.arm_settle,
            disarm_settle: settings.disarm_settle,
            poll_interval: settings.poll_interval,
            timeout: settings.timeout,
        }
    }
}

impl From<&PulseTrainConfig> for PulseTrainSettings {
    fn from(config: &PulseTrainConfig) -> Self {
        Self {
            active_port: config.active_port,
            shutter_line: config.shutter_line.clone(),
            trigger_command: config.trigger_command.clone(),
            arm_settle: config.arm_settle,
            disarm_settle: config.disarm_settle,
            poll_interval: config.poll_interval,
            timeout: config.timeout,
        }
    }
}

// Default value functions
fn default_driver() -> String {
    "mock".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl StationConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load and validate in one step
    pub fn load_validated<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = Self::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), DaqError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let mut names = HashSet::new();
        let mut roles = HashSet::new();
        for device in self.enabled_devices() {
            if !names.insert(device.name()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate device name: {}",
                    device.name()
                )));
            }
            if !roles.insert(device.role) {
                return Err(DaqError::Configuration(format!(
                    "More than one enabled device for role {}",
                    device.role
                )));
            }
        }

        if !self.pulse_train.frequency_hz.is_finite() || self.pulse_train.frequency_hz <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "pulse_train.frequency_hz must be positive, got {}",
                self.pulse_train.frequency_hz
            )));
        }

        self.scan_settings().validate()?;
        self.pulse_train_settings().validate()
    }

    /// Enabled device definitions
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|device| device.enabled)
    }

    /// Enabled definition for a role, if any
    pub fn device(&self, role: DeviceRole) -> Option<&DeviceDefinition> {
        self.enabled_devices().find(|device| device.role == role)
    }

    /// Merge the `[exposure]` and `[scan]` sections into sequencer settings
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            target_peak: self.exposure.target_peak,
            max_exposure_s: self.exposure.max_exposure_s,
            seed_exposure_s: self.exposure.seed_exposure_s,
            warmup_iterations: self.exposure.warmup_iterations,
            bracket_period: self.scan.bracket_period,
            bracket_accumulations: self.scan.bracket_accumulations,
            normal_accumulations: self.scan.normal_accumulations,
            probe_accumulations: self.scan.probe_accumulations,
            helicity_settle: self.scan.helicity_settle,
        }
    }

    pub fn pulse_train_settings(&self) -> PulseTrainSettings {
        PulseTrainSettings::from(&self.pulse_train)
    }
}

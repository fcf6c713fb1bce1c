//! Station device bundle
//!
//! Resolves the five station roles (magnet, helicity, waveplate, detector,
//! digital-io) to device handles and wires them into the experiment crate.
//! Roles missing from the configuration fall back to a simulated device.

use crate::config::{DeviceDefinition, StationConfig};
use daq_core::capabilities::{DeviceHandle, DeviceRole};
use daq_core::error::{AppResult, DaqError};
use daq_driver_mock::{
    ActuatorLimits, MockActuator, MockDetector, MockDigitalIo, MockMode, TimingConfig,
};
use daq_experiment::procedures::SATURATION_CURRENT;
use daq_experiment::{DetectorSession, PulseTrainDispatcher, RunContext, ScanSequencer};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Roles in the order they are instantiated
const ROLES: [DeviceRole; 5] = [
    DeviceRole::Magnet,
    DeviceRole::Helicity,
    DeviceRole::Waveplate,
    DeviceRole::Detector,
    DeviceRole::DigitalIo,
];

/// Handles for every station role
#[derive(Clone)]
pub struct StationDevices {
    pub magnet: Arc<dyn DeviceHandle>,
    pub helicity: Arc<dyn DeviceHandle>,
    pub waveplate: Arc<dyn DeviceHandle>,
    pub detector: Arc<dyn DeviceHandle>,
    pub digital_io: Arc<dyn DeviceHandle>,
}

impl std::fmt::Debug for StationDevices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationDevices")
            .field("magnet", &self.magnet.name())
            .field("helicity", &self.helicity.name())
            .field("waveplate", &self.waveplate.name())
            .field("detector", &self.detector.name())
            .field("digital_io", &self.digital_io.name())
            .finish()
    }
}

// =============================================================================
// Mock driver settings (the `config` table of a device definition)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MockActuatorConfig {
    mode: String,
    initial_position: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Default for MockActuatorConfig {
    fn default() -> Self {
        Self {
            mode: "instant".to_string(),
            initial_position: 0.0,
            min: None,
            max: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MockDetectorConfig {
    mode: String,
    counts_per_second: f64,
    dark_level: f64,
    initial_exposure_ms: f64,
    seed: Option<u64>,
}

impl Default for MockDetectorConfig {
    fn default() -> Self {
        Self {
            mode: "instant".to_string(),
            counts_per_second: 400_000.0,
            dark_level: 600.0,
            initial_exposure_ms: 100.0,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MockDigitalIoConfig {
    mode: String,
    busy_polls: u32,
}

impl Default for MockDigitalIoConfig {
    fn default() -> Self {
        Self {
            mode: "instant".to_string(),
            busy_polls: 3,
        }
    }
}

fn driver_config<T: DeserializeOwned>(definition: &DeviceDefinition) -> AppResult<T> {
    definition.config.clone().try_into().map_err(|e| {
        DaqError::Configuration(format!(
            "Invalid config for device '{}': {}",
            definition.name(),
            e
        ))
    })
}

fn parse_mode(mode: &str) -> AppResult<MockMode> {
    mode.parse()
        .map_err(|e: anyhow::Error| DaqError::Configuration(e.to_string()))
}

fn mock_actuator(role: DeviceRole, definition: &DeviceDefinition) -> AppResult<MockActuator> {
    let config: MockActuatorConfig = driver_config(definition)?;

    let limits = match (config.min, config.max) {
        (Some(min), Some(max)) if min < max => Some(ActuatorLimits::hard_stop(min, max)),
        (None, None) if role == DeviceRole::Magnet => Some(ActuatorLimits::hard_stop(
            -SATURATION_CURRENT,
            SATURATION_CURRENT,
        )),
        (None, None) => None,
        _ => {
            return Err(DaqError::Configuration(format!(
                "Device '{}' needs both min and max, with min < max",
                definition.name()
            )))
        }
    };

    let timing = if role == DeviceRole::Magnet {
        TimingConfig::magnet()
    } else {
        TimingConfig::waveplate()
    };

    let mut builder = MockActuator::builder(definition.name())
        .initial_position(config.initial_position)
        .mode(parse_mode(&config.mode)?)
        .timing(timing);
    if let Some(limits) = limits {
        builder = builder.limits(limits);
    }
    Ok(builder.build())
}

fn mock_detector(definition: &DeviceDefinition) -> AppResult<MockDetector> {
    let config: MockDetectorConfig = driver_config(definition)?;

    let mut builder = MockDetector::builder()
        .name(definition.name())
        .counts_per_second(config.counts_per_second)
        .dark_level(config.dark_level)
        .initial_exposure_ms(config.initial_exposure_ms)
        .mode(parse_mode(&config.mode)?);
    if let Some(seed) = config.seed {
        builder = builder.seed(seed);
    }
    Ok(builder.build())
}

fn mock_digital_io(definition: &DeviceDefinition) -> AppResult<MockDigitalIo> {
    let config: MockDigitalIoConfig = driver_config(definition)?;
    Ok(MockDigitalIo::builder()
        .name(definition.name())
        .busy_polls(config.busy_polls)
        .mode(parse_mode(&config.mode)?)
        .build())
}

/// Instantiate one device from its definition
fn instantiate(definition: &DeviceDefinition) -> AppResult<Arc<dyn DeviceHandle>> {
    if definition.driver != "mock" {
        return Err(DaqError::Configuration(format!(
            "Unsupported driver '{}' for device '{}' (available: mock)",
            definition.driver,
            definition.name()
        )));
    }

    let handle: Arc<dyn DeviceHandle> = match definition.role {
        role @ (DeviceRole::Magnet | DeviceRole::Helicity | DeviceRole::Waveplate) => {
            Arc::new(mock_actuator(role, definition)?)
        }
        DeviceRole::Detector => Arc::new(mock_detector(definition)?),
        DeviceRole::DigitalIo => Arc::new(mock_digital_io(definition)?),
    };
    info!(
        role = %definition.role,
        device = %handle.name(),
        driver = %definition.driver,
        "Registered device"
    );
    Ok(handle)
}

impl StationDevices {
    /// A fully simulated station with instant-mode devices
    pub fn simulated() -> Self {
        Self {
            magnet: Arc::new(MockActuator::magnet(SATURATION_CURRENT)),
            helicity: Arc::new(
                MockActuator::builder(DeviceRole::Helicity.default_name())
                    .initial_position(45.0)
                    .build(),
            ),
            waveplate: Arc::new(MockActuator::new(DeviceRole::Waveplate.default_name())),
            detector: Arc::new(MockDetector::new()),
            digital_io: Arc::new(MockDigitalIo::new()),
        }
    }

    /// Build handles for every role from the `[[devices]]` definitions
    pub fn from_config(config: &StationConfig) -> AppResult<Self> {
        let mut station = Self::simulated();
        for role in ROLES {
            match config.device(role) {
                Some(definition) => *station.slot_mut(role) = instantiate(definition)?,
                None => info!(role = %role, "No device configured, using simulated default"),
            }
        }
        Ok(station)
    }

    /// Handle for a role
    pub fn get(&self, role: DeviceRole) -> &Arc<dyn DeviceHandle> {
        match role {
            DeviceRole::Magnet => &self.magnet,
            DeviceRole::Helicity => &self.helicity,
            DeviceRole::Waveplate => &self.waveplate,
            DeviceRole::Detector => &self.detector,
            DeviceRole::DigitalIo => &self.digital_io,
        }
    }

    fn slot_mut(&mut self, role: DeviceRole) -> &mut Arc<dyn DeviceHandle> {
        match role {
            DeviceRole::Magnet => &mut self.magnet,
            DeviceRole::Helicity => &mut self.helicity,
            DeviceRole::Waveplate => &mut self.waveplate,
            DeviceRole::Detector => &mut self.detector,
            DeviceRole::DigitalIo => &mut self.digital_io,
        }
    }

    pub fn sequencer(&self, config: &StationConfig, ctx: RunContext) -> AppResult<ScanSequencer> {
        ScanSequencer::new(
            self.magnet.clone(),
            self.helicity.clone(),
            self.detector.clone(),
            config.scan_settings(),
            ctx,
        )
    }

    pub fn pulse_dispatcher(
        &self,
        config: &StationConfig,
        ctx: RunContext,
    ) -> AppResult<PulseTrainDispatcher> {
        PulseTrainDispatcher::new(self.digital_io.clone(), config.pulse_train_settings(), ctx)
    }

    pub fn detector_session(&self) -> DetectorSession {
        DetectorSession::new(self.detector.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::clock::ManualClock;
    use daq_experiment::{linspace, DispatcherState, PulseTrainRequest, Trajectory};

    fn parse(toml_str: &str) -> StationConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_simulated_names() {
        let station = StationDevices::simulated();
        assert_eq!(station.magnet.name(), "magnet");
        assert_eq!(station.get(DeviceRole::Waveplate).name(), "las_int");
        assert_eq!(station.get(DeviceRole::DigitalIo).name(), "digital-io");
    }

    #[tokio::test]
    async fn test_from_config_uses_definitions() {
        let config = parse(
            r#"
            [[devices]]
            role = "magnet"
            name = "coil"
            [devices.config]
            min = -0.5
            max = 0.5

            [[devices]]
            role = "helicity"
            [devices.config]
            initial_position = 30.0
            "#,
        );
        let station = StationDevices::from_config(&config).unwrap();

        assert_eq!(station.magnet.name(), "coil");
        assert!(station.magnet.move_to(0.8).await.is_err());
        assert!(station.magnet.move_to(0.4).await.is_ok());
        assert_eq!(station.helicity.position().await.unwrap(), 30.0);
        // unconfigured roles stay simulated
        assert_eq!(station.detector.name(), "detector");
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let config = parse(
            r#"
            [[devices]]
            role = "detector"
            driver = "andor"
            "#,
        );
        let err = StationDevices::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("Unsupported driver 'andor'"));
    }

    #[test]
    fn test_bad_driver_config_rejected() {
        let config = parse(
            r#"
            [[devices]]
            role = "waveplate"
            [devices.config]
            min = 0.0
            "#,
        );
        assert!(StationDevices::from_config(&config).is_err());

        let config = parse(
            r#"
            [[devices]]
            role = "digital-io"
            [devices.config]
            mode = "sluggish"
            "#,
        );
        assert!(StationDevices::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_wired_sequencer_and_dispatcher() {
        let config = StationConfig::default();
        let station = StationDevices::simulated();
        let ctx = RunContext::new(Arc::new(ManualClock::new()));

        let sequencer = station.sequencer(&config, ctx.clone()).unwrap();
        let report = sequencer
            .run(&Trajectory::new(linspace(0.2, -0.2, 3)))
            .await
            .unwrap();
        assert_eq!(report.points.len(), 3);
        assert_eq!(station.helicity.position().await.unwrap(), -45.0);

        let mut dispatcher = station.pulse_dispatcher(&config, ctx).unwrap();
        let request = PulseTrainRequest::new(config.pulse_train.frequency_hz, 10).unwrap();
        assert_eq!(dispatcher.dispatch(&request).await.unwrap(), 3);
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
    }
}

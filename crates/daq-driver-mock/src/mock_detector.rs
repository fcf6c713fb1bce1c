//! Mock CCD detector with exposure/accumulation attributes and a peak-intensity readout.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use daq_core::capabilities::{DeviceHandle, DeviceRunState};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::common::{CommandJournal, ErrorConfig, MockMode, MockRng, TimingConfig};

/// Full-well value of the simulated 16-bit sensor
pub const SATURATION: f64 = 65535.0;

/// One completed `acquire` command
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub exposure_ms: f64,
    pub accumulations: u32,
    pub peak: f64,
}

#[derive(Debug)]
struct DetectorState {
    exposure_ms: f64,
    accumulations: u32,
    shutter_mode: u32,
    previewing: bool,
    last_peak: Option<f64>,
    /// Peaks returned before the response model is used
    scripted_peaks: VecDeque<f64>,
    acquisitions: Vec<Acquisition>,
}

/// Simulated detector.
///
/// The frame maximum follows a linear response with a dark offset,
/// `dark_level + counts_per_second * exposure`, clipped at [`SATURATION`].
/// The offset makes single-step exposure correction undershoot, so repeated
/// corrections converge the way they do on the real camera.
///
/// # Attributes
/// - `exposure` (ms, read/write)
/// - `accumulations` (read/write, ≥ 1)
/// - `shutter_mode` (1 = auto, 2 = closed, 3 = open)
/// - `max_intensity` (read-only, peak of the last acquired frame)
///
/// # Commands
/// - `acquire`, `preview`, `stop`
#[derive(Clone)]
pub struct MockDetector {
    name: String,
    state: Arc<RwLock<DetectorState>>,
    counts_per_second: f64,
    dark_level: f64,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    rng: Arc<MockRng>,
    journal: Option<CommandJournal>,
}

impl MockDetector {
    /// Instant-mode detector with default response
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MockDetectorBuilder {
        MockDetectorBuilder::new()
    }

    /// Every acquisition so far, in order
    pub async fn acquisitions(&self) -> Vec<Acquisition> {
        self.state.read().await.acquisitions.clone()
    }

    pub async fn is_previewing(&self) -> bool {
        self.state.read().await.previewing
    }

    /// Queue peak values returned by the next acquisitions
    pub async fn push_peaks(&self, peaks: impl IntoIterator<Item = f64>) {
        self.state.write().await.scripted_peaks.extend(peaks);
    }

    /// Peak the response model predicts for an exposure
    pub fn model_peak(&self, exposure_ms: f64) -> f64 {
        (self.dark_level + self.counts_per_second * exposure_ms / 1000.0).min(SATURATION)
    }

    fn driver_type(&self) -> String {
        format!("mock_{}", self.name)
    }

    fn journal(&self, operation: &'static str, detail: String) {
        if let Some(journal) = &self.journal {
            journal.record(&self.name, operation, detail);
        }
    }

    async fn acquire_frame(&self) -> Result<f64> {
        let (exposure_ms, accumulations) = {
            let state = self.state.read().await;
            (state.exposure_ms, state.accumulations)
        };

        if self.mode.simulates_timing() {
            let exposure = Duration::from_secs_f64(exposure_ms / 1000.0 * accumulations as f64);
            sleep(exposure + Duration::from_millis(self.timing.readout_ms)).await;
        }

        let mut state = self.state.write().await;
        let peak = match state.scripted_peaks.pop_front() {
            Some(peak) => peak,
            None if self.mode.adds_noise() => self
                .rng
                .jitter(self.model_peak(exposure_ms), 0.02)
                .min(SATURATION),
            None => self.model_peak(exposure_ms),
        };

        state.last_peak = Some(peak);
        state.acquisitions.push(Acquisition {
            exposure_ms,
            accumulations,
            peak,
        });

        tracing::debug!(
            detector = %self.name,
            exposure_ms,
            accumulations,
            peak,
            "MockDetector: frame acquired"
        );
        Ok(peak)
    }
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn as_f64(name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| anyhow!("Attribute '{}' expects a number, got {}", name, value))
}

#[async_trait]
impl DeviceHandle for MockDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_attribute(&self, name: &str, value: Value) -> Result<()> {
        self.journal("set_attribute", format!("{}={}", name, value));
        self.error_config
            .check_operation(&self.driver_type(), "set_attribute")?;

        let mut state = self.state.write().await;
        match name {
            "exposure" => {
                let ms = as_f64(name, &value)?;
                if !ms.is_finite() || ms <= 0.0 {
                    bail!("Exposure must be positive, got {} ms", ms);
                }
                state.exposure_ms = ms;
            }
            "accumulations" => {
                let count = value
                    .as_u64()
                    .filter(|n| *n >= 1 && *n <= u32::MAX as u64)
                    .ok_or_else(|| anyhow!("Accumulations must be a positive integer, got {}", value))?;
                state.accumulations = count as u32;
            }
            "shutter_mode" => {
                let mode = value
                    .as_u64()
                    .filter(|m| (1..=3).contains(m))
                    .ok_or_else(|| anyhow!("Shutter mode must be 1, 2 or 3, got {}", value))?;
                state.shutter_mode = mode as u32;
            }
            "max_intensity" => bail!("Attribute 'max_intensity' is read-only"),
            other => bail!("Unknown detector attribute '{}'", other),
        }
        Ok(())
    }

    async fn get_attribute(&self, name: &str) -> Result<Value> {
        self.error_config
            .check_operation(&self.driver_type(), "get_attribute")?;

        let state = self.state.read().await;
        match name {
            "exposure" => Ok(json!(state.exposure_ms)),
            "accumulations" => Ok(json!(state.accumulations)),
            "shutter_mode" => Ok(json!(state.shutter_mode)),
            "max_intensity" => state
                .last_peak
                .map(|peak| json!(peak))
                .ok_or_else(|| anyhow!("No frame acquired yet")),
            other => bail!("Unknown detector attribute '{}'", other),
        }
    }

    async fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        self.journal("invoke", command.to_string());
        match command {
            "acquire" => {
                self.error_config
                    .check_operation(&self.driver_type(), "acquire")?;
                let peak = self.acquire_frame().await?;
                Ok(json!({ "max_intensity": peak }))
            }
            "preview" => {
                self.error_config
                    .check_operation(&self.driver_type(), "preview")?;
                self.state.write().await.previewing = true;
                Ok(Value::Null)
            }
            "stop" => {
                self.error_config
                    .check_operation(&self.driver_type(), "stop")?;
                self.state.write().await.previewing = false;
                Ok(Value::Null)
            }
            other => bail!("Unknown detector command '{}' (args {})", other, args),
        }
    }

    async fn run_state(&self) -> Result<DeviceRunState> {
        if self.state.read().await.previewing {
            Ok(DeviceRunState::Running)
        } else {
            Ok(DeviceRunState::Idle)
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockDetector with fluent API
pub struct MockDetectorBuilder {
    name: String,
    counts_per_second: f64,
    dark_level: f64,
    initial_exposure_ms: f64,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    seed: Option<u64>,
    journal: Option<CommandJournal>,
}

impl MockDetectorBuilder {
    fn new() -> Self {
        Self {
            name: "detector".to_string(),
            counts_per_second: 400_000.0,
            dark_level: 600.0,
            initial_exposure_ms: 100.0,
            mode: MockMode::Instant,
            timing: TimingConfig::detector(),
            error_config: ErrorConfig::none(),
            seed: None,
            journal: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Signal rate of the brightest pixel
    pub fn counts_per_second(mut self, rate: f64) -> Self {
        self.counts_per_second = rate;
        self
    }

    /// Offset present in every frame regardless of exposure
    pub fn dark_level(mut self, level: f64) -> Self {
        self.dark_level = level;
        self
    }

    pub fn initial_exposure_ms(mut self, ms: f64) -> Self {
        self.initial_exposure_ms = ms;
        self
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Seed for chaos-mode noise
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn journal(mut self, journal: CommandJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn build(self) -> MockDetector {
        MockDetector {
            name: self.name,
            state: Arc::new(RwLock::new(DetectorState {
                exposure_ms: self.initial_exposure_ms,
                accumulations: 1,
                shutter_mode: 1,
                previewing: false,
                last_peak: None,
                scripted_peaks: VecDeque::new(),
                acquisitions: Vec::new(),
            })),
            counts_per_second: self.counts_per_second,
            dark_level: self.dark_level,
            mode: self.mode,
            timing: self.timing,
            error_config: self.error_config,
            rng: Arc::new(MockRng::new(self.seed)),
            journal: self.journal,
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_uses_response_model() {
        let detector = MockDetector::builder()
            .counts_per_second(100_000.0)
            .dark_level(0.0)
            .build();

        detector.set_attribute("exposure", json!(50.0)).await.unwrap();
        detector.set_attribute("accumulations", json!(10)).await.unwrap();
        let result = detector.invoke("acquire", Value::Null).await.unwrap();

        assert_eq!(result["max_intensity"], json!(5000.0));
        assert_eq!(
            detector.get_attribute("max_intensity").await.unwrap(),
            json!(5000.0)
        );
        assert_eq!(
            detector.acquisitions().await,
            vec![Acquisition {
                exposure_ms: 50.0,
                accumulations: 10,
                peak: 5000.0
            }]
        );
    }

    #[tokio::test]
    async fn test_peak_saturates() {
        let detector = MockDetector::new();
        detector.set_attribute("exposure", json!(10_000.0)).await.unwrap();
        detector.invoke("acquire", Value::Null).await.unwrap();
        assert_eq!(
            detector.get_attribute("max_intensity").await.unwrap(),
            json!(SATURATION)
        );
    }

    #[tokio::test]
    async fn test_scripted_peaks_take_priority() {
        let detector = MockDetector::new();
        detector.push_peaks([0.0, 1234.0]).await;

        detector.invoke("acquire", Value::Null).await.unwrap();
        assert_eq!(detector.get_attribute("max_intensity").await.unwrap(), json!(0.0));
        detector.invoke("acquire", Value::Null).await.unwrap();
        assert_eq!(
            detector.get_attribute("max_intensity").await.unwrap(),
            json!(1234.0)
        );
    }

    #[tokio::test]
    async fn test_invalid_attributes_rejected() {
        let detector = MockDetector::new();
        assert!(detector.set_attribute("exposure", json!(-1.0)).await.is_err());
        assert!(detector.set_attribute("accumulations", json!(0)).await.is_err());
        assert!(detector.set_attribute("shutter_mode", json!(4)).await.is_err());
        assert!(detector.set_attribute("max_intensity", json!(1.0)).await.is_err());
        assert!(detector.get_attribute("max_intensity").await.is_err());
    }

    #[tokio::test]
    async fn test_preview_and_stop() {
        let detector = MockDetector::new();
        detector.invoke("preview", Value::Null).await.unwrap();
        assert_eq!(detector.run_state().await.unwrap(), DeviceRunState::Running);
        detector.invoke("stop", Value::Null).await.unwrap();
        assert!(!detector.is_previewing().await);
    }

    #[tokio::test]
    async fn test_chaos_noise_is_bounded() {
        let detector = MockDetector::builder()
            .mode(MockMode::Chaos)
            .timing(TimingConfig::default())
            .seed(7)
            .build();
        detector.set_attribute("exposure", json!(100.0)).await.unwrap();

        let expected = detector.model_peak(100.0);
        for _ in 0..20 {
            let result = detector.invoke("acquire", Value::Null).await.unwrap();
            let peak = result["max_intensity"].as_f64().unwrap();
            assert!((peak - expected).abs() <= expected * 0.02);
        }
    }
}

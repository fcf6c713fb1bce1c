//! Typed session over the detector's attribute/command interface.
//!
//! The detector speaks in named attributes (`exposure` in milliseconds,
//! `accumulations`, `shutter_mode`, `max_intensity`) and named commands
//! (`acquire`, `preview`, `stop`). [`DetectorSession`] turns those into
//! typed calls with exposure in seconds.

use anyhow::anyhow;
use daq_core::capabilities::DeviceHandle;
use daq_core::error::{AppResult, DaqError};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::context::RunContext;

/// Pause between stopping a running preview and reconfiguring the camera
const PREVIEW_RESTART_DELAY: Duration = Duration::from_millis(100);

/// Detector shutter behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterMode {
    /// Open during exposures only
    Auto,
    Close,
    Open,
}

impl ShutterMode {
    /// Value written to the `shutter_mode` attribute
    pub fn code(&self) -> u32 {
        match self {
            ShutterMode::Auto => 1,
            ShutterMode::Close => 2,
            ShutterMode::Open => 3,
        }
    }
}

impl FromStr for ShutterMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ShutterMode::Auto),
            "close" | "closed" => Ok(ShutterMode::Close),
            "open" => Ok(ShutterMode::Open),
            other => Err(DaqError::Configuration(format!(
                "Unknown shutter mode '{}', expecting \"open\", \"close\" or \"auto\"",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ShutterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutterMode::Auto => write!(f, "auto"),
            ShutterMode::Close => write!(f, "close"),
            ShutterMode::Open => write!(f, "open"),
        }
    }
}

/// Typed access to one detector.
#[derive(Clone)]
pub struct DetectorSession {
    handle: Arc<dyn DeviceHandle>,
}

impl DetectorSession {
    pub fn new(handle: Arc<dyn DeviceHandle>) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Take one frame and return its peak intensity.
    ///
    /// Sets `accumulations`, then `exposure` (ms), then invokes `acquire`.
    pub async fn acquire(&self, integration_time_s: f64, accumulations: u32) -> AppResult<f64> {
        validate_integration_time(integration_time_s)?;
        self.set_accumulations(accumulations).await?;
        self.set_exposure(integration_time_s).await?;

        tracing::debug!(
            detector = %self.name(),
            integration_time_s,
            accumulations,
            "Acquiring"
        );
        self.invoke("acquire").await?;
        self.peak().await
    }

    pub async fn set_accumulations(&self, accumulations: u32) -> AppResult<()> {
        if accumulations == 0 {
            return Err(DaqError::Configuration(
                "accumulations must be at least 1".into(),
            ));
        }
        self.write("accumulations", json!(accumulations)).await
    }

    /// Write the exposure, given in seconds
    pub async fn set_exposure(&self, integration_time_s: f64) -> AppResult<()> {
        validate_integration_time(integration_time_s)?;
        self.write("exposure", json!(integration_time_s * 1000.0)).await
    }

    /// Exposure currently configured on the detector, in milliseconds
    pub async fn exposure_ms(&self) -> AppResult<f64> {
        self.read_f64("exposure").await
    }

    /// Maximum pixel value of the last frame
    ///
    /// A reading that is not a number (a NaN frame serializes as `null`)
    /// comes back as `NaN` so exposure feedback can reject the sample.
    pub async fn peak(&self) -> AppResult<f64> {
        let value = self.read("max_intensity").await?;
        Ok(value.as_f64().unwrap_or_else(|| {
            tracing::warn!(detector = %self.name(), %value, "Non-numeric peak reading");
            f64::NAN
        }))
    }

    /// Restart live preview at a new exposure with a single accumulation.
    pub async fn preview(&self, ctx: &RunContext, integration_time_s: f64) -> AppResult<()> {
        validate_integration_time(integration_time_s)?;
        self.stop().await?;
        ctx.settle(PREVIEW_RESTART_DELAY, "restarting preview").await?;
        self.set_accumulations(1).await?;
        self.set_exposure(integration_time_s).await?;
        self.invoke("preview").await
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.invoke("stop").await
    }

    pub async fn set_shutter_mode(&self, mode: ShutterMode) -> AppResult<()> {
        tracing::info!(detector = %self.name(), %mode, "Setting shutter mode");
        self.write("shutter_mode", json!(mode.code())).await
    }

    async fn write(&self, attribute: &'static str, value: Value) -> AppResult<()> {
        self.handle
            .set_attribute(attribute, value)
            .await
            .map_err(|e| DaqError::device(self.name(), format!("set {}", attribute), e))
    }

    async fn invoke(&self, command: &'static str) -> AppResult<()> {
        self.handle
            .invoke(command, Value::Null)
            .await
            .map(|_| ())
            .map_err(|e| DaqError::device(self.name(), command, e))
    }

    async fn read(&self, attribute: &'static str) -> AppResult<Value> {
        self.handle
            .get_attribute(attribute)
            .await
            .map_err(|e| DaqError::device(self.name(), format!("read {}", attribute), e))
    }

    async fn read_f64(&self, attribute: &'static str) -> AppResult<f64> {
        let value = self.read(attribute).await?;
        value.as_f64().ok_or_else(|| {
            DaqError::device(
                self.name(),
                format!("read {}", attribute),
                anyhow!("expected a number, got {}", value),
            )
        })
    }
}

impl std::fmt::Debug for DetectorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorSession")
            .field("name", &self.name())
            .finish()
    }
}

fn validate_integration_time(integration_time_s: f64) -> AppResult<()> {
    if integration_time_s.is_finite() && integration_time_s > 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "integration time must be positive, got {} s",
            integration_time_s
        )))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use daq_core::clock::ManualClock;
    use daq_driver_mock::{ErrorConfig, ErrorScenario, MockDetector};

    fn session(detector: &MockDetector) -> DetectorSession {
        DetectorSession::new(Arc::new(detector.clone()))
    }

    #[tokio::test]
    async fn test_acquire_writes_milliseconds() {
        let detector = MockDetector::new();
        let session = session(&detector);

        let peak = session.acquire(0.25, 10).await.unwrap();

        assert_eq!(session.exposure_ms().await.unwrap(), 250.0);
        assert_eq!(session.peak().await.unwrap(), peak);
        let acquisitions = detector.acquisitions().await;
        assert_eq!(acquisitions.len(), 1);
        assert_eq!(acquisitions[0].exposure_ms, 250.0);
        assert_eq!(acquisitions[0].accumulations, 10);
    }

    #[tokio::test]
    async fn test_rejects_bad_parameters_before_touching_device() {
        let detector = MockDetector::new();
        let session = session(&detector);

        assert!(matches!(
            session.acquire(0.0, 1).await,
            Err(DaqError::Configuration(_))
        ));
        assert!(matches!(
            session.acquire(0.1, 0).await,
            Err(DaqError::Configuration(_))
        ));
        assert!(detector.acquisitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_device_failure_names_operation() {
        let detector = MockDetector::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "acquire",
            }))
            .build();
        let session = session(&detector);

        let err = session.acquire(0.1, 1).await.unwrap_err();
        match err {
            DaqError::DeviceCommand {
                device, operation, ..
            } => {
                assert_eq!(device, "detector");
                assert_eq!(operation, "acquire");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_preview_restarts_with_single_accumulation() {
        let detector = MockDetector::new();
        let session = session(&detector);
        let clock = ManualClock::new();
        let ctx = RunContext::new(Arc::new(clock.clone()));

        session.set_accumulations(20).await.unwrap();
        session.preview(&ctx, 0.5).await.unwrap();

        assert!(detector.is_previewing().await);
        assert_eq!(session.exposure_ms().await.unwrap(), 500.0);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100)]);

        session.stop().await.unwrap();
        assert!(!detector.is_previewing().await);
    }

    #[tokio::test]
    async fn test_nan_peak_reads_as_nan() {
        let detector = MockDetector::new();
        let session = session(&detector);
        detector.push_peaks([f64::NAN]).await;

        let peak = session.acquire(0.1, 1).await.unwrap();
        assert!(peak.is_nan());
    }

    #[tokio::test]
    async fn test_peak_before_any_frame_is_device_error() {
        let detector = MockDetector::new();
        let session = session(&detector);

        assert!(matches!(
            session.peak().await,
            Err(DaqError::DeviceCommand { .. })
        ));
    }

    #[tokio::test]
    async fn test_preview_cancelled_before_restart() {
        let detector = MockDetector::new();
        let session = session(&detector);
        let ctx = RunContext::new(Arc::new(ManualClock::new()));
        ctx.cancel();

        let err = session.preview(&ctx, 0.5).await.unwrap_err();

        assert!(err.is_abort());
        assert!(!detector.is_previewing().await);
    }

    #[tokio::test]
    async fn test_shutter_modes() {
        assert_eq!("auto".parse::<ShutterMode>().unwrap().code(), 1);
        assert_eq!("Close".parse::<ShutterMode>().unwrap(), ShutterMode::Close);
        assert_eq!("open".parse::<ShutterMode>().unwrap().code(), 3);
        assert!("half".parse::<ShutterMode>().is_err());

        let detector = MockDetector::new();
        let session = session(&detector);
        session.set_shutter_mode(ShutterMode::Open).await.unwrap();
        assert_eq!(
            detector.get_attribute("shutter_mode").await.unwrap(),
            json!(3)
        );
    }
}

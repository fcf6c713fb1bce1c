//! Adaptive scan sequencer.
//!
//! Walks a setpoint [`Trajectory`] with the magnet while keeping the detector
//! exposure near a target peak, and periodically brackets a point with a
//! helicity-reversed acquisition pair (XMCD).
//!
//! # Per-point sequence
//!
//! ```text
//! move magnet ─▶ probe frame ─▶ correct exposure (pending)
//!                                     │
//!        ┌────────────────────────────┘
//!        ▼
//!   index % period == 0 ?
//!     yes: acquire ─▶ reverse helicity ─▶ settle ─▶ acquire   (bracket accumulations)
//!     no:  acquire                                           (normal accumulations)
//!        │
//!        ▼
//!   pending exposure becomes current for the next index
//! ```
//!
//! Acquisitions at a point use the exposure computed at the *previous* point.
//!
//! # Failure handling
//!
//! - Device errors end the run immediately; nothing is commanded for later points.
//! - Feedback errors (unusable peak) mark the point degraded and hold the
//!   previous exposure.
//! - Cancellation is checked before every point and at every settle.

use daq_core::capabilities::DeviceHandle;
use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::context::RunContext;
use crate::detector::DetectorSession;
use crate::exposure::{ExposureFeedbackController, DEFAULT_MAX_EXPOSURE_S, DEFAULT_TARGET_PEAK};
use crate::trajectory::Trajectory;

// =============================================================================
// Settings
// =============================================================================

/// Tuning of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Peak count the exposure feedback aims for
    pub target_peak: f64,
    /// Detector exposure ceiling in seconds
    pub max_exposure_s: f64,
    /// First warm-up exposure in seconds
    pub seed_exposure_s: f64,
    /// Correction passes after the seed frame
    pub warmup_iterations: u32,
    /// Every `bracket_period`-th point gets a helicity-reversed pair
    pub bracket_period: usize,
    pub bracket_accumulations: u32,
    pub normal_accumulations: u32,
    /// Accumulations of the per-point feedback frame
    pub probe_accumulations: u32,
    /// Wait after reversing helicity
    #[serde(with = "humantime_serde")]
    pub helicity_settle: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            target_peak: DEFAULT_TARGET_PEAK,
            max_exposure_s: DEFAULT_MAX_EXPOSURE_S,
            seed_exposure_s: 0.05,
            warmup_iterations: 5,
            bracket_period: 20,
            bracket_accumulations: 10,
            normal_accumulations: 20,
            probe_accumulations: 1,
            helicity_settle: Duration::from_secs(5),
        }
    }
}

impl ScanSettings {
    pub fn validate(&self) -> AppResult<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(DaqError::Configuration(format!(
                    "scan.{} must be positive, got {}",
                    name, value
                )))
            }
        };
        positive("target_peak", self.target_peak)?;
        positive("max_exposure_s", self.max_exposure_s)?;
        positive("seed_exposure_s", self.seed_exposure_s)?;

        if self.seed_exposure_s > self.max_exposure_s {
            return Err(DaqError::Configuration(format!(
                "scan.seed_exposure_s ({}) exceeds scan.max_exposure_s ({})",
                self.seed_exposure_s, self.max_exposure_s
            )));
        }
        if self.bracket_period == 0 {
            return Err(DaqError::Configuration(
                "scan.bracket_period must be > 0".into(),
            ));
        }
        for (name, count) in [
            ("bracket_accumulations", self.bracket_accumulations),
            ("normal_accumulations", self.normal_accumulations),
            ("probe_accumulations", self.probe_accumulations),
        ] {
            if count == 0 {
                return Err(DaqError::Configuration(format!(
                    "scan.{} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn controller(&self) -> ExposureFeedbackController {
        ExposureFeedbackController::new(self.target_peak, self.max_exposure_s)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Exposure settings owned by one running scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureState {
    /// Seconds, always > 0
    pub integration_time_s: f64,
    pub accumulation_count: u32,
}

/// What happened at one trajectory point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub index: usize,
    pub setpoint: f64,
    /// Exposure the point's acquisitions used
    pub exposure_s: f64,
    pub accumulations: u32,
    pub bracketed: bool,
    /// The feedback frame was unusable and the exposure was held
    pub degraded: bool,
    pub probe_peak: f64,
}

/// Summary of a completed scan. Kept in memory only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanReport {
    pub points: Vec<PointRecord>,
    /// Exposure after warm-up
    pub initial_exposure_s: f64,
    /// Exposure pending when the scan ended
    pub final_exposure_s: f64,
}

impl ScanReport {
    pub fn bracketed_indices(&self) -> Vec<usize> {
        self.points
            .iter()
            .filter(|p| p.bracketed)
            .map(|p| p.index)
            .collect()
    }

    pub fn degraded_count(&self) -> usize {
        self.points.iter().filter(|p| p.degraded).count()
    }
}

/// Peaks of a helicity-reversed acquisition pair.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BracketedPeaks {
    pub first: Vec<f64>,
    pub reversed: Vec<f64>,
}

// =============================================================================
// ScanSequencer
// =============================================================================

/// Drives magnet, helicity and detector through a scan.
///
/// # Example
///
/// ```rust,ignore
/// let sequencer = ScanSequencer::new(magnet, helicity, detector, ScanSettings::default(), ctx)?;
/// let report = sequencer.run(&hysteresis_sweep(0.6, 0.15)).await?;
/// assert_eq!(report.bracketed_indices(), vec![0, 20, 40, 60, 80]);
/// ```
pub struct ScanSequencer {
    magnet: Arc<dyn DeviceHandle>,
    helicity: Arc<dyn DeviceHandle>,
    detector: DetectorSession,
    controller: ExposureFeedbackController,
    settings: ScanSettings,
    ctx: RunContext,
}

impl ScanSequencer {
    pub fn new(
        magnet: Arc<dyn DeviceHandle>,
        helicity: Arc<dyn DeviceHandle>,
        detector: Arc<dyn DeviceHandle>,
        settings: ScanSettings,
        ctx: RunContext,
    ) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self {
            magnet,
            helicity,
            detector: DetectorSession::new(detector),
            controller: settings.controller(),
            settings,
            ctx,
        })
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn detector(&self) -> &DetectorSession {
        &self.detector
    }

    /// Warm up the exposure, then walk the trajectory.
    #[instrument(skip(self, trajectory), fields(points = trajectory.len()), err)]
    pub async fn run(&self, trajectory: &Trajectory) -> AppResult<ScanReport> {
        let mut state = self.warm_up().await?;
        let initial_exposure_s = state.integration_time_s;
        info!(initial_exposure_s, "Warm-up complete");

        let mut points = Vec::with_capacity(trajectory.len());
        for (index, &setpoint) in trajectory.iter().enumerate() {
            let record = match self.scan_point(index, setpoint, &mut state).await {
                Ok(record) => record,
                Err(e) => {
                    error!(index, setpoint, error = %e, "Scan aborted");
                    return Err(e);
                }
            };
            points.push(record);
        }

        Ok(ScanReport {
            points,
            initial_exposure_s,
            final_exposure_s: state.integration_time_s,
        })
    }

    /// Calibrate the exposure before the first point.
    ///
    /// Acquires once at the seed exposure with a single accumulation, then
    /// runs a fixed number of correct-and-acquire passes. No convergence test
    /// is applied. An unusable frame holds the exposure for the next pass.
    #[instrument(skip(self), err)]
    pub async fn warm_up(&self) -> AppResult<ExposureState> {
        self.ctx.check("before warm-up")?;
        let mut exposure_s = self.settings.seed_exposure_s;
        let mut peak = self.detector.acquire(exposure_s, 1).await?;

        for iteration in 0..self.settings.warmup_iterations {
            self.ctx.check("during warm-up")?;
            match self.controller.correct(exposure_s * 1000.0, peak) {
                Ok(next) => exposure_s = next,
                Err(e) => warn!(iteration, peak, error = %e, "Warm-up frame unusable, holding exposure"),
            }
            peak = self.detector.acquire(exposure_s, 1).await?;
            debug!(iteration, exposure_s, peak, "Warm-up pass");
        }

        Ok(ExposureState {
            integration_time_s: exposure_s,
            accumulation_count: 1,
        })
    }

    async fn scan_point(
        &self,
        index: usize,
        setpoint: f64,
        state: &mut ExposureState,
    ) -> AppResult<PointRecord> {
        self.ctx.check(&format!("before scan point {}", index))?;

        self.magnet
            .move_to(setpoint)
            .await
            .map_err(|e| DaqError::device(self.magnet.name(), "move_to", e))?;

        let exposure_s = state.integration_time_s;
        let probe_peak = self
            .detector
            .acquire(exposure_s, self.settings.probe_accumulations)
            .await?;

        let (pending, degraded) = match self.controller.correct(exposure_s * 1000.0, probe_peak) {
            Ok(next) => (next, false),
            Err(e) => {
                warn!(index, setpoint, probe_peak, error = %e, "Degraded sample, holding exposure");
                (exposure_s, true)
            }
        };

        let bracketed = index % self.settings.bracket_period == 0;
        let accumulations = if bracketed {
            self.settings.bracket_accumulations
        } else {
            self.settings.normal_accumulations
        };

        if bracketed {
            self.bracket(exposure_s, accumulations, 1).await?;
        } else {
            self.detector.acquire(exposure_s, accumulations).await?;
        }

        state.integration_time_s = pending;
        state.accumulation_count = accumulations;

        info!(
            index,
            setpoint,
            exposure_s,
            next_exposure_s = pending,
            accumulations,
            bracketed,
            degraded,
            "Scan point complete"
        );

        Ok(PointRecord {
            index,
            setpoint,
            exposure_s,
            accumulations,
            bracketed,
            degraded,
            probe_peak,
        })
    }

    /// Acquire once, reverse helicity, settle, acquire once.
    #[instrument(skip(self), err)]
    pub async fn acquire_xmcd(
        &self,
        integration_time_s: f64,
        accumulations: u32,
    ) -> AppResult<BracketedPeaks> {
        self.bracket(integration_time_s, accumulations, 1).await
    }

    /// Acquire `repeats` times, reverse helicity, settle, acquire `repeats` times.
    #[instrument(skip(self), err)]
    pub async fn repeat_xmcd(
        &self,
        integration_time_s: f64,
        accumulations: u32,
        repeats: u32,
    ) -> AppResult<BracketedPeaks> {
        if repeats == 0 {
            return Err(DaqError::Configuration("repeats must be at least 1".into()));
        }
        self.bracket(integration_time_s, accumulations, repeats).await
    }

    async fn bracket(
        &self,
        integration_time_s: f64,
        accumulations: u32,
        repeats: u32,
    ) -> AppResult<BracketedPeaks> {
        let mut peaks = BracketedPeaks::default();
        for _ in 0..repeats {
            self.ctx.check("before bracket acquisition")?;
            peaks
                .first
                .push(self.detector.acquire(integration_time_s, accumulations).await?);
        }

        self.reverse_helicity().await?;

        for _ in 0..repeats {
            self.ctx.check("before reversed acquisition")?;
            peaks
                .reversed
                .push(self.detector.acquire(integration_time_s, accumulations).await?);
        }
        Ok(peaks)
    }

    async fn reverse_helicity(&self) -> AppResult<()> {
        let name = self.helicity.name();
        let position = self
            .helicity
            .position()
            .await
            .map_err(|e| DaqError::device(name, "position", e))?;
        self.helicity
            .move_to(-position)
            .await
            .map_err(|e| DaqError::device(name, "move_to", e))?;
        debug!(from = position, to = -position, "Helicity reversed");
        self.ctx
            .settle(self.settings.helicity_settle, "waiting for beamline to settle")
            .await
    }
}

impl std::fmt::Debug for ScanSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSequencer")
            .field("magnet", &self.magnet.name())
            .field("helicity", &self.helicity.name())
            .field("detector", &self.detector.name())
            .field("settings", &self.settings)
            .finish()
    }
}

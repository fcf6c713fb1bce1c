//! Station procedures built from the core components.
//!
//! These are the routine operations run between and around scans:
//! demagnetizing the sample, preparing a single laser shot, recording dark
//! frames, and repeating a scan at a scheduled time.

use daq_core::capabilities::DeviceHandle;
use daq_core::error::{AppResult, DaqError};
use std::time::Duration;
use tracing::{info, instrument};

use crate::context::RunContext;
use crate::detector::DetectorSession;
use crate::sequencer::{ScanReport, ScanSequencer};
use crate::trajectory::{degauss_ramp, Trajectory};

/// Magnet current used to saturate the sample before a shot
pub const SATURATION_CURRENT: f64 = 1.0;

/// Hold time at saturation before stepping down
pub const SATURATION_HOLD: Duration = Duration::from_millis(500);

/// Longest single wait while waiting for a scheduled start
const SCHEDULE_POLL: Duration = Duration::from_secs(10);

/// Drive the magnet through a degauss ramp.
///
/// Each step blocks until the supply settles. Returns the number of setpoints
/// commanded, including the terminal near-zero one.
#[instrument(skip(magnet, ctx), fields(magnet = %magnet.name()), err)]
pub async fn demagnetize(
    magnet: &dyn DeviceHandle,
    max_current: f64,
    cycle_count: usize,
    ctx: &RunContext,
) -> AppResult<usize> {
    let ramp = degauss_ramp(max_current, cycle_count);
    for (step, &current) in ramp.iter().enumerate() {
        ctx.check(&format!("before degauss step {}", step))?;
        magnet
            .move_to(current)
            .await
            .map_err(|e| DaqError::device(magnet.name(), "move_to", e))?;
    }
    info!(steps = ramp.len(), "Demagnetized");
    Ok(ramp.len())
}

/// Saturate the sample, step to the shot current and set the laser intensity.
#[instrument(skip(magnet, waveplate, ctx), err)]
pub async fn prepare_shot(
    magnet: &dyn DeviceHandle,
    waveplate: &dyn DeviceHandle,
    current: f64,
    wp_angle: f64,
    ctx: &RunContext,
) -> AppResult<()> {
    let move_magnet = |setpoint: f64| async move {
        magnet
            .move_to(setpoint)
            .await
            .map_err(|e| DaqError::device(magnet.name(), "move_to", e))
    };

    move_magnet(SATURATION_CURRENT).await?;
    info!("Saturating");
    ctx.settle(SATURATION_HOLD, "holding saturation").await?;

    move_magnet(current).await?;
    waveplate
        .move_to(wp_angle)
        .await
        .map_err(|e| DaqError::device(waveplate.name(), "move_to", e))?;

    info!(
        "{}A -> {:.2}A, 1 shot @ {} deg",
        SATURATION_CURRENT, current, wp_angle
    );
    Ok(())
}

/// One block of a dark-frame series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DarkStep {
    pub integration_time_s: f64,
    pub accumulations: u32,
    pub repeats: u32,
}

impl DarkStep {
    pub const fn new(integration_time_s: f64, accumulations: u32, repeats: u32) -> Self {
        Self {
            integration_time_s,
            accumulations,
            repeats,
        }
    }

    /// Darks matching full-chip exposures, 10 frames of 10 accumulations each
    pub fn full_chip() -> Vec<DarkStep> {
        [
            4.6, 0.2, 2.9, 0.1, 4.0, 0.22, 4.5, 0.15, 3.5, 0.13, 3.0, 3.2, 0.3, 4.4,
        ]
        .into_iter()
        .map(|t| DarkStep::new(t, 10, 10))
        .collect()
    }

    /// Darks for the short exposures used without the beamstop, 5 frames of 100 accumulations
    pub fn no_beamstop() -> Vec<DarkStep> {
        [0.07, 0.035, 0.009, 0.025, 0.03, 0.02, 0.008, 0.005]
            .into_iter()
            .map(|t| DarkStep::new(t, 100, 5))
            .collect()
    }
}

/// Record a dark series and return every frame's peak, in order.
#[instrument(skip(detector, steps, ctx), fields(blocks = steps.len()), err)]
pub async fn acquire_dark_series(
    detector: &DetectorSession,
    steps: &[DarkStep],
    ctx: &RunContext,
) -> AppResult<Vec<f64>> {
    let mut peaks = Vec::new();
    for step in steps {
        for _ in 0..step.repeats {
            ctx.check("during dark series")?;
            peaks.push(
                detector
                    .acquire(step.integration_time_s, step.accumulations)
                    .await?,
            );
        }
    }
    info!(frames = peaks.len(), "Dark series complete");
    Ok(peaks)
}

/// Run a scan, wait until `second_start` on the run clock, run it again.
///
/// Each run warms up the exposure again. If the first run ends after
/// `second_start`, the second run begins immediately.
#[instrument(skip(sequencer, trajectory), fields(points = trajectory.len()), err)]
pub async fn scheduled_repeat(
    sequencer: &ScanSequencer,
    trajectory: &Trajectory,
    second_start: Duration,
) -> AppResult<(ScanReport, ScanReport)> {
    let ctx = sequencer.context();
    let first = sequencer.run(trajectory).await?;

    loop {
        let remaining = second_start.saturating_sub(ctx.now());
        if remaining.is_zero() {
            break;
        }
        ctx.settle(remaining.min(SCHEDULE_POLL), "waiting for scheduled start")
            .await?;
    }

    info!(at = ?ctx.now(), "Starting scheduled repeat");
    let second = sequencer.run(trajectory).await?;
    Ok((first, second))
}

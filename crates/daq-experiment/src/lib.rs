//! Experiment orchestration for the XMCD imaging station
//!
//! This crate sequences a magnet, a helicity waveplate, a detector and a
//! pulse-train generator through multi-step experiments.
//!
//! # Architecture
//!
//! - **exposure**: pure exposure correction from a measured peak
//! - **trajectory**: pure setpoint generators (degauss ramp, hysteresis sweep)
//! - **detector**: typed session over the detector's attributes and commands
//! - **sequencer**: the adaptive scan with XMCD bracketing
//! - **pulse_train**: Idle/Armed/Running state machine for the IR pulse generator
//! - **procedures**: demagnetization, shot preparation, dark series, scheduled repeats
//!
//! Every wait goes through the [`RunContext`] clock and can be cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_experiment::{hysteresis_sweep, RunContext, ScanSequencer, ScanSettings};
//!
//! let ctx = RunContext::default();
//! let sequencer = ScanSequencer::new(magnet, helicity, detector, ScanSettings::default(), ctx.clone())?;
//!
//! // Cancel from elsewhere with ctx.cancel()
//! let report = sequencer.run(&hysteresis_sweep(0.6, 0.15)).await?;
//! println!("{} degraded samples", report.degraded_count());
//! ```

pub mod context;
pub mod detector;
pub mod exposure;
pub mod procedures;
pub mod pulse_train;
pub mod sequencer;
pub mod trajectory;

pub use context::RunContext;
pub use detector::{DetectorSession, ShutterMode};
pub use exposure::{correct_exposure, ExposureFeedbackController};
pub use procedures::{acquire_dark_series, demagnetize, prepare_shot, scheduled_repeat, DarkStep};
pub use pulse_train::{
    DispatcherState, PulseTrainDispatcher, PulseTrainRequest, PulseTrainSettings,
    DEFAULT_TIMEOUT_GRACE,
};
pub use sequencer::{
    BracketedPeaks, ExposureState, PointRecord, ScanReport, ScanSequencer, ScanSettings,
};
pub use trajectory::{degauss_ramp, hysteresis_sweep, linspace, HysteresisSweep, Trajectory};

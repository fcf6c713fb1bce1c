//! Timing configuration for realistic mode.
//!
//! Hardware-like delays for the station's devices. Only applied when the
//! device runs in [`MockMode::Realistic`](super::MockMode) or `Chaos`.

use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingConfig {
    /// Detector readout time per frame in milliseconds
    pub readout_ms: u64,
    /// Fixed settling time after a move in milliseconds
    pub settling_time_ms: u64,
    /// Additional settling per unit of travel in milliseconds
    pub settling_per_unit_ms: f64,
    /// Round-trip delay of every device call in milliseconds
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// Electromagnet power supply (ramp limited, ~0.5 s per amp)
    pub fn magnet() -> Self {
        Self {
            readout_ms: 0,
            settling_time_ms: 50,
            settling_per_unit_ms: 500.0,
            communication_delay_ms: 5,
        }
    }

    /// Motorised waveplate (helicity or laser intensity)
    pub fn waveplate() -> Self {
        Self {
            readout_ms: 0,
            settling_time_ms: 30,
            settling_per_unit_ms: 10.0,
            communication_delay_ms: 3,
        }
    }

    /// Scientific CCD detector
    pub fn detector() -> Self {
        Self {
            readout_ms: 120,
            settling_time_ms: 0,
            settling_per_unit_ms: 0.0,
            communication_delay_ms: 2,
        }
    }

    /// USB digital-IO box
    pub fn digital_io() -> Self {
        Self {
            readout_ms: 0,
            settling_time_ms: 1,
            settling_per_unit_ms: 0.0,
            communication_delay_ms: 1,
        }
    }

    /// Time a move of `distance` units takes to settle
    pub fn move_duration(&self, distance: f64) -> Duration {
        let ms = self.settling_time_ms as f64 + self.settling_per_unit_ms * distance.abs();
        Duration::from_secs_f64(ms / 1000.0)
    }

    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readout_ms: 0,
            settling_time_ms: 0,
            settling_per_unit_ms: 0.0,
            communication_delay_ms: 0,
        }
    }
}

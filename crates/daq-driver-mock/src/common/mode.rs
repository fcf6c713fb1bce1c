//! Operational modes for simulated devices.
//!
//! - **Instant**: no delays, deterministic responses for unit tests
//! - **Realistic**: settle and readout delays taken from [`TimingConfig`](super::TimingConfig)
//! - **Chaos**: realistic timing plus frame noise, for resilience runs

/// Operational modes for simulated devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Hardware-like timing with noisy readings
    Chaos,
}

impl MockMode {
    /// Whether operations should sleep for their simulated duration
    pub fn simulates_timing(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }

    /// Whether readings carry random noise
    pub fn adds_noise(&self) -> bool {
        matches!(self, MockMode::Chaos)
    }
}

impl std::str::FromStr for MockMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "realistic" => Ok(Self::Realistic),
            "chaos" => Ok(Self::Chaos),
            other => anyhow::bail!("unknown mock mode '{}'", other),
        }
    }
}

//! Mock single-axis actuator (electromagnet supply, helicity or intensity waveplate).

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use daq_core::capabilities::DeviceHandle;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::common::{CommandJournal, ErrorConfig, MockMode, TimingConfig};

// =============================================================================
// Configuration Structs
// =============================================================================

/// Limit behavior when a setpoint exceeds the travel range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitBehavior {
    /// Hard stop - reject the setpoint
    HardStop,
    /// Clamp to limit - move to boundary without error
    Clamp,
}

/// Actuator travel limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorLimits {
    pub min: f64,
    pub max: f64,
    pub behavior: LimitBehavior,
}

impl ActuatorLimits {
    /// Create limits with HardStop behavior
    pub fn hard_stop(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            behavior: LimitBehavior::HardStop,
        }
    }

    /// Create limits with Clamp behavior
    pub fn clamp(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            behavior: LimitBehavior::Clamp,
        }
    }

    fn enforce(&self, target: f64) -> Result<f64> {
        if !target.is_finite() {
            return Err(anyhow!("Setpoint {} is not finite", target));
        }
        match self.behavior {
            LimitBehavior::Clamp => Ok(target.clamp(self.min, self.max)),
            LimitBehavior::HardStop => {
                if target < self.min || target > self.max {
                    Err(anyhow!(
                        "Setpoint {:.4} exceeds limits [{:.4}, {:.4}]",
                        target,
                        self.min,
                        self.max
                    ))
                } else {
                    Ok(target)
                }
            }
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Default)]
struct ActuatorState {
    position: f64,
    /// Every setpoint reached, in order
    history: Vec<f64>,
}

// =============================================================================
// MockActuator
// =============================================================================

/// Simulated single-axis actuator.
///
/// Used for the magnet (current in A), the helicity waveplate (signed
/// position, reversed by negation) and the laser-intensity waveplate
/// (angle in degrees). `move_to` returns after the simulated settle time,
/// matching the blocking contract of [`DeviceHandle::move_to`].
///
/// # Example
///
/// ```rust,ignore
/// let magnet = MockActuator::builder("magnet")
///     .limits(ActuatorLimits::hard_stop(-1.0, 1.0))
///     .build();
///
/// magnet.move_to(0.6).await?;
/// assert_eq!(magnet.position().await?, 0.6);
/// ```
#[derive(Clone)]
pub struct MockActuator {
    name: String,
    state: Arc<RwLock<ActuatorState>>,
    limits: Option<ActuatorLimits>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    journal: Option<CommandJournal>,
}

impl MockActuator {
    /// Create an instant-mode actuator at position 0.0
    pub fn new(name: &str) -> Self {
        Self::builder(name).build()
    }

    /// Create a builder for configuring MockActuator
    pub fn builder(name: &str) -> MockActuatorBuilder {
        MockActuatorBuilder::new(name)
    }

    /// Electromagnet supply limited to ±`max_current` amps
    pub fn magnet(max_current: f64) -> Self {
        Self::builder("magnet")
            .limits(ActuatorLimits::hard_stop(-max_current, max_current))
            .timing(TimingConfig::magnet())
            .build()
    }

    /// Setpoints reached so far, in order
    pub async fn history(&self) -> Vec<f64> {
        self.state.read().await.history.clone()
    }

    fn driver_type(&self) -> String {
        format!("mock_{}", self.name)
    }
}

#[async_trait]
impl DeviceHandle for MockActuator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_to(&self, setpoint: f64) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.record(&self.name, "move_to", format!("{}", setpoint));
        }
        self.error_config
            .check_operation(&self.driver_type(), "move_to")?;

        let target = match &self.limits {
            Some(limits) => limits.enforce(setpoint)?,
            None => setpoint,
        };

        let current = self.state.read().await.position;
        tracing::debug!(
            device = %self.name,
            from = current,
            to = target,
            "MockActuator: moving"
        );

        if self.mode.simulates_timing() {
            sleep(self.timing.move_duration(target - current)).await;
        }

        let mut state = self.state.write().await;
        state.position = target;
        state.history.push(target);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        self.error_config
            .check_operation(&self.driver_type(), "position")?;
        if self.mode.simulates_timing() {
            sleep(self.timing.communication_delay()).await;
        }
        Ok(self.state.read().await.position)
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockActuator with fluent API
pub struct MockActuatorBuilder {
    name: String,
    initial_position: f64,
    limits: Option<ActuatorLimits>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    journal: Option<CommandJournal>,
}

impl MockActuatorBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_position: 0.0,
            limits: None,
            mode: MockMode::Instant,
            timing: TimingConfig::waveplate(),
            error_config: ErrorConfig::none(),
            journal: None,
        }
    }

    pub fn initial_position(mut self, position: f64) -> Self {
        self.initial_position = position;
        self
    }

    pub fn limits(mut self, limits: ActuatorLimits) -> Self {
        self.limits = Some(limits);
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

    pub fn journal(mut self, journal: CommandJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn build(self) -> MockActuator {
        MockActuator {
            name: self.name,
            state: Arc::new(RwLock::new(ActuatorState {
                position: self.initial_position,
                history: Vec::new(),
            })),
            limits: self.limits,
            mode: self.mode,
            timing: self.timing,
            error_config: self.error_config,
            journal: self.journal,
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use std::time::Duration;

    #[tokio::test]
    async fn test_move_records_history() {
        let helicity = MockActuator::builder("helicity").initial_position(1.0).build();

        helicity.move_to(-1.0).await.unwrap();
        helicity.move_to(1.0).await.unwrap();

        assert_eq!(helicity.position().await.unwrap(), 1.0);
        assert_eq!(helicity.history().await, vec![-1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_hard_stop_rejects_out_of_range() {
        let magnet = MockActuator::magnet(1.0);

        let err = magnet.move_to(1.5).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limits"));
        assert_eq!(magnet.position().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_clamp_limits() {
        let waveplate = MockActuator::builder("las_int")
            .limits(ActuatorLimits::clamp(0.0, 90.0))
            .build();

        waveplate.move_to(120.0).await.unwrap();
        assert_eq!(waveplate.position().await.unwrap(), 90.0);
    }

    #[tokio::test]
    async fn test_non_finite_setpoint_rejected() {
        let magnet = MockActuator::magnet(1.0);
        assert!(magnet.move_to(f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_is_journaled() {
        let journal = CommandJournal::new();
        let magnet = MockActuator::builder("magnet")
            .error_config(ErrorConfig::scenario(ErrorScenario::FailOnCall {
                operation: "move_to",
                call: 2,
            }))
            .journal(journal.clone())
            .build();

        magnet.move_to(0.1).await.unwrap();
        let err = magnet.move_to(0.2).await.unwrap_err();
        assert!(err.to_string().contains("Injected failure"));
        assert_eq!(magnet.history().await, vec![0.1]);
        assert_eq!(journal.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realistic_move_takes_time() {
        let magnet = MockActuator::builder("magnet")
            .mode(MockMode::Realistic)
            .timing(TimingConfig::magnet())
            .build();

        let start = tokio::time::Instant::now();
        magnet.move_to(1.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(550));
    }
}

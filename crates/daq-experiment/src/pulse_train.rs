//! Pulse-train dispatch state machine.
//!
//! Drives a digital-IO box that gates a laser with a shutter line and fires a
//! hardware-timed train of trigger pulses on another port.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐   arm()   ┌───────┐   fire()   ┌─────────┐
//! │ Idle │──────────▶│ Armed │───────────▶│ Running │
//! └──────┘           └───┬───┘            └────┬────┘
//!    ▲                   │   ▲                 │
//!    │     disarm()      │   └─────────────────┘
//!    └───────────────────┘    await_completion()
//! ```
//!
//! A timeout, a `Fault` run state or a failed state query while Running
//! forces a disarm attempt (shutter line lowered, state back to Idle) before
//! the error is returned.

use anyhow::anyhow;
use daq_core::capabilities::{DeviceHandle, DeviceRunState};
use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::context::RunContext;

/// Margin added to the nominal train length when no timeout is configured
pub const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(30);

/// Immutable description of one pulse train.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseTrainRequest {
    frequency_hz: f64,
    pulse_count: u32,
}

impl PulseTrainRequest {
    /// Validates that `frequency_hz` is finite and positive.
    ///
    /// A zero `pulse_count` is accepted; the generator then opens and closes
    /// the shutter without pulsing.
    pub fn new(frequency_hz: f64, pulse_count: u32) -> AppResult<Self> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "pulse frequency must be positive, got {} Hz",
                frequency_hz
            )));
        }
        Ok(Self {
            frequency_hz,
            pulse_count,
        })
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn pulse_count(&self) -> u32 {
        self.pulse_count
    }

    /// Nominal train length at the requested frequency
    ///
    /// Saturates at `Duration::MAX` for frequencies too low to represent.
    pub fn nominal_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.pulse_count as f64 / self.frequency_hz)
            .unwrap_or(Duration::MAX)
    }
}

/// Wiring and timing of the pulse generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseTrainSettings {
    /// Port the trigger pulses leave on
    pub active_port: u32,
    /// Boolean line that opens the laser shutter
    pub shutter_line: String,
    /// Command that starts the train without blocking
    pub trigger_command: String,
    /// Wait after opening the shutter before firing
    #[serde(with = "humantime_serde")]
    pub arm_settle: Duration,
    /// Wait after the train before closing the shutter
    #[serde(with = "humantime_serde")]
    pub disarm_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Longest time the generator may stay Running; when absent, the
    /// request's nominal length plus [`DEFAULT_TIMEOUT_GRACE`]
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for PulseTrainSettings {
    fn default() -> Self {
        Self {
            active_port: 4,
            shutter_line: "Port_1_6".to_string(),
            trigger_command: "train_async".to_string(),
            arm_settle: Duration::from_secs(2),
            disarm_settle: Duration::from_secs(1),
            poll_interval: Duration::from_millis(200),
            timeout: None,
        }
    }
}

impl PulseTrainSettings {
    pub fn validate(&self) -> AppResult<()> {
        if self.poll_interval.is_zero() {
            return Err(DaqError::Configuration(
                "pulse_train.poll_interval must be > 0".into(),
            ));
        }
        if self.shutter_line.is_empty() {
            return Err(DaqError::Configuration(
                "pulse_train.shutter_line must not be empty".into(),
            ));
        }
        if self.trigger_command.is_empty() {
            return Err(DaqError::Configuration(
                "pulse_train.trigger_command must not be empty".into(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(DaqError::Configuration(
                "pulse_train.timeout must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Completion bound for one request
    pub fn timeout_for(&self, request: &PulseTrainRequest) -> Duration {
        self.timeout.unwrap_or_else(|| {
            request
                .nominal_duration()
                .saturating_add(DEFAULT_TIMEOUT_GRACE)
        })
    }
}

/// Dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatcherState {
    /// Shutter closed, nothing configured
    #[default]
    Idle,
    /// Shutter open, train configured, not firing
    Armed,
    /// Train fired, generator not yet observed idle
    Running,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Armed => "armed",
            DispatcherState::Running => "running",
        }
    }
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pulse-train dispatcher for one digital-IO device.
pub struct PulseTrainDispatcher {
    io: Arc<dyn DeviceHandle>,
    settings: PulseTrainSettings,
    ctx: RunContext,
    state: DispatcherState,
    train_timeout: Duration,
}

impl PulseTrainDispatcher {
    pub fn new(
        io: Arc<dyn DeviceHandle>,
        settings: PulseTrainSettings,
        ctx: RunContext,
    ) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self {
            io,
            settings,
            ctx,
            state: DispatcherState::Idle,
            train_timeout: DEFAULT_TIMEOUT_GRACE,
        })
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn settings(&self) -> &PulseTrainSettings {
        &self.settings
    }

    fn require(&self, expected: DispatcherState, operation: &'static str) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DaqError::InvalidTransition {
                from: self.state.as_str(),
                operation,
            })
        }
    }

    async fn write(&self, attribute: &str, value: Value) -> AppResult<()> {
        self.io
            .set_attribute(attribute, value)
            .await
            .map_err(|e| DaqError::device(self.io.name(), format!("set {}", attribute), e))
    }

    /// Configure the train, open the shutter and let it settle.
    ///
    /// The settle always runs in full unless cancelled; a cancelled arm leaves
    /// the dispatcher Idle with the shutter line as last commanded.
    #[instrument(skip(self), fields(device = %self.io.name()), err)]
    pub async fn arm(&mut self, request: &PulseTrainRequest) -> AppResult<()> {
        self.require(DispatcherState::Idle, "arm")?;

        self.write("Frequency", json!(request.frequency_hz())).await?;
        self.write("ActivePort", json!(self.settings.active_port)).await?;
        self.write("npulses", json!(request.pulse_count())).await?;
        self.write(&self.settings.shutter_line, json!(true)).await?;

        self.ctx.settle(self.settings.arm_settle, "arming pulse train").await?;
        self.train_timeout = self.settings.timeout_for(request);
        self.state = DispatcherState::Armed;
        Ok(())
    }

    /// Start the hardware train without waiting for it.
    #[instrument(skip(self), fields(device = %self.io.name()), err)]
    pub async fn fire(&mut self) -> AppResult<()> {
        self.require(DispatcherState::Armed, "fire")?;
        let command = self.settings.trigger_command.as_str();
        self.io
            .invoke(command, Value::Null)
            .await
            .map_err(|e| DaqError::device(self.io.name(), command, e))?;
        self.state = DispatcherState::Running;
        Ok(())
    }

    /// Poll until the generator leaves Running.
    ///
    /// Returns the number of poll intervals slept. The dispatcher is Armed
    /// again afterwards; call [`disarm`](Self::disarm) to close the shutter.
    #[instrument(skip(self), fields(device = %self.io.name()), err)]
    pub async fn await_completion(&mut self) -> AppResult<u32> {
        self.require(DispatcherState::Running, "await completion")?;

        let started = self.ctx.now();
        let mut polls = 0u32;
        loop {
            let run_state = match self.io.run_state().await {
                Ok(state) => state,
                Err(e) => {
                    self.force_disarm().await;
                    return Err(DaqError::device(self.io.name(), "run_state", e));
                }
            };

            match run_state {
                DeviceRunState::Idle => break,
                DeviceRunState::Fault => {
                    self.force_disarm().await;
                    return Err(DaqError::device(
                        self.io.name(),
                        "await completion",
                        anyhow!("pulse generator reported fault after {} polls", polls),
                    ));
                }
                DeviceRunState::Running => {
                    let waited = self.ctx.now().saturating_sub(started);
                    if waited >= self.train_timeout {
                        warn!(?waited, polls, "Pulse train timed out, forcing disarm");
                        self.force_disarm().await;
                        return Err(DaqError::PulseTrainTimeout { waited });
                    }
                    self.ctx
                        .settle(self.settings.poll_interval, "waiting for pulse train")
                        .await?;
                    polls += 1;
                }
            }
        }

        self.state = DispatcherState::Armed;
        info!(polls, "Pulse train complete");
        Ok(polls)
    }

    /// Let the last pulse clear, then close the shutter.
    #[instrument(skip(self), fields(device = %self.io.name()), err)]
    pub async fn disarm(&mut self) -> AppResult<()> {
        self.require(DispatcherState::Armed, "disarm")?;
        self.ctx
            .settle(self.settings.disarm_settle, "disarming pulse train")
            .await?;
        self.write(&self.settings.shutter_line, json!(false)).await?;
        self.state = DispatcherState::Idle;
        Ok(())
    }

    /// Close the shutter immediately, from any state.
    ///
    /// Best effort: a failed write is logged and the dispatcher still returns
    /// to Idle.
    pub async fn force_disarm(&mut self) {
        if let Err(e) = self.write(&self.settings.shutter_line, json!(false)).await {
            warn!(error = %e, "Forced disarm could not lower the shutter line");
        }
        self.state = DispatcherState::Idle;
    }

    /// Arm, fire, wait for completion and disarm.
    ///
    /// Returns the number of completion polls.
    #[instrument(skip(self), fields(device = %self.io.name()), err)]
    pub async fn dispatch(&mut self, request: &PulseTrainRequest) -> AppResult<u32> {
        info!(
            frequency_hz = request.frequency_hz(),
            pulses = request.pulse_count(),
            "Dispatching pulse train"
        );
        self.arm(request).await?;
        if let Err(e) = self.fire().await {
            self.force_disarm().await;
            return Err(e);
        }
        let polls = self.await_completion().await?;
        self.disarm().await?;
        Ok(polls)
    }
}

impl std::fmt::Debug for PulseTrainDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseTrainDispatcher")
            .field("device", &self.io.name())
            .field("state", &self.state)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::clock::ManualClock;
    use daq_driver_mock::MockDigitalIo;

    fn dispatcher(io: &MockDigitalIo, clock: &ManualClock) -> PulseTrainDispatcher {
        PulseTrainDispatcher::new(
            Arc::new(io.clone()),
            PulseTrainSettings::default(),
            RunContext::new(Arc::new(clock.clone())),
        )
        .unwrap()
    }

    #[test]
    fn test_request_validation() {
        assert!(PulseTrainRequest::new(10.0, 0).is_ok());
        assert!(matches!(
            PulseTrainRequest::new(0.0, 5),
            Err(DaqError::Configuration(_))
        ));
        assert!(PulseTrainRequest::new(f64::NAN, 5).is_err());
        assert_eq!(
            PulseTrainRequest::new(10.0, 25).unwrap().nominal_duration(),
            Duration::from_millis(2500)
        );
    }

    #[tokio::test]
    async fn test_out_of_order_calls_rejected() {
        let io = MockDigitalIo::new();
        let clock = ManualClock::new();
        let mut dispatcher = dispatcher(&io, &clock);

        let err = dispatcher.fire().await.unwrap_err();
        assert!(matches!(
            err,
            DaqError::InvalidTransition {
                from: "idle",
                operation: "fire"
            }
        ));
        assert!(dispatcher.await_completion().await.is_err());
        assert!(dispatcher.disarm().await.is_err());
        assert_eq!(io.trains_fired().await, 0);
    }

    #[tokio::test]
    async fn test_arm_configures_and_settles() {
        let io = MockDigitalIo::new();
        let clock = ManualClock::new();
        let mut dispatcher = dispatcher(&io, &clock);

        dispatcher
            .arm(&PulseTrainRequest::new(10.0, 50).unwrap())
            .await
            .unwrap();

        assert_eq!(dispatcher.state(), DispatcherState::Armed);
        assert_eq!(io.attribute("Frequency").await, Some(json!(10.0)));
        assert_eq!(io.attribute("ActivePort").await, Some(json!(4)));
        assert_eq!(io.attribute("npulses").await, Some(json!(50)));
        assert_eq!(io.attribute("Port_1_6").await, Some(json!(true)));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);

        let err = dispatcher
            .arm(&PulseTrainRequest::new(10.0, 50).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::InvalidTransition { from: "armed", .. }));
    }

    #[test]
    fn test_timeout_derived_from_request() {
        let request = PulseTrainRequest::new(10.0, 100).unwrap();
        assert_eq!(
            PulseTrainSettings::default().timeout_for(&request),
            Duration::from_secs(40)
        );

        let settings = PulseTrainSettings {
            timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        assert_eq!(settings.timeout_for(&request), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_tiny_frequency_saturates_timeout() {
        let request = PulseTrainRequest::new(1e-300, 10).unwrap();
        assert_eq!(request.nominal_duration(), Duration::MAX);
        assert_eq!(
            PulseTrainSettings::default().timeout_for(&request),
            Duration::MAX
        );

        let io = MockDigitalIo::new();
        let clock = ManualClock::new();
        let mut dispatcher = dispatcher(&io, &clock);
        dispatcher.arm(&request).await.unwrap();
        assert_eq!(dispatcher.state(), DispatcherState::Armed);
        assert_eq!(io.attribute("Frequency").await, Some(json!(1e-300)));
    }

    #[tokio::test]
    async fn test_stuck_generator_bounded_without_configured_timeout() {
        let io = MockDigitalIo::stuck();
        let clock = ManualClock::new();
        let mut dispatcher = dispatcher(&io, &clock);
        let request = PulseTrainRequest::new(10.0, 0).unwrap();

        let err = dispatcher.dispatch(&request).await.unwrap_err();

        assert!(matches!(err, DaqError::PulseTrainTimeout { .. }));
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        // 2 s arm settle plus 150 polls of 200 ms reach the 30 s bound
        assert_eq!(clock.total_slept(), Duration::from_secs(32));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let settings = PulseTrainSettings {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}

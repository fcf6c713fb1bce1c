//! Mock digital-IO box with a pulse-train generator and shutter output lines.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use daq_core::capabilities::{DeviceHandle, DeviceRunState};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::common::{CommandJournal, ErrorConfig, MockMode, TimingConfig};

/// How a started train ends, as seen through `run_state` polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainCompletion {
    /// Report `Running` for this many polls, then `Idle`
    AfterPolls(u32),
    /// Stay `Running` forever
    Never,
    /// Report `Fault` on the first poll
    Fault,
}

impl Default for TrainCompletion {
    fn default() -> Self {
        TrainCompletion::AfterPolls(3)
    }
}

#[derive(Debug, Default)]
struct IoState {
    attributes: HashMap<String, Value>,
    run_state: DeviceRunState,
    polls_remaining: u32,
    trains_fired: u32,
    /// Every attribute write, in order
    writes: Vec<(String, Value)>,
}

/// Simulated digital-IO box.
///
/// # Attributes
/// - `Frequency` (Hz, > 0)
/// - `ActivePort` (output port index)
/// - `npulses` (pulse count)
/// - `Port_<a>_<b>` (boolean output lines, e.g. the shutter line `Port_1_6`)
///
/// # Commands
/// - `train_async`: start the configured train and return immediately
///
/// Train duration is modeled in poll counts rather than wall time so the
/// dispatcher's poll loop can be tested deterministically.
#[derive(Clone)]
pub struct MockDigitalIo {
    name: String,
    state: Arc<RwLock<IoState>>,
    completion: TrainCompletion,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    journal: Option<CommandJournal>,
}

impl MockDigitalIo {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MockDigitalIoBuilder {
        MockDigitalIoBuilder::new()
    }

    /// Generator that never finishes a train
    pub fn stuck() -> Self {
        Self::builder().completion(TrainCompletion::Never).build()
    }

    /// Trains started so far
    pub async fn trains_fired(&self) -> u32 {
        self.state.read().await.trains_fired
    }

    /// Current value of an attribute, if it was ever written
    pub async fn attribute(&self, name: &str) -> Option<Value> {
        self.state.read().await.attributes.get(name).cloned()
    }

    /// Every attribute write, in order
    pub async fn writes(&self) -> Vec<(String, Value)> {
        self.state.read().await.writes.clone()
    }

    fn driver_type(&self) -> String {
        format!("mock_{}", self.name)
    }

    fn journal(&self, operation: &'static str, detail: String) {
        if let Some(journal) = &self.journal {
            journal.record(&self.name, operation, detail);
        }
    }
}

impl Default for MockDigitalIo {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_attribute(name: &str, value: &Value) -> Result<()> {
    match name {
        "Frequency" => {
            let hz = value
                .as_f64()
                .ok_or_else(|| anyhow!("Frequency expects a number, got {}", value))?;
            if !hz.is_finite() || hz <= 0.0 {
                bail!("Frequency must be positive, got {} Hz", hz);
            }
        }
        "ActivePort" | "npulses" => {
            value
                .as_u64()
                .ok_or_else(|| anyhow!("{} expects a non-negative integer, got {}", name, value))?;
        }
        line if line.starts_with("Port_") => {
            value
                .as_bool()
                .ok_or_else(|| anyhow!("Line {} expects a boolean, got {}", line, value))?;
        }
        other => bail!("Unknown digital-IO attribute '{}'", other),
    }
    Ok(())
}

#[async_trait]
impl DeviceHandle for MockDigitalIo {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_attribute(&self, name: &str, value: Value) -> Result<()> {
        self.journal("set_attribute", format!("{}={}", name, value));
        self.error_config
            .check_operation(&self.driver_type(), "set_attribute")?;
        validate_attribute(name, &value)?;

        if self.mode.simulates_timing() {
            sleep(self.timing.communication_delay()).await;
        }

        let mut state = self.state.write().await;
        state.writes.push((name.to_string(), value.clone()));
        state.attributes.insert(name.to_string(), value);
        Ok(())
    }

    async fn get_attribute(&self, name: &str) -> Result<Value> {
        self.error_config
            .check_operation(&self.driver_type(), "get_attribute")?;
        self.state
            .read()
            .await
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Attribute '{}' has not been set", name))
    }

    async fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        self.journal("invoke", command.to_string());
        if command != "train_async" {
            bail!("Unknown digital-IO command '{}' (args {})", command, args);
        }
        self.error_config
            .check_operation(&self.driver_type(), "train_async")?;

        let mut state = self.state.write().await;
        if state.run_state == DeviceRunState::Running {
            bail!("Pulse train already running");
        }
        state.run_state = DeviceRunState::Running;
        state.polls_remaining = match self.completion {
            TrainCompletion::AfterPolls(polls) => polls,
            TrainCompletion::Never | TrainCompletion::Fault => 0,
        };
        state.trains_fired += 1;

        tracing::debug!(
            device = %self.name,
            npulses = ?state.attributes.get("npulses"),
            frequency = ?state.attributes.get("Frequency"),
            "MockDigitalIo: train started"
        );
        Ok(Value::Null)
    }

    async fn run_state(&self) -> Result<DeviceRunState> {
        self.error_config
            .check_operation(&self.driver_type(), "run_state")?;

        let mut state = self.state.write().await;
        if state.run_state != DeviceRunState::Running {
            return Ok(state.run_state);
        }

        match self.completion {
            TrainCompletion::Never => {}
            TrainCompletion::Fault => state.run_state = DeviceRunState::Fault,
            TrainCompletion::AfterPolls(_) => {
                if state.polls_remaining == 0 {
                    state.run_state = DeviceRunState::Idle;
                } else {
                    state.polls_remaining -= 1;
                }
            }
        }
        Ok(state.run_state)
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockDigitalIo with fluent API
pub struct MockDigitalIoBuilder {
    name: String,
    completion: TrainCompletion,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    journal: Option<CommandJournal>,
}

impl MockDigitalIoBuilder {
    fn new() -> Self {
        Self {
            name: "digital-io".to_string(),
            completion: TrainCompletion::default(),
            mode: MockMode::Instant,
            timing: TimingConfig::digital_io(),
            error_config: ErrorConfig::none(),
            journal: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Number of `Running` polls a train lasts
    pub fn busy_polls(mut self, polls: u32) -> Self {
        self.completion = TrainCompletion::AfterPolls(polls);
        self
    }

    pub fn completion(mut self, completion: TrainCompletion) -> Self {
        self.completion = completion;
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

    pub fn build(self) -> MockDigitalIo {
        MockDigitalIo {
            name: self.name,
            state: Arc::new(RwLock::new(IoState::default())),
            completion: self.completion,
            mode: self.mode,
            timing: self.timing,
            error_config: self.error_config,
            journal: self.journal,
        }
    }
}

//! Device capability boundary
//!
//! The orchestration core depends on exactly one device abstraction,
//! [`DeviceHandle`]. A handle can move (magnets, waveplates), carry named
//! attributes (detector exposure, digital lines), run named commands
//! (`acquire`, `train_async`) and report a run state.
//!
//! Devices implement only what they support. Every method except
//! [`DeviceHandle::name`] has a default implementation returning an error, so a
//! digital-IO box does not have to pretend it can move and a magnet does not
//! have to pretend it has attributes.
//!
//! # Design Philosophy
//!
//! Each method:
//! - Is async (uses #[async_trait])
//! - Takes `&self`; implementations use interior mutability for state
//! - Uses anyhow::Result for errors
//!
//! # Example
//!
//! ```rust,ignore
//! struct Waveplate { angle: Mutex<f64> }
//!
//! #[async_trait]
//! impl DeviceHandle for Waveplate {
//!     fn name(&self) -> &str { "helicity" }
//!
//!     async fn move_to(&self, setpoint: f64) -> Result<()> {
//!         *self.angle.lock().await = setpoint;
//!         Ok(())
//!     }
//!
//!     async fn position(&self) -> Result<f64> {
//!         Ok(*self.angle.lock().await)
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Device Role
// =============================================================================

/// Hardware role a handle plays in the station.
///
/// The experiment shell looks devices up by these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceRole {
    /// Primary actuator driven along the trajectory (electromagnet current)
    Magnet,
    /// Secondary actuator reversed for XMCD bracketing (helicity waveplate)
    Helicity,
    /// Laser-intensity waveplate used when preparing single shots
    Waveplate,
    /// Camera providing frames and peak intensity
    Detector,
    /// Digital pulse-train generator with shutter line
    DigitalIo,
}

impl DeviceRole {
    /// Default device name used by the experiment shell
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Magnet => "magnet",
            Self::Helicity => "helicity",
            Self::Waveplate => "las_int",
            Self::Detector => "detector",
            Self::DigitalIo => "digital-io",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_name())
    }
}

// =============================================================================
// Run State
// =============================================================================

/// Run state owned by the physical device and observed by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceRunState {
    #[default]
    Idle,
    Running,
    Fault,
}

impl std::fmt::Display for DeviceRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRunState::Idle => write!(f, "idle"),
            DeviceRunState::Running => write!(f, "running"),
            DeviceRunState::Fault => write!(f, "fault"),
        }
    }
}

// =============================================================================
// DeviceHandle
// =============================================================================

/// Capability: access to one physical device.
///
/// # Contract
/// - `move_to` returns only after the device reports motion completion
/// - Attribute values are `serde_json::Value` (numbers, booleans, strings)
/// - `invoke` runs a named command; arguments and result are JSON
/// - `run_state` is a cheap query suitable for polling
///
/// # Thread Safety
/// - All methods take `&self` so handles can be shared as `Arc<dyn DeviceHandle>`
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Device name used in logs and errors
    fn name(&self) -> &str;

    /// Move to an absolute setpoint and wait until settled
    ///
    /// # Returns
    /// - Ok(()) once the device reports motion complete
    /// - Err if the setpoint is rejected or the device faults
    async fn move_to(&self, setpoint: f64) -> Result<()> {
        anyhow::bail!("Device '{}' cannot move (requested {})", self.name(), setpoint)
    }

    /// Current position in device-native units
    async fn position(&self) -> Result<f64> {
        anyhow::bail!("Device '{}' has no position", self.name())
    }

    /// Write a named attribute
    async fn set_attribute(&self, name: &str, value: Value) -> Result<()> {
        anyhow::bail!(
            "Device '{}' does not support attribute '{}' (value {})",
            self.name(),
            name,
            value
        )
    }

    /// Read a named attribute
    async fn get_attribute(&self, name: &str) -> Result<Value> {
        anyhow::bail!("Device '{}' does not support attribute '{}'", self.name(), name)
    }

    /// Invoke a named command
    ///
    /// # Arguments
    /// * `command` - Command identifier
    /// * `args` - Command arguments (`Value::Null` when there are none)
    async fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        anyhow::bail!(
            "Device '{}' does not support command '{}' (args {})",
            self.name(),
            command,
            args
        )
    }

    /// Current run state
    ///
    /// Devices without a notion of running report `Idle`.
    async fn run_state(&self) -> Result<DeviceRunState> {
        Ok(DeviceRunState::Idle)
    }
}

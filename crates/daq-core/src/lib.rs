//! `daq-core`
//!
//! Core trait definitions and types shared by the xmcd-daq crates.
//!
//! The sequencing logic in `daq-experiment` never talks to hardware directly.
//! It only sees the [`DeviceHandle`](capabilities::DeviceHandle) capability,
//! so real drivers and the simulated devices in `daq-driver-mock` are
//! interchangeable.
//!
//! ## Key Types
//!
//! - [`DeviceHandle`](capabilities::DeviceHandle): attribute/command/motion access to one device
//! - [`DeviceRunState`](capabilities::DeviceRunState): run state observed by polling
//! - [`DaqError`](error::DaqError): error taxonomy of the orchestration layer
//! - [`Clock`](clock::Clock) and [`CancellationToken`](clock::CancellationToken):
//!   injected time source and cooperative cancellation for every suspension point

pub mod capabilities;
pub mod clock;
pub mod error;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use capabilities::{DeviceHandle, DeviceRole, DeviceRunState};
pub use clock::{cancellable_sleep, CancellationToken, Clock, ManualClock, TokioClock};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind, FeedbackError};

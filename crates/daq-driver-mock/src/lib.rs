//! Mock hardware for xmcd-daq
//!
//! This crate provides simulated station devices so scans, pulse trains and
//! procedures can run without a beamline or laser lab.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mock Devices
//!
//! - [`MockActuator`] - Magnet supply or waveplate with limits and settle timing
//! - [`MockDetector`] - CCD with exposure/accumulation attributes and a linear peak response
//! - [`MockDigitalIo`] - Pulse-train generator with boolean output lines
//!
//! # Performance Characteristics (Realistic mode)
//!
//! - Magnet: 50ms settle + 500ms per amp of travel
//! - Detector: exposure × accumulations + 120ms readout
//! - Digital IO: 1ms per attribute write; train length counted in polls
//!
//! # Inspecting What Happened
//!
//! Every device can share a [`CommandJournal`], which records commands across
//! devices in issue order:
//!
//! ```rust,ignore
//! let journal = CommandJournal::new();
//! let magnet = MockActuator::builder("magnet").journal(journal.clone()).build();
//! let detector = MockDetector::builder().journal(journal.clone()).build();
//! // ... run a scan ...
//! assert_eq!(journal.for_device("magnet").len(), 85);
//! ```

pub mod common;
mod mock_actuator;
mod mock_detector;
mod mock_digital_io;

// Re-export common types
pub use common::{
    CommandJournal, ErrorConfig, ErrorScenario, JournalEntry, MockMode, MockRng, TimingConfig,
};

// Re-export device types
pub use mock_actuator::{ActuatorLimits, LimitBehavior, MockActuator, MockActuatorBuilder};
pub use mock_detector::{Acquisition, MockDetector, MockDetectorBuilder, SATURATION};
pub use mock_digital_io::{MockDigitalIo, MockDigitalIoBuilder, TrainCompletion};

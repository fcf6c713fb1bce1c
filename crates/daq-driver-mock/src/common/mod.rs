//! Common infrastructure for simulated devices.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Hardware-like timing configurations
//! - **errors**: Error injection framework
//! - **journal**: Cross-device command journal
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod journal;
pub mod mode;
pub mod rng;
pub mod timing;

// Re-export commonly used types
pub use errors::{ErrorConfig, ErrorScenario};
pub use journal::{CommandJournal, JournalEntry};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;

//! Shared command journal.
//!
//! Several simulated devices can write into one journal so a test can check
//! the global order of commands across the station (e.g. that nothing was
//! sent after a failed magnet move).

use std::sync::{Arc, Mutex, MutexGuard};

/// One device call as seen by a simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub device: String,
    pub operation: &'static str,
    pub detail: String,
}

/// Append-only, shareable record of device calls
#[derive(Debug, Clone, Default)]
pub struct CommandJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl CommandJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, device: &str, operation: &'static str, detail: impl Into<String>) {
        self.entries().push(JournalEntry {
            device: device.to_string(),
            operation,
            detail: detail.into(),
        });
    }

    pub fn snapshot(&self) -> Vec<JournalEntry> {
        self.entries().clone()
    }

    /// Entries written by one device
    pub fn for_device(&self, device: &str) -> Vec<JournalEntry> {
        self.entries()
            .iter()
            .filter(|entry| entry.device == device)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let journal = CommandJournal::new();
        let other = journal.clone();

        journal.record("magnet", "move_to", "0.6");
        other.record("detector", "acquire", "t=0.05 n=1");

        assert_eq!(journal.len(), 2);
        assert_eq!(other.for_device("magnet")[0].detail, "0.6");
        assert_eq!(journal.snapshot()[1].operation, "acquire");
    }
}

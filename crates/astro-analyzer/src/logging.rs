//! Tracing setup and the command journal

use crate::report::CommandRecord;
use astro_store::Juid;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Output goes to
/// stderr so stdout stays free for reports. Calling this twice is harmless.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// One executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 1
    pub sequence: u64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    /// Target being resolved when the command ran
    pub target: String,
    /// Node that staged the command
    pub origin: Juid,
    pub command_line: String,
    /// `None` if the command never produced an exit code
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl JournalEntry {
    /// Journal entry for an executed command
    #[must_use]
    pub fn new(target: &str, record: &CommandRecord) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            sequence: 0,
            timestamp,
            target: target.to_string(),
            origin: record.origin,
            command_line: record.command_line.clone(),
            exit_code: record.exit_code,
            success: record.success,
        }
    }
}

/// Append-only record of every command run by one analyzer
#[derive(Debug, Default)]
pub struct CommandJournal {
    inner: Mutex<Vec<JournalEntry>>,
}

impl CommandJournal {
    /// Append an entry, assigning the next sequence number
    pub fn append(&self, mut entry: JournalEntry) -> u64 {
        let mut guard = self.inner.lock();
        entry.sequence = guard.last().map_or(1, |e| e.sequence + 1);
        let sequence = entry.sequence;
        guard.push(entry);
        sequence
    }

    /// Snapshot of every entry in order
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().clone()
    }

    /// Entries whose command did not succeed
    #[must_use]
    pub fn failures(&self) -> Vec<JournalEntry> {
        self.inner.lock().iter().filter(|e| !e.success).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(origin: i64, success: bool) -> CommandRecord {
        CommandRecord {
            origin: Juid(origin),
            command_line: format!("photometry -i /img/{origin}.fits"),
            exit_code: Some(i32::from(!success)),
            success,
            error: None,
        }
    }

    #[test]
    fn sequence_numbers_increase() {
        let journal = CommandJournal::default();
        assert_eq!(journal.append(JournalEntry::new("rr-lyr", &record(2_000_001, true))), 1);
        assert_eq!(journal.append(JournalEntry::new("rr-lyr", &record(2_000_002, false))), 2);

        let failures = journal.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].origin, Juid(2_000_002));
        assert_eq!(failures[0].sequence, 2);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(false);
        init_tracing(true);
    }
}

//! File-backed and in-memory feeds.
//!
//! [`JsonWalletFeed`] reads a JSON array of wallet records, rewritten by the
//! custody side before each tick. [`JsonlEventFeed`] reads an append-only
//! JSON-lines event log; unparseable lines are skipped with a warning since
//! delivery is at-least-once and the classifier dedupes by id.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use ebb_core::classifier::EngagementEvent;
use ebb_core::error::EbbError;
use ebb_core::traits::{EventFeed, WalletFeed};
use ebb_core::types::WalletRecord;

fn read_optional(path: &Path) -> Result<Option<String>, EbbError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EbbError::Io(format!("{}: {e}", path.display()))),
    }
}

/// Wallet snapshot read from a JSON file. A missing file is an empty snapshot.
#[derive(Debug, Clone)]
pub struct JsonWalletFeed {
    path: PathBuf,
}

impl JsonWalletFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WalletFeed for JsonWalletFeed {
    fn pull(&self, epoch: u64) -> Result<Vec<WalletRecord>, EbbError> {
        let Some(contents) = read_optional(&self.path)? else {
            warn!(epoch, path = %self.path.display(), "wallet feed missing");
            return Ok(Vec::new());
        };
        let records: Vec<WalletRecord> = serde_json::from_str(&contents)
            .map_err(|e| EbbError::Io(format!("{}: {e}", self.path.display())))?;
        debug!(epoch, count = records.len(), "wallet snapshot pulled");
        Ok(records)
    }
}

/// Engagement events read from a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlEventFeed {
    path: PathBuf,
}

impl JsonlEventFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EventFeed for JsonlEventFeed {
    fn drain(&self, epoch: u64) -> Result<Vec<EngagementEvent>, EbbError> {
        let Some(contents) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EngagementEvent>(line) {
                Ok(event) if event.epoch <= epoch => events.push(event),
                Ok(_) => {}
                Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed event"),
            }
        }
        debug!(epoch, count = events.len(), "events drained");
        Ok(events)
    }
}

/// In-memory wallet feed. The snapshot can be replaced between ticks.
#[derive(Debug, Default)]
pub struct MemoryWalletFeed {
    records: Mutex<Vec<WalletRecord>>,
}

impl MemoryWalletFeed {
    pub fn new(records: Vec<WalletRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn replace(&self, records: Vec<WalletRecord>) {
        *self.records.lock() = records;
    }
}

impl WalletFeed for MemoryWalletFeed {
    fn pull(&self, _epoch: u64) -> Result<Vec<WalletRecord>, EbbError> {
        Ok(self.records.lock().clone())
    }
}

/// In-memory event stream. Every drain redelivers all events up to the
/// epoch, like a log re-read from the start.
#[derive(Debug, Default)]
pub struct MemoryEventFeed {
    events: Mutex<Vec<EngagementEvent>>,
}

impl MemoryEventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: EngagementEvent) {
        self.events.lock().push(event);
    }
}

impl EventFeed for MemoryEventFeed {
    fn drain(&self, epoch: u64) -> Result<Vec<EngagementEvent>, EbbError> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.epoch <= epoch)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_core::classifier::EventKind;
    use std::io::Write;

    #[test]
    fn wallet_feed_parses_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"participant_id": "alice", "balance": 500, "activity_score": 0.9, "last_active_epoch": 2}},
                {{"participant_id": "bob", "balance": -1, "activity_score": 0.1, "is_founding_member": true}}
            ]"#
        )
        .unwrap();

        let records = JsonWalletFeed::new(file.path()).pull(3).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].last_active_epoch, Some(2));
        // Validation happens in the wallet store, not the feed.
        assert_eq!(records[1].balance, -1);
        assert!(records[1].is_founding_member);
    }

    #[test]
    fn missing_wallet_file_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let feed = JsonWalletFeed::new(dir.path().join("absent.json"));
        assert!(feed.pull(0).unwrap().is_empty());
    }

    #[test]
    fn malformed_wallet_file_is_io_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = JsonWalletFeed::new(file.path()).pull(0).unwrap_err();
        assert!(matches!(err, EbbError::Io(_)));
    }

    #[test]
    fn event_feed_filters_epoch_and_skips_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"event_id":"e1","participant_id":"alice","epoch":0,"kind":{{"type":"contribution","magnitude":12}}}}"#
        )
        .unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"event_id":"e2","participant_id":"alice","epoch":5,"kind":{{"type":"collaboration","magnitude":3}}}}"#
        )
        .unwrap();

        let feed = JsonlEventFeed::new(file.path());
        let events = feed.drain(1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Contribution { magnitude: 12 });
        assert_eq!(feed.drain(5).unwrap().len(), 2);
    }

    #[test]
    fn memory_feeds_redeliver() {
        let events = MemoryEventFeed::new();
        events.push(EngagementEvent {
            event_id: "x".into(),
            participant_id: "alice".into(),
            epoch: 1,
            kind: EventKind::Contribution { magnitude: 1 },
        });
        assert!(events.drain(0).unwrap().is_empty());
        assert_eq!(events.drain(1).unwrap().len(), 1);
        assert_eq!(events.drain(2).unwrap().len(), 1);

        let wallets = MemoryWalletFeed::default();
        assert!(wallets.pull(0).unwrap().is_empty());
    }
}

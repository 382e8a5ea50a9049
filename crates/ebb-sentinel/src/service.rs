//! Asynchronous sentinel service.
//!
//! The coordinator hands committed entries to [`SentinelHandle::submit`]
//! without waiting; a background task analyzes them in order, appends alerts
//! to the [`AlertStore`] and pushes them to every `subscribe_alerts` receiver.
//! The sentinel has no write path into the ledger and may lag behind it.

use std::sync::Arc;

use ebb_core::error::SentinelError;
use ebb_core::ledger::EpochEntry;
use ebb_core::policy::SentinelPolicy;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::SentinelAlert;
use crate::sentinel::ParticipationSentinel;

/// Capacity of the alert broadcast channel. Slow subscribers lag rather
/// than block the sentinel.
const ALERT_CHANNEL_CAPACITY: usize = 1024;

/// Append-only alert persistence.
pub trait AlertStore: Send + Sync {
    fn append(&mut self, alert: &SentinelAlert) -> Result<(), SentinelError>;

    /// Alerts for epochs in `from..=to`, in insertion order.
    fn range(&self, from: u64, to: u64) -> Result<Vec<SentinelAlert>, SentinelError>;

    fn count(&self) -> Result<u64, SentinelError>;
}

/// In-memory [`AlertStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryAlertLog {
    alerts: Vec<SentinelAlert>,
}

impl MemoryAlertLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStore for MemoryAlertLog {
    fn append(&mut self, alert: &SentinelAlert) -> Result<(), SentinelError> {
        self.alerts.push(alert.clone());
        Ok(())
    }

    fn range(&self, from: u64, to: u64) -> Result<Vec<SentinelAlert>, SentinelError> {
        Ok(self
            .alerts
            .iter()
            .filter(|a| (from..=to).contains(&a.epoch_number))
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<u64, SentinelError> {
        Ok(self.alerts.len() as u64)
    }
}

/// Cheap, cloneable access to a running sentinel task.
#[derive(Clone)]
pub struct SentinelHandle {
    entries_tx: mpsc::UnboundedSender<EpochEntry>,
    alerts_tx: broadcast::Sender<SentinelAlert>,
    policy_tx: Arc<watch::Sender<SentinelPolicy>>,
    store: Arc<Mutex<Box<dyn AlertStore>>>,
}

impl SentinelHandle {
    /// Queue a committed entry for analysis. Never blocks.
    pub fn submit(&self, entry: EpochEntry) -> Result<(), SentinelError> {
        self.entries_tx.send(entry).map_err(|_| SentinelError::Stopped)
    }

    /// Live feed of alerts produced from now on.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<SentinelAlert> {
        self.alerts_tx.subscribe()
    }

    /// Stored alerts for epochs in `from..=to`.
    pub fn alerts(&self, from: u64, to: u64) -> Result<Vec<SentinelAlert>, SentinelError> {
        self.store.lock().range(from, to)
    }

    pub fn alert_count(&self) -> Result<u64, SentinelError> {
        self.store.lock().count()
    }

    /// Replace the thresholds used for subsequent entries.
    pub fn update_policy(&self, policy: SentinelPolicy) {
        self.policy_tx.send_replace(policy);
    }
}

/// Spawn the sentinel task. Must be called inside a tokio runtime.
///
/// The task ends when every [`SentinelHandle`] has been dropped and the
/// queue is drained.
pub fn spawn_sentinel(
    sentinel: ParticipationSentinel,
    store: Box<dyn AlertStore>,
) -> (SentinelHandle, JoinHandle<()>) {
    let (entries_tx, entries_rx) = mpsc::unbounded_channel();
    let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
    let (policy_tx, policy_rx) = watch::channel(sentinel.policy().clone());
    let store = Arc::new(Mutex::new(store));

    let handle = SentinelHandle {
        entries_tx,
        alerts_tx: alerts_tx.clone(),
        policy_tx: Arc::new(policy_tx),
        store: Arc::clone(&store),
    };
    let task = tokio::spawn(run(sentinel, entries_rx, policy_rx, alerts_tx, store));
    (handle, task)
}

async fn run(
    mut sentinel: ParticipationSentinel,
    mut entries_rx: mpsc::UnboundedReceiver<EpochEntry>,
    mut policy_rx: watch::Receiver<SentinelPolicy>,
    alerts_tx: broadcast::Sender<SentinelAlert>,
    store: Arc<Mutex<Box<dyn AlertStore>>>,
) {
    info!("sentinel started");
    while let Some(entry) = entries_rx.recv().await {
        if policy_rx.has_changed().unwrap_or(false) {
            let policy = policy_rx.borrow_and_update().clone();
            debug!("sentinel policy updated");
            sentinel.set_policy(policy);
        }

        let alerts = sentinel.analyze(&entry);
        for alert in alerts {
            if let Err(e) = store.lock().append(&alert) {
                error!(epoch = alert.epoch_number, error = %e, "failed to persist alert");
            }
            // No subscribers is fine.
            if alerts_tx.send(alert).is_err() {
                debug!("no alert subscribers");
            }
        }
    }
    warn!("sentinel queue closed, stopping");
}

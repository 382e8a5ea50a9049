//! Ebb node: the coordinator over RocksDB, the sentinel service and the
//! epoch timer.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use ebb_core::error::{EbbError, PolicyError, TickError};
use ebb_sentinel::{spawn_sentinel, ParticipationSentinel, SentinelHandle};

use crate::config::{load_policy, NodeConfig};
use crate::coordinator::{EpochCoordinator, TickReport};
use crate::feed::{JsonWalletFeed, JsonlEventFeed};
use crate::storage::{open_db, RocksAlertLog, RocksLedgerStore};

/// A running Ebb node.
pub struct Node {
    config: NodeConfig,
    coordinator: EpochCoordinator<RocksLedgerStore>,
    sentinel: SentinelHandle,
}

impl Node {
    /// Open the ledger database, load the policy and start the sentinel.
    ///
    /// The whole chain is verified on open. A failure is logged and leaves
    /// the ledger halted; the node still serves audit queries.
    pub async fn open(config: NodeConfig) -> Result<Arc<Self>, EbbError> {
        let policy = load_policy(config.policy_path.as_deref())?;

        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| EbbError::Io(format!("{}: {e}", config.data_dir.display())))?;
        let db = open_db(config.db_path())?;
        let store = RocksLedgerStore::from_db(Arc::clone(&db));
        let alert_log = RocksAlertLog::from_db(db)?;

        let (sentinel, _task) = spawn_sentinel(
            ParticipationSentinel::new(policy.sentinel.clone()),
            Box::new(alert_log),
        );

        let coordinator = EpochCoordinator::new(
            policy,
            store,
            Arc::new(JsonWalletFeed::new(config.wallet_feed())),
            Arc::new(JsonlEventFeed::new(config.event_feed())),
        )?
        .with_sentinel(sentinel.clone());

        match coordinator.verify_all() {
            Ok(()) => info!(
                next_epoch = coordinator.next_epoch()?,
                "ledger verified"
            ),
            Err(e) => error!(error = %e, "ledger verification failed on startup"),
        }

        info!(data_dir = %config.data_dir.display(), "node opened");
        Ok(Arc::new(Self {
            config,
            coordinator,
            sentinel,
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &EpochCoordinator<RocksLedgerStore> {
        &self.coordinator
    }

    pub fn sentinel(&self) -> &SentinelHandle {
        &self.sentinel
    }

    /// Re-read the policy sources. On error the running policy is kept.
    pub fn reload_policy(&self) -> Result<(), PolicyError> {
        let policy = load_policy(self.config.policy_path.as_deref()).inspect_err(|e| {
            warn!(error = %e, "policy reload rejected, keeping current policy");
        })?;
        self.coordinator.reload_policy(policy)
    }

    /// Run one tick with the configured budget, stamped with the wall clock.
    pub async fn tick_now(&self) -> Result<TickReport, TickError> {
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        self.coordinator
            .tick(self.config.epoch_budget, timestamp)
            .await
    }

    /// Tick on the configured interval until the task is dropped.
    ///
    /// A failed tick is logged and retried on the next interval; it never
    /// stops the loop.
    pub async fn run(self: &Arc<Self>) {
        let alerts = self.sentinel.subscribe_alerts();
        tokio::spawn(log_alerts(alerts));

        let mut interval = tokio::time::interval(self.config.epoch_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            match self.tick_now().await {
                Ok(report) => info!(
                    epoch = report.epoch,
                    distributed = report.total_distributed,
                    participants = report.participants,
                    "epoch closed"
                ),
                Err(TickError::NoEligibleWallets) => {
                    warn!("no eligible wallets, skipping epoch");
                }
                Err(e) => error!(error = %e, "epoch tick failed"),
            }
        }
    }
}

async fn log_alerts(mut alerts: broadcast::Receiver<ebb_sentinel::SentinelAlert>) {
    loop {
        match alerts.recv().await {
            Ok(alert) => warn!(
                epoch = alert.epoch_number,
                alert_type = %alert.alert_type,
                severity_bps = alert.severity_bps,
                participants = alert.participant_ids.len(),
                action = %alert.recommended_action,
                "sentinel alert"
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "lagged behind on sentinel alerts");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("sentinel alert channel closed");
                break;
            }
        }
    }
}

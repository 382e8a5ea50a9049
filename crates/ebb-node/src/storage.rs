//! RocksDB-backed ledger and alert persistence.
//!
//! One database, five column families:
//! - `entries`: big-endian epoch → bincode [`EpochEntry`]
//! - `merkle_roots`: big-endian epoch → 32-byte reward root
//! - `metadata`: tip epoch, tip hash, halted flag, alert count
//! - `alerts`: big-endian (epoch, sequence) → bincode [`SentinelAlert`]
//! - `state`: wallet and classifier state as of the tip
//!
//! Ledger appends write entry, root, tip and state in one [`WriteBatch`];
//! existing epochs are never overwritten. The ledger store and the alert log share
//! the handle through an `Arc`.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use ebb_core::error::{EbbError, LedgerError, SentinelError};
use ebb_core::ledger::{EpochEntry, LedgerStore};
use ebb_core::types::Hash256;
use ebb_sentinel::{AlertStore, SentinelAlert};

// --- Column family names ---

const CF_ENTRIES: &str = "entries";
const CF_MERKLE_ROOTS: &str = "merkle_roots";
const CF_METADATA: &str = "metadata";
const CF_ALERTS: &str = "alerts";
const CF_STATE: &str = "state";

const ALL_CFS: &[&str] = &[CF_ENTRIES, CF_MERKLE_ROOTS, CF_METADATA, CF_ALERTS, CF_STATE];

// --- Metadata keys ---

const META_TIP_EPOCH: &[u8] = b"tip_epoch";
const META_TIP_HASH: &[u8] = b"tip_hash";
const META_HALTED_AT: &[u8] = b"halted_at";
const META_ALERT_COUNT: &[u8] = b"alert_count";

const STATE_COMMITTED: &[u8] = b"committed";

/// Open or create the ledger database with all column families.
pub fn open_db(path: impl AsRef<Path>) -> Result<Arc<DB>, EbbError> {
    let mut db_opts = Options::default();
    db_opts.create_if_missing(true);
    db_opts.create_missing_column_families(true);

    let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
        .collect();

    let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
        .map_err(|e| EbbError::Storage(e.to_string()))?;
    Ok(Arc::new(db))
}

fn cf_handle<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily, String> {
    db.cf_handle(name)
        .ok_or_else(|| format!("missing column family: {name}"))
}

/// Encode an epoch as big-endian bytes for ordered iteration.
fn epoch_key(epoch: u64) -> [u8; 8] {
    epoch.to_be_bytes()
}

fn decode_u64(bytes: &[u8]) -> Result<u64, String> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| "invalid u64 value length".to_string())?;
    Ok(u64::from_le_bytes(arr))
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, String> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "invalid hash length".to_string())?;
    Ok(Hash256(arr))
}

/// Persistent [`LedgerStore`].
pub struct RocksLedgerStore {
    db: Arc<DB>,
}

impl RocksLedgerStore {
    /// Open a standalone ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EbbError> {
        Ok(Self::from_db(open_db(path)?))
    }

    pub fn from_db(db: Arc<DB>) -> Self {
        Self { db }
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush().map_err(|e| LedgerError::Storage(e.to_string()))
    }

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError> {
        let cf = cf_handle(&self.db, CF_METADATA).map_err(LedgerError::Storage)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    /// Overwrite a stored entry in place, bypassing every append check.
    #[cfg(any(test, feature = "testing"))]
    pub fn tamper_entry(&self, entry: &EpochEntry) -> Result<(), LedgerError> {
        let cf = cf_handle(&self.db, CF_ENTRIES).map_err(LedgerError::Storage)?;
        let bytes = bincode::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.db
            .put_cf(cf, epoch_key(entry.epoch_number), bytes)
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }
}

impl LedgerStore for RocksLedgerStore {
    fn append(
        &mut self,
        entry: &EpochEntry,
        merkle_root: Hash256,
        state: Option<&[u8]>,
    ) -> Result<(), LedgerError> {
        let cf_entries = cf_handle(&self.db, CF_ENTRIES).map_err(LedgerError::Storage)?;
        let cf_roots = cf_handle(&self.db, CF_MERKLE_ROOTS).map_err(LedgerError::Storage)?;
        let cf_meta = cf_handle(&self.db, CF_METADATA).map_err(LedgerError::Storage)?;
        let cf_state = cf_handle(&self.db, CF_STATE).map_err(LedgerError::Storage)?;

        let key = epoch_key(entry.epoch_number);
        if self
            .db
            .get_cf(cf_entries, key)
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .is_some()
        {
            return Err(LedgerError::DuplicateEpoch(entry.epoch_number));
        }

        let bytes = bincode::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_entries, key, bytes);
        batch.put_cf(cf_roots, key, merkle_root.as_bytes());
        batch.put_cf(cf_meta, META_TIP_EPOCH, entry.epoch_number.to_le_bytes());
        batch.put_cf(cf_meta, META_TIP_HASH, entry.entry_hash.as_bytes());
        match state {
            Some(bytes) => batch.put_cf(cf_state, STATE_COMMITTED, bytes),
            None => batch.delete_cf(cf_state, STATE_COMMITTED),
        }
        self.db
            .write(batch)
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    fn committed_state(&self) -> Result<Option<Vec<u8>>, LedgerError> {
        let cf = cf_handle(&self.db, CF_STATE).map_err(LedgerError::Storage)?;
        self.db
            .get_cf(cf, STATE_COMMITTED)
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    fn get_entry(&self, epoch: u64) -> Result<Option<EpochEntry>, LedgerError> {
        let cf = cf_handle(&self.db, CF_ENTRIES).map_err(LedgerError::Storage)?;
        let Some(bytes) = self
            .db
            .get_cf(cf, epoch_key(epoch))
            .map_err(|e| LedgerError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };
        let (entry, _): (EpochEntry, _) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(Some(entry))
    }

    fn get_merkle_root(&self, epoch: u64) -> Result<Option<Hash256>, LedgerError> {
        let cf = cf_handle(&self.db, CF_MERKLE_ROOTS).map_err(LedgerError::Storage)?;
        match self
            .db
            .get_cf(cf, epoch_key(epoch))
            .map_err(|e| LedgerError::Storage(e.to_string()))?
        {
            Some(bytes) => decode_hash(&bytes).map(Some).map_err(LedgerError::Storage),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Result<Option<(u64, Hash256)>, LedgerError> {
        let epoch = match self.get_meta(META_TIP_EPOCH)? {
            Some(bytes) => decode_u64(&bytes).map_err(LedgerError::Storage)?,
            None => return Ok(None),
        };
        let hash = match self.get_meta(META_TIP_HASH)? {
            Some(bytes) => decode_hash(&bytes).map_err(LedgerError::Storage)?,
            None => return Err(LedgerError::Storage("tip epoch without tip hash".into())),
        };
        Ok(Some((epoch, hash)))
    }

    fn halted_at(&self) -> Result<Option<u64>, LedgerError> {
        match self.get_meta(META_HALTED_AT)? {
            Some(bytes) => decode_u64(&bytes).map(Some).map_err(LedgerError::Storage),
            None => Ok(None),
        }
    }

    fn set_halted(&mut self, epoch: Option<u64>) -> Result<(), LedgerError> {
        let cf = cf_handle(&self.db, CF_METADATA).map_err(LedgerError::Storage)?;
        let result = match epoch {
            Some(e) => self.db.put_cf(cf, META_HALTED_AT, e.to_le_bytes()),
            None => self.db.delete_cf(cf, META_HALTED_AT),
        };
        result.map_err(|e| LedgerError::Storage(e.to_string()))
    }
}

/// Persistent, append-only [`AlertStore`].
pub struct RocksAlertLog {
    db: Arc<DB>,
    count: u64,
}

impl RocksAlertLog {
    pub fn from_db(db: Arc<DB>) -> Result<Self, EbbError> {
        let cf = cf_handle(&db, CF_METADATA).map_err(EbbError::Storage)?;
        let count = match db
            .get_cf(cf, META_ALERT_COUNT)
            .map_err(|e| EbbError::Storage(e.to_string()))?
        {
            Some(bytes) => decode_u64(&bytes).map_err(EbbError::Storage)?,
            None => 0,
        };
        Ok(Self { db, count })
    }

    /// Key: epoch then global sequence, both big-endian, so alerts iterate
    /// by epoch and keep insertion order within it.
    fn alert_key(epoch: u64, seq: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&epoch.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }
}

impl AlertStore for RocksAlertLog {
    fn append(&mut self, alert: &SentinelAlert) -> Result<(), SentinelError> {
        let cf_alerts = cf_handle(&self.db, CF_ALERTS).map_err(SentinelError::Storage)?;
        let cf_meta = cf_handle(&self.db, CF_METADATA).map_err(SentinelError::Storage)?;

        let bytes = bincode::encode_to_vec(alert, bincode::config::standard())
            .map_err(|e| SentinelError::Storage(e.to_string()))?;
        let next = self.count + 1;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_alerts, Self::alert_key(alert.epoch_number, self.count), bytes);
        batch.put_cf(cf_meta, META_ALERT_COUNT, next.to_le_bytes());
        self.db
            .write(batch)
            .map_err(|e| SentinelError::Storage(e.to_string()))?;
        self.count = next;
        Ok(())
    }

    fn range(&self, from: u64, to: u64) -> Result<Vec<SentinelAlert>, SentinelError> {
        let cf = cf_handle(&self.db, CF_ALERTS).map_err(SentinelError::Storage)?;
        let start = Self::alert_key(from, 0);
        let mut alerts = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start[..], Direction::Forward))
        {
            let (key, value) = item.map_err(|e| SentinelError::Storage(e.to_string()))?;
            let epoch_bytes: [u8; 8] = key
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| SentinelError::Storage("invalid alert key".into()))?;
            if u64::from_be_bytes(epoch_bytes) > to {
                break;
            }
            let (alert, _): (SentinelAlert, _) =
                bincode::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| SentinelError::Storage(e.to_string()))?;
            alerts.push(alert);
        }
        Ok(alerts)
    }

    fn count(&self) -> Result<u64, SentinelError> {
        Ok(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_core::ledger::{EpochDraft, EpochLedger};
    use ebb_core::types::ParticipantId;
    use ebb_sentinel::{AlertType, Evidence};
    use std::collections::BTreeMap;

    fn temp_store() -> (RocksLedgerStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksLedgerStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn draft(epoch: u64, rewards: &[(&str, u64)]) -> EpochDraft {
        let participant_rewards: BTreeMap<ParticipantId, u64> = rewards
            .iter()
            .map(|(id, amt)| (ParticipantId::parse(*id).unwrap(), *amt))
            .collect();
        let total: u64 = participant_rewards.values().sum();
        EpochDraft {
            epoch_number: epoch,
            timestamp: 1_700_000_000 + epoch,
            total_distributed: total,
            pool_allocations: [("base".to_string(), total)].into_iter().collect(),
            participant_rewards,
        }
    }

    fn alert(epoch: u64) -> SentinelAlert {
        SentinelAlert {
            epoch_number: epoch,
            alert_type: AlertType::SybilPattern,
            severity_bps: 6_000,
            participant_ids: vec![ParticipantId::parse("a").unwrap()],
            evidence: Evidence::Sybil {
                rounded_reward: 42,
                group_size: 6,
            },
            recommended_action: "review".into(),
        }
    }

    #[test]
    fn empty_store_has_no_tip() {
        let (store, _dir) = temp_store();
        assert_eq!(store.tip().unwrap(), None);
        assert_eq!(store.entry_count().unwrap(), 0);
        assert_eq!(store.get_entry(0).unwrap(), None);
        assert_eq!(store.halted_at().unwrap(), None);
    }

    #[test]
    fn append_and_read_back() {
        let (store, _dir) = temp_store();
        let mut ledger = EpochLedger::new(store, 0);
        let e0 = ledger.append(draft(0, &[("a", 70), ("b", 30)])).unwrap();
        let e1 = ledger.append(draft(1, &[("a", 50)])).unwrap();

        assert_eq!(ledger.get(0).unwrap(), e0);
        assert_eq!(ledger.tip().unwrap(), Some((1, e1.entry_hash)));
        assert_eq!(ledger.merkle_root(0).unwrap(), e0.merkle_root());
        assert_eq!(ledger.store().entry_count().unwrap(), 2);
        assert!(ledger.verify_all().is_ok());
    }

    #[test]
    fn duplicate_epoch_refused() {
        let (mut store, _dir) = temp_store();
        let entry = EpochEntry::seal(draft(0, &[("a", 1)]), Hash256::ZERO).unwrap();
        store.append(&entry, entry.merkle_root(), Some(&b"first"[..])).unwrap();
        assert_eq!(
            store.append(&entry, entry.merkle_root(), Some(&b"second"[..])),
            Err(LedgerError::DuplicateEpoch(0))
        );
        assert_eq!(store.committed_state().unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let hash = {
            let mut ledger = EpochLedger::new(RocksLedgerStore::open(dir.path()).unwrap(), 0);
            ledger.append(draft(0, &[("a", 5)])).unwrap();
            ledger.append(draft(1, &[("b", 5)])).unwrap().entry_hash
        };
        let ledger = EpochLedger::new(RocksLedgerStore::open(dir.path()).unwrap(), 0);
        assert_eq!(ledger.tip().unwrap(), Some((1, hash)));
        assert_eq!(ledger.next_epoch().unwrap(), 2);
    }

    #[test]
    fn halted_flag_round_trips() {
        let (mut store, _dir) = temp_store();
        store.set_halted(Some(4)).unwrap();
        assert_eq!(store.halted_at().unwrap(), Some(4));
        store.set_halted(None).unwrap();
        assert_eq!(store.halted_at().unwrap(), None);
    }

    #[test]
    fn tampered_entry_fails_verification() {
        let (store, _dir) = temp_store();
        let mut ledger = EpochLedger::new(store, 0);
        for epoch in 0..3 {
            ledger.append(draft(epoch, &[("a", 10), ("b", 20)])).unwrap();
        }

        let mut forged = ledger.get(1).unwrap();
        forged.participant_rewards.insert(ParticipantId::parse("a").unwrap(), 15);
        forged.participant_rewards.insert(ParticipantId::parse("b").unwrap(), 15);
        forged.entry_hash = forged.compute_hash().unwrap();
        ledger.store().tamper_entry(&forged).unwrap();

        let err = ledger.verify_all().unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(e) if e.epoch() == 1));
        assert_eq!(ledger.halted_at().unwrap(), Some(1));
    }

    #[test]
    fn alert_log_orders_by_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        let mut log = RocksAlertLog::from_db(db).unwrap();
        log.append(&alert(3)).unwrap();
        log.append(&alert(1)).unwrap();
        log.append(&alert(3)).unwrap();

        let all = log.range(0, u64::MAX).unwrap();
        let epochs: Vec<u64> = all.iter().map(|a| a.epoch_number).collect();
        assert_eq!(epochs, vec![1, 3, 3]);
        assert_eq!(log.range(2, 2).unwrap().len(), 0);
        assert_eq!(log.count().unwrap(), 3);
    }

    #[test]
    fn alert_count_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = RocksAlertLog::from_db(open_db(dir.path()).unwrap()).unwrap();
            log.append(&alert(0)).unwrap();
            log.append(&alert(0)).unwrap();
        }
        let mut log = RocksAlertLog::from_db(open_db(dir.path()).unwrap()).unwrap();
        assert_eq!(log.count().unwrap(), 2);
        log.append(&alert(0)).unwrap();
        assert_eq!(log.range(0, 0).unwrap().len(), 3);
    }
}

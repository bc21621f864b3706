// Log Replay Engine
//
// Folds an ordered action stream into the reconstructed live state of
// a table: active files, tombstones, transaction watermarks, domain
// metadata and the current protocol/metadata pair. The fold is pure
// and deterministic; partitioning by dedup key is the scalability
// technique and is correct whenever per-key version order is kept.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tracing::{debug, trace};

use crate::actions::{
    Action, AddCdcFile, AddFile, DedupKey, DomainMetadata, Protocol, RemoveFile, SetTransaction,
    TableMetadata,
};
use crate::log::Version;

/// Tombstones are kept for a week unless the table says otherwise.
pub const DEFAULT_TOMBSTONE_RETENTION_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Configuration key for tombstone retention, in milliseconds.
pub const TOMBSTONE_RETENTION_KEY: &str = "tombstoneRetentionMillis";

/// Configuration key for transaction watermark retention, in
/// milliseconds. Unset means watermarks are kept forever.
pub const TXN_RETENTION_KEY: &str = "txnRetentionMillis";

impl TableMetadata {
    /// How long removed-file tombstones are retained.
    pub fn tombstone_retention_millis(&self) -> i64 {
        self.configuration
            .get(TOMBSTONE_RETENTION_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TOMBSTONE_RETENTION_MILLIS)
    }

    /// How long transaction watermarks are retained, if configured.
    pub fn txn_retention_millis(&self) -> Option<i64> {
        self.configuration
            .get(TXN_RETENTION_KEY)
            .and_then(|v| v.parse().ok())
    }
}

/// Errors that abort state reconstruction.
///
/// No partial state is ever returned: a missing protocol or metadata
/// means the whole snapshot is unusable.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("no protocol action found in the log segment")]
    MissingProtocol,

    #[error("no metadata action found in the log segment")]
    MissingMetadata,
}

/// The reconstructed live state of a table at a version.
///
/// Owned by exactly one snapshot and never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    /// Live data files, keyed by canonical path.
    pub active_files: HashMap<String, AddFile>,
    /// Unexpired removals, keyed by canonical path.
    pub tombstones: HashMap<String, RemoveFile>,
    /// Latest transaction watermark per application id.
    pub transactions: HashMap<String, SetTransaction>,
    /// Live (non-removed) metadata domains.
    pub domains: HashMap<String, DomainMetadata>,
    /// Change-feed files seen in the segment, keyed by canonical path.
    /// Never reconciled against active files or tombstones.
    pub cdc_files: HashMap<String, AddCdcFile>,
    pub protocol: Protocol,
    pub metadata: TableMetadata,
}

impl TableState {
    pub fn num_files(&self) -> usize {
        self.active_files.len()
    }

    /// Total size in bytes of the live data files.
    pub fn total_file_size(&self) -> i64 {
        self.active_files.values().map(|f| f.size).sum()
    }

    /// Latest committed version for an application id, if any.
    pub fn transaction_version(&self, app_id: &str) -> Option<i64> {
        self.transactions.get(app_id).map(|t| t.version)
    }

    /// Materialize this state as checkpoint content: the current
    /// protocol and metadata, then one action per active file,
    /// unexpired tombstone, live transaction and live domain. Feeding
    /// this back through [`reconstruct`] yields the same state.
    pub fn checkpoint_actions(&self) -> Vec<Action> {
        let mut actions = Vec::with_capacity(
            2 + self.active_files.len()
                + self.tombstones.len()
                + self.transactions.len()
                + self.domains.len(),
        );
        actions.push(Action::Protocol(self.protocol.clone()));
        actions.push(Action::Metadata(self.metadata.clone()));
        actions.extend(self.active_files.values().cloned().map(Action::AddFile));
        actions.extend(self.tombstones.values().cloned().map(Action::RemoveFile));
        actions.extend(
            self.transactions
                .values()
                .cloned()
                .map(Action::SetTransaction),
        );
        actions.extend(self.domains.values().cloned().map(Action::DomainMetadata));
        actions
    }
}

/// Accumulator for the replay fold.
#[derive(Debug, Default)]
struct ReplayBuilder {
    active_files: HashMap<String, AddFile>,
    tombstones: HashMap<String, RemoveFile>,
    transactions: HashMap<String, SetTransaction>,
    domains: HashMap<String, DomainMetadata>,
    cdc_files: HashMap<String, AddCdcFile>,
    protocol: Option<Protocol>,
    metadata: Option<TableMetadata>,
}

impl ReplayBuilder {
    fn apply(&mut self, version: Version, action: Action) {
        match action {
            Action::AddFile(add) => {
                let key = crate::actions::canonical_path(&add.path);
                trace!(version, path = %key, "file added");
                self.tombstones.remove(&key);
                self.active_files.insert(key, add);
            }
            Action::RemoveFile(remove) => {
                let key = crate::actions::canonical_path(&remove.path);
                trace!(version, path = %key, "file removed");
                // A remove for a never-active path is tolerated: the
                // add may live in a part of the log we did not see.
                self.active_files.remove(&key);
                self.tombstones.insert(key, remove);
            }
            Action::AddCdcFile(cdc) => {
                let key = crate::actions::canonical_path(&cdc.path);
                self.cdc_files.insert(key, cdc);
            }
            Action::SetTransaction(txn) => {
                self.transactions.insert(txn.app_id.clone(), txn);
            }
            Action::DomainMetadata(domain) => {
                self.domains.insert(domain.domain.clone(), domain);
            }
            Action::Protocol(protocol) => self.protocol = Some(protocol),
            Action::Metadata(metadata) => self.metadata = Some(metadata),
        }
    }

    /// Merge a partition's keyed state into this builder. Key spaces
    /// of distinct partitions are disjoint, so this is a plain union.
    fn absorb(&mut self, other: ReplayBuilder) {
        self.active_files.extend(other.active_files);
        self.tombstones.extend(other.tombstones);
        self.transactions.extend(other.transactions);
        self.domains.extend(other.domains);
        self.cdc_files.extend(other.cdc_files);
    }

    fn finish(mut self, now_ms: i64) -> Result<TableState, ReplayError> {
        let protocol = self.protocol.take().ok_or(ReplayError::MissingProtocol)?;
        let metadata = self.metadata.take().ok_or(ReplayError::MissingMetadata)?;

        // Tombstone expiry keeps checkpoints bounded under churn.
        let tombstone_cutoff = now_ms - metadata.tombstone_retention_millis();
        let before = self.tombstones.len();
        self.tombstones
            .retain(|_, t| t.deletion_timestamp.unwrap_or(0) >= tombstone_cutoff);
        let expired_tombstones = before - self.tombstones.len();

        let mut expired_txns = 0;
        if let Some(retention) = metadata.txn_retention_millis() {
            let cutoff = now_ms - retention;
            let before = self.transactions.len();
            self.transactions
                .retain(|_, t| t.last_updated.map_or(true, |ts| ts >= cutoff));
            expired_txns = before - self.transactions.len();
        }

        // Domains whose latest record is a removal are gone.
        self.domains.retain(|_, d| !d.removed);

        debug!(
            active_files = self.active_files.len(),
            tombstones = self.tombstones.len(),
            expired_tombstones,
            expired_txns,
            transactions = self.transactions.len(),
            domains = self.domains.len(),
            "replay complete"
        );

        Ok(TableState {
            active_files: self.active_files,
            tombstones: self.tombstones,
            transactions: self.transactions,
            domains: self.domains,
            cdc_files: self.cdc_files,
            protocol,
            metadata,
        })
    }
}

/// Fold an ordered action stream into the reconstructed table state.
///
/// Actions must arrive in non-decreasing version order; checkpoint
/// content counts as the earliest versions. `now_ms` anchors the
/// retention-based expiry of tombstones and transaction watermarks.
///
/// This is the *only* supported way to derive table state.
pub fn reconstruct(
    actions: impl IntoIterator<Item = (Version, Action)>,
    now_ms: i64,
) -> Result<TableState, ReplayError> {
    let mut builder = ReplayBuilder::default();
    for (version, action) in actions {
        builder.apply(version, action);
    }
    builder.finish(now_ms)
}

/// Partitioned variant of [`reconstruct`].
///
/// Hash-partitions keyed actions by dedup key, folds each partition
/// independently, then merges. Per-key version order is preserved
/// because a key always lands in the same partition and the input is
/// already ordered. The result is identical to the single-pass fold.
pub fn reconstruct_partitioned(
    actions: impl IntoIterator<Item = (Version, Action)>,
    now_ms: i64,
    partitions: usize,
) -> Result<TableState, ReplayError> {
    let partitions = partitions.max(1);
    let mut keyed: Vec<Vec<(Version, Action)>> = (0..partitions).map(|_| Vec::new()).collect();
    let mut global = ReplayBuilder::default();

    for (version, action) in actions {
        match action.dedup_key() {
            DedupKey::Global => global.apply(version, action),
            key => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                let bucket = (hasher.finish() as usize) % partitions;
                keyed[bucket].push((version, action));
            }
        }
    }

    for bucket in keyed {
        let mut builder = ReplayBuilder::default();
        for (version, action) in bucket {
            builder.apply(version, action);
        }
        global.absorb(builder);
    }
    global.finish(now_ms)
}

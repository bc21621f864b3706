// Snapshot Façade
//
// An immutable value combining a version, a resolved log segment and
// the reconstructed state derived from it. State is computed at most
// once, on first access, and cached for the snapshot's lifetime;
// concurrent first readers coordinate on the cell instead of
// duplicating the fold.

use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::actions::{AddFile, DomainMetadata, Protocol, RemoveFile, TableMetadata};
use crate::log::{LogSegment, Version};
use crate::replay::{reconstruct, ReplayError, TableState};
use crate::schema::Schema;

/// Summary checksum a checkpoint writer may record alongside a
/// version, validated against the reconstructed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotChecksum {
    pub num_files: u64,
    pub total_file_size: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error(
        "checksum mismatch: expected {expected_files} files / {expected_bytes} bytes, \
         reconstructed {actual_files} files / {actual_bytes} bytes"
    )]
    ChecksumMismatch {
        expected_files: u64,
        expected_bytes: i64,
        actual_files: u64,
        actual_bytes: i64,
    },
}

/// A table at a single version.
///
/// Construction is cheap; the replay fold runs lazily on the first
/// state query. Snapshot lifetime and eviction are the caller's
/// concern.
#[derive(Debug)]
pub struct Snapshot {
    version: Version,
    segment: LogSegment,
    reconstruction_time: Option<i64>,
    checksum: Option<SnapshotChecksum>,
    state: OnceCell<TableState>,
}

fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Snapshot {
    pub fn new(version: Version, segment: LogSegment) -> Self {
        Self {
            version,
            segment,
            reconstruction_time: None,
            checksum: None,
            state: OnceCell::new(),
        }
    }

    /// Pin the timestamp retention expiry is anchored to, instead of
    /// the wall clock at first access. Replay becomes fully
    /// deterministic; used by tests and offline tooling.
    pub fn with_reconstruction_time(mut self, now_ms: i64) -> Self {
        self.reconstruction_time = Some(now_ms);
        self
    }

    pub fn with_checksum(mut self, checksum: SnapshotChecksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn checksum(&self) -> Option<SnapshotChecksum> {
        self.checksum
    }

    /// The reconstructed state at this version.
    ///
    /// First call runs the replay fold; all later (and concurrent)
    /// calls share that single computation. A replay failure is
    /// returned to every caller; no partial state is ever cached.
    pub fn state(&self) -> Result<&TableState, SnapshotError> {
        self.state.get_or_try_init(|| {
            let span = info_span!("reconstruct", version = self.version);
            let _guard = span.enter();
            let now = self.reconstruction_time.unwrap_or_else(current_time_millis);
            let actions = self.segment.actions().map(|(v, a)| (v, a.clone()));
            reconstruct(actions, now).map_err(SnapshotError::from)
        })
    }

    pub fn protocol(&self) -> Result<&Protocol, SnapshotError> {
        Ok(&self.state()?.protocol)
    }

    pub fn metadata(&self) -> Result<&TableMetadata, SnapshotError> {
        Ok(&self.state()?.metadata)
    }

    /// The annotated schema at this version.
    pub fn schema(&self) -> Result<&Schema, SnapshotError> {
        Ok(&self.metadata()?.schema)
    }

    /// The pure logical schema, with mapping annotations stripped.
    /// This is what external readers should surface.
    pub fn logical_schema(&self) -> Result<Schema, SnapshotError> {
        Ok(self.schema()?.strip_mapping_metadata())
    }

    /// Live data files at this version.
    pub fn files(&self) -> Result<impl Iterator<Item = &AddFile>, SnapshotError> {
        Ok(self.state()?.active_files.values())
    }

    /// Unexpired tombstones, for vacuum-style GC (performed externally).
    pub fn tombstones(&self) -> Result<impl Iterator<Item = &RemoveFile>, SnapshotError> {
        Ok(self.state()?.tombstones.values())
    }

    pub fn transaction_version(&self, app_id: &str) -> Result<Option<i64>, SnapshotError> {
        Ok(self.state()?.transaction_version(app_id))
    }

    pub fn domain_metadata(&self, domain: &str) -> Result<Option<&DomainMetadata>, SnapshotError> {
        Ok(self.state()?.domains.get(domain))
    }

    /// Compare the recorded checksum, if any, against the
    /// reconstructed state.
    pub fn validate_checksum(&self) -> Result<(), SnapshotError> {
        let Some(expected) = self.checksum else {
            return Ok(());
        };
        let state = self.state()?;
        let actual_files = state.num_files() as u64;
        let actual_bytes = state.total_file_size();
        if expected.num_files != actual_files || expected.total_file_size != actual_bytes {
            return Err(SnapshotError::ChecksumMismatch {
                expected_files: expected.num_files,
                expected_bytes: expected.total_file_size,
                actual_files,
                actual_bytes,
            });
        }
        Ok(())
    }
}

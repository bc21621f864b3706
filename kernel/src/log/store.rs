// Log Storage Abstraction
//
// Defines the contract for resolving log segments from durable
// storage. Implementations may read object stores, local disk,
// databases, etc.
//
// This module defines *interfaces only*.

use super::{LogError, LogSegment, Version};

/// Storage backend for the transaction log.
///
/// Properties required from implementations:
/// - Append-only
/// - Ordered
/// - Durable
///
/// Implementations MUST NOT:
/// - Reorder actions within a commit
/// - Mutate committed actions
/// - Return segments with version gaps
pub trait LogStore: Send + Sync {
    /// Resolve the segment (checkpoint + ordered deltas) that
    /// reconstructs the table at `version`.
    fn read_segment(&self, version: Version) -> Result<LogSegment, LogError>;

    /// The latest committed version, if the table exists.
    fn latest_version(&self) -> Result<Option<Version>, LogError>;
}

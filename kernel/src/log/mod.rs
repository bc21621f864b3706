// Transaction Log Model
//
// Versioned commits and resolved log segments. A segment is the unit
// replay consumes: an optional checkpoint (state folded at or before
// the segment's base version) followed by contiguous delta commits.

use serde::{Deserialize, Serialize};

use crate::actions::Action;

pub mod store;

/// Logical version of a table.
pub type Version = u64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: Version, actual: Version },
}

/// One delta file's worth of actions, committed at a single version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub version: Version,
    pub actions: Vec<Action>,
}

/// Checkpoint payload: already-folded state materialized as actions,
/// counting as content at or before `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: Version,
    pub actions: Vec<Action>,
}

/// A resolved slice of the log: checkpoint plus ordered delta commits.
///
/// Segment resolution (which files make up a version) is the caller's
/// concern; this type only enforces the ordering replay depends on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSegment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    commits: Vec<Commit>,
}

impl LogSegment {
    /// Segment for a table with no checkpoint, starting at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Segment seeded by a checkpoint.
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: Some(checkpoint),
            commits: Vec::new(),
        }
    }

    /// Version this segment reconstructs to, if it holds anything.
    pub fn version(&self) -> Option<Version> {
        self.commits
            .last()
            .map(|c| c.version)
            .or_else(|| self.checkpoint.as_ref().map(|cp| cp.version))
    }

    fn expected_next(&self) -> Version {
        match self.version() {
            Some(v) => v + 1,
            None => 0,
        }
    }

    /// Append the next delta commit.
    ///
    /// Commits must be contiguous: `version == last + 1` (or the
    /// checkpoint version + 1 for the first commit).
    pub fn append(&mut self, commit: Commit) -> Result<(), LogError> {
        let expected = self.expected_next();
        if commit.version != expected {
            return Err(LogError::VersionConflict {
                expected,
                actual: commit.version,
            });
        }
        self.commits.push(commit);
        Ok(())
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    /// All actions in replay order, each paired with its version.
    /// Checkpoint content comes first, at the checkpoint's version.
    pub fn actions(&self) -> impl Iterator<Item = (Version, &Action)> {
        let checkpoint = self
            .checkpoint
            .iter()
            .flat_map(|cp| cp.actions.iter().map(move |a| (cp.version, a)));
        let deltas = self
            .commits
            .iter()
            .flat_map(|c| c.actions.iter().map(move |a| (c.version, a)));
        checkpoint.chain(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, SetTransaction};

    fn txn(app_id: &str, version: i64) -> Action {
        Action::SetTransaction(SetTransaction {
            app_id: app_id.into(),
            version,
            last_updated: None,
        })
    }

    #[test]
    fn append_enforces_contiguous_versions() {
        let mut segment = LogSegment::new();
        segment
            .append(Commit {
                version: 0,
                actions: vec![txn("a", 1)],
            })
            .unwrap();

        let err = segment
            .append(Commit {
                version: 2,
                actions: vec![],
            })
            .unwrap_err();
        assert_eq!(
            err,
            LogError::VersionConflict {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn first_commit_follows_checkpoint_version() {
        let mut segment = LogSegment::from_checkpoint(Checkpoint {
            version: 9,
            actions: vec![txn("a", 1)],
        });
        assert_eq!(segment.version(), Some(9));

        let err = segment
            .append(Commit {
                version: 9,
                actions: vec![],
            })
            .unwrap_err();
        assert_eq!(
            err,
            LogError::VersionConflict {
                expected: 10,
                actual: 9
            }
        );

        segment
            .append(Commit {
                version: 10,
                actions: vec![txn("a", 2)],
            })
            .unwrap();
        assert_eq!(segment.version(), Some(10));
    }

    #[test]
    fn actions_yield_checkpoint_then_deltas_in_order() {
        let mut segment = LogSegment::from_checkpoint(Checkpoint {
            version: 3,
            actions: vec![txn("a", 1), txn("b", 1)],
        });
        segment
            .append(Commit {
                version: 4,
                actions: vec![txn("a", 2)],
            })
            .unwrap();

        let versions: Vec<Version> = segment.actions().map(|(v, _)| v).collect();
        assert_eq!(versions, vec![3, 3, 4]);
    }
}

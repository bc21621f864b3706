// Pre-Commit Guard Framework
//
// Guards are pure rules evaluated against a proposed commit before it
// is accepted. Violations are detected *before* anything is written.
// The optimistic commit loop calls this from every attempt, so guards
// must be safe to re-run.

use tracing::debug;

use crate::actions::{Action, Protocol, TableMetadata};
use crate::mapping;

/// Everything a guard may inspect about a proposed commit.
#[derive(Debug, Clone, Copy)]
pub struct CommitContext<'a> {
    /// Protocol in effect at the transaction's base version.
    pub protocol: &'a Protocol,
    /// Metadata in effect at the transaction's base version.
    pub metadata: &'a TableMetadata,
    /// Metadata the commit proposes, if it changes any.
    pub proposed_metadata: Option<&'a TableMetadata>,
    /// Actions the commit proposes to write.
    pub actions: &'a [Action],
}

/// Result of guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all commit guards.
///
/// Guards must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait CommitGuard: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &CommitContext<'_>) -> GuardResult;
}

/// Returned when a guard rejects a commit.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("commit guard `{guard}` rejected the commit: {reason}")]
pub struct GuardViolation {
    pub guard: &'static str,
    pub reason: String,
}

/// Engine that evaluates a set of guards against a proposed commit.
#[derive(Default)]
pub struct GuardEngine {
    guards: Vec<Box<dyn CommitGuard>>,
}

impl GuardEngine {
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    /// Engine carrying the built-in guards: column mapping metadata
    /// verification and the change-feed compatibility gate.
    pub fn with_default_guards() -> Self {
        let mut engine = Self::new();
        engine.register(ColumnMappingGuard);
        engine.register(CdfCompatibilityGuard);
        engine
    }

    pub fn register<G: CommitGuard + 'static>(&mut self, guard: G) {
        self.guards.push(Box::new(guard));
    }

    /// Evaluate all guards. Stops at the first failure.
    pub fn evaluate(&self, ctx: &CommitContext<'_>) -> Result<(), GuardViolation> {
        for guard in &self.guards {
            match guard.validate(ctx) {
                GuardResult::Pass => continue,
                GuardResult::Fail(reason) => {
                    debug!(guard = guard.name(), %reason, "commit rejected");
                    return Err(GuardViolation {
                        guard: guard.name(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Rejects illegal column-mapping metadata transitions.
pub struct ColumnMappingGuard;

impl CommitGuard for ColumnMappingGuard {
    fn name(&self) -> &'static str {
        "column-mapping-metadata"
    }

    fn validate(&self, ctx: &CommitContext<'_>) -> GuardResult {
        let Some(proposed) = ctx.proposed_metadata else {
            return GuardResult::Pass;
        };
        match mapping::verify_metadata_change(ctx.metadata, proposed, ctx.protocol) {
            Ok(()) => GuardResult::Pass,
            Err(err) => GuardResult::Fail(err.to_string()),
        }
    }
}

/// Rejects schema changes that would break change-feed readers when
/// committed together with file content.
pub struct CdfCompatibilityGuard;

impl CommitGuard for CdfCompatibilityGuard {
    fn name(&self) -> &'static str {
        "cdf-compatibility"
    }

    fn validate(&self, ctx: &CommitContext<'_>) -> GuardResult {
        let Some(proposed) = ctx.proposed_metadata else {
            return GuardResult::Pass;
        };
        match mapping::check_cdf_compatibility(ctx.metadata, proposed, ctx.actions) {
            Ok(()) => GuardResult::Pass,
            Err(err) => GuardResult::Fail(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RemoveFile;
    use crate::mapping::{CDF_ENABLED_KEY, COLUMN_MAPPING_MODE_KEY, MAX_COLUMN_ID_KEY};
    use crate::schema::{Field, PrimitiveType, Schema};

    fn schema(fields: &[(&str, i64, &str)]) -> Schema {
        let mut s = Schema::empty();
        for (logical, id, physical) in fields {
            s.add_root(
                Field::primitive(*logical, PrimitiveType::Integer)
                    .with_id(*id)
                    .with_physical_name(*physical),
            );
        }
        s
    }

    fn cdf_metadata(fields: &[(&str, i64, &str)]) -> TableMetadata {
        let mut meta = TableMetadata::new(schema(fields));
        meta.configuration = [
            (COLUMN_MAPPING_MODE_KEY, "name"),
            (MAX_COLUMN_ID_KEY, "2"),
            (CDF_ENABLED_KEY, "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        meta
    }

    fn remove_action() -> Action {
        Action::RemoveFile(RemoveFile {
            path: "f.parquet".into(),
            deletion_timestamp: Some(1),
            data_change: true,
            extended_file_metadata: None,
            partition_values: None,
            size: None,
        })
    }

    #[test]
    fn commit_without_metadata_change_passes() {
        let protocol = Protocol::new(2, 5);
        let metadata = cdf_metadata(&[("a", 1, "pa"), ("b", 2, "pb")]);
        let actions = vec![remove_action()];

        let engine = GuardEngine::with_default_guards();
        engine
            .evaluate(&CommitContext {
                protocol: &protocol,
                metadata: &metadata,
                proposed_metadata: None,
                actions: &actions,
            })
            .unwrap();
    }

    #[test]
    fn violation_names_the_guard() {
        let protocol = Protocol::new(2, 5);
        let metadata = cdf_metadata(&[("a", 1, "pa"), ("b", 2, "pb")]);
        // Rename b -> c committed together with a file removal.
        let proposed = cdf_metadata(&[("a", 1, "pa"), ("c", 2, "pb")]);
        let actions = vec![remove_action()];

        let engine = GuardEngine::with_default_guards();
        let err = engine
            .evaluate(&CommitContext {
                protocol: &protocol,
                metadata: &metadata,
                proposed_metadata: Some(&proposed),
                actions: &actions,
            })
            .unwrap_err();
        assert_eq!(err.guard, "cdf-compatibility");

        // The same rename with no file actions is allowed.
        engine
            .evaluate(&CommitContext {
                protocol: &protocol,
                metadata: &metadata,
                proposed_metadata: Some(&proposed),
                actions: &[],
            })
            .unwrap();
    }

    #[test]
    fn custom_guards_run_after_builtins() {
        struct NoEmptyCommits;
        impl CommitGuard for NoEmptyCommits {
            fn name(&self) -> &'static str {
                "no-empty-commits"
            }
            fn validate(&self, ctx: &CommitContext<'_>) -> GuardResult {
                if ctx.actions.is_empty() && ctx.proposed_metadata.is_none() {
                    GuardResult::Fail("commit carries no actions".into())
                } else {
                    GuardResult::Pass
                }
            }
        }

        let protocol = Protocol::new(2, 5);
        let metadata = cdf_metadata(&[("a", 1, "pa")]);

        let mut engine = GuardEngine::with_default_guards();
        engine.register(NoEmptyCommits);

        let err = engine
            .evaluate(&CommitContext {
                protocol: &protocol,
                metadata: &metadata,
                proposed_metadata: None,
                actions: &[],
            })
            .unwrap_err();
        assert!(err.to_string().contains("no-empty-commits"));
    }
}

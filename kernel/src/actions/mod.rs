// Action Model
//
// Tagged records forming the vocabulary of the transaction log.
// Every change to a table is expressed as an ordered sequence of
// these immutable actions; replay folds them back into state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Schema;

/// Deletion vector descriptor attached to a data file.
///
/// Carried opaquely through replay; interpreting the vector is the
/// reader's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionVector {
    pub storage_type: String,
    pub path_or_inline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
    pub size_in_bytes: i32,
    pub cardinality: i64,
}

/// A data file added to the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFile {
    pub path: String,
    #[serde(default)]
    pub partition_values: HashMap<String, String>,
    pub size: i64,
    pub modification_time: i64,
    pub data_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_vector: Option<DeletionVector>,
}

/// A data file removed from the table.
///
/// Retained as a tombstone for a bounded period after removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    pub data_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_file_metadata: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// A change-data file. Not part of table content; it only feeds the
/// change feed and never interacts with add/remove reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCdcFile {
    pub path: String,
    #[serde(default)]
    pub partition_values: HashMap<String, String>,
    pub size: i64,
}

/// Table metadata: schema, partitioning and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Schema,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl TableMetadata {
    /// Metadata for a new table with the given schema and no configuration.
    pub fn new(schema: Schema) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            description: None,
            schema,
            partition_columns: Vec::new(),
            configuration: HashMap::new(),
            created_time: None,
        }
    }
}

/// Reader/writer version requirements for the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<String>>,
}

impl Protocol {
    pub fn new(min_reader_version: i32, min_writer_version: i32) -> Self {
        Self {
            min_reader_version,
            min_writer_version,
            reader_features: None,
            writer_features: None,
        }
    }
}

/// Per-application transaction watermark, used by idempotent writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTransaction {
    pub app_id: String,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

/// Named metadata domain owned by a single writer feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainMetadata {
    pub domain: String,
    pub configuration: String,
    pub removed: bool,
}

/// One immutable record in the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    AddFile(AddFile),
    RemoveFile(RemoveFile),
    AddCdcFile(AddCdcFile),
    Metadata(TableMetadata),
    Protocol(Protocol),
    SetTransaction(SetTransaction),
    DomainMetadata(DomainMetadata),
}

/// Key under which replay reconciles actions of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Canonical file path (add/remove/cdc).
    File(String),
    /// Application id of a transaction watermark.
    Transaction(String),
    /// Domain name.
    Domain(String),
    /// No per-record key; ordered only by version (protocol, metadata).
    Global,
}

impl Action {
    /// The key replay uses to reconcile this action against earlier ones.
    pub fn dedup_key(&self) -> DedupKey {
        match self {
            Action::AddFile(a) => DedupKey::File(canonical_path(&a.path)),
            Action::RemoveFile(r) => DedupKey::File(canonical_path(&r.path)),
            Action::AddCdcFile(c) => DedupKey::File(canonical_path(&c.path)),
            Action::SetTransaction(t) => DedupKey::Transaction(t.app_id.clone()),
            Action::DomainMetadata(d) => DedupKey::Domain(d.domain.clone()),
            Action::Metadata(_) | Action::Protocol(_) => DedupKey::Global,
        }
    }

    /// True for actions describing file content (data or change files).
    pub fn is_file_action(&self) -> bool {
        matches!(
            self,
            Action::AddFile(_) | Action::RemoveFile(_) | Action::AddCdcFile(_)
        )
    }
}

/// Normalize a file path for use as a dedup key.
///
/// Strips a leading `./` and collapses repeated separators so that
/// textual variants of the same relative path reconcile.
pub fn canonical_path(path: &str) -> String {
    let trimmed = path.strip_prefix("./").unwrap_or(path);
    let mut out = String::with_capacity(trimmed.len());
    let mut prev_sep = false;
    for ch in trimmed.chars() {
        if ch == '/' {
            if !prev_sep {
                out.push(ch);
            }
            prev_sep = true;
        } else {
            out.push(ch);
            prev_sep = false;
        }
    }
    out
}

// Column Mapping Engine
//
// Assigns and validates stable column ids and physical names,
// classifies schema transitions by physical identity, and gates which
// metadata and protocol transitions are legal. Everything here is a
// pure function over metadata; the optimistic commit loop may call it
// repeatedly across retries.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use tracing::debug;
use uuid::Uuid;

use crate::actions::{Action, Protocol, TableMetadata};
use crate::schema::Schema;

/// Configuration key holding the column mapping mode.
pub const COLUMN_MAPPING_MODE_KEY: &str = "columnMapping.mode";

/// Configuration key holding the highest column id ever assigned.
/// System-owned: writers never set this by hand.
pub const MAX_COLUMN_ID_KEY: &str = "columnMapping.maxColumnId";

/// Configuration key enabling the change data feed.
pub const CDF_ENABLED_KEY: &str = "changeDataFeed.enabled";

/// Minimum reader protocol version required for column mapping.
pub const MIN_READER_VERSION_FOR_MAPPING: i32 = 2;

/// Minimum writer protocol version required for column mapping.
pub const MIN_WRITER_VERSION_FOR_MAPPING: i32 = 5;

/// Policy governing whether and how physical column identity is
/// tracked, stored in the table configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnMappingMode {
    #[default]
    None,
    Id,
    Name,
}

impl ColumnMappingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnMappingMode::None => "none",
            ColumnMappingMode::Id => "id",
            ColumnMappingMode::Name => "name",
        }
    }
}

impl fmt::Display for ColumnMappingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnMappingMode {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ColumnMappingMode::None),
            "id" => Ok(ColumnMappingMode::Id),
            "name" => Ok(ColumnMappingMode::Name),
            other => Err(MappingError::UnknownMode(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("unknown column mapping mode `{0}`")]
    UnknownMode(String),

    #[error("changing column mapping mode from `{from}` to `{to}` is not supported")]
    UnsupportedModeChange {
        from: ColumnMappingMode,
        to: ColumnMappingMode,
    },

    #[error(
        "enabling column mapping requires protocol ({required_reader}, {required_writer}), \
         table has ({reader}, {writer})"
    )]
    ProtocolTooOld {
        required_reader: i32,
        required_writer: i32,
        reader: i32,
        writer: i32,
    },

    #[error("column mapping cannot be enabled in the same commit as a schema change")]
    EnableWithSchemaChange,

    #[error("duplicate column id {id} (second occurrence at `{path}`)")]
    DuplicateColumnId { id: i64, path: String },

    #[error("duplicate physical name at `{path}`")]
    DuplicatePhysicalName { path: String },

    #[error("`columnMapping.maxColumnId` is not set")]
    MaxColumnIdNotSet,

    #[error("`columnMapping.maxColumnId` is not set correctly: stored {stored}, required at least {required}")]
    MaxColumnIdNotSetCorrectly { stored: i64, required: i64 },

    #[error("`columnMapping.maxColumnId` holds a non-integer value `{0}`")]
    InvalidMaxColumnId(String),

    #[error("streaming reads from the change feed cannot survive a {change:?}; \
             commit the schema change separately from data changes")]
    CdfIncompatibleSchemaChange { change: SchemaChange },
}

impl TableMetadata {
    /// The table's column mapping mode. Absent configuration means
    /// mapping is disabled.
    pub fn column_mapping_mode(&self) -> Result<ColumnMappingMode, MappingError> {
        match self.configuration.get(COLUMN_MAPPING_MODE_KEY) {
            Some(raw) => raw.parse(),
            None => Ok(ColumnMappingMode::None),
        }
    }

    /// The stored max column id, if the key is present.
    pub fn stored_max_column_id(&self) -> Result<Option<i64>, MappingError> {
        match self.configuration.get(MAX_COLUMN_ID_KEY) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| MappingError::InvalidMaxColumnId(raw.clone())),
            None => Ok(None),
        }
    }

    /// Whether the change data feed is enabled on this table.
    pub fn cdf_enabled(&self) -> bool {
        self.configuration
            .get(CDF_ENABLED_KEY)
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

/// Whether the protocol is recent enough to carry column mapping.
pub fn supports_column_mapping(protocol: &Protocol) -> bool {
    protocol.min_reader_version >= MIN_READER_VERSION_FOR_MAPPING
        && protocol.min_writer_version >= MIN_WRITER_VERSION_FOR_MAPPING
}

/// The maximum column id present anywhere in the schema tree, 0 when
/// no field carries one (including the empty schema).
pub fn find_max_column_id(schema: &Schema) -> i64 {
    schema
        .pre_order()
        .into_iter()
        .filter_map(|id| schema.field(id).id)
        .max()
        .unwrap_or(0)
}

/// Assign ids and physical names to every field that lacks them.
///
/// Traversal is pre-order (parent before children, siblings in
/// declared order); ids continue from `current_max_id`. Physical names
/// are opaque `col-<uuid>` tokens, never derived from the logical
/// name, so a later rename cannot disturb them. Fields already
/// carrying an annotation keep it.
///
/// Returns the annotated schema and the new max id.
pub fn assign_ids_and_physical_names(schema: &Schema, current_max_id: i64) -> (Schema, i64) {
    let mut out = schema.clone();
    let mut max_id = current_max_id;
    for field_id in out.pre_order() {
        let field = out.field_mut(field_id);
        if field.id.is_none() {
            max_id += 1;
            field.id = Some(max_id);
        }
        if field.physical_name.is_none() {
            field.physical_name = Some(format!("col-{}", Uuid::new_v4()));
        }
    }
    debug!(fields = out.len(), max_id, "assigned column mapping metadata");
    (out, max_id)
}

/// Index of every field by its full physical path: the sequence of
/// physical names from root. Values carry the field's id and logical
/// name, which is all identity comparison needs.
fn physical_index(schema: &Schema) -> HashMap<Vec<String>, (Option<i64>, String)> {
    let mut index = HashMap::with_capacity(schema.len());
    schema.walk_physical_paths(|field_id, path| {
        let field = schema.field(field_id);
        index.insert(path.to_vec(), (field.id, field.logical_name.clone()));
    });
    index
}

fn display_path(path: &[String]) -> String {
    path.join(".")
}

/// Fail if any two fields share a column id or a full physical path.
///
/// Paths are compared as segment sequences, so a logical name that
/// merely contains a separator character never collides with a
/// genuinely nested path.
pub fn validate_uniqueness(schema: &Schema) -> Result<(), MappingError> {
    let mut seen_ids: HashMap<i64, Vec<String>> = HashMap::new();
    let mut seen_paths: HashSet<Vec<String>> = HashSet::new();
    let mut error = None;

    schema.walk_physical_paths(|field_id, path| {
        if error.is_some() {
            return;
        }
        let field = schema.field(field_id);
        if let Some(id) = field.id {
            if seen_ids.insert(id, path.to_vec()).is_some() {
                error = Some(MappingError::DuplicateColumnId {
                    id,
                    path: display_path(path),
                });
                return;
            }
        }
        if !seen_paths.insert(path.to_vec()) {
            error = Some(MappingError::DuplicatePhysicalName {
                path: display_path(path),
            });
        }
    });

    match error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Classification of a schema transition by physical identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChange {
    NoChange,
    /// Only new physical identities appeared.
    AddOnly,
    /// At least one prior physical identity is gone (or was reassigned
    /// a different id, which amounts to the same thing).
    DropOccurred,
    /// At least one surviving physical identity changed logical name.
    RenameOccurred,
}

/// Compare two schemas by physical identity.
///
/// Drop and rename both outrank add-only; drop outranks rename when
/// both occur across different paths.
pub fn classify_schema_change(old: &Schema, new: &Schema) -> SchemaChange {
    let old_index = physical_index(old);
    let new_index = physical_index(new);

    let mut dropped = false;
    let mut renamed = false;

    for (path, (old_id, old_logical)) in &old_index {
        match new_index.get(path) {
            None => dropped = true,
            Some((new_id, _)) if new_id != old_id => dropped = true,
            Some((_, new_logical)) if new_logical != old_logical => renamed = true,
            Some(_) => {}
        }
    }

    if dropped {
        SchemaChange::DropOccurred
    } else if renamed {
        SchemaChange::RenameOccurred
    } else if new_index.keys().any(|path| !old_index.contains_key(path)) {
        SchemaChange::AddOnly
    } else {
        SchemaChange::NoChange
    }
}

/// True iff every physical identity of `old` survives in `new` with
/// the same id. Added columns never break this check; it is
/// deliberately one-sided, unlike [`classify_schema_change`].
pub fn has_no_column_mapping_schema_changes(new: &TableMetadata, old: &TableMetadata) -> bool {
    let old_index = physical_index(&old.schema);
    let new_index = physical_index(&new.schema);
    old_index
        .iter()
        .all(|(path, (old_id, _))| match new_index.get(path) {
            Some((new_id, _)) => new_id == old_id,
            None => false,
        })
}

/// Whether the transition from `current` to `new` drops a column.
pub fn is_drop_column_operation(new: &TableMetadata, current: &TableMetadata) -> bool {
    classify_schema_change(&current.schema, &new.schema) == SchemaChange::DropOccurred
}

/// Whether the transition from `current` to `new` renames a column.
pub fn is_rename_column_operation(new: &TableMetadata, current: &TableMetadata) -> bool {
    classify_schema_change(&current.schema, &new.schema) == SchemaChange::RenameOccurred
}

/// Validate a proposed metadata change against the current metadata
/// and protocol. Called before any metadata change is accepted.
///
/// The only legal mode transitions are no-ops and enabling mapping on
/// an unmapped table. Enabling additionally requires a recent enough
/// protocol and must not be combined with any logical schema change.
pub fn verify_metadata_change(
    old: &TableMetadata,
    new: &TableMetadata,
    protocol: &Protocol,
) -> Result<(), MappingError> {
    let old_mode = old.column_mapping_mode()?;
    let new_mode = new.column_mapping_mode()?;

    match (old_mode, new_mode) {
        (a, b) if a == b => {}
        (ColumnMappingMode::None, ColumnMappingMode::Id | ColumnMappingMode::Name) => {
            if !supports_column_mapping(protocol) {
                return Err(MappingError::ProtocolTooOld {
                    required_reader: MIN_READER_VERSION_FOR_MAPPING,
                    required_writer: MIN_WRITER_VERSION_FOR_MAPPING,
                    reader: protocol.min_reader_version,
                    writer: protocol.min_writer_version,
                });
            }
            if !old.schema.logical_structure_eq(&new.schema) {
                return Err(MappingError::EnableWithSchemaChange);
            }
        }
        (from, to) => return Err(MappingError::UnsupportedModeChange { from, to }),
    }

    if new_mode != ColumnMappingMode::None {
        let old_stored = old.stored_max_column_id()?.unwrap_or(0);
        let required = find_max_column_id(&new.schema).max(old_stored);
        match new.stored_max_column_id()? {
            None => return Err(MappingError::MaxColumnIdNotSet),
            Some(stored) if stored < required => {
                return Err(MappingError::MaxColumnIdNotSetCorrectly { stored, required })
            }
            Some(_) => {}
        }
        validate_uniqueness(&new.schema)?;
    }

    debug!(%old_mode, %new_mode, "metadata change verified");
    Ok(())
}

/// Reject a commit that would break downstream change-feed readers.
///
/// The gate conditions on the base metadata only: readers can only be
/// tailing a feed the table already had, so a commit that enables the
/// feed is free to reshape the schema in the same transaction. A drop
/// or rename committed together with file-content actions is fatal
/// for that commit attempt; the same metadata change with no file
/// actions is always allowed. The caller may retry with a split
/// commit, but that split is not performed here.
pub fn check_cdf_compatibility(
    old: &TableMetadata,
    new: &TableMetadata,
    actions: &[Action],
) -> Result<(), MappingError> {
    if !old.cdf_enabled() {
        return Ok(());
    }
    if !actions.iter().any(Action::is_file_action) {
        return Ok(());
    }
    match classify_schema_change(&old.schema, &new.schema) {
        change @ (SchemaChange::DropOccurred | SchemaChange::RenameOccurred) => {
            Err(MappingError::CdfIncompatibleSchemaChange { change })
        }
        SchemaChange::NoChange | SchemaChange::AddOnly => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RemoveFile;
    use crate::schema::{Field, PrimitiveType, Schema};

    /// `{a: int (1, pa), b: string (2, pb)}`
    fn base_schema() -> Schema {
        let mut s = Schema::empty();
        s.add_root(
            Field::primitive("a", PrimitiveType::Integer)
                .with_id(1)
                .with_physical_name("pa"),
        );
        s.add_root(
            Field::primitive("b", PrimitiveType::String)
                .with_id(2)
                .with_physical_name("pb"),
        );
        s
    }

    fn metadata_with_schema(schema: Schema, config: &[(&str, &str)]) -> TableMetadata {
        let mut meta = TableMetadata::new(schema);
        meta.configuration = config
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        meta
    }

    fn mapped(schema: Schema, max_id: i64) -> TableMetadata {
        metadata_with_schema(
            schema,
            &[
                (COLUMN_MAPPING_MODE_KEY, "name"),
                (MAX_COLUMN_ID_KEY, &max_id.to_string()),
            ],
        )
    }

    #[test]
    fn max_column_id_of_empty_and_unannotated_schema_is_zero() {
        assert_eq!(find_max_column_id(&Schema::empty()), 0);

        let mut s = Schema::empty();
        s.add_root(Field::primitive("a", PrimitiveType::Integer));
        assert_eq!(find_max_column_id(&s), 0);
    }

    #[test]
    fn max_column_id_sees_nested_fields() {
        let mut s = base_schema();
        let outer = s.add_root(Field::struct_("outer").with_id(3));
        let inner = s.add_child(outer, Field::struct_("inner").with_id(4));
        s.add_child(inner, Field::primitive("leaf", PrimitiveType::Long));
        assert_eq!(find_max_column_id(&s), 4);
    }

    #[test]
    fn assignment_fills_gaps_and_keeps_existing() {
        let mut s = Schema::empty();
        s.add_root(
            Field::primitive("a", PrimitiveType::Integer)
                .with_id(7)
                .with_physical_name("pa"),
        );
        s.add_root(Field::primitive("b", PrimitiveType::String));
        let outer = s.add_root(Field::struct_("outer"));
        s.add_child(outer, Field::primitive("c", PrimitiveType::Long));

        let (annotated, max_id) = assign_ids_and_physical_names(&s, 7);
        assert_eq!(max_id, 10);

        let fields: Vec<_> = annotated
            .pre_order()
            .into_iter()
            .map(|id| annotated.field(id).clone())
            .collect();
        assert_eq!(fields[0].id, Some(7));
        assert_eq!(fields[0].physical_name(), "pa");
        // Pre-order: b, outer, c get 8, 9, 10.
        assert_eq!(fields[1].id, Some(8));
        assert_eq!(fields[2].id, Some(9));
        assert_eq!(fields[3].id, Some(10));
        for field in &fields[1..] {
            assert!(field.physical_name().starts_with("col-"));
        }
    }

    #[test]
    fn freshly_assigned_schema_is_always_unique() {
        let mut s = Schema::empty();
        s.add_root(Field::primitive("a", PrimitiveType::Integer));
        let outer = s.add_root(Field::struct_("outer"));
        s.add_child(outer, Field::primitive("a", PrimitiveType::Integer));

        let (annotated, _) = assign_ids_and_physical_names(&s, 0);
        validate_uniqueness(&annotated).unwrap();
    }

    #[test]
    fn duplicate_id_is_reported_with_offender() {
        let mut s = base_schema();
        s.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(1)
                .with_physical_name("pc"),
        );
        let err = validate_uniqueness(&s).unwrap_err();
        assert_eq!(
            err,
            MappingError::DuplicateColumnId {
                id: 1,
                path: "pc".into()
            }
        );
    }

    #[test]
    fn duplicate_physical_path_is_reported() {
        let mut s = base_schema();
        s.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(3)
                .with_physical_name("pa"),
        );
        let err = validate_uniqueness(&s).unwrap_err();
        assert_eq!(err, MappingError::DuplicatePhysicalName { path: "pa".into() });
    }

    #[test]
    fn dotted_logical_names_are_not_false_duplicates() {
        // `outer.inner` as a flat logical name vs a real nested path:
        // physical identity must keep them apart.
        let mut s = Schema::empty();
        s.add_root(
            Field::primitive("outer.inner", PrimitiveType::String)
                .with_id(1)
                .with_physical_name("outer.inner"),
        );
        let outer = s.add_root(
            Field::struct_("outer")
                .with_id(2)
                .with_physical_name("outer"),
        );
        s.add_child(
            outer,
            Field::primitive("inner", PrimitiveType::String)
                .with_id(3)
                .with_physical_name("inner"),
        );
        validate_uniqueness(&s).unwrap();
    }

    #[test]
    fn identical_schemas_classify_as_no_change() {
        let s = base_schema();
        assert_eq!(classify_schema_change(&s, &s), SchemaChange::NoChange);
    }

    #[test]
    fn pure_addition_classifies_as_add_only() {
        let old = base_schema();
        let mut new = base_schema();
        new.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(3)
                .with_physical_name("pc"),
        );
        assert_eq!(classify_schema_change(&old, &new), SchemaChange::AddOnly);
    }

    #[test]
    fn rename_keeps_physical_identity() {
        // Rename b -> c: same id, same physical name, new logical name.
        let old = base_schema();
        let mut new = Schema::empty();
        new.add_root(
            Field::primitive("a", PrimitiveType::Integer)
                .with_id(1)
                .with_physical_name("pa"),
        );
        new.add_root(
            Field::primitive("c", PrimitiveType::String)
                .with_id(2)
                .with_physical_name("pb"),
        );

        assert_eq!(
            classify_schema_change(&old, &new),
            SchemaChange::RenameOccurred
        );

        let old_meta = mapped(old, 2);
        let new_meta = mapped(new, 2);
        assert!(is_rename_column_operation(&new_meta, &old_meta));
        assert!(!is_drop_column_operation(&new_meta, &old_meta));

        // Logical name changed but no identity vanished.
        assert!(has_no_column_mapping_schema_changes(&new_meta, &old_meta));

        // Now drop c entirely: drop relative to the renamed schema,
        // and the original b identity is gone too.
        let mut dropped = Schema::empty();
        dropped.add_root(
            Field::primitive("a", PrimitiveType::Integer)
                .with_id(1)
                .with_physical_name("pa"),
        );
        let dropped_meta = mapped(dropped, 2);
        assert!(is_drop_column_operation(&dropped_meta, &new_meta));
        let original_meta = mapped(base_schema(), 2);
        assert!(!has_no_column_mapping_schema_changes(
            &dropped_meta,
            &original_meta
        ));
    }

    #[test]
    fn drop_outranks_rename_and_add() {
        // Drop b, rename a -> x, add c, all in one transition.
        let old = base_schema();
        let mut new = Schema::empty();
        new.add_root(
            Field::primitive("x", PrimitiveType::Integer)
                .with_id(1)
                .with_physical_name("pa"),
        );
        new.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(3)
                .with_physical_name("pc"),
        );
        assert_eq!(
            classify_schema_change(&old, &new),
            SchemaChange::DropOccurred
        );
    }

    #[test]
    fn reassigned_id_counts_as_drop_not_rename() {
        // Same physical path, different id: the old identity is gone.
        let old = base_schema();
        let mut new = base_schema();
        let b = new.roots()[1];
        new.field_mut(b).id = Some(9);
        assert_eq!(
            classify_schema_change(&old, &new),
            SchemaChange::DropOccurred
        );
    }

    #[test]
    fn drop_then_same_name_add_is_not_a_rename() {
        // Original {a, b}; add c; drop c; re-add c with a fresh
        // physical identity.
        let original = base_schema();

        let mut with_c = base_schema();
        with_c.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(3)
                .with_physical_name("pc"),
        );

        let mut readded = base_schema();
        readded.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(4)
                .with_physical_name("pc2"),
        );

        // Relative to the pre-drop schema this is a drop, never a
        // rename, even though the logical name came back.
        assert_eq!(
            classify_schema_change(&with_c, &readded),
            SchemaChange::DropOccurred
        );

        // But every identity of the original pre-add schema is intact.
        let original_meta = mapped(original, 2);
        let readded_meta = mapped(readded, 4);
        assert!(has_no_column_mapping_schema_changes(
            &readded_meta,
            &original_meta
        ));
    }

    #[test]
    fn same_mode_transitions_are_no_ops() {
        let protocol = Protocol::new(1, 2);
        let old = metadata_with_schema(base_schema(), &[]);
        let new = metadata_with_schema(base_schema(), &[]);
        verify_metadata_change(&old, &new, &protocol).unwrap();

        let protocol = Protocol::new(2, 5);
        let old = mapped(base_schema(), 2);
        let new = mapped(base_schema(), 2);
        verify_metadata_change(&old, &new, &protocol).unwrap();
    }

    #[test]
    fn enabling_mapping_requires_protocol_support() {
        let old = metadata_with_schema(base_schema(), &[]);
        let new = mapped(base_schema(), 2);

        let err = verify_metadata_change(&old, &new, &Protocol::new(1, 2)).unwrap_err();
        assert!(matches!(err, MappingError::ProtocolTooOld { .. }));

        verify_metadata_change(&old, &new, &Protocol::new(2, 5)).unwrap();
    }

    #[test]
    fn enabling_mapping_forbids_schema_change() {
        let old = metadata_with_schema(base_schema(), &[]);
        let mut changed = base_schema();
        changed.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(3)
                .with_physical_name("pc"),
        );
        let new = mapped(changed, 3);

        let err = verify_metadata_change(&old, &new, &Protocol::new(2, 5)).unwrap_err();
        assert_eq!(err, MappingError::EnableWithSchemaChange);
    }

    #[test]
    fn disabling_or_switching_modes_is_rejected() {
        let protocol = Protocol::new(2, 5);

        let name_meta = mapped(base_schema(), 2);
        let none_meta = metadata_with_schema(base_schema(), &[]);
        let err = verify_metadata_change(&name_meta, &none_meta, &protocol).unwrap_err();
        assert_eq!(
            err,
            MappingError::UnsupportedModeChange {
                from: ColumnMappingMode::Name,
                to: ColumnMappingMode::None,
            }
        );

        let id_meta = metadata_with_schema(
            base_schema(),
            &[(COLUMN_MAPPING_MODE_KEY, "id"), (MAX_COLUMN_ID_KEY, "2")],
        );
        let err = verify_metadata_change(&id_meta, &name_meta, &protocol).unwrap_err();
        assert_eq!(
            err,
            MappingError::UnsupportedModeChange {
                from: ColumnMappingMode::Id,
                to: ColumnMappingMode::Name,
            }
        );
    }

    #[test]
    fn max_id_must_be_present_and_large_enough() {
        let protocol = Protocol::new(2, 5);
        let old = mapped(base_schema(), 2);

        let missing = metadata_with_schema(base_schema(), &[(COLUMN_MAPPING_MODE_KEY, "name")]);
        let err = verify_metadata_change(&old, &missing, &protocol).unwrap_err();
        assert_eq!(err, MappingError::MaxColumnIdNotSet);

        let mut bigger = base_schema();
        bigger.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(5)
                .with_physical_name("pc"),
        );
        let too_low = mapped(bigger, 3);
        let err = verify_metadata_change(&old, &too_low, &protocol).unwrap_err();
        assert_eq!(
            err,
            MappingError::MaxColumnIdNotSetCorrectly {
                stored: 3,
                required: 5
            }
        );
    }

    #[test]
    fn max_id_never_goes_backwards() {
        // Stored max may exceed the schema max (after drops); a new
        // metadata claiming less is corrupt bookkeeping.
        let protocol = Protocol::new(2, 5);
        let old = mapped(base_schema(), 10);
        let new = mapped(base_schema(), 4);
        let err = verify_metadata_change(&old, &new, &protocol).unwrap_err();
        assert_eq!(
            err,
            MappingError::MaxColumnIdNotSetCorrectly {
                stored: 4,
                required: 10
            }
        );
    }

    #[test]
    fn verification_runs_uniqueness_under_mapping() {
        let protocol = Protocol::new(2, 5);
        let old = mapped(base_schema(), 2);
        let mut dup = base_schema();
        dup.add_root(
            Field::primitive("c", PrimitiveType::Long)
                .with_id(2)
                .with_physical_name("pc"),
        );
        let new = mapped(dup, 2);
        let err = verify_metadata_change(&old, &new, &protocol).unwrap_err();
        assert!(matches!(err, MappingError::DuplicateColumnId { .. }));
    }

    #[test]
    fn cdf_gate_rejects_rename_with_file_actions_only() {
        let cdf = |schema: Schema, max: i64| {
            metadata_with_schema(
                schema,
                &[
                    (COLUMN_MAPPING_MODE_KEY, "name"),
                    (MAX_COLUMN_ID_KEY, &max.to_string()),
                    (CDF_ENABLED_KEY, "true"),
                ],
            )
        };
        let old = cdf(base_schema(), 2);

        let mut renamed = Schema::empty();
        renamed.add_root(
            Field::primitive("a", PrimitiveType::Integer)
                .with_id(1)
                .with_physical_name("pa"),
        );
        renamed.add_root(
            Field::primitive("c", PrimitiveType::String)
                .with_id(2)
                .with_physical_name("pb"),
        );
        let new = cdf(renamed, 2);

        let file_actions = vec![Action::RemoveFile(RemoveFile {
            path: "f.parquet".into(),
            deletion_timestamp: Some(1),
            data_change: true,
            extended_file_metadata: None,
            partition_values: None,
            size: None,
        })];

        let err = check_cdf_compatibility(&old, &new, &file_actions).unwrap_err();
        assert_eq!(
            err,
            MappingError::CdfIncompatibleSchemaChange {
                change: SchemaChange::RenameOccurred
            }
        );

        // The identical metadata change with no file actions is fine.
        check_cdf_compatibility(&old, &new, &[]).unwrap();

        // And so is any change when CDF is off.
        let old_no_cdf = mapped(base_schema(), 2);
        let new_no_cdf = mapped(new.schema.clone(), 2);
        check_cdf_compatibility(&old_no_cdf, &new_no_cdf, &file_actions).unwrap();

        // Enabling the feed in the same commit as the rename is fine
        // too: the gate only protects readers of a pre-existing feed.
        check_cdf_compatibility(&old_no_cdf, &new, &file_actions).unwrap();
    }
}

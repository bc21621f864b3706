// Schema Identity Model
//
// Nested field tree where each field optionally carries a stable
// numeric id and a stable physical (storage) name, distinct from its
// logical name. Fields live in an arena with index-based child
// references so annotation-only updates copy cheaply.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Index of a field inside its schema's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(usize);

/// Primitive column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    String,
    Binary,
    Date,
    Timestamp,
}

/// Type of a field: a primitive, or a struct whose members are the
/// field's children in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Primitive(PrimitiveType),
    Struct,
}

/// One field of the schema tree.
///
/// `id` and `physical_name` are the column-mapping annotations; when
/// mapping is disabled the physical name defaults to the logical name.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub logical_name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub id: Option<i64>,
    pub physical_name: Option<String>,
    children: Vec<FieldId>,
}

impl Field {
    pub fn primitive(logical_name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self {
            logical_name: logical_name.into(),
            data_type: DataType::Primitive(ty),
            nullable: true,
            id: None,
            physical_name: None,
            children: Vec::new(),
        }
    }

    pub fn struct_(logical_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            data_type: DataType::Struct,
            nullable: true,
            id: None,
            physical_name: None,
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_physical_name(mut self, name: impl Into<String>) -> Self {
        self.physical_name = Some(name.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Storage-level name: the physical annotation, falling back to the
    /// logical name when mapping never assigned one.
    pub fn physical_name(&self) -> &str {
        self.physical_name.as_deref().unwrap_or(&self.logical_name)
    }

    pub fn children(&self) -> &[FieldId] {
        &self.children
    }
}

/// Arena-backed nested schema.
///
/// Child references are arena indices; traversal order is pre-order
/// (parent before children, siblings in declared order) everywhere.
/// Equality is structural: two schemas compare equal when their trees
/// match field for field, regardless of arena insertion order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    nodes: Vec<Field>,
    roots: Vec<FieldId>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        fn field_eq(a: &Schema, fa: FieldId, b: &Schema, fb: FieldId) -> bool {
            let (fa, fb) = (a.field(fa), b.field(fb));
            fa.logical_name == fb.logical_name
                && fa.data_type == fb.data_type
                && fa.nullable == fb.nullable
                && fa.id == fb.id
                && fa.physical_name == fb.physical_name
                && fa.children.len() == fb.children.len()
                && fa
                    .children
                    .iter()
                    .zip(&fb.children)
                    .all(|(ca, cb)| field_eq(a, *ca, b, *cb))
        }
        self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(&other.roots)
                .all(|(ra, rb)| field_eq(self, *ra, other, *rb))
    }
}

impl Eq for Schema {}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.nodes[id.0]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.nodes[id.0]
    }

    pub fn roots(&self) -> &[FieldId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a top-level field, returning its arena index.
    pub fn add_root(&mut self, field: Field) -> FieldId {
        let id = FieldId(self.nodes.len());
        self.nodes.push(field);
        self.roots.push(id);
        id
    }

    /// Append a child to `parent`, returning the child's arena index.
    pub fn add_child(&mut self, parent: FieldId, field: Field) -> FieldId {
        let id = FieldId(self.nodes.len());
        self.nodes.push(field);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Pre-order traversal of the whole tree.
    pub fn pre_order(&self) -> Vec<FieldId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<FieldId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.field(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Visit every field with its full physical path (sequence of
    /// physical names from root). Paths are kept as segment vectors,
    /// never joined, so separator characters in logical names cannot
    /// collide with nesting.
    pub fn walk_physical_paths(&self, mut visit: impl FnMut(FieldId, &[String])) {
        fn go(
            schema: &Schema,
            id: FieldId,
            path: &mut Vec<String>,
            visit: &mut impl FnMut(FieldId, &[String]),
        ) {
            path.push(schema.field(id).physical_name().to_owned());
            visit(id, path);
            for child in schema.field(id).children() {
                go(schema, *child, path, visit);
            }
            path.pop();
        }
        let mut path = Vec::new();
        for root in &self.roots {
            go(self, *root, &mut path, &mut visit);
        }
    }

    /// Copy of this schema with all mapping annotations removed.
    ///
    /// The projection external consumers see: pure logical structure,
    /// no ids, no physical names.
    pub fn strip_mapping_metadata(&self) -> Schema {
        let mut out = self.clone();
        for field in &mut out.nodes {
            field.id = None;
            field.physical_name = None;
        }
        out
    }

    /// True when the two schemas have identical logical structure:
    /// same names, types, nullability and child shape, ignoring ids
    /// and physical names.
    pub fn logical_structure_eq(&self, other: &Schema) -> bool {
        fn field_eq(a: &Schema, fa: FieldId, b: &Schema, fb: FieldId) -> bool {
            let (fa, fb) = (a.field(fa), b.field(fb));
            fa.logical_name == fb.logical_name
                && fa.data_type == fb.data_type
                && fa.nullable == fb.nullable
                && fa.children.len() == fb.children.len()
                && fa
                    .children
                    .iter()
                    .zip(&fb.children)
                    .all(|(ca, cb)| field_eq(a, *ca, b, *cb))
        }
        self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(&other.roots)
                .all(|(ra, rb)| field_eq(self, *ra, other, *rb))
    }
}

// Serde representation: nested JSON fields, rebuilt into the arena on
// deserialization. The arena layout itself is not part of the format.

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldRepr {
    name: String,
    #[serde(rename = "type")]
    data_type: DataType,
    nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    physical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldRepr>,
}

impl Schema {
    fn to_repr(&self, id: FieldId) -> FieldRepr {
        let field = self.field(id);
        FieldRepr {
            name: field.logical_name.clone(),
            data_type: field.data_type,
            nullable: field.nullable,
            id: field.id,
            physical_name: field.physical_name.clone(),
            fields: field.children.iter().map(|c| self.to_repr(*c)).collect(),
        }
    }

    fn insert_repr(&mut self, parent: Option<FieldId>, repr: FieldRepr) -> Result<(), String> {
        if matches!(repr.data_type, DataType::Primitive(_)) && !repr.fields.is_empty() {
            return Err(format!("primitive field `{}` has children", repr.name));
        }
        let field = Field {
            logical_name: repr.name,
            data_type: repr.data_type,
            nullable: repr.nullable,
            id: repr.id,
            physical_name: repr.physical_name,
            children: Vec::new(),
        };
        let id = match parent {
            Some(p) => self.add_child(p, field),
            None => self.add_root(field),
        };
        for child in repr.fields {
            self.insert_repr(Some(id), child)?;
        }
        Ok(())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let reprs: Vec<FieldRepr> = self.roots.iter().map(|r| self.to_repr(*r)).collect();
        reprs.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let reprs = Vec::<FieldRepr>::deserialize(deserializer)?;
        let mut schema = Schema::empty();
        for repr in reprs {
            schema.insert_repr(None, repr).map_err(DeError::custom)?;
        }
        Ok(schema)
    }
}

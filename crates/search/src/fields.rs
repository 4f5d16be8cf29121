//! Field mapper: external filter field names to storage expressions.
//!
//! The table below is the complete search vocabulary. Anything not listed is
//! rejected, and `spec.*` is rejected outright: the spec payload is opaque.

/// Resource table layout the compiler emits SQL against.
///
/// These names MUST match the `resources` table created by `fleet-persist`.
pub mod columns {
    pub const TABLE: &str = "resources";
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const NAME: &str = "name";
    pub const LABELS: &str = "labels";
    pub const SPEC: &str = "spec";
    pub const GENERATION: &str = "generation";
    pub const STATUS_CONDITIONS: &str = "status_conditions";
    pub const CREATED_TIME: &str = "created_time";
    pub const UPDATED_TIME: &str = "updated_time";
    pub const DELETED_TIME: &str = "deleted_time";
}

pub const LABEL_PREFIX: &str = "labels.";
pub const CONDITION_PREFIX: &str = "status.conditions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    /// RFC 3339 text; compared after normalisation.
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

// ---------------- Direct columns (stable) ----------------
const DIRECT_COLUMNS: &[(&str, Column)] = &[
    ("id", Column { name: columns::ID, ty: ColumnType::Text }),
    ("name", Column { name: columns::NAME, ty: ColumnType::Text }),
    ("kind", Column { name: columns::KIND, ty: ColumnType::Text }),
    ("generation", Column { name: columns::GENERATION, ty: ColumnType::Integer }),
    ("created_time", Column { name: columns::CREATED_TIME, ty: ColumnType::Timestamp }),
    ("updated_time", Column { name: columns::UPDATED_TIME, ty: ColumnType::Timestamp }),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTarget<'a> {
    Column(Column),
    /// `labels.<key>`: the key, still to be bound as a parameter.
    Label(&'a str),
    /// `status.conditions.<Type>`: handled by the condition predicate builder.
    Condition(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Rooted at `spec`.
    Opaque,
    /// Not in the vocabulary, or a malformed label key.
    Unknown,
}

pub fn map_field(path: &str) -> Result<FieldTarget<'_>, Rejection> {
    if path == "spec" || path.starts_with("spec.") {
        return Err(Rejection::Opaque);
    }
    if let Some(col) = DIRECT_COLUMNS.iter().find(|(ext, _)| *ext == path).map(|(_, c)| *c) {
        return Ok(FieldTarget::Column(col));
    }
    if let Some(key) = path.strip_prefix(LABEL_PREFIX) {
        if fleet_core::resource::is_valid_label_key(key) {
            return Ok(FieldTarget::Label(key));
        }
        return Err(Rejection::Unknown);
    }
    if let Some(t) = path.strip_prefix(CONDITION_PREFIX) {
        return Ok(FieldTarget::Condition(t));
    }
    Err(Rejection::Unknown)
}

/// True for paths the compiler must route to the condition predicate builder.
pub fn is_condition_field(path: &str) -> bool {
    matches!(map_field(path), Ok(FieldTarget::Condition(_)))
}

//! Descriptor types for catalog objects.

use serde::{Deserialize, Serialize};

/// A column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// SQL type as spelled by the database (e.g. `timestamp with time zone`).
    pub sql_type: String,
    /// Default expression, if any.
    pub default: Option<String>,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a column descriptor with no default, accepting NULL.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            default: None,
            nullable: true,
        }
    }

    /// Set the default expression.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Whether the declared type is a plain 4-byte integer.
    pub fn is_integer(&self) -> bool {
        matches!(self.sql_type.as_str(), "integer" | "int" | "int4")
    }
}

/// An index as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name (unique within the database).
    pub name: String,
    /// Full definition as reported by `pg_indexes.indexdef`.
    pub definition: String,
}

impl IndexDef {
    /// Definition with the index name blanked out, so two indexes that
    /// differ only in name compare equal.
    pub fn normalized_definition(&self) -> String {
        normalize_index_definition(&self.definition, &self.name)
    }
}

/// Strip the index name from a `CREATE [UNIQUE] INDEX name ON ...` statement.
pub(crate) fn normalize_index_definition(definition: &str, name: &str) -> String {
    let needle = format!(" INDEX {} ON ", name);
    definition.replacen(&needle, " INDEX ON ", 1)
}

/// Referential action attached to a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FkAction {
    /// Postgres default: fail the statement.
    #[default]
    NoAction,
    /// Refuse the delete/update outright.
    Restrict,
    /// Propagate the delete/update to referencing rows.
    Cascade,
    /// Null out the referencing column.
    SetNull,
}

impl FkAction {
    /// SQL spelling of the action, without the `ON DELETE` prefix.
    pub fn as_sql(&self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Restrict => "RESTRICT",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
        }
    }
}

/// A foreign key constraint as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,
    /// Table the key points to.
    pub target_table: String,
    /// Referencing column(s) on the source table.
    pub columns: Vec<String>,
    /// `ON DELETE` action.
    pub on_delete: FkAction,
    /// Whether existing rows have been proven against the constraint.
    pub validated: bool,
}

impl ForeignKeyDef {
    /// Whether this key matches the identity another operation would create.
    pub fn matches(&self, target: &str, column: &str, name: &str, on_delete: FkAction) -> bool {
        self.target_table == target
            && self.columns == [column.to_string()]
            && self.name == name
            && self.on_delete == on_delete
    }
}

//! Catalog types describing the source database structure.
//!
//! These types are an immutable snapshot of the MSSQL catalog, taken once at
//! the start of a run. Script generation never mutates them; renamed
//! identifiers live in a separate lookup so source names stay available for
//! reading rows.

use serde::{Deserialize, Serialize};

/// Snapshot of everything the script needs to know about the source database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// Source database name.
    pub database: String,

    /// Schemas in deterministic (name) order.
    pub schemas: Vec<Schema>,
}

impl Catalog {
    /// Iterate all tables across all schemas, in emission order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.schemas.iter().flat_map(|s| s.tables.iter())
    }

    /// Total table count, for progress reporting.
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }
}

/// A schema and its tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name as it appears in the source.
    pub name: String,

    /// Tables in deterministic (name) order.
    pub tables: Vec<Table>,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Non-primary key indexes.
    pub indexes: Vec<Index>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// The identity column, if the table has one. MSSQL allows at most one.
    pub fn identity_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_identity)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "varchar", "datetime2").
    pub data_type: String,

    /// Maximum length for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the column is an identity column.
    pub is_identity: bool,

    /// Default expression as stored in the source, if any.
    pub default: Option<String>,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed column names.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced schema name.
    pub ref_schema: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,
}

//! Typed statements issued through an [`ExecutionSink`](crate::ExecutionSink).
//!
//! Engines never format SQL themselves. They describe what should happen
//! (create a table, seed a key index, update a batch of columns from a source
//! query) and the sink decides how to run it. Every name that reaches a sink is
//! an [`Identifier`], so user-supplied table and field names cannot smuggle
//! arbitrary SQL into a statement.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{EntityId, WideColumnName};

const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatementError {
    #[error("invalid identifier '{0}': expected [A-Za-z_][A-Za-z0-9_]* up to 128 chars")]
    InvalidIdentifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: &str) -> Result<Self, StatementError> {
        let mut chars = raw.chars();
        let valid_head = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_head || !valid_tail || raw.len() > MAX_IDENTIFIER_LEN {
            return Err(StatementError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&WideColumnName> for Identifier {
    fn from(name: &WideColumnName) -> Self {
        Self(name.as_str().to_string())
    }
}

impl From<WideColumnName> for Identifier {
    fn from(name: WideColumnName) -> Self {
        Self::from(&name)
    }
}

impl TryFrom<String> for Identifier {
    type Error = StatementError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(&raw)
    }
}

impl From<Identifier> for String {
    fn from(ident: Identifier) -> Self {
        ident.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optionally schema-qualified table name (`raw` or `stocks.raw`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: Option<Identifier>,
    pub name: Identifier,
}

impl TableName {
    pub fn new(name: Identifier) -> Self {
        Self { schema: None, name }
    }

    pub fn parse(raw: &str) -> Result<Self, StatementError> {
        match raw.split_once('.') {
            Some((schema, name)) => Ok(Self {
                schema: Some(Identifier::new(schema)?),
                name: Identifier::new(name)?,
            }),
            None => Ok(Self::new(Identifier::new(raw)?)),
        }
    }

    /// True when both names resolve to the same table. SQLite folds identifier
    /// case and an unqualified name lives in `main`.
    pub fn same_table(&self, other: &TableName) -> bool {
        let schema = |table: &TableName| {
            table
                .schema
                .as_ref()
                .map_or("main", Identifier::as_str)
                .to_ascii_lowercase()
        };
        schema(self) == schema(other) && self.name.as_str().eq_ignore_ascii_case(other.name.as_str())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    /// Calendar date, stored as ISO-8601 `YYYY-MM-DD` text.
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: Identifier,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: Identifier, column_type: ColumnType) -> Self {
        Self { name, column_type }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<Identifier>,
}

/// Which narrow rows feed a pivot when an (entity, key) pair repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowSelection {
    All,
    /// Keep only the most recently ingested row per (entity, key).
    LatestPerKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceQuery {
    /// Narrow rows restricted to `entities`, grouped by `key_column`.
    Narrow {
        table: TableName,
        entity_column: Identifier,
        key_column: Identifier,
        entities: Vec<EntityId>,
        selection: RowSelection,
    },
    /// Every row of a wide table, ordered by `key_column`.
    Wide {
        table: TableName,
        key_column: Identifier,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceExpression {
    /// Single representative `field` value of `entity` for the key (MAX over the group).
    Pivot {
        entity_column: Identifier,
        entity: EntityId,
        field: Identifier,
    },
    /// `(v - prev) / prev * 100` over rows ordered by key; NULL on the first
    /// row and whenever `prev` is zero or NULL.
    PercentChange { column: Identifier },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAssignment {
    pub column: Identifier,
    pub expr: SourceExpression,
}

/// One batch's column update: `target.column = source.expr` joined on `key_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub target_table: TableName,
    pub key_column: Identifier,
    pub assignments: Vec<ColumnAssignment>,
    pub source: SourceQuery,
}

impl BatchUpdate {
    pub fn assigned_columns(&self) -> impl Iterator<Item = &Identifier> {
        self.assignments.iter().map(|assignment| &assignment.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkLoad {
    pub table: TableName,
    pub path: PathBuf,
    pub delimiter: u8,
    pub has_header: bool,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    /// Create or replace.
    CreateTable(TableSchema),
    CreateIndex {
        name: Identifier,
        table: TableName,
        columns: Vec<Identifier>,
    },
    /// Insert each distinct `source_key_column` value into `target.key_column`,
    /// ordered ascending, skipping keys already present.
    SeedKeys {
        target: TableName,
        key_column: Identifier,
        source: TableName,
        source_key_column: Identifier,
    },
    Begin,
    Commit,
    Rollback,
    BatchUpdate(BatchUpdate),
    BulkLoad(BulkLoad),
    /// Returns one row: `[count]`.
    CountRows { table: TableName },
    /// Returns `[entity, key, count]` for every repeated (entity, key) pair.
    FindDuplicateKeys {
        table: TableName,
        entity_column: Identifier,
        key_column: Identifier,
        entities: Vec<EntityId>,
    },
    /// Returns one row: `[total_rows, nulls(col_0), nulls(col_1), ...]`.
    NullCounts {
        table: TableName,
        key_column: Identifier,
        columns: Vec<Identifier>,
        skip_first_key: bool,
    },
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable(_) => "create_table",
            Self::CreateIndex { .. } => "create_index",
            Self::SeedKeys { .. } => "seed_keys",
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::BatchUpdate(_) => "batch_update",
            Self::BulkLoad(_) => "bulk_load",
            Self::CountRows { .. } => "count_rows",
            Self::FindDuplicateKeys { .. } => "find_duplicate_keys",
            Self::NullCounts { .. } => "null_counts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub rows_affected: u64,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            rows: Vec::new(),
        }
    }

    /// First column of the first row as an integer, the shape of count queries.
    pub fn scalar_i64(&self) -> Option<i64> {
        self.rows.first()?.first()?.as_i64()
    }
}

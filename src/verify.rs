//! Post-run null-count verification of wide tables.
//!
//! Nulls are reported, never fatal: an entity with no narrow rows legitimately
//! yields an all-NULL column.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::catalog::{EntityCatalog, WideColumnName};
use crate::pivot::date_column;
use crate::sink::{ExecutionSink, SinkError};
use crate::statement::{Identifier, Statement, TableName, Value};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("null count query on {table} failed: {source}")]
    Query {
        table: TableName,
        #[source]
        source: SinkError,
    },
    #[error("null count query on {table} returned {found} values, expected {expected}")]
    UnexpectedShape {
        table: TableName,
        found: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationWarning {
    AllNull {
        column: WideColumnName,
    },
    PartialNull {
        column: WideColumnName,
        null_count: u64,
        total_rows: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullReport {
    pub table: TableName,
    pub total_rows: u64,
    pub null_counts: Vec<(WideColumnName, u64)>,
    pub warnings: Vec<VerificationWarning>,
}

impl NullReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Counts NULLs per catalog column. With `skip_first_date`, the earliest date
/// is excluded, which is where derived tables are NULL by construction.
pub fn verify_null_counts<S>(
    sink: &mut S,
    table: &TableName,
    catalog: &EntityCatalog,
    skip_first_date: bool,
) -> Result<NullReport, VerifyError>
where
    S: ExecutionSink + ?Sized,
{
    let columns = catalog.column_names();
    let outcome = sink
        .execute(&Statement::NullCounts {
            table: table.clone(),
            key_column: date_column(),
            columns: columns.iter().map(Identifier::from).collect(),
            skip_first_key: skip_first_date,
        })
        .map_err(|source| VerifyError::Query {
            table: table.clone(),
            source,
        })?;

    let row = outcome.rows.first().map(Vec::as_slice).unwrap_or_default();
    if row.len() != columns.len() + 1 {
        return Err(VerifyError::UnexpectedShape {
            table: table.clone(),
            found: row.len(),
            expected: columns.len() + 1,
        });
    }

    let count = |value: &Value| value.as_i64().unwrap_or(0).max(0) as u64;
    let total_rows = count(&row[0]);
    info!(
        component = "verify",
        event = "verify.table.rows",
        table = %table,
        total_rows
    );

    let mut null_counts = Vec::with_capacity(columns.len());
    let mut warnings = Vec::new();
    for (column, value) in columns.into_iter().zip(&row[1..]) {
        let null_count = count(value);
        if total_rows > 0 && null_count == total_rows {
            error!(
                component = "verify",
                event = "verify.column.all_null",
                table = %table,
                column = %column
            );
            warnings.push(VerificationWarning::AllNull {
                column: column.clone(),
            });
        } else if null_count > 0 {
            warn!(
                component = "verify",
                event = "verify.column.partial_null",
                table = %table,
                column = %column,
                null_count,
                total_rows
            );
            warnings.push(VerificationWarning::PartialNull {
                column: column.clone(),
                null_count,
                total_rows,
            });
        }
        null_counts.push((column, null_count));
    }

    Ok(NullReport {
        table: table.clone(),
        total_rows,
        null_counts,
        warnings,
    })
}

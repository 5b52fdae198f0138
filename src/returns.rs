//! Derived-metric engine: per-column one-lag percent change of a wide table.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::{partition_catalog, Batch};
use crate::catalog::EntityCatalog;
use crate::engine::{apply_batched_update, ensure_distinct_tables, EngineError};
use crate::pivot::{date_column, wide_table_schema};
use crate::sink::ExecutionSink;
use crate::statement::{
    BatchUpdate, ColumnAssignment, ColumnType, Identifier, SourceExpression, SourceQuery,
    Statement, TableName,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnsRequest {
    pub source_table: TableName,
    pub target_table: TableName,
    pub batch_size: usize,
}

impl Default for ReturnsRequest {
    fn default() -> Self {
        Self {
            source_table: TableName::new(
                Identifier::new("price_wide").expect("static table name is a valid identifier"),
            ),
            target_table: TableName::new(
                Identifier::new("stock_returns").expect("static table name is a valid identifier"),
            ),
            batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnsReport {
    pub table: TableName,
    pub dates_seeded: u64,
    pub batches_committed: usize,
    pub columns_updated: usize,
}

pub fn returns_batch_update(request: &ReturnsRequest, batch: &Batch) -> BatchUpdate {
    BatchUpdate {
        target_table: request.target_table.clone(),
        key_column: date_column(),
        assignments: batch
            .column_names()
            .into_iter()
            .map(|name| {
                let column: Identifier = name.into();
                ColumnAssignment {
                    column: column.clone(),
                    expr: SourceExpression::PercentChange { column },
                }
            })
            .collect(),
        source: SourceQuery::Wide {
            table: request.source_table.clone(),
            key_column: date_column(),
        },
    }
}

/// Materializes percent changes of every catalog column of `request.source_table`.
///
/// Each value is `(v[d] - v[prev]) / v[prev] * 100` where `prev` is the
/// preceding row in date order. The first date and any row whose previous value
/// is zero or NULL stay NULL. Result columns are always floating point. A
/// target naming the source table is rejected before anything runs.
pub fn run_returns<S>(
    sink: &mut S,
    catalog: &EntityCatalog,
    request: &ReturnsRequest,
) -> Result<ReturnsReport, EngineError>
where
    S: ExecutionSink + ?Sized,
{
    let batches = partition_catalog(catalog.ids(), request.batch_size)?;

    info!(
        component = "returns",
        event = "returns.run.start",
        source_table = %request.source_table,
        target_table = %request.target_table,
        entities = catalog.len(),
        batch_size = request.batch_size,
        batches = batches.len()
    );

    ensure_distinct_tables(&request.source_table, &request.target_table)?;
    let schema = wide_table_schema(&request.target_table, catalog, ColumnType::Real);
    sink.execute(&Statement::CreateTable(schema))
        .map_err(|source| EngineError::Schema {
            table: request.target_table.clone(),
            source,
        })?;

    let mut dates_seeded = 0;
    let mut columns_updated = 0;
    for batch in &batches {
        if batch.index == 0 {
            dates_seeded = seed_dates(sink, request)?;
        }

        let update = returns_batch_update(request, batch);
        apply_batched_update(sink, &update, batch)?;
        columns_updated += batch.len();
    }

    info!(
        component = "returns",
        event = "returns.run.finish",
        target_table = %request.target_table,
        dates_seeded,
        batches_committed = batches.len(),
        columns_updated
    );

    Ok(ReturnsReport {
        table: request.target_table.clone(),
        dates_seeded,
        batches_committed: batches.len(),
        columns_updated,
    })
}

fn seed_dates<S>(sink: &mut S, request: &ReturnsRequest) -> Result<u64, EngineError>
where
    S: ExecutionSink + ?Sized,
{
    let outcome = sink
        .execute(&Statement::SeedKeys {
            target: request.target_table.clone(),
            key_column: date_column(),
            source: request.source_table.clone(),
            source_key_column: date_column(),
        })
        .map_err(|source| EngineError::Seed {
            table: request.target_table.clone(),
            source,
        })?;

    if outcome.rows_affected == 0 {
        warn!(
            component = "returns",
            event = "returns.seed.empty_source",
            source_table = %request.source_table
        );
    }
    info!(
        component = "returns",
        event = "returns.seed.finish",
        target_table = %request.target_table,
        dates_seeded = outcome.rows_affected
    );
    Ok(outcome.rows_affected)
}

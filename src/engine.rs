//! Shared engine error taxonomy and the transactional batch-apply routine.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, PartitionError};
use crate::catalog::{CatalogError, EntityId, WideColumnName};
use crate::sink::{ExecutionSink, SinkError};
use crate::statement::{BatchUpdate, Statement, StatementError, TableName};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("source table {table} has no rows")]
    EmptySource { table: TableName },
    #[error("failed to create table {table}: {source}")]
    Schema {
        table: TableName,
        #[source]
        source: SinkError,
    },
    /// Target resolves to the source table; recreating it would drop the input.
    #[error("target table {target} is the source table {source_table}")]
    NameConflict {
        source_table: TableName,
        target: TableName,
    },
    #[error("failed to seed date index of {table}: {source}")]
    Seed {
        table: TableName,
        #[source]
        source: SinkError,
    },
    #[error("failed to read source table {table}: {source}")]
    Source {
        table: TableName,
        #[source]
        source: SinkError,
    },
    #[error(
        "batch {batch_index} ({first_column}..{last_column}) of {table} failed and was rolled back: {source}"
    )]
    BatchExecution {
        table: TableName,
        batch_index: usize,
        first_column: WideColumnName,
        last_column: WideColumnName,
        #[source]
        source: SinkError,
    },
    #[error(
        "batch {batch_index} (from {first_column}) found duplicate rows in {table} for entity {entity} on {date} ({count} rows)"
    )]
    DuplicateRecords {
        table: TableName,
        batch_index: usize,
        first_column: WideColumnName,
        entity: EntityId,
        date: String,
        count: u64,
    },
}

/// Fails before any statement when `target` would overwrite `source`.
pub(crate) fn ensure_distinct_tables(
    source: &TableName,
    target: &TableName,
) -> Result<(), EngineError> {
    if source.same_table(target) {
        return Err(EngineError::NameConflict {
            source_table: source.clone(),
            target: target.clone(),
        });
    }
    Ok(())
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<PartitionError> for EngineError {
    fn from(err: PartitionError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<StatementError> for EngineError {
    fn from(err: StatementError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Runs one batch update inside its own transaction.
///
/// On failure the transaction is rolled back and the error names the batch;
/// batches committed earlier are left as they are. Returns rows updated.
pub fn apply_batched_update<S>(
    sink: &mut S,
    update: &BatchUpdate,
    batch: &Batch,
) -> Result<u64, EngineError>
where
    S: ExecutionSink + ?Sized,
{
    let fail = |source: SinkError| EngineError::BatchExecution {
        table: update.target_table.clone(),
        batch_index: batch.index,
        first_column: batch.first().column_name(),
        last_column: batch.last().column_name(),
        source,
    };

    debug!(
        component = "engine",
        event = "engine.batch.begin",
        table = %update.target_table,
        batch_index = batch.index,
        first_column = %batch.first().column_name(),
        last_column = %batch.last().column_name()
    );
    sink.execute(&Statement::Begin).map_err(fail)?;

    let result = sink
        .execute(&Statement::BatchUpdate(update.clone()))
        .and_then(|outcome| {
            sink.execute(&Statement::Commit)?;
            Ok(outcome.rows_affected)
        });

    match result {
        Ok(rows_updated) => {
            info!(
                component = "engine",
                event = "engine.batch.commit",
                table = %update.target_table,
                batch_index = batch.index,
                first_column = %batch.first().column_name(),
                last_column = %batch.last().column_name(),
                rows_updated
            );
            Ok(rows_updated)
        }
        Err(source) => {
            error!(
                component = "engine",
                event = "engine.batch.error",
                table = %update.target_table,
                batch_index = batch.index,
                first_column = %batch.first().column_name(),
                error = %source
            );
            if let Err(rollback_err) = sink.execute(&Statement::Rollback) {
                warn!(
                    component = "engine",
                    event = "engine.batch.rollback_failed",
                    table = %update.target_table,
                    batch_index = batch.index,
                    error = %rollback_err
                );
            }
            Err(fail(source))
        }
    }
}

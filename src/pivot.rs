//! Pivot engine: narrow `(id, date, field)` rows into a date-keyed wide table,
//! one transactional batch of entity columns at a time.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{partition_catalog, Batch};
use crate::catalog::{EntityCatalog, EntityId};
use crate::engine::{apply_batched_update, ensure_distinct_tables, EngineError};
use crate::sink::ExecutionSink;
use crate::statement::{
    BatchUpdate, ColumnAssignment, ColumnDef, ColumnType, Identifier, RowSelection,
    SourceExpression, SourceQuery, Statement, TableName, TableSchema, Value,
};

pub const ENTITY_COLUMN: &str = "id";
pub const DATE_COLUMN: &str = "date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Floating point, e.g. prices.
    Continuous,
    /// Integer, e.g. traded volume.
    Count,
}

impl FieldKind {
    pub fn column_type(self) -> ColumnType {
        match self {
            Self::Continuous => ColumnType::Real,
            Self::Count => ColumnType::Integer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: Identifier,
    pub kind: FieldKind,
}

impl Field {
    pub fn price() -> Self {
        Self::known("price", FieldKind::Continuous)
    }

    pub fn trade_volume() -> Self {
        Self::known("trade_volume", FieldKind::Count)
    }

    fn known(name: &str, kind: FieldKind) -> Self {
        Self {
            name: Identifier::new(name).expect("static field names are valid identifiers"),
            kind,
        }
    }
}

pub fn parse_field(input: &str) -> Result<Field, EngineError> {
    match input.trim() {
        "price" => Ok(Field::price()),
        "trade_volume" => Ok(Field::trade_volume()),
        other => Err(EngineError::Configuration(format!(
            "unsupported field '{other}': expected price or trade_volume"
        ))),
    }
}

/// How a repeated (entity, date) pair in the narrow source is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Largest value wins. Exact when pairs are unique.
    Max,
    /// Most recently ingested row wins.
    Latest,
    /// Any repeated pair fails the batch before it is applied.
    Reject,
}

impl DuplicatePolicy {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "max" => Some(Self::Max),
            "latest" => Some(Self::Latest),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    fn row_selection(self) -> RowSelection {
        match self {
            Self::Latest => RowSelection::LatestPerKey,
            Self::Max | Self::Reject => RowSelection::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotRequest {
    pub field: Field,
    pub source_table: TableName,
    pub target_table: TableName,
    pub batch_size: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl PivotRequest {
    /// Reads from `raw` into `<field>_wide`, 20 entities per batch.
    pub fn new(field: Field) -> Self {
        let target = Identifier::new(&format!("{}_wide", field.name))
            .expect("field identifier plus suffix stays a valid identifier");
        Self {
            field,
            source_table: TableName::new(
                Identifier::new("raw").expect("static table name is a valid identifier"),
            ),
            target_table: TableName::new(target),
            batch_size: 20,
            duplicate_policy: DuplicatePolicy::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotReport {
    pub table: TableName,
    pub source_rows: u64,
    pub dates_seeded: u64,
    pub batches_committed: usize,
    pub columns_updated: usize,
}

pub fn wide_table_schema(
    table: &TableName,
    catalog: &EntityCatalog,
    column_type: ColumnType,
) -> TableSchema {
    let key = date_column();
    let mut columns = Vec::with_capacity(catalog.len() + 1);
    columns.push(ColumnDef::new(key.clone(), ColumnType::Date));
    columns.extend(
        catalog
            .ids()
            .iter()
            .map(|id| ColumnDef::new(id.column_name().into(), column_type)),
    );

    TableSchema {
        name: table.clone(),
        columns,
        primary_key: Some(key),
    }
}

pub fn pivot_batch_update(request: &PivotRequest, batch: &Batch) -> BatchUpdate {
    let entity_column = entity_column();
    BatchUpdate {
        target_table: request.target_table.clone(),
        key_column: date_column(),
        assignments: batch
            .entities
            .iter()
            .map(|id| ColumnAssignment {
                column: id.column_name().into(),
                expr: SourceExpression::Pivot {
                    entity_column: entity_column.clone(),
                    entity: *id,
                    field: request.field.name.clone(),
                },
            })
            .collect(),
        source: SourceQuery::Narrow {
            table: request.source_table.clone(),
            entity_column,
            key_column: date_column(),
            entities: batch.entities.clone(),
            selection: request.duplicate_policy.row_selection(),
        },
    }
}

/// Materializes `request.target_table` from the narrow source.
///
/// The target must be a different table than the source and the source must be
/// non-empty; both are checked before any table is touched.
/// The table is then recreated, seeded with every distinct source date, and
/// filled batch by batch. A failing batch is rolled back and stops the run;
/// batches committed before it stay in place. Re-running is safe: seeding
/// skips existing dates and updates overwrite by key.
pub fn run_pivot<S>(
    sink: &mut S,
    catalog: &EntityCatalog,
    request: &PivotRequest,
) -> Result<PivotReport, EngineError>
where
    S: ExecutionSink + ?Sized,
{
    let batches = partition_catalog(catalog.ids(), request.batch_size)?;

    info!(
        component = "pivot",
        event = "pivot.run.start",
        field = %request.field.name,
        source_table = %request.source_table,
        target_table = %request.target_table,
        entities = catalog.len(),
        batch_size = request.batch_size,
        batches = batches.len(),
        duplicate_policy = ?request.duplicate_policy
    );

    ensure_distinct_tables(&request.source_table, &request.target_table)?;
    let source_rows = count_source_rows(sink, &request.source_table)?;
    if source_rows == 0 {
        return Err(EngineError::EmptySource {
            table: request.source_table.clone(),
        });
    }

    let schema = wide_table_schema(&request.target_table, catalog, request.field.kind.column_type());
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
        if request.duplicate_policy == DuplicatePolicy::Reject {
            reject_duplicates(sink, request, batch)?;
        }

        let update = pivot_batch_update(request, batch);
        apply_batched_update(sink, &update, batch)?;
        columns_updated += batch.len();
    }

    info!(
        component = "pivot",
        event = "pivot.run.finish",
        target_table = %request.target_table,
        source_rows,
        dates_seeded,
        batches_committed = batches.len(),
        columns_updated
    );

    Ok(PivotReport {
        table: request.target_table.clone(),
        source_rows,
        dates_seeded,
        batches_committed: batches.len(),
        columns_updated,
    })
}

fn count_source_rows<S>(sink: &mut S, table: &TableName) -> Result<u64, EngineError>
where
    S: ExecutionSink + ?Sized,
{
    let outcome = sink
        .execute(&Statement::CountRows {
            table: table.clone(),
        })
        .map_err(|source| EngineError::Source {
            table: table.clone(),
            source,
        })?;
    Ok(outcome.scalar_i64().unwrap_or(0).max(0) as u64)
}

fn seed_dates<S>(sink: &mut S, request: &PivotRequest) -> Result<u64, EngineError>
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

    info!(
        component = "pivot",
        event = "pivot.seed.finish",
        target_table = %request.target_table,
        dates_seeded = outcome.rows_affected
    );
    Ok(outcome.rows_affected)
}

fn reject_duplicates<S>(sink: &mut S, request: &PivotRequest, batch: &Batch) -> Result<(), EngineError>
where
    S: ExecutionSink + ?Sized,
{
    let outcome = sink
        .execute(&Statement::FindDuplicateKeys {
            table: request.source_table.clone(),
            entity_column: entity_column(),
            key_column: date_column(),
            entities: batch.entities.clone(),
        })
        .map_err(|source| EngineError::Source {
            table: request.source_table.clone(),
            source,
        })?;

    let Some(first) = outcome.rows.first() else {
        return Ok(());
    };
    let entity = first
        .first()
        .and_then(Value::as_i64)
        .and_then(|id| u32::try_from(id).ok())
        .map(EntityId)
        .unwrap_or_else(|| batch.first());
    let date = first
        .get(1)
        .and_then(Value::as_text)
        .unwrap_or_default()
        .to_string();
    let count = first.get(2).and_then(Value::as_i64).unwrap_or(2).max(0) as u64;

    Err(EngineError::DuplicateRecords {
        table: request.source_table.clone(),
        batch_index: batch.index,
        first_column: batch.first().column_name(),
        entity,
        date,
        count,
    })
}

fn entity_column() -> Identifier {
    Identifier::new(ENTITY_COLUMN).expect("static column name is a valid identifier")
}

pub(crate) fn date_column() -> Identifier {
    Identifier::new(DATE_COLUMN).expect("static column name is a valid identifier")
}

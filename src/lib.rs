//! Stockwide core crate.
//!
//! Reshapes long-format `(id, date, value)` stock records into date-keyed wide
//! tables, one column per entity, and derives per-column percent changes:
//! - entity catalog and order-preserving batch partitioning
//! - batched, transactional pivot of a narrow table into `<field>_wide`
//! - batched, transactional percent-change returns into `stock_returns`
//! - CSV ingestion, synthetic data generation and null-count verification

mod batch;
mod catalog;
mod config;
mod engine;
mod generate;
mod ingest;
mod observability;
mod pivot;
mod returns;
mod sink;
mod statement;
mod verify;

pub use batch::{partition_catalog, Batch, PartitionError};
pub use catalog::{
    column_name, parse_entity_ids, CatalogError, EntityCatalog, EntityId, WideColumnName,
};
pub use config::{
    catalog_from_env, connection_config_from_env, generate_config_from_env,
    logging_config_from_env, returns_config_from_env, run_config_from_env, ConfigError, ConnectionConfig, LogFormat,
    LoggingConfig, RunConfig,
};
pub use engine::{apply_batched_update, EngineError};
pub use generate::{
    business_days, generate_stock_files, GenerateConfig, GenerateError, GenerateReport,
};
pub use ingest::{find_csv_files, ingest_csv_dir, narrow_columns, IngestError, IngestReport};
pub use observability::{
    init_logging, log_run_failed, log_run_finish, log_run_start, LoggingInitError,
};
pub use pivot::{
    parse_field, pivot_batch_update, run_pivot, wide_table_schema, DuplicatePolicy, Field,
    FieldKind, PivotReport, PivotRequest, DATE_COLUMN, ENTITY_COLUMN,
};
pub use returns::{returns_batch_update, run_returns, ReturnsReport, ReturnsRequest};
pub use sink::{render_sql, ExecutionSink, SinkError, SqliteSink};
pub use statement::{
    BatchUpdate, BulkLoad, ColumnAssignment, ColumnDef, ColumnType, Identifier, QueryOutcome,
    RowSelection, SourceExpression, SourceQuery, Statement, StatementError, TableName,
    TableSchema, Value,
};
pub use verify::{verify_null_counts, NullReport, VerificationWarning, VerifyError};

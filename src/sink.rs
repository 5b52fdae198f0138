//! Execution sink: the one seam both engines write through.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::NaiveDate;
use csv::StringRecord;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::statement::{
    BatchUpdate, BulkLoad, ColumnDef, ColumnType, Identifier, QueryOutcome, RowSelection,
    SourceExpression, SourceQuery, Statement, TableName, TableSchema, Value,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const SOURCE_ALIAS: &str = "\"batch_source\"";
const NARROW_ALIAS: &str = "\"narrow\"";
const DUPLICATE_ALIAS: &str = "\"dup\"";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse column {column} value '{value}' at {path}:{line}")]
    ParseField {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
    #[error("record at {path}:{line} has {found} columns, expected {expected}")]
    ColumnCount {
        path: PathBuf,
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error("unsupported statement: {0}")]
    Unsupported(String),
}

/// Executes typed statements against some storage engine. Implementations
/// must apply a statement fully or not at all.
pub trait ExecutionSink {
    fn execute(&mut self, statement: &Statement) -> Result<QueryOutcome, SinkError>;
}

/// SQLite-backed sink. Owns its connection; dropping the sink closes it.
#[derive(Debug)]
pub struct SqliteSink {
    conn: Connection,
    profile: bool,
}

impl SqliteSink {
    pub fn open(cfg: &ConnectionConfig) -> Result<Self, SinkError> {
        if let Some(parent) = cfg.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&cfg.db_path)?;
        apply_pragmas(&conn, cfg)?;

        info!(
            component = "sink",
            event = "sink.open",
            db_path = %cfg.db_path.display(),
            threads = cfg.threads,
            cache_size_mib = cfg.cache_size_mib,
            soft_heap_limit_mib = cfg.soft_heap_limit_mib,
            profile = cfg.profile
        );

        Ok(Self {
            conn,
            profile: cfg.profile,
        })
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, &ConnectionConfig::default())?;
        Ok(Self {
            conn,
            profile: false,
        })
    }

    /// Read access for callers that inspect results directly.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<(), SinkError> {
        self.conn.close().map_err(|(_, err)| SinkError::Sqlite(err))?;
        info!(component = "sink", event = "sink.close");
        Ok(())
    }

    fn query_rows(&self, sql: &str) -> Result<QueryOutcome, SinkError> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(match row.get_ref(idx)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::Integer(v),
                    ValueRef::Real(v) => Value::Real(v),
                    ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
                    ValueRef::Blob(_) => {
                        return Err(SinkError::Unsupported(
                            "blob values are not supported".to_string(),
                        ))
                    }
                });
            }
            out.push(values);
        }

        Ok(QueryOutcome {
            rows_affected: 0,
            rows: out,
        })
    }

    /// Logs the query plan of statements that read or update rows.
    fn log_plan(&self, statement: &Statement, sql: &str) -> Result<(), SinkError> {
        if !matches!(
            statement,
            Statement::CountRows { .. }
                | Statement::FindDuplicateKeys { .. }
                | Statement::NullCounts { .. }
                | Statement::SeedKeys { .. }
                | Statement::BatchUpdate(_)
        ) {
            return Ok(());
        }

        let explained = self.query_rows(&format!("EXPLAIN QUERY PLAN {sql}"))?;
        let plan: Vec<&str> = explained
            .rows
            .iter()
            .filter_map(|row| row.get(3).and_then(Value::as_text))
            .collect();
        info!(
            component = "sink",
            event = "sink.profile.plan",
            kind = statement.kind(),
            plan = %plan.join("; ")
        );
        Ok(())
    }

    fn bulk_load(&mut self, load: &BulkLoad) -> Result<QueryOutcome, SinkError> {
        let file = fs::File::open(&load.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(load.has_header)
            .delimiter(load.delimiter)
            .from_reader(file);
        let sql = render_bulk_insert(load);

        let savepoint = self.conn.savepoint()?;
        let mut loaded = 0_u64;
        {
            let mut stmt = savepoint.prepare(&sql)?;
            for record in reader.records() {
                let record = record?;
                let values = parse_record(&record, &load.columns, &load.path)?;
                stmt.execute(params_from_iter(values))?;
                loaded += 1;
            }
        }
        savepoint.commit()?;

        Ok(QueryOutcome::affected(loaded))
    }
}

impl ExecutionSink for SqliteSink {
    fn execute(&mut self, statement: &Statement) -> Result<QueryOutcome, SinkError> {
        let started = Instant::now();

        let outcome = match statement {
            Statement::BulkLoad(load) => self.bulk_load(load)?,
            _ => {
                let sql = render_sql(statement)?;
                debug!(
                    component = "sink",
                    event = "sink.execute.sql",
                    kind = statement.kind(),
                    sql = %sql
                );
                if self.profile {
                    self.log_plan(statement, &sql)?;
                }
                match statement {
                    Statement::CountRows { .. }
                    | Statement::FindDuplicateKeys { .. }
                    | Statement::NullCounts { .. } => self.query_rows(&sql)?,
                    Statement::CreateTable(_) | Statement::CreateIndex { .. } => {
                        self.conn.execute_batch(&sql)?;
                        QueryOutcome::default()
                    }
                    _ => QueryOutcome::affected(self.conn.execute(&sql, [])? as u64),
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if self.profile {
            info!(
                component = "sink",
                event = "sink.profile.finish",
                kind = statement.kind(),
                rows_affected = outcome.rows_affected,
                rows_returned = outcome.rows.len(),
                elapsed_ms
            );
        } else {
            debug!(
                component = "sink",
                event = "sink.execute.finish",
                kind = statement.kind(),
                rows_affected = outcome.rows_affected,
                rows_returned = outcome.rows.len(),
                elapsed_ms
            );
        }

        Ok(outcome)
    }
}

fn apply_pragmas(conn: &Connection, cfg: &ConnectionConfig) -> Result<(), SinkError> {
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
        PRAGMA threads={};
        PRAGMA cache_size=-{};
        PRAGMA soft_heap_limit={};
        ",
        cfg.threads,
        cfg.cache_size_mib.saturating_mul(1024),
        cfg.soft_heap_limit_mib.saturating_mul(1024 * 1024)
    ))?;
    Ok(())
}

/// Renders a statement as SQLite SQL. `BulkLoad` has no SQL form.
pub fn render_sql(statement: &Statement) -> Result<String, SinkError> {
    match statement {
        Statement::CreateTable(schema) => Ok(render_create_table(schema)),
        Statement::CreateIndex {
            name,
            table,
            columns,
        } => {
            let index_name = match &table.schema {
                Some(schema) => format!("{}.{}", quote(schema), quote(name)),
                None => quote(name),
            };
            Ok(format!(
                "CREATE INDEX IF NOT EXISTS {index_name} ON {} ({})",
                quote(&table.name),
                join_quoted(columns)
            ))
        }
        Statement::SeedKeys {
            target,
            key_column,
            source,
            source_key_column,
        } => Ok(format!(
            "INSERT OR IGNORE INTO {} ({}) SELECT DISTINCT {src_key} FROM {} WHERE {src_key} IS NOT NULL ORDER BY {src_key}",
            table_ref(target),
            quote(key_column),
            table_ref(source),
            src_key = quote(source_key_column),
        )),
        Statement::Begin => Ok("BEGIN".to_string()),
        Statement::Commit => Ok("COMMIT".to_string()),
        Statement::Rollback => Ok("ROLLBACK".to_string()),
        Statement::BatchUpdate(update) => render_batch_update(update),
        Statement::BulkLoad(_) => Err(SinkError::Unsupported(
            "bulk load has no SQL rendering".to_string(),
        )),
        Statement::CountRows { table } => Ok(format!("SELECT COUNT(*) FROM {}", table_ref(table))),
        Statement::FindDuplicateKeys {
            table,
            entity_column,
            key_column,
            entities,
        } => Ok(format!(
            "SELECT {entity}, {key}, COUNT(*) FROM {} WHERE {entity} IN ({}) GROUP BY {entity}, {key} HAVING COUNT(*) > 1 ORDER BY {entity}, {key}",
            table_ref(table),
            entity_list(entities.iter().map(|id| id.get())),
            entity = quote(entity_column),
            key = quote(key_column),
        )),
        Statement::NullCounts {
            table,
            key_column,
            columns,
            skip_first_key,
        } => {
            let mut sql = String::from("SELECT COUNT(*)");
            for column in columns {
                let _ = write!(
                    sql,
                    ", COALESCE(SUM(CASE WHEN {} IS NULL THEN 1 ELSE 0 END), 0)",
                    quote(column)
                );
            }
            let _ = write!(sql, " FROM {}", table_ref(table));
            if *skip_first_key {
                let _ = write!(
                    sql,
                    " WHERE {key} > (SELECT MIN({key}) FROM {})",
                    table_ref(table),
                    key = quote(key_column)
                );
            }
            Ok(sql)
        }
    }
}

fn render_create_table(schema: &TableSchema) -> String {
    let table = table_ref(&schema.name);
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|column| {
            let mut def = format!("{} {}", quote(&column.name), sql_type(column.column_type));
            if schema.primary_key.as_ref() == Some(&column.name) {
                def.push_str(" NOT NULL PRIMARY KEY");
            }
            def
        })
        .collect();

    format!(
        "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} (\n    {}\n);",
        columns.join(",\n    ")
    )
}

fn render_batch_update(update: &BatchUpdate) -> Result<String, SinkError> {
    if update.assignments.is_empty() {
        return Err(SinkError::Unsupported(
            "batch update without column assignments".to_string(),
        ));
    }

    let key = quote(&update.key_column);
    let set_list: Vec<String> = update
        .assigned_columns()
        .map(|column| format!("{col} = {SOURCE_ALIAS}.{col}", col = quote(column)))
        .collect();

    let mut select_list = Vec::with_capacity(update.assignments.len() + 1);
    let source_sql = match &update.source {
        SourceQuery::Narrow {
            table,
            entity_column,
            key_column,
            entities,
            selection,
        } => {
            select_list.push(format!("{} AS {key}", quote(key_column)));
            for assignment in &update.assignments {
                let SourceExpression::Pivot {
                    entity_column,
                    entity,
                    field,
                } = &assignment.expr
                else {
                    return Err(SinkError::Unsupported(
                        "narrow source only supports pivot expressions".to_string(),
                    ));
                };
                select_list.push(format!(
                    "MAX(CASE WHEN {} = {} THEN {} END) AS {}",
                    quote(entity_column),
                    entity.get(),
                    quote(field),
                    quote(&assignment.column)
                ));
            }

            let source_table = table_ref(table);
            let entity = quote(entity_column);
            let mut filter = format!(
                "{entity} IN ({})",
                entity_list(entities.iter().map(|id| id.get()))
            );
            if *selection == RowSelection::LatestPerKey {
                let narrow_key = quote(key_column);
                let _ = write!(
                    filter,
                    " AND {NARROW_ALIAS}.rowid = (SELECT MAX({DUPLICATE_ALIAS}.rowid) FROM {source_table} AS {DUPLICATE_ALIAS} WHERE {DUPLICATE_ALIAS}.{entity} = {NARROW_ALIAS}.{entity} AND {DUPLICATE_ALIAS}.{narrow_key} = {NARROW_ALIAS}.{narrow_key})"
                );
            }

            format!(
                "SELECT {}\n    FROM {source_table} AS {NARROW_ALIAS}\n    WHERE {filter}\n    GROUP BY {}",
                select_list.join(",\n        "),
                quote(key_column)
            )
        }
        SourceQuery::Wide { table, key_column } => {
            let order = quote(key_column);
            select_list.push(format!("{order} AS {key}"));
            for assignment in &update.assignments {
                let SourceExpression::PercentChange { column } = &assignment.expr else {
                    return Err(SinkError::Unsupported(
                        "wide source only supports percent-change expressions".to_string(),
                    ));
                };
                let value = quote(column);
                let prev = format!("LAG({value}, 1) OVER (ORDER BY {order})");
                select_list.push(format!(
                    "(CAST({value} AS REAL) - {prev}) / NULLIF({prev}, 0) * 100.0 AS {}",
                    quote(&assignment.column)
                ));
            }

            format!(
                "SELECT {}\n    FROM {}",
                select_list.join(",\n        "),
                table_ref(table)
            )
        }
    };

    let target = table_ref(&update.target_table);
    Ok(format!(
        "UPDATE {target}\nSET {}\nFROM (\n    {source_sql}\n) AS {SOURCE_ALIAS}\nWHERE {target}.{key} = {SOURCE_ALIAS}.{key}",
        set_list.join(", ")
    ))
}

fn render_bulk_insert(load: &BulkLoad) -> String {
    let names: Vec<&Identifier> = load.columns.iter().map(|column| &column.name).collect();
    let placeholders: Vec<String> = (1..=load.columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_ref(&load.table),
        join_quoted(names),
        placeholders.join(", ")
    )
}

fn parse_record(
    record: &StringRecord,
    columns: &[ColumnDef],
    path: &Path,
) -> Result<Vec<SqlValue>, SinkError> {
    let line = record.position().map(|pos| pos.line()).unwrap_or_default();
    if record.len() != columns.len() {
        return Err(SinkError::ColumnCount {
            path: path.to_path_buf(),
            line,
            found: record.len(),
            expected: columns.len(),
        });
    }

    columns
        .iter()
        .zip(record.iter())
        .map(|(column, raw)| {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(SqlValue::Null);
            }
            let parse_err = || SinkError::ParseField {
                path: path.to_path_buf(),
                line,
                column: column.name.to_string(),
                value: raw.to_string(),
            };
            match column.column_type {
                ColumnType::Integer => raw
                    .parse::<i64>()
                    .map(SqlValue::Integer)
                    .map_err(|_| parse_err()),
                ColumnType::Real => raw
                    .parse::<f64>()
                    .map(SqlValue::Real)
                    .map_err(|_| parse_err()),
                ColumnType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                    .map(|date| SqlValue::Text(date.format(DATE_FORMAT).to_string()))
                    .map_err(|_| parse_err()),
            }
        })
        .collect()
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Date => "TEXT",
    }
}

fn quote(ident: &Identifier) -> String {
    format!("\"{}\"", ident.as_str())
}

fn table_ref(table: &TableName) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote(schema), quote(&table.name)),
        None => quote(&table.name),
    }
}

fn join_quoted<'a>(idents: impl IntoIterator<Item = &'a Identifier>) -> String {
    idents.into_iter().map(quote).collect::<Vec<_>>().join(", ")
}

fn entity_list(ids: impl Iterator<Item = u32>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

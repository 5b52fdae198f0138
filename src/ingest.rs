//! CSV ingestion into the narrow `(id, date, price, trade_volume)` table.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::sink::{ExecutionSink, SinkError};
use crate::statement::{
    BulkLoad, ColumnDef, ColumnType, Identifier, Statement, StatementError, TableName, TableSchema,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no CSV input files found in {0}")]
    NoInputFiles(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid table name: {0}")]
    InvalidTable(#[from] StatementError),
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: SinkError,
    },
    #[error("failed to prepare table {table}: {source}")]
    Schema {
        table: TableName,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub table: TableName,
    pub files: Vec<PathBuf>,
    pub rows_loaded: u64,
}

pub fn narrow_columns() -> Vec<ColumnDef> {
    [
        ("id", ColumnType::Integer),
        ("date", ColumnType::Date),
        ("price", ColumnType::Real),
        ("trade_volume", ColumnType::Integer),
    ]
    .into_iter()
    .map(|(name, column_type)| {
        ColumnDef::new(
            Identifier::new(name).expect("static column name is a valid identifier"),
            column_type,
        )
    })
    .collect()
}

/// `*.csv` files directly inside `dir`, sorted by file name.
pub fn find_csv_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Replaces `table` with the contents of every CSV file in `dir`.
///
/// Files need a header row and the column order `id,date,price,trade_volume`.
/// Each file loads atomically; a failing file stops ingestion and keeps the
/// files loaded before it.
pub fn ingest_csv_dir<S>(sink: &mut S, dir: &Path, table: &TableName) -> Result<IngestReport, IngestError>
where
    S: ExecutionSink + ?Sized,
{
    let files = find_csv_files(dir)?;
    if files.is_empty() {
        return Err(IngestError::NoInputFiles(dir.to_path_buf()));
    }

    info!(
        component = "ingest",
        event = "ingest.run.start",
        dir = %dir.display(),
        table = %table,
        files = files.len()
    );

    let schema_err = |source: SinkError| IngestError::Schema {
        table: table.clone(),
        source,
    };
    sink.execute(&Statement::CreateTable(TableSchema {
        name: table.clone(),
        columns: narrow_columns(),
        primary_key: None,
    }))
    .map_err(schema_err)?;

    let mut rows_loaded = 0;
    for path in &files {
        let outcome = sink
            .execute(&Statement::BulkLoad(BulkLoad {
                table: table.clone(),
                path: path.clone(),
                delimiter: b',',
                has_header: true,
                columns: narrow_columns(),
            }))
            .map_err(|source| IngestError::Load {
                path: path.clone(),
                source,
            })?;
        rows_loaded += outcome.rows_affected;

        info!(
            component = "ingest",
            event = "ingest.file.loaded",
            path = %path.display(),
            rows = outcome.rows_affected
        );
    }

    let index_name = Identifier::new(&format!("{}_id_date_idx", table.name))?;
    sink.execute(&Statement::CreateIndex {
        name: index_name,
        table: table.clone(),
        columns: vec![
            Identifier::new("id")?,
            Identifier::new("date")?,
        ],
    })
    .map_err(schema_err)?;

    info!(
        component = "ingest",
        event = "ingest.run.finish",
        table = %table,
        files = files.len(),
        rows_loaded
    );

    Ok(IngestReport {
        table: table.clone(),
        files,
        rows_loaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingSink;

    #[test]
    fn finds_only_csv_files_in_name_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("b.csv"), "x").expect("write");
        fs::write(dir.path().join("a.CSV"), "x").expect("write");
        fs::write(dir.path().join("notes.txt"), "x").expect("write");
        fs::create_dir(dir.path().join("nested.csv")).expect("mkdir");

        let files = find_csv_files(dir.path()).expect("listing");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["a.CSV".to_string(), "b.csv".to_string()]);
    }

    #[test]
    fn empty_directory_is_rejected_before_any_statement() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut sink = RecordingSink::default();
        let table = TableName::parse("raw").expect("table");

        let err = ingest_csv_dir(&mut sink, dir.path(), &table).expect_err("no files");
        assert!(matches!(err, IngestError::NoInputFiles(_)));
        assert!(sink.statements.is_empty());
    }

    #[test]
    fn issues_create_load_per_file_then_index() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("1.csv"), "id,date,price,trade_volume\n").expect("write");
        fs::write(dir.path().join("2.csv"), "id,date,price,trade_volume\n").expect("write");
        let mut sink = RecordingSink::default();
        let table = TableName::parse("raw").expect("table");

        ingest_csv_dir(&mut sink, dir.path(), &table).expect("ingest");
        assert_eq!(
            sink.kinds(),
            vec!["create_table", "bulk_load", "bulk_load", "create_index"]
        );
    }
}

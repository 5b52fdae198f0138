use std::path::PathBuf;
use std::time::Instant;

use stockwide::{
    connection_config_from_env, ingest_csv_dir, init_logging, log_run_failed, log_run_finish,
    log_run_start, logging_config_from_env, run_config_from_env, SqliteSink, TableName,
};

const RUN: &str = "stockwide_ingest";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start(RUN, &logging);
    let started = Instant::now();

    let csv_dir = std::env::var("STOCKWIDE_CSV_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"));
    let connection = connection_config_from_env()?;
    let run = run_config_from_env()?;
    let table = TableName::parse(&run.source_table)?;

    println!(
        "Ingest start | db={} csv_dir={} table={}",
        connection.db_path.display(),
        csv_dir.display(),
        table
    );

    let mut sink = SqliteSink::open(&connection)?;
    let report = match ingest_csv_dir(&mut sink, &csv_dir, &table) {
        Ok(report) => report,
        Err(err) => {
            log_run_failed(RUN, &err);
            return Err(err.into());
        }
    };
    sink.close()?;

    println!(
        "Ingest done | table={} files={} rows={}",
        report.table,
        report.files.len(),
        report.rows_loaded
    );

    log_run_finish(RUN, started.elapsed());
    Ok(())
}

use std::time::Instant;

use stockwide::{
    catalog_from_env, connection_config_from_env, init_logging, log_run_failed, log_run_finish,
    log_run_start, logging_config_from_env, returns_config_from_env, run_returns,
    verify_null_counts, SqliteSink,
};

const RUN: &str = "stockwide_returns";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start(RUN, &logging);
    let started = Instant::now();

    let connection = connection_config_from_env()?;
    let request = returns_config_from_env()?;
    let catalog = catalog_from_env()?;

    println!(
        "Returns start | db={} source={} target={} entities={} batch_size={}",
        connection.db_path.display(),
        request.source_table,
        request.target_table,
        catalog.len(),
        request.batch_size
    );

    let mut sink = SqliteSink::open(&connection)?;
    let report = match run_returns(&mut sink, &catalog, &request) {
        Ok(report) => report,
        Err(err) => {
            log_run_failed(RUN, &err);
            return Err(err.into());
        }
    };
    // The first date is NULL in every column by construction.
    let nulls = match verify_null_counts(&mut sink, &report.table, &catalog, true) {
        Ok(nulls) => nulls,
        Err(err) => {
            log_run_failed(RUN, &err);
            return Err(err.into());
        }
    };
    sink.close()?;

    println!(
        "Returns done | table={} dates={} batches={} columns={} null_warnings={}",
        report.table,
        report.dates_seeded,
        report.batches_committed,
        report.columns_updated,
        nulls.warnings.len()
    );

    log_run_finish(RUN, started.elapsed());
    Ok(())
}

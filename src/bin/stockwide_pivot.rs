use std::time::Instant;

use stockwide::{
    catalog_from_env, connection_config_from_env, init_logging, log_run_failed, log_run_finish,
    log_run_start, logging_config_from_env, parse_field, run_config_from_env, run_pivot,
    verify_null_counts, PivotRequest, SqliteSink, TableName,
};

const RUN: &str = "stockwide_pivot";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start(RUN, &logging);
    let started = Instant::now();

    let Some(raw_field) = std::env::args().nth(1) else {
        return Err("usage: stockwide_pivot <price|trade_volume>".into());
    };
    let field = parse_field(&raw_field)?;
    let connection = connection_config_from_env()?;
    let run = run_config_from_env()?;
    let catalog = catalog_from_env()?;

    let request = PivotRequest {
        source_table: TableName::parse(&run.source_table)?,
        batch_size: run.batch_size,
        duplicate_policy: run.duplicate_policy,
        ..PivotRequest::new(field)
    };

    println!(
        "Pivot start | db={} source={} target={} entities={} batch_size={} duplicates={:?}",
        connection.db_path.display(),
        request.source_table,
        request.target_table,
        catalog.len(),
        request.batch_size,
        request.duplicate_policy
    );

    let mut sink = SqliteSink::open(&connection)?;
    let report = match run_pivot(&mut sink, &catalog, &request) {
        Ok(report) => report,
        Err(err) => {
            log_run_failed(RUN, &err);
            return Err(err.into());
        }
    };
    let nulls = match verify_null_counts(&mut sink, &report.table, &catalog, false) {
        Ok(nulls) => nulls,
        Err(err) => {
            log_run_failed(RUN, &err);
            return Err(err.into());
        }
    };
    sink.close()?;

    println!(
        "Pivot done | table={} dates={} batches={} columns={} null_warnings={}",
        report.table,
        report.dates_seeded,
        report.batches_committed,
        report.columns_updated,
        nulls.warnings.len()
    );

    log_run_finish(RUN, started.elapsed());
    Ok(())
}

use std::time::Instant;

use stockwide::{
    generate_config_from_env, generate_stock_files, init_logging, log_run_failed, log_run_finish,
    log_run_start, logging_config_from_env,
};

const RUN: &str = "stockwide_generate";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start(RUN, &logging);
    let started = Instant::now();

    let cfg = generate_config_from_env()?;
    println!(
        "Generate start | dir={} files={} stocks={} range={}..{} file_size_mib={}",
        cfg.output_dir.display(),
        cfg.num_files,
        cfg.num_stocks,
        cfg.start_date,
        cfg.end_date,
        cfg.file_size_mib
            .map_or_else(|| "range".to_string(), |size| size.to_string())
    );

    let report = match generate_stock_files(&cfg) {
        Ok(report) => report,
        Err(err) => {
            log_run_failed(RUN, &err);
            return Err(err.into());
        }
    };

    for path in &report.files {
        println!("  wrote {}", path.display());
    }
    println!(
        "Generate done | files={} rows={}",
        report.files.len(),
        report.rows_written
    );

    log_run_finish(RUN, started.elapsed());
    Ok(())
}

//! Synthetic narrow CSV files: business-day random-walk prices with
//! log-uniform trade volumes.

use std::fs;
use std::path::PathBuf;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const MIN_VOLUME: f64 = 1_000.0;
const MAX_VOLUME: f64 = 500_000_000.0;
const MAX_DAILY_MOVE: f64 = 0.02;
const PRICE_FLOOR: f64 = 1.0;
/// Rough CSV row width used to turn a file size into a row count.
const BYTES_PER_ROW: u64 = 25;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid generate config: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    pub output_dir: PathBuf,
    pub num_files: usize,
    pub num_stocks: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Fixed seed for reproducible output.
    pub seed: Option<u64>,
    /// Approximate size of each file. When set, dates per file follow from the
    /// size instead of splitting the whole range across `num_files`.
    pub file_size_mib: Option<f64>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            num_files: 2,
            num_stocks: 200,
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid default start date"),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31).expect("valid default end date"),
            seed: None,
            file_size_mib: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateReport {
    pub files: Vec<PathBuf>,
    pub rows_written: u64,
}

pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// Writes `stock_data_<n>.csv` files. Without a target size the business-day
/// range is split evenly; with one, each file gets as many dates as the size
/// allows and dates past the last file are not written. Prices continue across
/// files; every stock has one row per date.
pub fn generate_stock_files(cfg: &GenerateConfig) -> Result<GenerateReport, GenerateError> {
    if cfg.num_files == 0 {
        return Err(GenerateError::InvalidConfig("num_files must be >= 1".to_string()));
    }
    if cfg.num_stocks == 0 {
        return Err(GenerateError::InvalidConfig("num_stocks must be >= 1".to_string()));
    }
    if cfg.end_date < cfg.start_date {
        return Err(GenerateError::InvalidConfig(
            "end_date must not be before start_date".to_string(),
        ));
    }

    let dates = business_days(cfg.start_date, cfg.end_date);
    if dates.is_empty() {
        return Err(GenerateError::InvalidConfig(
            "date range contains no business days".to_string(),
        ));
    }

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut prices: Vec<f64> = (0..cfg.num_stocks)
        .map(|_| rng.gen_range(10.0..1_000.0))
        .collect();

    let dates_per_file = match cfg.file_size_mib {
        Some(size_mib) => sized_dates_per_file(cfg, size_mib, dates.len())?,
        None => dates.len().div_ceil(cfg.num_files),
    };

    fs::create_dir_all(&cfg.output_dir)?;
    let chunks: Vec<&[NaiveDate]> = dates
        .chunks(dates_per_file)
        .take(cfg.num_files)
        .collect();
    if chunks.len() < cfg.num_files {
        warn!(
            component = "generate",
            event = "generate.files.truncated",
            requested_files = cfg.num_files,
            written_files = chunks.len(),
            business_days = dates.len()
        );
    }

    let mut files = Vec::with_capacity(chunks.len());
    let mut rows_written = 0_u64;
    for (file_idx, chunk) in chunks.iter().enumerate() {
        let path = cfg.output_dir.join(format!("stock_data_{}.csv", file_idx + 1));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["id", "date", "price", "trade_volume"])?;

        for (date_idx, date) in chunk.iter().enumerate() {
            let first_overall = file_idx == 0 && date_idx == 0;
            for (stock_idx, price) in prices.iter_mut().enumerate() {
                if !first_overall {
                    let change = *price * rng.gen_range(-MAX_DAILY_MOVE..MAX_DAILY_MOVE);
                    *price = (*price + change).max(PRICE_FLOOR);
                }
                let volume = log_uniform(&mut rng, MIN_VOLUME, MAX_VOLUME);
                writer.write_record([
                    (stock_idx + 1).to_string(),
                    date.format("%Y-%m-%d").to_string(),
                    format!("{price:.2}"),
                    volume.to_string(),
                ])?;
                rows_written += 1;
            }
        }
        writer.flush()?;

        info!(
            component = "generate",
            event = "generate.file.written",
            path = %path.display(),
            dates = chunk.len(),
            stocks = cfg.num_stocks
        );
        files.push(path);
    }

    Ok(GenerateReport {
        files,
        rows_written,
    })
}

fn sized_dates_per_file(
    cfg: &GenerateConfig,
    size_mib: f64,
    available_dates: usize,
) -> Result<usize, GenerateError> {
    if !size_mib.is_finite() || size_mib <= 0.0 {
        return Err(GenerateError::InvalidConfig(format!(
            "file_size_mib must be > 0, got {size_mib}"
        )));
    }

    let rows_per_file = (size_mib * BYTES_PER_MIB) as u64 / BYTES_PER_ROW;
    let dates_needed =
        (rows_per_file * cfg.num_files as u64).div_ceil(u64::from(cfg.num_stocks)) as usize;

    if dates_needed > available_dates {
        warn!(
            component = "generate",
            event = "generate.range.too_short",
            requested_files = cfg.num_files,
            file_size_mib = size_mib,
            available_dates,
            dates_needed
        );
        return Ok((available_dates / cfg.num_files).max(1));
    }
    Ok(dates_needed.div_ceil(cfg.num_files).max(1))
}

fn log_uniform(rng: &mut impl Rng, min: f64, max: f64) -> u64 {
    let value = rng.gen_range(min.ln()..max.ln()).exp().round() as u64;
    value.clamp(min as u64, max as u64)
}

use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{MarketDataProvider, PriceHistory, PriceRow};
use crate::utils::error::{Error, Result};

/// One CSV row. Header names from the SQL export (`Date`, `Close`,
/// `Unadj_Close`, `Open Interest`) are accepted as aliases.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date")]
    date: String,
    #[serde(default, alias = "Close")]
    close: Option<f64>,
    #[serde(default, alias = "Unadj_Close")]
    unadj_close: Option<f64>,
    #[serde(default, alias = "Open Interest")]
    open_interest: Option<f64>,
}

/// CSV provider reading `<dir>/<SYMBOL>.csv`
#[derive(Debug, Clone)]
pub struct CsvPriceProvider {
    dir: PathBuf,
}

impl CsvPriceProvider {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol.to_uppercase()))
    }

    /// Symbols that have a CSV file in the price directory.
    pub fn available_symbols(&self) -> Result<Vec<String>> {
        let files = crate::utils::list_files_with_extension(&self.dir, "csv")?;
        Ok(files
            .iter()
            .filter_map(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_uppercase())
            .collect())
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // tolerate timestamps by only looking at the calendar part
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

impl MarketDataProvider for CsvPriceProvider {
    fn load(&self, symbol: &str) -> Result<PriceHistory> {
        let path = self.path_for(symbol);
        if !path.is_file() {
            return Err(Error::DataError(format!(
                "no price history for {symbol} at {}",
                path.display()
            )));
        }
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| Error::DataError(format!("CSV read error: {e}")))?;

        let mut rows = Vec::new();
        for rec in rdr.deserialize::<CsvRow>() {
            let row = rec.map_err(|e| Error::DataError(format!("CSV parse error: {e}")))?;
            let date = parse_date(&row.date).ok_or_else(|| {
                Error::DataError(format!("{symbol}: unparseable date {:?}", row.date))
            })?;
            let Some(close) = row.close.filter(|c| c.is_finite()) else {
                log::debug!("{symbol}: skipping {date} without a close");
                continue;
            };
            rows.push(PriceRow {
                date,
                close,
                unadj_close: row.unadj_close.filter(|c| c.is_finite()).unwrap_or(close),
                open_interest: row.open_interest,
            });
        }
        if rows.is_empty() {
            return Err(Error::DataError(format!("{symbol}: price history is empty")));
        }
        log::debug!("Loaded {} price rows for {}", rows.len(), symbol);
        PriceHistory::new(symbol, rows)
    }
}

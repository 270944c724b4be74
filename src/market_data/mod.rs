//! Market data snapshots: per-instrument price histories and the
//! date-aligned returns table derived from them.

use chrono::NaiveDate;
use statrs::statistics::Statistics;
use std::collections::BTreeSet;

use crate::utils::error::{Error, Result};

pub mod providers;

pub use providers::CsvPriceProvider;

/// One dated observation of an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    /// Back-adjusted close, used for returns
    pub close: f64,
    /// Unadjusted close, used for notional exposure
    pub unadj_close: f64,
    pub open_interest: Option<f64>,
}

/// Price history of one instrument, ascending by date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub symbol: String,
    rows: Vec<PriceRow>,
}

impl PriceHistory {
    /// Sorts rows by date. Two rows on the same date are a data error.
    pub fn new(symbol: &str, mut rows: Vec<PriceRow>) -> Result<Self> {
        rows.sort_by_key(|r| r.date);
        if let Some(w) = rows.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(Error::DataError(format!(
                "{symbol}: duplicate price row for {}",
                w[0].date
            )));
        }
        Ok(Self { symbol: symbol.to_uppercase(), rows })
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Most recent unadjusted price.
    pub fn most_recent_price(&self) -> Result<f64> {
        self.rows
            .last()
            .map(|r| r.unadj_close)
            .filter(|p| p.is_finite())
            .ok_or_else(|| Error::missing(&self.symbol, "price"))
    }

    /// Open interest on the most recent row.
    pub fn most_recent_open_interest(&self) -> Result<f64> {
        self.rows
            .last()
            .and_then(|r| r.open_interest)
            .filter(|oi| oi.is_finite() && *oi >= 0.0)
            .ok_or_else(|| Error::missing(&self.symbol, "open interest"))
    }
}

/// Loads price histories from some external store.
pub trait MarketDataProvider {
    fn load(&self, symbol: &str) -> Result<PriceHistory>;

    /// Load every symbol, failing on the first one that cannot be loaded.
    fn load_all(&self, symbols: &[String]) -> Result<Vec<PriceHistory>> {
        symbols.iter().map(|s| self.load(s)).collect()
    }
}

/// Daily fractional returns per instrument on the dates common to all of them.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnsTable {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl ReturnsTable {
    /// Build from pre-computed return columns sharing `dates`.
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut symbols = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (symbol, column) in columns {
            if column.len() != dates.len() {
                return Err(Error::DataError(format!(
                    "returns for {symbol} have {} rows, expected {}",
                    column.len(),
                    dates.len()
                )));
            }
            if symbols.contains(&symbol) {
                return Err(Error::DataError(format!("duplicate returns column {symbol}")));
            }
            symbols.push(symbol);
            values.push(column);
        }
        Ok(Self { dates, symbols, columns: values })
    }

    /// Inner-join adjusted closes on date, then take `p_t / p_{t-1} - 1`.
    pub fn from_histories(histories: &[PriceHistory]) -> Result<Self> {
        let mut common: Option<BTreeSet<NaiveDate>> = None;
        for h in histories {
            let dates: BTreeSet<NaiveDate> = h.rows().iter().map(|r| r.date).collect();
            common = Some(match common {
                | Some(c) => c.intersection(&dates).copied().collect(),
                | None => dates,
            });
        }
        let common: Vec<NaiveDate> = common.unwrap_or_default().into_iter().collect();

        let mut columns = Vec::with_capacity(histories.len());
        for h in histories {
            let mut prices = Vec::with_capacity(common.len());
            let mut rows = h.rows().iter().peekable();
            for date in &common {
                while rows.peek().map_or(false, |r| r.date < *date) {
                    rows.next();
                }
                match rows.next() {
                    | Some(r) if r.date == *date => prices.push(r.close),
                    | _ => return Err(Error::missing(&h.symbol, "price")),
                }
            }
            let mut returns = Vec::with_capacity(prices.len().saturating_sub(1));
            for w in prices.windows(2) {
                if w[0] == 0.0 {
                    return Err(Error::DataError(format!("{}: zero price in history", h.symbol)));
                }
                returns.push(w[1] / w[0] - 1.0);
            }
            columns.push((h.symbol.clone(), returns));
        }

        let dates = common.into_iter().skip(1).collect();
        Self::new(dates, columns)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Number of dated rows
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn require_column(&self, symbol: &str) -> Result<&[f64]> {
        self.column(symbol).ok_or_else(|| Error::missing(symbol, "returns"))
    }

    /// Restrict to `symbols`, in that order.
    pub fn select(&self, symbols: &[String]) -> Result<Self> {
        let mut columns = Vec::with_capacity(symbols.len());
        for s in symbols {
            columns.push((s.clone(), self.require_column(s)?.to_vec()));
        }
        Self::new(self.dates.clone(), columns)
    }

    /// Sample standard deviation of daily returns scaled by sqrt(trading days).
    pub fn annualized_stddev(&self, symbol: &str, trading_days_per_year: u32) -> Result<f64> {
        let column = self.require_column(symbol)?;
        annualized_stddev(symbol, column, trading_days_per_year)
    }
}

/// Sample standard deviation of `returns` scaled by sqrt(trading days).
pub fn annualized_stddev(symbol: &str, returns: &[f64], trading_days_per_year: u32) -> Result<f64> {
    if returns.len() < 2 {
        return Err(Error::NumericalError(format!(
            "{symbol}: need at least two returns to estimate volatility, have {}",
            returns.len()
        )));
    }
    let daily = returns.iter().std_dev();
    if !daily.is_finite() {
        return Err(Error::NumericalError(format!("{symbol}: volatility estimate is not finite")));
    }
    Ok(daily * (trading_days_per_year as f64).sqrt())
}

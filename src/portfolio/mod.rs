//! The held position book and the per-instrument arithmetic around it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::utils::error::{Error, Result};
use crate::utils::types::{Book, PositionVector};

pub mod buffer;
pub mod costs;
pub mod exposure;

pub use buffer::{buffered_position, buffered_positions};
pub use costs::cost_estimates;
pub use exposure::{exposures_for, notional_exposure_per_contract, notional_exposures};

#[derive(Debug, Serialize, Deserialize)]
struct BookRow {
    symbol: String,
    contracts: i64,
}

/// Integer contracts currently held, in universe order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeldPositionBook {
    positions: Book,
}

impl HeldPositionBook {
    pub fn new(positions: Book) -> Self {
        Self { positions }
    }

    /// Nothing held in any instrument.
    pub fn flat(universe: &[String]) -> Self {
        Self { positions: PositionVector::filled(universe, 0) }
    }

    /// Read a `symbol,contracts` CSV. Instruments without a row are held at 0;
    /// rows for symbols outside the universe are skipped. A symbol may appear
    /// only once (case-insensitively).
    pub fn from_csv<P: AsRef<Path>>(path: P, universe: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let mut book = Self::flat(universe);
        let mut seen = HashSet::new();
        for row in rdr.deserialize::<BookRow>() {
            let row = row?;
            let symbol = row.symbol.to_uppercase();
            if !seen.insert(symbol.clone()) {
                return Err(Error::DataError(format!(
                    "duplicate held position for {symbol} in {}",
                    path.display()
                )));
            }
            if universe.contains(&symbol) {
                book.positions.insert(&symbol, row.contracts);
            } else {
                log::warn!(
                    "Ignoring held position in {} from {}: not in the active universe",
                    symbol,
                    path.display()
                );
            }
        }
        log::info!("Loaded held positions {} from {}", book.positions, path.display());
        Ok(book)
    }

    /// Write the book as a `symbol,contracts` CSV.
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        crate::utils::ensure_parent_dir(path)?;
        let mut wtr = csv::Writer::from_path(path)?;
        for (symbol, contracts) in self.positions.iter() {
            wtr.serialize(BookRow { symbol: symbol.to_string(), contracts })?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_vector(&self) -> Book {
        self.positions.clone()
    }

    pub fn get(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).unwrap_or(0)
    }

    /// Take on a new book. Instruments outside it keep their held position.
    pub fn commit(&mut self, book: &Book) {
        for (symbol, contracts) in book.iter() {
            self.positions.insert(symbol, contracts);
        }
    }

    /// Held positions re-keyed to `universe`; instruments not held read as 0.
    pub fn for_universe(&self, universe: &[String]) -> Book {
        PositionVector::filled(universe, 0).map(|s, _| self.get(s))
    }
}

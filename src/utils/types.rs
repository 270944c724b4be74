//! Common types used throughout the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::{Error, Result};

/// A tradable futures instrument as seen by one rebalance cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    /// Contract multiplier (dollars per point)
    pub multiplier: f64,
    /// Most recent unadjusted price
    pub price: f64,
    /// Most recent market-wide open interest (contracts)
    pub open_interest: f64,
    /// Annualized standard deviation of daily percentage returns
    pub annualized_stddev: f64,
    /// Share of risk allocated to this instrument
    pub weight: f64,
}

impl Instrument {
    pub fn new(symbol: &str, multiplier: f64, price: f64) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            multiplier,
            price,
            open_interest: 0.0,
            annualized_stddev: 0.0,
            weight: 0.0,
        }
    }

    pub fn with_open_interest(mut self, open_interest: f64) -> Self {
        self.open_interest = open_interest;
        self
    }

    pub fn with_stddev(mut self, annualized_stddev: f64) -> Self {
        self.annualized_stddev = annualized_stddev;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (x{} @ {})", self.symbol, self.multiplier, self.price)
    }
}

/// Symbols of a universe, in universe order.
pub fn symbols(instruments: &[Instrument]) -> Vec<String> {
    instruments.iter().map(|i| i.symbol.clone()).collect()
}

/// Round half away from zero into a whole number of contracts.
pub fn round_contracts(x: f64) -> i64 {
    // f64::round already rounds half-way cases away from zero
    x.round() as i64
}

/// Instrument-keyed vector that remembers insertion (universe) order.
///
/// Every pipeline stage consumes one of these and produces a fresh one; keys
/// are checked against the active universe with [`PositionVector::aligned_to`].
#[derive(Debug, Clone, PartialEq)]
pub struct PositionVector<T> {
    symbols: Vec<String>,
    values: Vec<T>,
}

/// Continuous positions (ideal, optimised-continuous, risk adjusted).
pub type IdealPositions = PositionVector<f64>;

/// Whole-contract positions.
pub type Book = PositionVector<i64>;

impl<T> Default for PositionVector<T> {
    fn default() -> Self {
        Self { symbols: Vec::new(), values: Vec::new() }
    }
}

impl<T: Copy> PositionVector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(symbol, value)` pairs. Duplicate symbols are a data error.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
    {
        let mut out = Self::new();
        for (symbol, value) in pairs {
            let symbol = symbol.into();
            if out.contains(&symbol) {
                return Err(Error::DataError(format!("duplicate instrument {symbol}")));
            }
            out.symbols.push(symbol);
            out.values.push(value);
        }
        Ok(out)
    }

    /// Same value for every symbol.
    pub fn filled(symbols: &[String], value: T) -> Self {
        Self { symbols: symbols.to_vec(), values: vec![value; symbols.len()] }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.index_of(symbol).is_some()
    }

    fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<T> {
        self.index_of(symbol).map(|i| self.values[i])
    }

    /// Look up a value, failing with `MissingInstrumentData` when absent.
    pub fn require(&self, symbol: &str, field: &'static str) -> Result<T> {
        self.get(symbol).ok_or_else(|| Error::missing(symbol, field))
    }

    /// Replace the value for `symbol`, appending it if new.
    pub fn insert(&mut self, symbol: &str, value: T) {
        match self.index_of(symbol) {
            | Some(i) => self.values[i] = value,
            | None => {
                self.symbols.push(symbol.to_string());
                self.values.push(value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, T)> + '_ {
        self.symbols.iter().map(String::as_str).zip(self.values.iter().copied())
    }

    pub fn map<U, F>(&self, mut f: F) -> PositionVector<U>
    where
        F: FnMut(&str, T) -> U,
    {
        PositionVector {
            symbols: self.symbols.clone(),
            values: self.iter().map(|(s, v)| f(s, v)).collect(),
        }
    }

    /// Fallible [`PositionVector::map`].
    pub fn try_map<U, F>(&self, mut f: F) -> Result<PositionVector<U>>
    where
        F: FnMut(&str, T) -> Result<U>,
    {
        let mut values = Vec::with_capacity(self.len());
        for (s, v) in self.iter() {
            values.push(f(s, v)?);
        }
        Ok(PositionVector { symbols: self.symbols.clone(), values })
    }

    /// Re-key to exactly `universe`, in universe order.
    ///
    /// A symbol of the universe missing from `self` yields
    /// `MissingInstrumentData`; a symbol of `self` outside the universe
    /// yields `DataError`.
    pub fn aligned_to(&self, universe: &[String], field: &'static str) -> Result<Self> {
        if let Some(extra) = self.symbols.iter().find(|s| !universe.contains(s)) {
            return Err(Error::DataError(format!(
                "{field} contains instrument {extra} outside the active universe"
            )));
        }
        let mut values = Vec::with_capacity(universe.len());
        for symbol in universe {
            values.push(self.require(symbol, field)?);
        }
        Ok(Self { symbols: universe.to_vec(), values })
    }
}

impl Book {
    pub fn to_continuous(&self) -> IdealPositions {
        self.map(|_, v| v as f64)
    }
}

impl IdealPositions {
    /// Element-wise rounding, half away from zero.
    pub fn rounded(&self) -> Book {
        self.map(|_, v| round_contracts(v))
    }
}

impl<T: fmt::Display + Copy> fmt::Display for PositionVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (s, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{s}: {v}")?;
        }
        write!(f, "}}")
    }
}

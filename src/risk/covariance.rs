//! Instrument covariance estimated from the returns table.

use statrs::statistics::Statistics;

use crate::market_data::ReturnsTable;
use crate::utils::error::{Error, Result};

/// Square, symmetric covariance matrix keyed by instrument symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    symbols: Vec<String>,
    values: Vec<f64>, // row-major, symbols.len() squared
}

impl CovarianceMatrix {
    /// Sample covariance (n - 1) of daily returns.
    pub fn from_returns(returns: &ReturnsTable) -> Result<Self> {
        if returns.len() < 2 {
            return Err(Error::NumericalError(format!(
                "need at least two aligned return rows to estimate covariance, have {}",
                returns.len()
            )));
        }
        let symbols = returns.symbols().to_vec();
        let n = symbols.len();
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            let a = returns.require_column(&symbols[i])?;
            for j in i..n {
                let b = returns.require_column(&symbols[j])?;
                let c = a.iter().covariance(b.iter());
                if !c.is_finite() {
                    return Err(Error::NumericalError(format!(
                        "covariance of {} and {} is not finite",
                        symbols[i], symbols[j]
                    )));
                }
                values[i * n + j] = c;
                values[j * n + i] = c;
            }
        }
        Ok(Self { symbols, values })
    }

    /// Build from an explicit row-major matrix.
    pub fn from_rows(symbols: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = symbols.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(Error::NumericalError(format!("covariance matrix must be {n}x{n}")));
        }
        let values: Vec<f64> = rows.into_iter().flatten().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::NumericalError("covariance matrix has non-finite entries".into()));
        }
        for i in 0..n {
            for j in 0..i {
                let (a, b) = (values[i * n + j], values[j * n + i]);
                if (a - b).abs() > 1e-12 * a.abs().max(b.abs()).max(1.0) {
                    return Err(Error::NumericalError(format!(
                        "covariance matrix is not symmetric at ({}, {})",
                        symbols[i], symbols[j]
                    )));
                }
            }
        }
        Ok(Self { symbols, values })
    }

    /// Scale daily covariance to annual.
    pub fn annualized(&self, trading_days_per_year: u32) -> Self {
        let k = trading_days_per_year as f64;
        Self { symbols: self.symbols.clone(), values: self.values.iter().map(|v| v * k).collect() }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dim(&self) -> usize {
        self.symbols.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.dim() + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.dim();
        &self.values[i * n..(i + 1) * n]
    }

    /// Sub-matrix for `symbols`, in that order.
    pub fn select(&self, symbols: &[String]) -> Result<Self> {
        let idx = symbols
            .iter()
            .map(|s| {
                self.symbols
                    .iter()
                    .position(|x| x == s)
                    .ok_or_else(|| Error::missing(s, "covariance"))
            })
            .collect::<Result<Vec<_>>>()?;
        let n = idx.len();
        let mut values = Vec::with_capacity(n * n);
        for &i in &idx {
            for &j in &idx {
                values.push(self.get(i, j));
            }
        }
        Ok(Self { symbols: symbols.to_vec(), values })
    }

    /// `w' * Sigma * w`, rejecting results that are not a usable variance.
    pub fn quadratic_form(&self, w: &[f64]) -> Result<f64> {
        let n = self.dim();
        if w.len() != n {
            return Err(Error::NumericalError(format!(
                "weight vector has {} entries, covariance is {n}x{n}",
                w.len()
            )));
        }
        let mut total = 0.0;
        let mut scale = 0.0;
        for i in 0..n {
            if w[i] == 0.0 {
                continue;
            }
            for j in 0..n {
                let term = w[i] * self.get(i, j) * w[j];
                total += term;
                scale += term.abs();
            }
        }
        if !total.is_finite() {
            return Err(Error::NumericalError("portfolio variance is not finite".into()));
        }
        if total < -1e-12 * scale.max(f64::MIN_POSITIVE) {
            return Err(Error::NumericalError(format!(
                "covariance matrix is not positive semi-definite (variance {total})"
            )));
        }
        Ok(total.max(0.0))
    }
}

//! Risk limit settings shared by every pipeline stage.
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// Immutable risk configuration threaded through every stage of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskLimits {
    /// Capital available for trading, in account currency
    pub capital: f64,
    /// Target annualized portfolio volatility as a fraction of capital (tau)
    pub risk_target: f64,
    /// Instrument diversification multiplier
    pub idm: f64,
    /// Default instrument weight; `None` means equal weight (1/N)
    #[serde(default)]
    pub instrument_weight: Option<f64>,
    /// Long-run average absolute forecast
    #[serde(default = "default_average_forecast")]
    pub average_forecast: f64,
    /// Forecast cap used for sizing limits
    #[serde(default = "default_max_forecast")]
    pub max_forecast: f64,
    /// Head-room applied on top of the forecast cap
    #[serde(default = "default_max_forecast_margin")]
    pub max_forecast_margin: f64,
    /// Maximum notional exposure of one instrument relative to capital
    #[serde(default = "default_max_position_leverage_ratio")]
    pub max_position_leverage_ratio: f64,
    /// Maximum gross notional exposure of the whole book relative to capital
    #[serde(default = "default_max_portfolio_leverage")]
    pub max_portfolio_leverage: f64,
    /// Maximum share of market-wide open interest held in one instrument
    #[serde(default = "default_max_pct_of_open_interest")]
    pub max_pct_of_open_interest: f64,
    /// Half-width of the no-trade band, as a fraction of the held position
    #[serde(default = "default_buffer_fraction")]
    pub buffer_fraction: f64,
    /// Weight of trading cost against tracking error in the optimizer
    #[serde(default = "default_cost_penalty_scalar")]
    pub cost_penalty_scalar: f64,
    #[serde(default = "default_trading_days_per_year")]
    pub trading_days_per_year: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            capital: 500_000.0,
            risk_target: 0.20,
            idm: 2.5,
            instrument_weight: None,
            average_forecast: default_average_forecast(),
            max_forecast: default_max_forecast(),
            max_forecast_margin: default_max_forecast_margin(),
            max_position_leverage_ratio: default_max_position_leverage_ratio(),
            max_portfolio_leverage: default_max_portfolio_leverage(),
            max_pct_of_open_interest: default_max_pct_of_open_interest(),
            buffer_fraction: default_buffer_fraction(),
            cost_penalty_scalar: default_cost_penalty_scalar(),
            trading_days_per_year: default_trading_days_per_year(),
        }
    }
}

// --------- Helper default functions for serde ---------
fn default_average_forecast() -> f64 {
    10.0
}
fn default_max_forecast() -> f64 {
    20.0
}
fn default_max_forecast_margin() -> f64 {
    0.5
}
fn default_max_position_leverage_ratio() -> f64 {
    2.0
}
fn default_max_portfolio_leverage() -> f64 {
    20.0
}
fn default_max_pct_of_open_interest() -> f64 {
    0.01
}
fn default_buffer_fraction() -> f64 {
    0.1
}
fn default_cost_penalty_scalar() -> f64 {
    10.0
}
fn default_trading_days_per_year() -> u32 {
    256
}

fn require(ok: bool, msg: impl FnOnce() -> String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::ConfigError(msg()))
    }
}

impl RiskLimits {
    /// Reject settings no stage can work with. Runs before any stage.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("capital", self.capital),
            ("risk_target", self.risk_target),
            ("idm", self.idm),
            ("average_forecast", self.average_forecast),
            ("max_forecast", self.max_forecast),
            ("max_forecast_margin", self.max_forecast_margin),
            ("max_position_leverage_ratio", self.max_position_leverage_ratio),
            ("max_portfolio_leverage", self.max_portfolio_leverage),
            ("max_pct_of_open_interest", self.max_pct_of_open_interest),
            ("buffer_fraction", self.buffer_fraction),
            ("cost_penalty_scalar", self.cost_penalty_scalar),
        ];
        for (name, value) in finite {
            require(value.is_finite(), || format!("{name} must be finite, got {value}"))?;
        }

        require(self.capital > 0.0, || format!("capital must be positive, got {}", self.capital))?;
        require(self.risk_target > 0.0, || {
            format!("risk_target must be positive, got {}", self.risk_target)
        })?;
        require(self.buffer_fraction >= 0.0, || {
            format!("buffer_fraction must not be negative, got {}", self.buffer_fraction)
        })?;
        require(self.idm > 0.0, || format!("idm must be positive, got {}", self.idm))?;
        require(self.average_forecast > 0.0, || {
            format!("average_forecast must be positive, got {}", self.average_forecast)
        })?;
        require(self.max_forecast >= 0.0, || {
            format!("max_forecast must not be negative, got {}", self.max_forecast)
        })?;
        require(self.max_forecast_margin >= 0.0, || {
            format!("max_forecast_margin must not be negative, got {}", self.max_forecast_margin)
        })?;
        require(self.max_position_leverage_ratio > 0.0, || {
            format!(
                "max_position_leverage_ratio must be positive, got {}",
                self.max_position_leverage_ratio
            )
        })?;
        require(self.max_portfolio_leverage > 0.0, || {
            format!("max_portfolio_leverage must be positive, got {}", self.max_portfolio_leverage)
        })?;
        require(self.max_pct_of_open_interest >= 0.0, || {
            format!(
                "max_pct_of_open_interest must not be negative, got {}",
                self.max_pct_of_open_interest
            )
        })?;
        require(self.cost_penalty_scalar >= 0.0, || {
            format!("cost_penalty_scalar must not be negative, got {}", self.cost_penalty_scalar)
        })?;
        require(self.trading_days_per_year > 0, || "trading_days_per_year must be positive".into())?;
        if let Some(w) = self.instrument_weight {
            require(w > 0.0 && w <= 1.0, || format!("instrument_weight must be in (0, 1], got {w}"))?;
        }
        Ok(())
    }

    /// Weight for one instrument of a universe of `universe_size`.
    pub fn default_weight(&self, universe_size: usize) -> f64 {
        match self.instrument_weight {
            | Some(w) => w,
            | None if universe_size > 0 => 1.0 / universe_size as f64,
            | None => 0.0,
        }
    }

    pub fn annualization_factor(&self) -> f64 {
        (self.trading_days_per_year as f64).sqrt()
    }
}

//! Risk controls applied between the optimizer and the buffer: instrument
//! eligibility, covariance estimation, the two-level overlay and the audit
//! records it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::Error;

pub mod covariance;
pub mod overlay;
pub mod position_sizer;
pub mod volatility;

pub use covariance::CovarianceMatrix;
pub use overlay::{InstrumentCaps, PortfolioScaling, RiskOverlay, RiskOverlayOutcome};
pub use position_sizer::{PositionSizer, VolatilityTargetSizer};
pub use volatility::{filter_instruments, passes_volatility_filter};

/// Which limit reduced a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Forecast,
    Leverage,
    OpenInterest,
    Portfolio,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            | LimitKind::Forecast => "forecast",
            | LimitKind::Leverage => "leverage",
            | LimitKind::OpenInterest => "open_interest",
            | LimitKind::Portfolio => "portfolio",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            | "forecast" => Ok(LimitKind::Forecast),
            | "leverage" => Ok(LimitKind::Leverage),
            | "open_interest" => Ok(LimitKind::OpenInterest),
            | "portfolio" => Ok(LimitKind::Portfolio),
            | other => Err(Error::DataError(format!("unknown limit kind {other:?}"))),
        }
    }
}

/// One triggered limit, destined for the append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub instrument: String,
    pub kind: LimitKind,
    pub pre_clamp: f64,
    pub post_clamp: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for RiskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} limit: {:.4} -> {:.4}",
            self.instrument, self.kind, self.pre_clamp, self.post_clamp
        )
    }
}

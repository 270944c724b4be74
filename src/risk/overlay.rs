//! Two-level, size-reducing risk overlay.
//!
//! The portfolio level scales the whole book down when its estimated
//! annualized volatility exceeds the risk target (or its gross leverage
//! exceeds the portfolio cap). The instrument level then clamps each
//! position against its forecast, leverage and open-interest caps. Neither
//! level ever increases a position.

use chrono::{DateTime, Utc};

use super::{CovarianceMatrix, LimitKind, RiskEvent};
use crate::config::RiskLimits;
use crate::utils::error::{Error, Result};
use crate::utils::types::{symbols, IdealPositions, Instrument};

/// Portfolio-level diagnostics and the multiplier that was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioScaling {
    /// Estimated annualized portfolio standard deviation before scaling
    pub estimated_stddev: f64,
    /// Sum of absolute position weights before scaling
    pub gross_leverage: f64,
    /// `min(1, risk_target / estimated_stddev)`; exactly 1 when within target
    pub risk_multiplier: f64,
    /// `min(1, max_portfolio_leverage / gross_leverage)`
    pub leverage_multiplier: f64,
    /// The multiplier applied to every position
    pub multiplier: f64,
}

/// Per-instrument position caps, in contracts (non-negative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentCaps {
    pub forecast: f64,
    pub leverage: f64,
    pub open_interest: f64,
}

impl InstrumentCaps {
    pub fn tightest(&self) -> f64 {
        self.forecast.min(self.leverage).min(self.open_interest)
    }

    fn ordered(&self) -> [(LimitKind, f64); 3] {
        [
            (LimitKind::Forecast, self.forecast),
            (LimitKind::Leverage, self.leverage),
            (LimitKind::OpenInterest, self.open_interest),
        ]
    }
}

/// Result of one overlay pass.
#[derive(Debug, Clone)]
pub struct RiskOverlayOutcome {
    pub positions: IdealPositions,
    pub scaling: PortfolioScaling,
    pub events: Vec<RiskEvent>,
}

// relative slack on the portfolio limits, so a book scaled exactly onto a
// limit is not scaled again on the next pass
const LIMIT_TOLERANCE: f64 = 1e-9;

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        f64::INFINITY
    }
}

/// Position weights `exposure * position / capital`.
pub fn position_weights(
    positions: &IdealPositions, exposures: &IdealPositions, capital: f64,
) -> Result<Vec<f64>> {
    if capital.is_nan() || capital <= 0.0 {
        return Err(Error::ConfigError(format!("capital must be positive, got {capital}")));
    }
    positions
        .iter()
        .map(|(s, p)| Ok(exposures.require(s, "notional exposure")? * p / capital))
        .collect()
}

/// Caps for one instrument with `exposure` dollars of notional per contract.
pub fn instrument_caps(instrument: &Instrument, exposure: f64, limits: &RiskLimits) -> InstrumentCaps {
    let forecast_ratio = limits.max_forecast / limits.average_forecast;
    let forecast = (1.0 + limits.max_forecast_margin)
        * forecast_ratio
        * safe_div(
            limits.capital * limits.idm * instrument.weight * limits.risk_target,
            exposure * instrument.annualized_stddev,
        );
    let leverage = safe_div(
        limits.max_position_leverage_ratio * limits.capital,
        limits.idm * instrument.weight * exposure,
    );
    let open_interest = limits.max_pct_of_open_interest * instrument.open_interest;
    InstrumentCaps { forecast, leverage, open_interest }
}

/// Clamp `position` to `caps`, preserving sign. A binding cap is taken down
/// to whole contracts so the final rounding cannot push the book back over
/// it; a position already inside every cap is returned unchanged.
pub fn clamp_position(
    symbol: &str, position: f64, caps: &InstrumentCaps, timestamp: DateTime<Utc>,
    events: &mut Vec<RiskEvent>,
) -> f64 {
    let sign = position.signum();
    let mut magnitude = position.abs();
    for (kind, cap) in caps.ordered() {
        if magnitude > cap {
            let clamped = cap.max(0.0).floor();
            events.push(RiskEvent {
                instrument: symbol.to_string(),
                kind,
                pre_clamp: sign * magnitude,
                post_clamp: sign * clamped,
                timestamp,
            });
            metrics::increment_counter!("positionbook_risk_clamps_total", "kind" => kind.as_str());
            magnitude = clamped;
        }
    }
    if magnitude == 0.0 {
        0.0
    } else {
        sign * magnitude
    }
}

/// Applies both overlay levels under one set of limits.
#[derive(Debug, Clone, Copy)]
pub struct RiskOverlay<'a> {
    limits: &'a RiskLimits,
}

impl<'a> RiskOverlay<'a> {
    pub fn new(limits: &'a RiskLimits) -> Self {
        Self { limits }
    }

    /// Estimate portfolio risk and leverage; never returns a multiplier above 1.
    pub fn portfolio_scaling(
        &self, positions: &IdealPositions, exposures: &IdealPositions,
        covariance: &CovarianceMatrix,
    ) -> Result<PortfolioScaling> {
        let weights = position_weights(positions, exposures, self.limits.capital)?;
        let covariance = covariance.select(positions.symbols())?;
        let variance = covariance.quadratic_form(&weights)?;
        let estimated_stddev = variance.sqrt() * self.limits.annualization_factor();
        if !estimated_stddev.is_finite() {
            return Err(Error::NumericalError("portfolio stddev is not finite".into()));
        }
        let gross_leverage: f64 = weights.iter().map(|w| w.abs()).sum();

        let risk_limit = self.limits.risk_target * (1.0 + LIMIT_TOLERANCE);
        let risk_multiplier = if estimated_stddev > risk_limit {
            self.limits.risk_target / estimated_stddev
        } else {
            1.0
        };
        let leverage_limit = self.limits.max_portfolio_leverage * (1.0 + LIMIT_TOLERANCE);
        let leverage_multiplier = if gross_leverage > leverage_limit {
            self.limits.max_portfolio_leverage / gross_leverage
        } else {
            1.0
        };
        Ok(PortfolioScaling {
            estimated_stddev,
            gross_leverage,
            risk_multiplier,
            leverage_multiplier,
            multiplier: risk_multiplier.min(leverage_multiplier),
        })
    }

    /// Run the portfolio level then the instrument level.
    ///
    /// `positions`, `exposures` and `instruments` must cover exactly the same
    /// universe; `covariance` must cover at least that universe.
    pub fn apply(
        &self, positions: &IdealPositions, instruments: &[Instrument], exposures: &IdealPositions,
        covariance: &CovarianceMatrix,
    ) -> Result<RiskOverlayOutcome> {
        self.limits.validate()?;
        let universe = symbols(instruments);
        let positions = positions.aligned_to(&universe, "positions")?;
        let exposures = exposures.aligned_to(&universe, "notional exposure")?;
        if let Some((s, _)) = positions.iter().find(|(_, p)| !p.is_finite()) {
            return Err(Error::NumericalError(format!("position for {s} is not finite")));
        }

        let timestamp = Utc::now();
        let mut events = Vec::new();

        let scaling = self.portfolio_scaling(&positions, &exposures, covariance)?;
        let scaled = if scaling.multiplier < 1.0 {
            log::warn!(
                "Portfolio risk {:.4} / leverage {:.3}: scaling book by {:.4}",
                scaling.estimated_stddev,
                scaling.gross_leverage,
                scaling.multiplier
            );
            metrics::increment_counter!("positionbook_portfolio_scalings_total");
            positions.map(|s, p| {
                let post = p * scaling.multiplier;
                if p != 0.0 {
                    events.push(RiskEvent {
                        instrument: s.to_string(),
                        kind: LimitKind::Portfolio,
                        pre_clamp: p,
                        post_clamp: post,
                        timestamp,
                    });
                }
                post
            })
        } else {
            positions
        };

        let mut adjusted = scaled.clone();
        for inst in instruments {
            let exposure = exposures.require(&inst.symbol, "notional exposure")?;
            let caps = instrument_caps(inst, exposure, self.limits);
            let before = scaled.require(&inst.symbol, "positions")?;
            let after = clamp_position(&inst.symbol, before, &caps, timestamp, &mut events);
            adjusted.insert(&inst.symbol, after);
        }

        Ok(RiskOverlayOutcome { positions: adjusted, scaling, events })
    }
}

//! Position sizing policies.
//! Each implementation converts a forecast into a continuous number of contracts.

use crate::config::RiskLimits;
use crate::portfolio::exposure::notional_exposure_per_contract;
use crate::utils::error::{Error, Result};
use crate::utils::types::{IdealPositions, Instrument, PositionVector};

/// Position sizing interface.
pub trait PositionSizer: Send + Sync {
    /// Return the ideal (continuous) position in contracts.
    ///
    /// * `forecast` – signed signal strength, scaled so its long-run average
    ///   magnitude is `average_forecast`.
    /// * `instrument` – the instrument being sized.
    fn size(&self, forecast: f64, instrument: &Instrument) -> f64;

    fn box_clone(&self) -> Box<dyn PositionSizer>;
}

impl Clone for Box<dyn PositionSizer> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Volatility targeting: an average forecast takes the instrument's share of
/// the risk target.
///
/// `N = forecast * capital * IDM * weight * tau / (average_forecast * exposure * sigma)`
#[derive(Debug, Clone)]
pub struct VolatilityTargetSizer {
    pub limits: RiskLimits,
}

impl VolatilityTargetSizer {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Ideal positions for every instrument; instruments without a forecast get 0.
    pub fn ideal_positions(
        &self, forecasts: &PositionVector<f64>, instruments: &[Instrument],
    ) -> Result<IdealPositions> {
        PositionVector::from_pairs(instruments.iter().map(|inst| {
            let f = forecasts.get(&inst.symbol).unwrap_or(0.0);
            (inst.symbol.clone(), self.size(f, inst))
        }))
    }
}

impl PositionSizer for VolatilityTargetSizer {
    fn size(&self, forecast: f64, instrument: &Instrument) -> f64 {
        forecast_to_contracts(forecast, instrument, &self.limits)
    }

    fn box_clone(&self) -> Box<dyn PositionSizer> {
        Box::new(self.clone())
    }
}

/// Contracts for one forecast. Zero exposure or zero volatility sizes to 0.
pub fn forecast_to_contracts(forecast: f64, instrument: &Instrument, limits: &RiskLimits) -> f64 {
    let exposure = notional_exposure_per_contract(instrument.price, instrument.multiplier);
    let denom = limits.average_forecast * exposure * instrument.annualized_stddev;
    if denom == 0.0 || !denom.is_finite() || !forecast.is_finite() {
        return 0.0;
    }
    forecast * limits.capital * limits.idm * instrument.weight * limits.risk_target / denom
}

/// Sum of trend and carry ideal positions; both must cover the same instruments.
pub fn combine_signals(trend: &IdealPositions, carry: &IdealPositions) -> Result<IdealPositions> {
    if trend.len() != carry.len() {
        return Err(Error::DataError(format!(
            "trend covers {} instruments, carry covers {}",
            trend.len(),
            carry.len()
        )));
    }
    trend.try_map(|s, t| Ok(t + carry.require(s, "carry position")?))
}

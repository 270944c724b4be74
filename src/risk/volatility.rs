//! Instrument eligibility: is an instrument volatile enough to reach the
//! risk target without excessive leverage?

use crate::config::RiskLimits;
use crate::market_data::{annualized_stddev, ReturnsTable};
use crate::utils::error::Result;
use crate::utils::types::Instrument;

/// Leverage (notional / capital) needed for an instrument with annualized
/// volatility `stddev` to carry its share of the risk target.
pub fn required_leverage(idm: f64, instrument_weight: f64, risk_target: f64, stddev: f64) -> f64 {
    let budget = risk_target * idm * instrument_weight;
    if stddev > 0.0 {
        budget / stddev
    } else if budget > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Lowest annualized volatility that stays within `max_leverage`.
pub fn minimum_volatility(
    idm: f64, instrument_weight: f64, risk_target: f64, max_leverage: f64,
) -> f64 {
    risk_target * idm * instrument_weight / max_leverage
}

/// True when the instrument can be sized to its risk share at or below
/// `max_leverage`, judged from its daily percentage returns.
#[allow(clippy::too_many_arguments)]
pub fn passes_volatility_filter(
    symbol: &str, idm: f64, instrument_weight: f64, risk_target: f64, returns: &[f64],
    max_leverage: f64, trading_days_per_year: u32,
) -> Result<bool> {
    let stddev = annualized_stddev(symbol, returns, trading_days_per_year)?;
    let leverage = required_leverage(idm, instrument_weight, risk_target, stddev);
    log::debug!(
        "{symbol}: annualized stddev {stddev:.4}, needs leverage {leverage:.3} (max {max_leverage})"
    );
    Ok(leverage <= max_leverage)
}

/// Keep the candidates that pass the volatility filter, preserving order.
pub fn filter_instruments(
    candidates: &[Instrument], returns: &ReturnsTable, limits: &RiskLimits,
) -> Result<Vec<Instrument>> {
    let mut accepted = Vec::with_capacity(candidates.len());
    for inst in candidates {
        let column = returns.require_column(&inst.symbol)?;
        let ok = passes_volatility_filter(
            &inst.symbol,
            limits.idm,
            inst.weight,
            limits.risk_target,
            column,
            limits.max_position_leverage_ratio,
            limits.trading_days_per_year,
        )?;
        if ok {
            accepted.push(inst.clone());
        } else {
            log::info!("{} rejected: too little volatility for the risk target", inst.symbol);
            metrics::increment_counter!("positionbook_instruments_filtered_total");
        }
    }
    Ok(accepted)
}

//! Immutable inputs of one rebalance cycle and how they are assembled from
//! configuration, price histories and forecasts.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use super::select_universe;
use crate::config::Config;
use crate::market_data::{MarketDataProvider, PriceHistory, ReturnsTable};
use crate::portfolio::cost_estimates;
use crate::risk::position_sizer::{combine_signals, VolatilityTargetSizer};
use crate::risk::CovarianceMatrix;
use crate::utils::error::{Error, Result};
use crate::utils::types::{symbols, IdealPositions, Instrument, PositionVector};

/// Everything the pipeline reads for one run, keyed to the active universe.
#[derive(Debug, Clone)]
pub struct RebalanceSnapshot {
    /// Active universe, in universe order
    pub instruments: Vec<Instrument>,
    /// Combined trend + carry ideal positions
    pub ideal: IdealPositions,
    /// Daily covariance of returns over the active universe
    pub covariance: CovarianceMatrix,
    pub costs: IdealPositions,
    /// Candidates dropped by the volatility filter
    pub rejected: Vec<String>,
}

impl RebalanceSnapshot {
    pub fn universe(&self) -> Vec<String> {
        symbols(&self.instruments)
    }
}

/// Trend and carry forecasts for one instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Forecast {
    pub trend: f64,
    pub carry: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastRow {
    symbol: String,
    #[serde(default)]
    trend: Option<f64>,
    #[serde(default)]
    carry: Option<f64>,
}

/// Read a `symbol,trend,carry` CSV. Blank cells read as 0.
pub fn load_forecasts<P: AsRef<Path>>(path: P) -> Result<PositionVector<Forecast>> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| Error::DataError(format!("cannot read forecasts {}: {e}", path.display())))?;
    let mut pairs = Vec::new();
    for row in rdr.deserialize::<ForecastRow>() {
        let row = row?;
        let forecast = Forecast { trend: row.trend.unwrap_or(0.0), carry: row.carry.unwrap_or(0.0) };
        if !(forecast.trend.is_finite() && forecast.carry.is_finite()) {
            return Err(Error::DataError(format!("non-finite forecast for {}", row.symbol)));
        }
        pairs.push((row.symbol.to_uppercase(), forecast));
    }
    PositionVector::from_pairs(pairs)
}

/// Instruments for every configured symbol, in configuration order.
///
/// Price and open interest come from the most recent row of each history,
/// volatility from the returns table, weights from the configuration (or
/// `1 / candidates` when not set).
pub fn build_universe(
    config: &Config, histories: &[PriceHistory], returns: &ReturnsTable,
) -> Result<Vec<Instrument>> {
    let n = config.instruments.len();
    let days = config.risk.trading_days_per_year;
    config
        .instruments
        .iter()
        .map(|ic| -> Result<Instrument> {
            let symbol = ic.symbol.to_uppercase();
            let history = histories
                .iter()
                .find(|h| h.symbol == symbol)
                .ok_or_else(|| Error::missing(&symbol, "price history"))?;
            Ok(Instrument::new(&symbol, ic.multiplier, history.most_recent_price()?)
                .with_open_interest(history.most_recent_open_interest()?)
                .with_stddev(returns.annualized_stddev(&symbol, days)?)
                .with_weight(config.weight_for(&symbol, n)))
        })
        .collect()
}

/// Spread the default weight over the survivors of the filter; explicit
/// per-instrument weights are kept as configured.
pub fn reweight(config: &Config, instruments: Vec<Instrument>) -> Vec<Instrument> {
    let n = instruments.len();
    instruments
        .into_iter()
        .map(|inst| {
            let w = config.weight_for(&inst.symbol, n);
            inst.with_weight(w)
        })
        .collect()
}

/// Filter the candidates, then keep filtering the survivors at their
/// reweighted shares until nothing more drops out. Every instrument returned
/// passes the filter at the weight it is sized with.
pub fn settle_universe(
    config: &Config, candidates: Vec<Instrument>, returns: &ReturnsTable,
) -> Result<Vec<Instrument>> {
    let mut current = candidates;
    loop {
        let accepted = reweight(config, select_universe(&current, returns, &config.risk)?);
        if accepted.len() == current.len() {
            return Ok(accepted);
        }
        debug!(before = current.len(), after = accepted.len(), "refiltering at survivor weights");
        current = accepted;
    }
}

/// Ideal positions for the universe: trend and carry sized separately, then summed.
pub fn ideal_from_forecasts(
    config: &Config, forecasts: &PositionVector<Forecast>, instruments: &[Instrument],
) -> Result<IdealPositions> {
    let sizer = VolatilityTargetSizer::new(config.risk.clone());
    let trend = sizer.ideal_positions(&forecasts.map(|_, f| f.trend), instruments)?;
    let carry = sizer.ideal_positions(&forecasts.map(|_, f| f.carry), instruments)?;
    combine_signals(&trend, &carry)
}

/// Load market data and forecasts named by `config`, filter the universe and
/// size the ideal positions.
pub fn prepare_snapshot(
    config: &Config, provider: &dyn MarketDataProvider,
) -> Result<RebalanceSnapshot> {
    config.validate()?;
    let candidates = config.instrument_symbols();
    let histories = provider.load_all(&candidates)?;
    let returns = ReturnsTable::from_histories(&histories)?;
    info!(
        candidates = candidates.len(),
        rows = returns.len(),
        "loaded price histories"
    );

    let all = build_universe(config, &histories, &returns)?;
    let instruments = settle_universe(config, all, &returns)?;
    let rejected: Vec<String> = candidates
        .iter()
        .filter(|s| !instruments.iter().any(|i| &i.symbol == *s))
        .cloned()
        .collect();
    let universe = symbols(&instruments);
    debug!(?universe, ?rejected, "active universe");

    let forecasts = load_forecasts(&config.data.forecasts)?;
    let ideal = ideal_from_forecasts(config, &forecasts, &instruments)?;
    let covariance = CovarianceMatrix::from_returns(&returns.select(&universe)?)?;
    let costs = cost_estimates(&universe, config.costs.per_contract, &config.cost_overrides())?;

    Ok(RebalanceSnapshot { instruments, ideal, covariance, costs, rejected })
}

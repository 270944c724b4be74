//! Rebalance engine: runs Optimizer -> Risk Overlay -> Buffer over one
//! snapshot and commits the result as the new held book.

use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, OptimizerConfig, RiskLimits};
use crate::market_data::ReturnsTable;
use crate::optimizer::{ConvergenceWarning, DynamicOptimizer, OptimizationProblem};
use crate::persistence::{NullSink, RiskEventSink};
use crate::portfolio::{buffered_positions, exposures_for, HeldPositionBook};
use crate::risk::{filter_instruments, PortfolioScaling, RiskEvent, RiskOverlay};
use crate::utils::error::{Error, Result};
use crate::utils::types::{symbols, Book, IdealPositions, Instrument, PositionVector};

pub mod snapshot;

pub use snapshot::{prepare_snapshot, RebalanceSnapshot};

/// Non-fatal conditions reported alongside a completed book.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    /// The optimizer stopped at its iteration cap
    Convergence(ConvergenceWarning),
    /// Risk events could not be written to the audit sink
    AuditSink(String),
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            | PipelineWarning::Convergence(w) => write!(f, "{w}"),
            | PipelineWarning::AuditSink(e) => write!(f, "risk events not recorded: {e}"),
        }
    }
}

/// Result of one successful rebalance.
#[derive(Debug, Clone)]
pub struct RebalanceReport {
    /// Final buffered integer book
    pub book: Book,
    /// Optimizer output
    pub optimized: Book,
    /// After portfolio scaling and instrument clamps
    pub risk_adjusted: IdealPositions,
    pub scaling: PortfolioScaling,
    pub events: Vec<RiskEvent>,
    pub iterations: usize,
    pub warnings: Vec<PipelineWarning>,
}

impl RebalanceReport {
    /// Contracts to trade per instrument against the book held before the run.
    pub fn trades(&self, previous: &HeldPositionBook) -> Book {
        self.book.map(|s, v| v - previous.get(s))
    }

    /// Pretty-printed JSON of the run: every stage's book keyed by symbol,
    /// the trades against `previous`, portfolio scaling and triggered limits.
    pub fn to_json(&self, previous: &HeldPositionBook) -> Result<String> {
        let events = serde_json::to_value(&self.events)?;
        let warnings: Vec<String> = self.warnings.iter().map(ToString::to_string).collect();
        let report = json!({
            "book": keyed(&self.book),
            "trades": keyed(&self.trades(previous)),
            "optimized": keyed(&self.optimized),
            "risk_adjusted": keyed(&self.risk_adjusted),
            "scaling": {
                "estimated_stddev": self.scaling.estimated_stddev,
                "gross_leverage": self.scaling.gross_leverage,
                "risk_multiplier": self.scaling.risk_multiplier,
                "leverage_multiplier": self.scaling.leverage_multiplier,
                "multiplier": self.scaling.multiplier,
            },
            "iterations": self.iterations,
            "events": events,
            "warnings": warnings,
        });
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

fn keyed<T: Copy + Into<Value>>(vector: &PositionVector<T>) -> Map<String, Value> {
    vector.iter().map(|(s, v)| (s.to_string(), v.into())).collect()
}

/// Run the volatility filter over the candidates.
pub fn select_universe(
    candidates: &[Instrument], returns: &ReturnsTable, limits: &RiskLimits,
) -> Result<Vec<Instrument>> {
    limits.validate()?;
    filter_instruments(candidates, returns, limits)
}

/// Owns the held book and serialises rebalances against it.
pub struct RebalanceEngine {
    limits: RiskLimits,
    optimizer: OptimizerConfig,
    held: Mutex<HeldPositionBook>,
    sink: Box<dyn RiskEventSink>,
}

impl fmt::Debug for RebalanceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebalanceEngine")
            .field("limits", &self.limits)
            .field("optimizer", &self.optimizer)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

impl RebalanceEngine {
    pub fn new(limits: RiskLimits, optimizer: OptimizerConfig, held: HeldPositionBook) -> Result<Self> {
        limits.validate()?;
        Ok(Self { limits, optimizer, held: Mutex::new(held), sink: Box::new(NullSink) })
    }

    pub fn from_config(config: &Config, held: HeldPositionBook) -> Result<Self> {
        config.validate()?;
        Self::new(config.risk.clone(), config.optimizer.clone(), held)
    }

    pub fn with_sink(mut self, sink: Box<dyn RiskEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Copy of the currently held book.
    pub fn held(&self) -> Result<HeldPositionBook> {
        Ok(self.lock_held()?.clone())
    }

    fn lock_held(&self) -> Result<std::sync::MutexGuard<'_, HeldPositionBook>> {
        self.held.lock().map_err(|_| Error::Other("held position book lock poisoned".into()))
    }

    pub fn select_universe(
        &self, candidates: &[Instrument], returns: &ReturnsTable,
    ) -> Result<Vec<Instrument>> {
        select_universe(candidates, returns, &self.limits)
    }

    /// Run all stages over `snapshot`. The held book is locked for the whole
    /// run and replaced only when every stage succeeds.
    pub fn rebalance(&self, snapshot: &RebalanceSnapshot) -> Result<RebalanceReport> {
        let mut held_book = self.lock_held()?;
        self.limits.validate()?;

        let universe = symbols(&snapshot.instruments);
        let ideal = snapshot.ideal.aligned_to(&universe, "ideal positions")?;
        let costs = snapshot.costs.aligned_to(&universe, "cost per contract")?;
        let exposures = exposures_for(&snapshot.instruments)?;
        let held = held_book.for_universe(&universe);
        let covariance = snapshot.covariance.select(&universe)?;
        let annual = covariance.annualized(self.limits.trading_days_per_year);

        let optimizer = DynamicOptimizer::new(&self.limits, &self.optimizer);
        let optimized = optimizer.optimize(&OptimizationProblem {
            ideal: &ideal,
            held: &held,
            exposures: &exposures,
            costs: &costs,
            covariance: &annual,
            capital: self.limits.capital,
        })?;

        let overlay = RiskOverlay::new(&self.limits).apply(
            &optimized.positions.to_continuous(),
            &snapshot.instruments,
            &exposures,
            &covariance,
        )?;

        let book = buffered_positions(&overlay.positions, &held, self.limits.buffer_fraction)?;

        let mut warnings = Vec::new();
        if let Some(w) = optimized.warning {
            warnings.push(PipelineWarning::Convergence(w));
        }
        if !overlay.events.is_empty() {
            if let Err(e) = self.sink.record_all(&overlay.events) {
                warn!(error = %e, "failed to record risk events");
                warnings.push(PipelineWarning::AuditSink(e.to_string()));
            }
        }

        held_book.commit(&book);
        info!(
            instruments = universe.len(),
            iterations = optimized.iterations,
            multiplier = overlay.scaling.multiplier,
            events = overlay.events.len(),
            "rebalanced: {book}"
        );

        Ok(RebalanceReport {
            book,
            optimized: optimized.positions,
            risk_adjusted: overlay.positions,
            scaling: overlay.scaling,
            events: overlay.events,
            iterations: optimized.iterations,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySink;
    use crate::risk::{CovarianceMatrix, LimitKind};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    struct SharedSink(Arc<MemorySink>);

    impl RiskEventSink for SharedSink {
        fn record(&self, event: &RiskEvent) -> anyhow::Result<()> {
            self.0.record(event)
        }
    }

    struct FailingSink;

    impl RiskEventSink for FailingSink {
        fn record(&self, _event: &RiskEvent) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            capital: 1_000_000.0,
            risk_target: 0.2,
            idm: 1.0,
            buffer_fraction: 0.1,
            cost_penalty_scalar: 0.0,
            ..RiskLimits::default()
        }
    }

    fn snapshot(ideal_es: f64) -> RebalanceSnapshot {
        // ES: 50 * 4000 = 200000 a contract, 16% a year
        let es = Instrument::new("ES", 50.0, 4000.0)
            .with_weight(1.0)
            .with_stddev(0.16)
            .with_open_interest(3_000_000.0);
        RebalanceSnapshot {
            instruments: vec![es],
            ideal: PositionVector::from_pairs(vec![("ES", ideal_es)]).unwrap(),
            covariance: CovarianceMatrix::from_rows(vec!["ES".into()], vec![vec![0.0001]]).unwrap(),
            costs: PositionVector::from_pairs(vec![("ES", 5.0)]).unwrap(),
            rejected: vec![],
        }
    }

    #[test]
    fn test_rebalance_commits_book() {
        let engine =
            RebalanceEngine::new(limits(), OptimizerConfig::default(), HeldPositionBook::default())
                .unwrap();
        let report = engine.rebalance(&snapshot(3.2)).unwrap();
        assert_eq!(report.book.get("ES"), Some(3));
        assert!(report.events.is_empty());
        assert_eq!(report.scaling.multiplier, 1.0);
        assert_eq!(engine.held().unwrap().get("ES"), 3);

        // inside the band around 3: no trade
        let report = engine.rebalance(&snapshot(3.25)).unwrap();
        assert_eq!(report.book.get("ES"), Some(3));
        assert_eq!(report.trades(&engine.held().unwrap()).get("ES"), Some(0));
    }

    #[test]
    fn test_risk_events_reach_sink() {
        let memory = Arc::new(MemorySink::new());
        let engine =
            RebalanceEngine::new(limits(), OptimizerConfig::default(), HeldPositionBook::default())
                .unwrap()
                .with_sink(Box::new(SharedSink(memory.clone())));
        // 20 contracts = 4x leverage = 64% a year: the portfolio level scales down
        let report = engine.rebalance(&snapshot(20.0)).unwrap();
        assert!(report.scaling.risk_multiplier < 1.0);
        assert!(report.book.get("ES").unwrap().abs() < 20);
        let recorded = memory.events();
        assert_eq!(recorded, report.events);
        assert_eq!(recorded[0].kind, LimitKind::Portfolio);
    }

    #[test]
    fn test_sink_failure_is_only_a_warning() {
        let engine =
            RebalanceEngine::new(limits(), OptimizerConfig::default(), HeldPositionBook::default())
                .unwrap()
                .with_sink(Box::new(FailingSink));
        let report = engine.rebalance(&snapshot(20.0)).unwrap();
        assert_matches!(report.warnings.as_slice(), [PipelineWarning::AuditSink(_)]);
        assert_eq!(engine.held().unwrap().get("ES"), report.book.get("ES").unwrap());
    }

    #[test]
    fn test_failed_run_leaves_held_book_untouched() {
        let held = HeldPositionBook::new(PositionVector::from_pairs(vec![("ES", 2)]).unwrap());
        let engine = RebalanceEngine::new(limits(), OptimizerConfig::default(), held.clone()).unwrap();
        let mut bad = snapshot(3.0);
        bad.costs = PositionVector::new();
        assert_matches!(engine.rebalance(&bad), Err(Error::MissingInstrumentData { .. }));
        assert_eq!(engine.held().unwrap(), held);
    }

    #[test]
    fn test_invalid_limits_rejected_up_front() {
        let limits = RiskLimits { capital: 0.0, ..limits() };
        assert_matches!(
            RebalanceEngine::new(limits, OptimizerConfig::default(), HeldPositionBook::default()),
            Err(Error::ConfigError(_))
        );
    }

    #[test]
    fn test_iteration_cap_surfaces_as_warning() {
        // each contract costs more than rounding straight to the ideal saves,
        // so the search starts flat and needs many moves to get there
        let limits = RiskLimits { cost_penalty_scalar: 10.0, ..limits() };
        let settings =
            OptimizerConfig { max_iterations_per_instrument: 1, min_iterations: 1, tolerance: 1e-12 };
        let engine = RebalanceEngine::new(limits, settings, HeldPositionBook::default()).unwrap();
        let mut snap = snapshot(20.0);
        snap.costs = PositionVector::from_pairs(vec![("ES", 3000.0)]).unwrap();

        let report = engine.rebalance(&snap).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.optimized.get("ES"), Some(1));
        assert_eq!(
            report.warnings,
            vec![PipelineWarning::Convergence(ConvergenceWarning { iterations: 1, cap: 1 })]
        );
        assert_eq!(engine.held().unwrap().get("ES"), 1);
    }

    #[test]
    fn test_indefinite_covariance_fails_the_run() {
        let held =
            HeldPositionBook::new(PositionVector::from_pairs(vec![("ES", 2), ("ZN", -2)]).unwrap());
        let engine = RebalanceEngine::new(limits(), OptimizerConfig::default(), held.clone()).unwrap();
        let zn = Instrument::new("ZN", 1000.0, 200.0)
            .with_weight(0.5)
            .with_stddev(0.16)
            .with_open_interest(3_000_000.0);
        let mut snap = snapshot(3.0);
        snap.instruments[0] = snap.instruments[0].clone().with_weight(0.5);
        snap.instruments.push(zn);
        snap.ideal = PositionVector::from_pairs(vec![("ES", 3.0), ("ZN", -3.0)]).unwrap();
        snap.costs = PositionVector::from_pairs(vec![("ES", 5.0), ("ZN", 5.0)]).unwrap();
        // off-diagonal larger than either variance
        snap.covariance = CovarianceMatrix::from_rows(
            vec!["ES".into(), "ZN".into()],
            vec![vec![1e-4, 2e-4], vec![2e-4, 1e-4]],
        )
        .unwrap();

        assert_matches!(engine.rebalance(&snap), Err(Error::NumericalError(_)));
        assert_eq!(engine.held().unwrap(), held);
    }

    #[test]
    fn test_concurrent_rebalances_run_one_at_a_time() {
        let engine =
            RebalanceEngine::new(limits(), OptimizerConfig::default(), HeldPositionBook::default())
                .unwrap();
        let (low, high) = (snapshot(3.2), snapshot(5.0));

        let reports = std::thread::scope(|scope| {
            let a = scope.spawn(|| engine.rebalance(&low));
            let b = scope.spawn(|| engine.rebalance(&high));
            [a.join().unwrap().unwrap(), b.join().unwrap().unwrap()]
        });

        // whichever order they ran in, each run saw the other's committed book
        // and moved it outside the buffer, so both targets were reached
        let mut books: Vec<i64> = reports.iter().map(|r| r.book.get("ES").unwrap()).collect();
        books.sort_unstable();
        assert_eq!(books, vec![3, 5]);
        let held = engine.held().unwrap().get("ES");
        assert!(held == 3 || held == 5);
    }

    #[test]
    fn test_report_as_json() {
        let engine =
            RebalanceEngine::new(limits(), OptimizerConfig::default(), HeldPositionBook::default())
                .unwrap();
        let previous = engine.held().unwrap();
        let report = engine.rebalance(&snapshot(20.0)).unwrap();

        let json: serde_json::Value = serde_json::from_str(&report.to_json(&previous).unwrap()).unwrap();
        let es = report.book.get("ES").unwrap();
        assert_eq!(json["book"]["ES"], es);
        assert_eq!(json["trades"]["ES"], es);
        assert_eq!(json["iterations"], report.iterations);
        assert_eq!(json["scaling"]["multiplier"], report.scaling.multiplier);
        assert_eq!(json["events"].as_array().unwrap().len(), report.events.len());
        assert_eq!(json["events"][0]["kind"], "portfolio");
        assert!(json["warnings"].as_array().unwrap().is_empty());
    }
}

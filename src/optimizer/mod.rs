//! Dynamic position optimizer.
//!
//! Greedy integer local search over the whole book. The objective is the
//! covariance-weighted tracking error between the position weights implied by
//! the integer book and those implied by the ideal (continuous) positions,
//! plus `cost_penalty_scalar` times the trading cost of moving away from the
//! held book. Each iteration evaluates a one-contract decrement and increment
//! for every instrument, in universe order, and takes the single best move.

use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{OptimizerConfig, RiskLimits};
use crate::risk::CovarianceMatrix;
use crate::utils::error::{Error, Result};
use crate::utils::types::{Book, IdealPositions};

/// Largest position, in contracts, the search will work with. Keeps every
/// `position +- 1 - held` comfortably inside `i64`.
pub const MAX_CONTRACTS: i64 = i64::MAX / 4;

/// Everything one optimizer run reads. All vectors are keyed by instrument;
/// `held`, `exposures` and `costs` must cover exactly the instruments of
/// `ideal`, and `covariance` (annualized) must cover at least those.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationProblem<'a> {
    pub ideal: &'a IdealPositions,
    pub held: &'a Book,
    pub exposures: &'a IdealPositions,
    pub costs: &'a IdealPositions,
    pub covariance: &'a CovarianceMatrix,
    pub capital: f64,
}

/// The search stopped at its iteration cap with improving moves left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceWarning {
    pub iterations: usize,
    pub cap: usize,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "optimizer stopped at its iteration cap ({}) before converging", self.cap)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    pub positions: Book,
    /// Moves taken
    pub iterations: usize,
    /// Objective value of `positions`
    pub cost: f64,
    pub warning: Option<ConvergenceWarning>,
}

impl OptimizationOutcome {
    pub fn converged(&self) -> bool {
        self.warning.is_none()
    }
}

/// The objective function, with every input resolved to universe order.
#[derive(Debug, Clone)]
pub struct Objective {
    symbols: Vec<String>,
    exposures: Vec<f64>,
    costs: Vec<f64>,
    held: Vec<i64>,
    ideal_weights: Vec<f64>,
    covariance: CovarianceMatrix,
    capital: f64,
    cost_penalty_scalar: f64,
}

impl Objective {
    pub fn new(problem: &OptimizationProblem<'_>, cost_penalty_scalar: f64) -> Result<Self> {
        let capital = problem.capital;
        if !(capital.is_finite() && capital > 0.0) {
            return Err(Error::ConfigError(format!("capital must be positive, got {capital}")));
        }
        if !(cost_penalty_scalar.is_finite() && cost_penalty_scalar >= 0.0) {
            return Err(Error::ConfigError(format!(
                "cost_penalty_scalar must not be negative, got {cost_penalty_scalar}"
            )));
        }
        let symbols = problem.ideal.symbols().to_vec();
        let held = problem.held.aligned_to(&symbols, "held positions")?;
        let exposures = problem.exposures.aligned_to(&symbols, "notional exposure")?;
        let costs = problem.costs.aligned_to(&symbols, "cost per contract")?;
        let covariance = problem.covariance.select(&symbols)?;

        for (s, v) in problem.ideal.iter().chain(exposures.iter()).chain(costs.iter()) {
            if !v.is_finite() {
                return Err(Error::NumericalError(format!("non-finite optimizer input for {s}")));
            }
        }

        let limit = MAX_CONTRACTS as f64;
        if let Some((s, p)) = problem.ideal.iter().find(|(_, p)| p.abs() > limit) {
            return Err(Error::NumericalError(format!(
                "ideal position {p} for {s} is beyond {MAX_CONTRACTS} contracts"
            )));
        }
        if let Some((s, h)) = held.iter().find(|(_, h)| h.unsigned_abs() > MAX_CONTRACTS as u64) {
            return Err(Error::NumericalError(format!(
                "held position {h} for {s} is beyond {MAX_CONTRACTS} contracts"
            )));
        }

        let ideal_weights = problem
            .ideal
            .iter()
            .zip(exposures.values())
            .map(|((_, p), x)| x * p / capital)
            .collect();

        Ok(Self {
            symbols,
            exposures: exposures.values().to_vec(),
            costs: costs.values().to_vec(),
            held: held.values().to_vec(),
            ideal_weights,
            covariance,
            capital,
            cost_penalty_scalar,
        })
    }

    fn weight(&self, i: usize, contracts: i64) -> f64 {
        self.exposures[i] * contracts as f64 / self.capital
    }

    fn tracking_errors(&self, positions: &[i64]) -> Vec<f64> {
        (0..positions.len())
            .map(|i| self.weight(i, positions[i]) - self.ideal_weights[i])
            .collect()
    }

    pub fn tracking_error(&self, positions: &[i64]) -> Result<f64> {
        self.covariance.quadratic_form(&self.tracking_errors(positions))
    }

    pub fn trading_cost(&self, positions: &[i64]) -> f64 {
        positions
            .iter()
            .zip(&self.held)
            .zip(&self.costs)
            .map(|((p, h), c)| (p - h).unsigned_abs() as f64 * c / self.capital)
            .sum()
    }

    /// `tracking_error + cost_penalty_scalar * trading_cost`
    pub fn cost(&self, positions: &[i64]) -> Result<f64> {
        if positions.len() != self.symbols.len() {
            return Err(Error::DataError(format!(
                "expected {} positions, got {}",
                self.symbols.len(),
                positions.len()
            )));
        }
        Ok(self.tracking_error(positions)? + self.cost_penalty_scalar * self.trading_cost(positions))
    }

    /// Objective value of a keyed book.
    pub fn cost_of(&self, book: &Book) -> Result<f64> {
        self.cost(book.aligned_to(&self.symbols, "positions")?.values())
    }
}

#[derive(Debug, Clone, Copy)]
struct Move {
    index: usize,
    step: i64,
    delta: f64,
}

/// Working state of one search: positions plus `sigma * e` for the
/// tracking-error vector `e`, updated incrementally after each move.
struct Search<'a> {
    objective: &'a Objective,
    positions: Vec<i64>,
    sigma_e: Vec<f64>,
    searchable: Vec<bool>,
}

impl<'a> Search<'a> {
    fn new(objective: &'a Objective, start: Vec<i64>) -> Self {
        let errors = objective.tracking_errors(&start);
        let n = errors.len();
        let sigma_e: Vec<f64> = (0..n)
            .map(|i| {
                let row = objective.covariance.row(i);
                row.iter().zip(&errors).map(|(s, e)| s * e).sum::<f64>()
            })
            .collect();
        let searchable = objective.exposures.iter().map(|x| *x != 0.0).collect();
        Self { objective, positions: start, sigma_e, searchable }
    }

    fn delta(&self, i: usize, step: i64) -> f64 {
        let obj = self.objective;
        let dw = obj.exposures[i] * step as f64 / obj.capital;
        let tracking = 2.0 * dw * self.sigma_e[i] + dw * dw * obj.covariance.get(i, i);
        let before = (self.positions[i] - obj.held[i]).abs();
        let after = (self.positions[i] + step - obj.held[i]).abs();
        let trading = (after - before) as f64 * obj.costs[i] / obj.capital;
        tracking + obj.cost_penalty_scalar * trading
    }

    /// Most improving move; ties keep the earlier instrument and the decrement.
    fn best_move(&self, tolerance: f64) -> Option<Move> {
        let mut best: Option<Move> = None;
        for i in 0..self.positions.len() {
            if !self.searchable[i] {
                continue;
            }
            for step in [-1, 1] {
                let delta = self.delta(i, step);
                if best.map_or(true, |b| delta < b.delta) {
                    best = Some(Move { index: i, step, delta });
                }
            }
        }
        best.filter(|m| m.delta.is_finite() && m.delta < -tolerance)
    }

    fn apply(&mut self, m: Move) {
        let obj = self.objective;
        let dw = obj.exposures[m.index] * m.step as f64 / obj.capital;
        self.positions[m.index] += m.step;
        for (j, g) in self.sigma_e.iter_mut().enumerate() {
            *g += obj.covariance.get(j, m.index) * dw;
        }
    }
}

/// Greedy integer optimizer configured once per run.
#[derive(Debug, Clone)]
pub struct DynamicOptimizer {
    cost_penalty_scalar: f64,
    settings: OptimizerConfig,
}

impl DynamicOptimizer {
    pub fn new(limits: &RiskLimits, settings: &OptimizerConfig) -> Self {
        Self { cost_penalty_scalar: limits.cost_penalty_scalar, settings: settings.clone() }
    }

    pub fn with_cost_penalty(cost_penalty_scalar: f64, settings: OptimizerConfig) -> Self {
        Self { cost_penalty_scalar, settings }
    }

    pub fn objective(&self, problem: &OptimizationProblem<'_>) -> Result<Objective> {
        Objective::new(problem, self.cost_penalty_scalar)
    }

    /// Run the search. Starts from whichever of the held book and the rounded
    /// ideal positions is cheaper (the held book on a tie), so the result never
    /// costs more than either.
    pub fn optimize(&self, problem: &OptimizationProblem<'_>) -> Result<OptimizationOutcome> {
        if !(problem.capital.is_finite() && problem.capital > 0.0) {
            return Err(Error::ConfigError(format!(
                "capital must be positive, got {}",
                problem.capital
            )));
        }
        if problem.ideal.is_empty() {
            debug!("No ideal positions; keeping the held book");
            return Ok(OptimizationOutcome {
                positions: problem.held.clone(),
                iterations: 0,
                cost: 0.0,
                warning: None,
            });
        }

        let objective = self.objective(problem)?;
        let held = objective.held.clone();
        // instruments that cannot be sized stay where they are held
        let rounded: Vec<i64> = problem
            .ideal
            .rounded()
            .values()
            .iter()
            .zip(&objective.exposures)
            .zip(&held)
            .map(|((r, x), h)| if *x == 0.0 { *h } else { *r })
            .collect();
        let held_cost = objective.cost(&held)?;
        let rounded_cost = objective.cost(&rounded)?;
        let start = if rounded_cost < held_cost { rounded } else { held };

        let cap = self.settings.iteration_cap(objective.symbols.len());
        let tolerance = self.settings.tolerance;
        let mut search = Search::new(&objective, start);
        let mut iterations = 0;
        let mut converged = false;
        while iterations < cap {
            match search.best_move(tolerance) {
                | Some(m) => {
                    search.apply(m);
                    iterations += 1;
                }
                | None => {
                    converged = true;
                    break;
                }
            }
        }
        if !converged {
            converged = search.best_move(tolerance).is_none();
        }

        let positions = Book::from_pairs(objective.symbols.iter().cloned().zip(search.positions))?;
        let cost = objective.cost_of(&positions)?;
        metrics::histogram!("positionbook_optimizer_iterations", iterations as f64);

        let warning = if converged {
            info!(iterations, cost, "optimizer converged");
            None
        } else {
            warn!(iterations, cap, "optimizer hit its iteration cap");
            metrics::increment_counter!("positionbook_convergence_warnings_total");
            Some(ConvergenceWarning { iterations, cap })
        };

        Ok(OptimizationOutcome { positions, iterations, cost, warning })
    }
}

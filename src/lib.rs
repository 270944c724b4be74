//! # positionbook
//! Risk-constrained integer futures position sizing.
//!
//! Ideal (continuous) positions from upstream forecasts go through three
//! stages before they reach execution:
//!
//! 1. [`optimizer`]: greedy integer search trading tracking error against
//!    trading cost,
//! 2. [`risk`]: portfolio-level scaling then per-instrument caps,
//! 3. [`portfolio::buffer`]: a no-trade band around the held position.
//!
//! [`engine::RebalanceEngine`] runs the stages in order over one
//! [`engine::RebalanceSnapshot`] and owns the held book between runs.

pub use crate::utils::error::{Error, Result};

pub mod config;
pub mod engine;
pub mod market_data;
pub mod metrics;
pub mod optimizer;
pub mod persistence;
pub mod portfolio;
pub mod risk;
pub mod utils;

pub use crate::engine::{PipelineWarning, RebalanceEngine, RebalanceReport, RebalanceSnapshot};
pub use crate::utils::types::{Book, IdealPositions, Instrument, PositionVector};

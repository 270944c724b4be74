//! Configuration module for the position book pipeline

mod risk_limits;
mod template;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::error::{Error, Result};

pub use risk_limits::RiskLimits;
pub use template::{generate_commented_config_template, generate_config_template};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Configuration file version
    pub version: String,

    /// Risk limits
    pub risk: RiskLimits,

    /// Optimizer search settings
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Transaction cost estimates
    #[serde(default)]
    pub costs: CostConfig,

    /// Input / output locations
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static reference data for the candidate universe
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
}

/// Greedy search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Iteration cap per instrument in the universe
    #[serde(default = "default_max_iterations_per_instrument")]
    pub max_iterations_per_instrument: usize,
    /// Floor on the iteration cap for very small universes
    #[serde(default = "default_min_iterations")]
    pub min_iterations: usize,
    /// A move must improve the objective by more than this to be taken
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

/// Per-contract cost estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Cost of trading one contract, used unless an instrument overrides it
    #[serde(default = "default_cost_per_contract")]
    pub per_contract: f64,
}

/// Where inputs are read from and outputs written to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Directory holding one `<SYMBOL>.csv` price history per instrument
    #[serde(default = "default_price_dir")]
    pub price_dir: PathBuf,
    /// CSV of `symbol,trend,carry` forecasts
    #[serde(default = "default_forecasts")]
    pub forecasts: PathBuf,
    /// CSV of `symbol,contracts` currently held; absent means flat
    #[serde(default)]
    pub held_positions: Option<PathBuf>,
    /// SQLite risk audit log; absent means the user data directory
    #[serde(default)]
    pub audit_db: Option<PathBuf>,
    /// Where the final book is written
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Static reference data for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// Contract multiplier
    pub multiplier: f64,
    /// Overrides `risk.instrument_weight`
    #[serde(default)]
    pub weight: Option<f64>,
    /// Overrides `costs.per_contract`
    #[serde(default)]
    pub cost_per_contract: Option<f64>,
}

impl InstrumentConfig {
    pub fn new(symbol: &str, multiplier: f64) -> Self {
        Self { symbol: symbol.to_string(), multiplier, weight: None, cost_per_contract: None }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            risk: RiskLimits::default(),
            optimizer: OptimizerConfig::default(),
            costs: CostConfig::default(),
            data: DataConfig::default(),
            logging: LoggingConfig::default(),
            instruments: vec![
                InstrumentConfig::new("ES", 50.0),
                InstrumentConfig::new("ZF", 1000.0),
                InstrumentConfig::new("ZN", 1000.0),
            ],
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_instrument: default_max_iterations_per_instrument(),
            min_iterations: default_min_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self { per_contract: default_cost_per_contract() }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            price_dir: default_price_dir(),
            forecasts: default_forecasts(),
            held_positions: None,
            audit_db: None,
            output: default_output(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

// --------- Helper default functions for serde ---------
fn default_max_iterations_per_instrument() -> usize {
    1_000
}
fn default_min_iterations() -> usize {
    100
}
fn default_tolerance() -> f64 {
    1e-12
}
fn default_cost_per_contract() -> f64 {
    5.0
}
fn default_price_dir() -> PathBuf {
    PathBuf::from("data/prices")
}
fn default_forecasts() -> PathBuf {
    PathBuf::from("data/forecasts.csv")
}
fn default_output() -> PathBuf {
    PathBuf::from("book.csv")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl OptimizerConfig {
    /// Iteration cap for a universe of `universe_size` instruments.
    pub fn iteration_cap(&self, universe_size: usize) -> usize {
        self.max_iterations_per_instrument
            .saturating_mul(universe_size)
            .max(self.min_iterations)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration as a TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Check everything that can be checked before any data is loaded.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate()?;

        if !(self.optimizer.tolerance.is_finite() && self.optimizer.tolerance >= 0.0) {
            return Err(Error::ConfigError(format!(
                "optimizer.tolerance must be a non-negative number, got {}",
                self.optimizer.tolerance
            )));
        }
        if !(self.costs.per_contract.is_finite() && self.costs.per_contract >= 0.0) {
            return Err(Error::ConfigError(format!(
                "costs.per_contract must not be negative, got {}",
                self.costs.per_contract
            )));
        }

        let mut seen = HashSet::new();
        for inst in &self.instruments {
            if inst.symbol.trim().is_empty() {
                return Err(Error::ConfigError("instrument symbol must not be empty".into()));
            }
            if !seen.insert(inst.symbol.to_uppercase()) {
                return Err(Error::ConfigError(format!("duplicate instrument {}", inst.symbol)));
            }
            if !(inst.multiplier.is_finite() && inst.multiplier > 0.0) {
                return Err(Error::ConfigError(format!(
                    "multiplier for {} must be positive, got {}",
                    inst.symbol, inst.multiplier
                )));
            }
            if let Some(w) = inst.weight {
                if !(w > 0.0 && w <= 1.0) {
                    return Err(Error::ConfigError(format!(
                        "weight for {} must be in (0, 1], got {w}",
                        inst.symbol
                    )));
                }
            }
            if let Some(c) = inst.cost_per_contract {
                if !(c.is_finite() && c >= 0.0) {
                    return Err(Error::ConfigError(format!(
                        "cost_per_contract for {} must not be negative, got {c}",
                        inst.symbol
                    )));
                }
            }
        }
        Ok(())
    }

    /// Candidate symbols, upper-cased, in configuration order
    pub fn instrument_symbols(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.symbol.to_uppercase()).collect()
    }

    /// Get an instrument configuration by symbol
    pub fn get_instrument(&self, symbol: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Weight of `symbol` in a universe of `universe_size` instruments
    pub fn weight_for(&self, symbol: &str, universe_size: usize) -> f64 {
        self.get_instrument(symbol)
            .and_then(|i| i.weight)
            .unwrap_or_else(|| self.risk.default_weight(universe_size))
    }

    /// Per-instrument cost overrides
    pub fn cost_overrides(&self) -> Vec<(String, f64)> {
        self.instruments
            .iter()
            .filter_map(|i| i.cost_per_contract.map(|c| (i.symbol.to_uppercase(), c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.instrument_symbols(), vec!["ES", "ZF", "ZN"]);
        assert!((config.weight_for("es", 3) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = Config::default();
        config.instruments[0].cost_per_contract = Some(2.5);
        config.data.held_positions = Some(PathBuf::from("held.csv"));
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config, loaded);
        assert_eq!(loaded.cost_overrides(), vec![("ES".to_string(), 2.5)]);
    }

    #[test]
    fn test_default_toml() {
        let toml = Config::default_toml();
        assert!(toml.contains("[risk]"));
        assert!(toml.contains("[optimizer]"));
        assert!(toml.contains("[[instruments]]"));
        assert!(toml.contains("ZN"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let doc = r#"
            version = "0.1.0"
            [risk]
            capital = 100000.0
            risk_target = 0.2
            idm = 1.5
            max_leverage = "2 * 2"
        "#;
        assert_matches!(Config::from_toml_str(doc), Err(Error::TomlError(_)));
    }

    #[test]
    fn test_minimal_document_uses_defaults() {
        let doc = r#"
            version = "0.1.0"
            [risk]
            capital = 100000.0
            risk_target = 0.25
            idm = 1.48

            [[instruments]]
            symbol = "ES"
            multiplier = 50.0
        "#;
        let config = Config::from_toml_str(doc).unwrap();
        assert_eq!(config.risk.trading_days_per_year, 256);
        assert_eq!(config.optimizer, OptimizerConfig::default());
        assert_eq!(config.instruments.len(), 1);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let mut config = Config::default();
        config.risk.capital = 0.0;
        assert_matches!(config.validate(), Err(Error::ConfigError(_)));

        let mut config = Config::default();
        config.instruments.push(InstrumentConfig::new("es", 50.0));
        assert_matches!(config.validate(), Err(Error::ConfigError(msg)) if msg.contains("duplicate"));

        let mut config = Config::default();
        config.instruments[1].multiplier = 0.0;
        assert_matches!(config.validate(), Err(Error::ConfigError(_)));
    }

    #[test]
    fn test_iteration_cap_scales_with_universe() {
        let opt = OptimizerConfig::default();
        assert_eq!(opt.iteration_cap(0), 100);
        assert_eq!(opt.iteration_cap(3), 3_000);
    }
}

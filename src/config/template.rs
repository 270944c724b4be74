//! Configuration template generation

use crate::config::Config;
use crate::utils::error::Result;
use std::fs;
use std::path::Path;

/// Generate a default configuration file at the specified path
pub fn generate_config_template<P: AsRef<Path>>(path: P) -> Result<()> {
    Config::default().save_to_file(path)
}

/// Generate a configuration file with comments explaining each field
pub fn generate_commented_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    fs::write(path, COMMENTED_TEMPLATE)
}

const COMMENTED_TEMPLATE: &str = r#"# Position book configuration
# This is a template configuration file with all available options.
# Uncomment and modify the values as needed.

version = "0.1.0"

[risk]
# Trading capital in account currency
capital = 500000.0

# Target annualized portfolio volatility (0.20 = 20% of capital)
risk_target = 0.20

# Instrument diversification multiplier
idm = 2.5

# Weight of each instrument; leave unset for equal weights (1/N)
# instrument_weight = 0.1

# Long-run average absolute forecast and the forecast cap
average_forecast = 10.0
max_forecast = 20.0

# Extra head-room on top of the forecast cap (0.5 = 50%)
max_forecast_margin = 0.5

# Maximum notional exposure of one instrument relative to capital
max_position_leverage_ratio = 2.0

# Maximum gross notional exposure of the book relative to capital
max_portfolio_leverage = 20.0

# Maximum share of open interest held in any instrument (0.01 = 1%)
max_pct_of_open_interest = 0.01

# No-trade band around the held position (0.1 = +/-10%)
buffer_fraction = 0.1

# Weight of trading costs against tracking error in the optimizer
cost_penalty_scalar = 10.0

trading_days_per_year = 256

[optimizer]
# The search stops after max(min_iterations, max_iterations_per_instrument * N) moves
max_iterations_per_instrument = 1000
min_iterations = 100

# Improvements smaller than this are treated as no improvement
tolerance = 1e-12

[costs]
# Estimated cost of trading one contract
per_contract = 5.0

[data]
# One <SYMBOL>.csv per instrument with columns date,close[,unadj_close][,open_interest]
price_dir = "data/prices"

# symbol,trend,carry
forecasts = "data/forecasts.csv"

# symbol,contracts; leave unset to start flat
# held_positions = "data/held.csv"

# SQLite risk audit log; defaults to the user data directory
# audit_db = "risk_audit.db"

# Final position book
output = "book.csv"

[logging]
# trace, debug, info, warn, error
level = "info"

[[instruments]]
symbol = "ES"
multiplier = 50.0

[[instruments]]
symbol = "ZF"
multiplier = 1000.0
# cost_per_contract = 3.0

[[instruments]]
symbol = "ZN"
multiplier = 1000.0
# weight = 0.3
"#;

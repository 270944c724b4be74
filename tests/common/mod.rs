//! Shared on-disk fixtures for the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use positionbook::config::{Config, InstrumentConfig};
use positionbook::config::RiskLimits;

/// Write `<dir>/<symbol>.csv` with `n` daily closes whose returns follow
/// `amp * sin(freq * t + phase)`.
pub fn write_prices(dir: &Path, symbol: &str, start_price: f64, amp: f64, freq: f64, phase: f64) {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let mut price = start_price;
    let mut text = String::from("date,close,unadj_close,open_interest\n");
    for t in 0..200 {
        if t > 0 {
            price *= 1.0 + amp * (freq * t as f64 + phase).sin();
        }
        let date = start + chrono::Duration::days(t);
        writeln!(text, "{date},{price:.6},{price:.6},1000000").unwrap();
    }
    fs::write(dir.join(format!("{symbol}.csv")), text).unwrap();
}

/// ES and ZN trade; ZT is too quiet for the risk target and gets filtered out.
pub fn write_fixture(dir: &Path) -> Config {
    let prices = dir.join("prices");
    fs::create_dir_all(&prices).unwrap();
    write_prices(&prices, "ES", 4000.0, 0.014, 0.7, 0.0);
    write_prices(&prices, "ZN", 110.0, 0.009, 1.3, 1.0);
    write_prices(&prices, "ZT", 102.0, 0.0003, 0.3, 2.0);

    let forecasts = dir.join("forecasts.csv");
    fs::write(&forecasts, "symbol,trend,carry\nES,10,5\nZN,-8,2\nZT,10,10\n").unwrap();

    let mut config = Config {
        risk: RiskLimits {
            capital: 1_000_000.0,
            risk_target: 0.2,
            idm: 1.5,
            ..RiskLimits::default()
        },
        instruments: vec![
            InstrumentConfig::new("ES", 50.0),
            InstrumentConfig::new("ZN", 1000.0),
            InstrumentConfig::new("ZT", 2000.0),
        ],
        ..Config::default()
    };
    config.data.price_dir = prices;
    config.data.forecasts = forecasts;
    config.data.audit_db = Some(dir.join("audit.db"));
    config.data.output = dir.join("book.csv");
    config
}

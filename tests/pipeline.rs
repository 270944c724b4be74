mod common;

use assert_matches::assert_matches;
use std::fs;
use tempfile::tempdir;

use positionbook::engine::prepare_snapshot;
use positionbook::market_data::CsvPriceProvider;
use positionbook::persistence::{RiskEventSink, SqliteAuditLog};
use positionbook::portfolio::HeldPositionBook;
use positionbook::{Error, PositionVector, RebalanceEngine};

#[test]
fn quiet_instruments_are_filtered_out() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let provider = CsvPriceProvider::new(&config.data.price_dir);

    let snapshot = prepare_snapshot(&config, &provider).unwrap();
    assert_eq!(snapshot.universe(), vec!["ES", "ZN"]);
    assert_eq!(snapshot.rejected, vec!["ZT"]);
    // survivors share the risk budget equally
    assert!(snapshot.instruments.iter().all(|i| (i.weight - 0.5).abs() < 1e-12));
    assert_eq!(snapshot.ideal.symbols(), &["ES".to_string(), "ZN".to_string()]);
    assert!(snapshot.ideal.get("ES").unwrap() > 0.0);
    assert!(snapshot.ideal.get("ZN").unwrap() < 0.0);
}

#[test]
fn full_rebalance_from_files() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let provider = CsvPriceProvider::new(&config.data.price_dir);
    let snapshot = prepare_snapshot(&config, &provider).unwrap();

    let audit = SqliteAuditLog::open(config.data.audit_db.as_deref()).unwrap();
    let engine = RebalanceEngine::from_config(&config, HeldPositionBook::flat(&snapshot.universe()))
        .unwrap()
        .with_sink(Box::new(audit.clone()));
    let report = engine.rebalance(&snapshot).unwrap();

    assert_eq!(report.book.symbols(), snapshot.ideal.symbols());
    assert!(report.book.get("ES").unwrap() > 0);
    assert!(report.book.get("ZN").unwrap() < 0);
    assert!(report.scaling.multiplier <= 1.0);
    for event in &report.events {
        assert!(event.post_clamp.abs() <= event.pre_clamp.abs());
    }
    assert_eq!(audit.events().unwrap().len(), report.events.len());

    // the engine now holds the new book
    assert_eq!(engine.held().unwrap().to_vector(), report.book);

    // a second run buffers against the book the first one committed
    let again = engine.rebalance(&snapshot).unwrap();
    let f = config.risk.buffer_fraction;
    for (symbol, held) in report.book.iter() {
        let target = again.risk_adjusted.get(symbol).unwrap();
        let (a, b) = (held as f64 * (1.0 - f), held as f64 * (1.0 + f));
        let expected =
            if a.min(b) <= target && target <= a.max(b) { held } else { target.round() as i64 };
        assert_eq!(again.book.get(symbol), Some(expected), "{symbol}");
    }

    engine.held().unwrap().export_csv(&config.data.output).unwrap();
    let reloaded = HeldPositionBook::from_csv(&config.data.output, &snapshot.universe()).unwrap();
    assert_eq!(reloaded.to_vector(), again.book);
}

#[test]
fn identical_inputs_give_identical_books() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let provider = CsvPriceProvider::new(&config.data.price_dir);
    let snapshot = prepare_snapshot(&config, &provider).unwrap();
    let held = HeldPositionBook::new(PositionVector::from_pairs(vec![("ES", 2), ("ZN", -4)]).unwrap());

    let books: Vec<_> = (0..3)
        .map(|_| {
            RebalanceEngine::from_config(&config, held.clone())
                .unwrap()
                .rebalance(&snapshot)
                .unwrap()
                .book
        })
        .collect();
    assert_eq!(books[0], books[1]);
    assert_eq!(books[1], books[2]);
}

#[test]
fn missing_price_file_aborts_before_any_stage() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    fs::remove_file(config.data.price_dir.join("ZN.csv")).unwrap();
    let provider = CsvPriceProvider::new(&config.data.price_dir);

    let err = prepare_snapshot(&config, &provider).unwrap_err();
    assert_matches!(err, Error::DataError(msg) if msg.contains("ZN"));
}

#[test]
fn invalid_capital_is_a_config_error() {
    let dir = tempdir().unwrap();
    let mut config = common::write_fixture(dir.path());
    config.risk.capital = -5.0;
    let provider = CsvPriceProvider::new(&config.data.price_dir);
    assert_matches!(prepare_snapshot(&config, &provider), Err(Error::ConfigError(_)));
}

#[test]
fn audit_log_is_append_only_across_runs() {
    let dir = tempdir().unwrap();
    let config = common::write_fixture(dir.path());
    let provider = CsvPriceProvider::new(&config.data.price_dir);
    let mut snapshot = prepare_snapshot(&config, &provider).unwrap();
    // an oversized ideal book forces the overlay to act
    snapshot.ideal = snapshot.ideal.map(|_, v| v * 10.0);

    let audit = SqliteAuditLog::open(config.data.audit_db.as_deref()).unwrap();
    let mut total = 0;
    for _ in 0..2 {
        let engine = RebalanceEngine::from_config(&config, HeldPositionBook::default())
            .unwrap()
            .with_sink(Box::new(audit.clone()));
        let report = engine.rebalance(&snapshot).unwrap();
        assert!(!report.events.is_empty());
        total += report.events.len();
    }
    audit.flush().unwrap();
    assert_eq!(audit.count().unwrap(), total);
}

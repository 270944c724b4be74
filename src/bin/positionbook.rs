//! positionbook – turn forecasts into a risk-constrained futures position book

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

use positionbook::config::{generate_commented_config_template, Config};
use positionbook::engine::{prepare_snapshot, RebalanceReport, RebalanceSnapshot};
use positionbook::engine::snapshot::{build_universe, settle_universe};
use positionbook::market_data::{CsvPriceProvider, MarketDataProvider, ReturnsTable};
use positionbook::persistence::{LogSink, MultiSink, RiskEventSink, SqliteAuditLog};
use positionbook::portfolio::HeldPositionBook;
use positionbook::risk::volatility::required_leverage;
use positionbook::utils::{ensure_parent_dir, init_logging};
use positionbook::RebalanceEngine;

#[derive(Debug, Parser)]
#[command(name = "positionbook", author, version, about = "Risk-constrained futures position sizing", long_about = None)]
struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, env = "POSITIONBOOK_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Print the default configuration to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Size, optimise, risk-check and buffer the book for the configured universe
    Rebalance {
        /// Where to write the final book (defaults to `data.output`)
        #[arg(short, long, value_name = "CSV")]
        output: Option<PathBuf>,
        /// Held positions (defaults to `data.held_positions`, else flat)
        #[arg(long, value_name = "CSV")]
        held: Option<PathBuf>,
        /// Compute and print only: no book file, no audit log
        #[arg(long)]
        dry_run: bool,
        /// Print metrics in Prometheus format after the run
        #[arg(long)]
        metrics: bool,
        /// Print the run report as JSON instead of a table
        #[arg(long, conflicts_with = "metrics")]
        json: bool,
    },
    /// List the instruments that pass the volatility filter
    Filter,
    /// Write a commented default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load configuration {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", Config::default_toml());
        return Ok(());
    }

    match args.command {
        | None => {
            Args::command().print_help()?;
            Ok(())
        }
        | Some(Command::Completions { shell }) => {
            let mut cmd = Args::command();
            clap_complete::generate(shell, &mut cmd, "positionbook", &mut std::io::stdout());
            Ok(())
        }
        | Some(Command::Init { force }) => init(&args.config, force),
        | Some(Command::Filter) => {
            let config = load_config(&args.config)?;
            init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level));
            filter(&config)
        }
        | Some(Command::Rebalance { output, held, dry_run, metrics, json }) => {
            let config = load_config(&args.config)?;
            init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level));
            positionbook::metrics::init().map_err(|e| anyhow!("metrics init: {e}"))?;
            rebalance(&config, output, held, dry_run, json)?;
            if metrics {
                print!("{}", positionbook::metrics::render());
            }
            Ok(())
        }
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("Config file {} exists. Use --force to overwrite.", path.display());
    }
    ensure_parent_dir(path)?;
    generate_commented_config_template(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✅ Wrote default configuration to {}", path.display());
    Ok(())
}

fn filter(config: &Config) -> Result<()> {
    let provider = CsvPriceProvider::new(&config.data.price_dir);
    let histories = provider.load_all(&config.instrument_symbols())?;
    let returns = ReturnsTable::from_histories(&histories)?;
    let candidates = build_universe(config, &histories, &returns)?;
    let accepted = settle_universe(config, candidates.clone(), &returns)?;

    println!("{:<8} {:>10} {:>10}  status", "symbol", "stddev", "leverage");
    for inst in &candidates {
        // survivors are shown at the weight they are sized with
        let (weight, status) = match accepted.iter().find(|a| a.symbol == inst.symbol) {
            | Some(a) => (a.weight, "ok"),
            | None => (inst.weight, "rejected"),
        };
        let leverage = required_leverage(
            config.risk.idm,
            weight,
            config.risk.risk_target,
            inst.annualized_stddev,
        );
        println!(
            "{:<8} {:>9.2}% {:>10.3}  {}",
            inst.symbol,
            inst.annualized_stddev * 100.0,
            leverage,
            status
        );
    }
    Ok(())
}

fn rebalance(
    config: &Config, output: Option<PathBuf>, held: Option<PathBuf>, dry_run: bool, json: bool,
) -> Result<()> {
    let provider = CsvPriceProvider::new(&config.data.price_dir);
    let snapshot = prepare_snapshot(config, &provider).context("Failed to prepare market snapshot")?;
    let universe = snapshot.universe();
    if !snapshot.rejected.is_empty() {
        log::info!("Excluded by the volatility filter: {}", snapshot.rejected.join(", "));
    }

    let held_book = match held.or_else(|| config.data.held_positions.clone()) {
        | Some(path) => HeldPositionBook::from_csv(&path, &universe)
            .with_context(|| format!("Failed to read held positions {}", path.display()))?,
        | None => HeldPositionBook::flat(&universe),
    };

    let sink: Box<dyn RiskEventSink> = if dry_run {
        Box::new(LogSink)
    } else {
        let audit = SqliteAuditLog::open(config.data.audit_db.as_deref())
            .context("Failed to open risk audit log")?;
        Box::new(MultiSink::new().with(Box::new(LogSink)).with(Box::new(audit)))
    };

    let engine = RebalanceEngine::from_config(config, held_book.clone())?.with_sink(sink);
    let report = engine.rebalance(&snapshot).context("Rebalance failed")?;

    if json {
        println!("{}", report.to_json(&held_book)?);
    } else {
        print_report(&snapshot, &held_book, &report, &universe);
    }

    if dry_run {
        return Ok(());
    }
    let out = output.unwrap_or_else(|| config.data.output.clone());
    engine
        .held()?
        .export_csv(&out)
        .with_context(|| format!("Failed to write book {}", out.display()))?;
    if json {
        log::info!("Wrote position book to {}", out.display());
    } else {
        println!("✅ Wrote position book to {}", out.display());
    }
    Ok(())
}

fn print_report(
    snapshot: &RebalanceSnapshot, held_book: &HeldPositionBook, report: &RebalanceReport,
    universe: &[String],
) {
    println!(
        "{:<8} {:>6} {:>10} {:>9} {:>10} {:>6} {:>6}",
        "symbol", "held", "ideal", "optimized", "risk adj", "final", "trade"
    );
    let trades = report.trades(&held_book);
    for symbol in universe {
        println!(
            "{:<8} {:>6} {:>10.3} {:>9} {:>10.3} {:>6} {:>+6}",
            symbol,
            held_book.get(symbol),
            snapshot.ideal.get(symbol).unwrap_or_default(),
            report.optimized.get(symbol).unwrap_or_default(),
            report.risk_adjusted.get(symbol).unwrap_or_default(),
            report.book.get(symbol).unwrap_or_default(),
            trades.get(symbol).unwrap_or_default()
        );
    }
    println!(
        "portfolio stddev {:.2}% (multiplier {:.4}), {} risk events, {} optimizer moves",
        report.scaling.estimated_stddev * 100.0,
        report.scaling.multiplier,
        report.events.len(),
        report.iterations
    );
    for w in &report.warnings {
        eprintln!("⚠️  {w}");
    }
}

//! Spot Rebalancer - Main Entry Point

use anyhow::Result;
use chrono::{NaiveDate, Timelike, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use spot_rebalancer::config::Config;
use spot_rebalancer::exchange::BinanceClient;
use spot_rebalancer::notify::SlackNotifier;
use spot_rebalancer::store::{LedgerStore, SqliteLedger};
use spot_rebalancer::strategy::{run_cycle, run_earnings_snapshot, CycleOutcome};
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Spot Rebalancer CLI
#[derive(Parser)]
#[command(name = "spot-rebalancer")]
#[command(version, about = "Periodic spot portfolio rebalancing on Binance")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single strategy cycle and exit
    Once,

    /// Build today's earnings snapshot and exit
    Snapshot,

    /// Record an external deposit in the deposits ledger
    Deposit {
        /// Amount in the quote asset
        amount: Decimal,
    },

    /// Show ledger status: deposits, earnings, open lots
    Status {
        /// Path to SQLite database (overrides configuration)
        #[arg(short, long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    if let Some(Commands::Status { db }) = &cli.command {
        let path = db.as_deref().unwrap_or(&config.store.db_path);
        return show_status(path);
    }

    let store = SqliteLedger::new(&config.store.db_path)?;

    if let Some(Commands::Deposit { amount }) = &cli.command {
        anyhow::ensure!(*amount > Decimal::ZERO, "deposit amount must be positive");
        let ledger = store.add_deposit(*amount)?;
        info!(
            deposited = %ledger.deposited,
            used = %ledger.used,
            available = %ledger.available(),
            "Deposit recorded"
        );
        return Ok(());
    }

    let client = BinanceClient::new(&config.binance, &config.strategy.quote_asset)?;
    let notifier = SlackNotifier::new(&config.notify.webhook_url);

    match cli.command {
        Some(Commands::Once) => {
            let outcome = run_cycle(&client, &store, &notifier, &config.strategy).await?;
            info!(?outcome, "Cycle complete");
            Ok(())
        }
        Some(Commands::Snapshot) => {
            let snapshot =
                run_earnings_snapshot(&client, &store, &notifier, &config.strategy, Utc::now())
                    .await?;
            info!(
                date = %snapshot.date,
                total_value = %snapshot.total_value,
                "Snapshot complete"
            );
            Ok(())
        }
        Some(Commands::Deposit { .. }) | Some(Commands::Status { .. }) => unreachable!(),
        None => run_loop(&client, &store, &notifier, &config).await,
    }
}

/// Main trading loop: one strategy cycle per tick, plus the daily snapshot.
async fn run_loop(
    client: &BinanceClient,
    store: &SqliteLedger,
    notifier: &SlackNotifier,
    config: &Config,
) -> Result<()> {
    info!(
        "Spot Rebalancer v{} starting ({} assets, {}s cycle)",
        env!("CARGO_PKG_VERSION"),
        config.strategy.target_wallet.len(),
        config.strategy.cycle_secs
    );
    if config.binance.testnet {
        warn!("Testnet mode enabled");
    }

    let mut interval = tokio::time::interval(Duration::from_secs(config.strategy.cycle_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_snapshot_date: Option<NaiveDate> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }

        match run_cycle(client, store, notifier, &config.strategy).await {
            Ok(CycleOutcome::Idle) => {}
            Ok(outcome) => info!(?outcome, "Cycle complete"),
            Err(e) => error!(error = %e, "Cycle failed"),
        }

        let now = Utc::now();
        let due = now.hour() >= config.strategy.snapshot_hour_utc
            && last_snapshot_date != Some(now.date_naive());
        if due {
            match run_earnings_snapshot(client, store, notifier, &config.strategy, now).await {
                Ok(snapshot) => {
                    info!(
                        date = %snapshot.date,
                        total_value = %snapshot.total_value,
                        "Snapshot recorded"
                    );
                    last_snapshot_date = Some(now.date_naive());
                }
                Err(e) => error!(error = %e, "Snapshot failed"),
            }
        }
    }

    Ok(())
}

/// Print persisted ledger state without touching the exchange.
fn show_status(db_path: &str) -> Result<()> {
    let store = SqliteLedger::new(db_path)?;

    let deposits = store.deposits()?;
    println!("Deposits:");
    println!("  deposited: {}", deposits.deposited);
    println!("  used:      {}", deposits.used);
    println!("  available: {}", deposits.available());

    let earnings = store.earnings()?;
    println!("\nEarnings:");
    if earnings.is_empty() {
        println!("  (none)");
    }
    for (asset, quantity) in &earnings {
        println!("  {}: {}", asset, quantity);
    }

    let lots = store.open_lots()?;
    println!("\nOpen lots ({}):", lots.len());
    for lot in &lots {
        println!(
            "  {} {} @ {} ({}{})",
            lot.quantity,
            lot.asset,
            lot.avg_price,
            lot.order_id,
            if lot.deposits_funded {
                ", deposit-funded"
            } else {
                ""
            }
        );
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "spot-rebalancer.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spot_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

use chrono::Utc;
use clap::Parser;
use gig_ledger::application::engine::LedgerEngine;
use gig_ledger::config::EngineConfig;
use gig_ledger::domain::ports::{SharedClock, SharedGateway, SharedStore};
use gig_ledger::infrastructure::clock::ManualClock;
use gig_ledger::infrastructure::gateway::SimulatedGateway;
use gig_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use gig_ledger::interfaces::csv::promo_reader::PromoCatalogReader;
use gig_ledger::interfaces::csv::report_writer::BalanceWriter;
use gig_ledger::interfaces::jsonl::command::CommandReader;
use gig_ledger::interfaces::jsonl::runner::CommandRunner;
use gig_ledger::telemetry::{self, LogFormat};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON-lines command file to replay
    input: PathBuf,

    /// Promo code catalog (CSV) loaded before the first command
    #[arg(long, env = "GIG_LEDGER_PROMO_CODES")]
    promo_codes: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "GIG_LEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// ISO 4217 currency of every amount
    #[arg(long, env = "GIG_LEDGER_CURRENCY", default_value = "USD")]
    currency: String,

    /// Account that receives payments and holds escrowed funds
    #[arg(long, env = "GIG_LEDGER_PLATFORM_ACCOUNT", default_value = "platform")]
    platform_account: String,

    /// Pending checkouts older than this many minutes are expired
    #[arg(long, env = "GIG_LEDGER_CHECKOUT_TTL_MINUTES", default_value_t = 30)]
    checkout_ttl_minutes: i64,

    /// Simulated payment processor latency
    #[arg(long, env = "GIG_LEDGER_GATEWAY_LATENCY_MS", default_value_t = 0)]
    gateway_latency_ms: u64,

    #[arg(long, env = "GIG_LEDGER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let checkout_ttl = chrono::Duration::try_minutes(self.checkout_ttl_minutes).ok_or_else(|| {
            miette::miette!("checkout TTL of {} minutes is out of range", self.checkout_ttl_minutes)
        })?;
        Ok(EngineConfig {
            currency: self.currency.clone(),
            platform_account: self.platform_account.clone(),
            checkout_ttl,
            ..EngineConfig::default()
        })
    }

    #[cfg(feature = "storage-rocksdb")]
    fn store(&self) -> Result<SharedStore> {
        use gig_ledger::infrastructure::rocksdb::RocksDBStore;
        Ok(match &self.db_path {
            Some(path) => Arc::new(RocksDBStore::open(path).into_diagnostic()?),
            None => Arc::new(InMemoryLedgerStore::new()),
        })
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn store(&self) -> Result<SharedStore> {
        if self.db_path.is_some() {
            miette::bail!("--db-path needs a build with the `storage-rocksdb` feature");
        }
        Ok(Arc::new(InMemoryLedgerStore::new()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format).into_diagnostic()?;

    // Replays run on their own clock so `advance_clock` can drive expiry and
    // billing periods.
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let shared_clock: SharedClock = clock.clone();
    let gateway: SharedGateway = Arc::new(SimulatedGateway::new(Duration::from_millis(cli.gateway_latency_ms)));
    let engine = LedgerEngine::new(cli.store()?, gateway, shared_clock, cli.engine_config()?).into_diagnostic()?;

    if let Some(path) = &cli.promo_codes {
        let file = File::open(path).into_diagnostic()?;
        let mut loaded = 0;
        for promo in PromoCatalogReader::new(file).promo_codes() {
            match promo {
                Ok(promo) => match engine.register_promo_code(promo).await {
                    Ok(_) => loaded += 1,
                    Err(e) => warn!(error = %e, "promo code skipped"),
                },
                Err(e) => warn!(error = %e, "error reading promo code"),
            }
        }
        info!(loaded, path = %path.display(), "promo catalog loaded");
    }

    let file = File::open(&cli.input).into_diagnostic()?;
    let mut runner = CommandRunner::new(Arc::new(engine), clock);
    // Only a corrupted ledger aborts the run; other failures are logged per line.
    runner
        .run(CommandReader::new(BufReader::new(file)))
        .await
        .into_diagnostic()?;

    let rows = runner.engine().balance_report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_rows(&rows).into_diagnostic()?;

    Ok(())
}

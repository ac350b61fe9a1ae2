use clap::{Parser, Subcommand};
use fadescope::core::config::{Config, PriceProvider};
use fadescope::core::errors::{IndexerError, Result};
use fadescope::core::work_queue::WorkQueue;
use fadescope::ingest::{IngestionDriver, Normalizer};
use fadescope::metadata::TokenMetadataResolver;
use fadescope::positions::PositionReconstructor;
use fadescope::price::{BirdeyeOracle, CachingOracle, GeckoTerminalOracle, PriceOracle};
use fadescope::provider::{HeliusClient, TransactionProvider};
use fadescope::reconcile::ReconcileAuditor;
use fadescope::storage::{IndexerStore, MemoryStore, PostgresStore};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fadescope", version, about = "Solana wallet indexer and regret analytics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the wallet's full transaction history into the store
    Backfill {
        wallet: String,
        /// Stop after this many pages (safety cap)
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Ingest the newest transactions since the last run
    SyncTail { wallet: String },
    /// Show sync state, stored counts, and the last audit
    Status { wallet: String },
    /// Re-verify recent slots against the provider and repair gaps
    ReconcileRecent {
        wallet: String,
        /// Slot window to re-verify, ending at the verified slot
        #[arg(long, default_value_t = 10_000)]
        window: u64,
    },
    /// Rebuild FIFO positions and regret metrics
    Analyze { wallet: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        let failure = serde_json::json!({
            "code": e.code(),
            "message": e.to_string(),
            "hint": e.hint(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&failure).unwrap());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?;

    let store: Arc<dyn IndexerStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url).await?;
            info!("Connected to Postgres store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; state lives only for this process");
            Arc::new(MemoryStore::new())
        }
    };

    let provider: Arc<dyn TransactionProvider> = Arc::new(HeliusClient::new(
        config.helius_api_key.clone(),
        config.page_limit,
        config.timeout_ms,
        Arc::new(WorkQueue::provider_default()),
    ));
    let resolver = Arc::new(TokenMetadataResolver::new(
        config.helius_api_key.clone(),
        store.clone(),
        Arc::new(WorkQueue::new(2, 5)),
    ));
    let normalizer = Arc::new(Normalizer::new(resolver));
    let driver = Arc::new(IngestionDriver::new(
        provider.clone(),
        store.clone(),
        normalizer,
        config.max_pages,
    ));

    match cli.command {
        Command::Backfill { wallet, max_pages } => {
            let stats = driver.backfill(&wallet, max_pages).await?;
            print_json(&stats);
        }
        Command::SyncTail { wallet } => {
            let stats = driver.sync_tail(&wallet).await?;
            print_json(&stats);
        }
        Command::Status { wallet } => {
            let state = store.sync_state(&wallet).await?;
            let event_count = store.count_wallet_events(&wallet).await?;
            let raw_count = store.count_raw_transactions().await?;
            let last_audit = store.last_reconcile_audit(&wallet).await?;
            print_json(&serde_json::json!({
                "wallet": wallet,
                "sync_state": state,
                "wallet_event_count": event_count,
                "raw_transaction_count": raw_count,
                "last_audit": last_audit,
            }));
        }
        Command::ReconcileRecent { wallet, window } => {
            let auditor = ReconcileAuditor::new(provider.clone(), store.clone(), driver.clone());
            let results = auditor.reconcile_recent_slots(&wallet, window).await?;
            print_json(&results);
        }
        Command::Analyze { wallet } => {
            let inner: Arc<dyn PriceOracle> = match config.price_provider {
                PriceProvider::Birdeye => {
                    let api_key = config.birdeye_api_key.clone().ok_or_else(|| {
                        IndexerError::Config(
                            "BIRDEYE_API_KEY is required for the birdeye price provider"
                                .to_string(),
                        )
                    })?;
                    Arc::new(BirdeyeOracle::new(api_key, config.timeout_ms))
                }
                PriceProvider::Gecko => Arc::new(GeckoTerminalOracle::new(config.timeout_ms)),
            };
            let oracle = Arc::new(CachingOracle::new(inner, store.clone()));
            let reconstructor = PositionReconstructor::new(store.clone(), oracle);
            let analysis = reconstructor.analyze(&wallet).await?;
            print_json(&analysis);
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("serializable result")
    );
}

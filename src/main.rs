use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use walletflow::application::pipeline::LedgerPipeline;
use walletflow::config::PipelineConfig;
use walletflow::domain::ports::{BalanceStoreHandle, EventLogHandle};
use walletflow::infrastructure::in_memory::{InMemoryBalanceStore, InMemoryEventLog};
use walletflow::interfaces::csv::balance_writer::BalanceWriter;
use walletflow::interfaces::csv::inbound_reader::{Inbound, InboundReader};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Inbound payments and credits CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Partition count of both topics
    #[arg(long)]
    partitions: Option<u32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path).into_diagnostic()?,
        None => PipelineConfig::default(),
    }
    .with_env()
    .into_diagnostic()?;
    if let Some(partitions) = cli.partitions {
        config.partitions = partitions;
    }
    if let Some(db_path) = cli.db_path {
        config.data_dir = Some(db_path);
    }
    config.validate().into_diagnostic()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.num_stream_threads)
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(run(cli.input, config))
}

async fn run(input: PathBuf, config: PipelineConfig) -> Result<()> {
    let (log, store) = open_backends(&config)?;
    let mut pipeline = LedgerPipeline::start(config, log, store)
        .await
        .into_diagnostic()?;
    let producer = pipeline.producer();

    let file = File::open(input).into_diagnostic()?;
    for inbound in InboundReader::new(file).records() {
        let submitted = match inbound {
            Ok(Inbound::Payment { key, payment }) => producer.submit_payment(&key, &payment).await,
            Ok(Inbound::Credit {
                key,
                amount,
                reference,
                description,
            }) => {
                producer
                    .seed_credit(&key, amount, &reference, &description)
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error reading inbound row");
                continue;
            }
        };
        submitted.into_diagnostic()?;
    }

    // Print what was materialized even if a partition halted.
    let outcome = pipeline.run_until_idle().await;
    let balances = pipeline.balances().await.into_diagnostic()?;
    let stdout = io::stdout();
    BalanceWriter::new(stdout.lock())
        .write_balances(balances)
        .into_diagnostic()?;

    outcome.into_diagnostic()?;
    Ok(())
}

fn open_backends(config: &PipelineConfig) -> Result<(EventLogHandle, BalanceStoreHandle)> {
    match &config.data_dir {
        Some(path) => open_persistent(path),
        None => Ok((
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryBalanceStore::new()),
        )),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(path: &std::path::Path) -> Result<(EventLogHandle, BalanceStoreHandle)> {
    use walletflow::infrastructure::rocksdb::RocksDBStore;

    let store = RocksDBStore::open(path).into_diagnostic()?;
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(path: &std::path::Path) -> Result<(EventLogHandle, BalanceStoreHandle)> {
    Err(miette::miette!(
        "cannot open {}: built without the storage-rocksdb feature",
        path.display()
    ))
}

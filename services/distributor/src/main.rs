//! Weather record distributor.
//!
//! Publishes records that became available since the last run to Kafka:
//! - per-group mode: one message per location (and per day for observations),
//!   with per-product watermarks so reruns never resend data
//! - packed mode: one message holding the latest forecast of every product

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use distribution::{
    DistributionConfig, Distributor, FlushOutcome, KafkaBus, KafkaConnectionParams, Publisher,
};
use storage::{PgRecordStore, WatermarkStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One message per element (or element-day), watermarks tracked per product
    PerGroup,
    /// One message aggregating every product, no watermarks
    Packed,
}

#[derive(Parser, Debug)]
#[command(name = "distributor")]
#[command(about = "Distribute newly available weather records to Kafka")]
struct Args {
    /// Run configuration (YAML or JSON)
    #[arg(short, long, env = "DISTRIBUTION_CONFIG")]
    config: PathBuf,

    /// Distribution mode
    #[arg(long, value_enum, default_value = "per-group")]
    mode: Mode,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Authenticate against the brokers with SASL_SSL
    #[arg(long)]
    sasl: bool,

    /// Broker list, overrides KAFKA_BROKER_LIST_NO_AUTH
    #[arg(long)]
    brokers: Option<String>,

    /// Directory where the SASL certificates are written
    #[arg(long, env = "KAFKA_CERT_DIR", default_value = "/config")]
    cert_dir: PathBuf,

    /// Record store connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = DistributionConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    info!(
        config = %args.config.display(),
        mode = ?args.mode,
        products = config.input_products.len(),
        "Starting weather record distribution"
    );

    tokio::fs::create_dir_all(&config.general.distribution_info_folder)
        .await
        .context("Failed to create distribution info folder")?;

    let params = KafkaConnectionParams::from_env(args.sasl)?;
    let bus = KafkaBus::new(&params, args.brokers.as_deref(), args.sasl, &args.cert_dir)?;
    let publisher = Publisher::new(Box::new(bus), params.topic.clone());

    let store = PgRecordStore::connect(&args.database_url).await?;
    info!("Connected to record store");

    let distributor = Distributor::new(&config, &store, &publisher);

    let result: Result<()> = match args.mode {
        Mode::PerGroup => {
            let path = config.watermark_path();
            match WatermarkStore::load(&path) {
                Ok(mut watermarks) => distributor
                    .run_per_group(&mut watermarks)
                    .await
                    .map(|report| {
                        info!(
                            distributed = report.products_distributed,
                            skipped = report.products_skipped,
                            up_to_date = report.products_up_to_date,
                            published = report.messages_published,
                            failed = report.messages_failed,
                            watermarks_persisted = report.watermarks_persisted,
                            "Session summary"
                        );
                    })
                    .context("Per-group distribution failed"),
                Err(e) => Err(anyhow::Error::new(e)
                    .context(format!("Failed to load watermarks from {}", path.display()))),
            }
        }
        Mode::Packed => distributor
            .run_packed()
            .await
            .map(|report| {
                info!(
                    variables = ?report.variables,
                    skipped = report.products_skipped,
                    published = report.published,
                    "Session summary"
                );
            })
            .context("Packed distribution failed"),
    };

    // The producer is always drained, also after a failed run
    match publisher.close() {
        FlushOutcome::Idle => info!("No message was published"),
        FlushOutcome::Flushed { attempts } => info!(attempts, "Kafka producer flushed"),
        FlushOutcome::Incomplete => warn!("Kafka producer closed with undelivered messages"),
    }

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Distribution aborted");
    }
    result
}

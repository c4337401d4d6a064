//! Forklift - KV-backed background job queue
//!
//! Main entry point for the Forklift CLI and server.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use forklift_api::{ApiServer, AppState, CycleScheduler};
use forklift_config::{
    Config, ConfigLoader, ConfigValidator, LogFormat, LoggingConfig, StoreBackend, StoreConfig,
};
use forklift_queue::{EnqueueOptions, HandlerRegistry, Processor, QueueEngine};
use forklift_store::{KvStore, MemoryKvStore, SqliteKvStore, StoreError, SystemClock};

/// Forklift CLI.
#[derive(Parser)]
#[command(name = "forklift")]
#[command(about = "KV-backed background job queue")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: ~/.forklift/config.toml)
    #[arg(short, long, env = "FORKLIFT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and cron triggers in the foreground
    Serve {
        /// Overrides server.host
        #[arg(long)]
        host: Option<String>,

        /// Overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one processing cycle for a queue
    Process {
        queue: String,

        /// Keep running cycles while batches come back full
        #[arg(long)]
        drain: bool,
    },

    /// Show bucket sizes for a queue
    Stats { queue: String },

    /// Move dead letters back to the ready bucket
    RetryDead {
        queue: String,

        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Enqueue a job
    Enqueue {
        queue: String,

        /// Job type tag, e.g. `webhook` or `alert`
        job_type: String,

        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,

        /// Process no earlier than this many seconds from now
        #[arg(long)]
        delay_secs: Option<u64>,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Explicit idempotency fingerprint
        #[arg(long)]
        fingerprint: Option<String>,
    },
}

fn forklift_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".forklift"))
        .unwrap_or_else(|| PathBuf::from(".forklift"))
}

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG` wins over `logging.level`. Files rotate daily and the last 30
/// are kept.
fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = match config.format {
        LogFormat::Text => fmt::layer().with_target(true).with_ansi(true).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let file = match &config.directory {
        Some(dir) => {
            let log_dir = PathBuf::from(ConfigLoader::expand_path(dir));
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("forklift")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Dropping the guard stops the writer thread.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Report validation warnings; validation errors are fatal.
fn validate_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config);
    for warning in &result.warnings {
        warn!("Config warning at {}: {}", warning.path, warning.message);
    }
    if !result.is_valid() {
        for err in &result.errors {
            error!("Config error: {}", err);
        }
        return Err(format!("invalid configuration: {} error(s)", result.errors.len()).into());
    }

    Ok(())
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryKvStore::new())),
        StoreBackend::Sqlite => {
            let path = ConfigLoader::expand_path(&config.path);
            info!("Opening SQLite store at {}", path);
            Ok(Arc::new(SqliteKvStore::open(path).await?))
        }
    }
}

async fn build_processor(config: &Config) -> Result<Arc<Processor>, Box<dyn std::error::Error>> {
    let store = open_store(&config.store).await?;
    let engine = Arc::new(QueueEngine::from_config(store, Arc::new(SystemClock), config));

    let registry = Arc::new(HandlerRegistry::new());
    handlers::register_builtin(&registry)?;
    info!("Registered job types: {:?}", registry.job_types());

    Ok(Arc::new(Processor::new(
        engine,
        registry,
        config.processor.clone(),
    )))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn serve(
    config: Config,
    processor: Arc<Processor>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let scheduler = if config.scheduler.enabled && !config.triggers.is_empty() {
        let scheduler = CycleScheduler::new(processor.clone(), &config.triggers)
            .with_check_interval(Duration::from_secs(config.scheduler.check_interval_secs));
        Some(tokio::spawn(scheduler.run(cancel_rx)))
    } else {
        info!("No cron triggers active");
        None
    };

    let state = Arc::new(AppState::new(processor));
    let server = ApiServer::new(config.server.clone(), state);
    let result = server.run(shutdown_signal()).await;

    let _ = cancel_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!("Cycle scheduler task failed: {}", e);
        }
    }

    info!("Forklift stopped");
    result
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(|| forklift_dir().join("config.toml"));
    let mut config = ConfigLoader::load_or_default(&config_path)?;
    init_tracing(&config.logging)?;
    validate_config(&config)?;

    let processor = build_processor(&config).await?;
    let engine = processor.engine().clone();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("Starting Forklift v{}", env!("CARGO_PKG_VERSION"));
            serve(config, processor).await?;
        }

        Commands::Process { queue, drain } => {
            let outcome = if drain {
                processor
                    .drain(&queue, config.processor.max_drain_cycles)
                    .await?
            } else {
                processor.run_cycle(&queue).await?
            };
            print_json(&outcome)?;
        }

        Commands::Stats { queue } => {
            let stats = engine.stats(&queue).await?;
            print_json(&stats)?;
        }

        Commands::RetryDead { queue, count } => {
            let moved = engine.retry_deadletter(&queue, count).await?;
            print_json(&serde_json::json!({ "queue": queue, "moved": moved }))?;
        }

        Commands::Enqueue {
            queue,
            job_type,
            payload,
            delay_secs,
            max_retries,
            fingerprint,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let options = EnqueueOptions {
                fingerprint,
                delay: delay_secs.map(Duration::from_secs),
                due_at: None,
                max_retries,
            };
            let envelope = engine.enqueue(&queue, &job_type, payload, options).await?;
            print_json(&envelope)?;
        }
    }

    Ok(())
}

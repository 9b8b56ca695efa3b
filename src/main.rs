// Main entrypoint for the ferroshard cache server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use ferroshard::bytes::fmt_mem;
use ferroshard::cache::Store;
use ferroshard::config::Config;
use ferroshard::executor::{self, ThreadPool};
use ferroshard::server::threaded;
use ferroshard::shutdown::GracefulShutdown;

/// ferroshard - striped in-memory LRU cache server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,
}

/// Configures structured logging based on configuration.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_level()));

    if cfg.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

/// Logs the thread parallelism the executor will scale up to.
fn log_executor_watermarks(cfg: &Config) {
    info!(
        component = "main",
        event = "executor_configured",
        low_watermark = cfg.executor.low_watermark,
        high_watermark = cfg.executor.high_watermark,
        "executor watermarks configured"
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = Config::load_with_fallback(args.cfg).context("failed to load configuration")?;
    configure_logger(&cfg);
    log_executor_watermarks(&cfg);

    info!(
        component = "main",
        event = "storage_configured",
        shard_count = cfg.storage.shard_count,
        shard_max_bytes = %fmt_mem(cfg.storage.shard_max_bytes as i64),
        "store configured"
    );

    let store = Arc::new(Store::new(cfg.storage.shard_count, cfg.storage.shard_max_bytes));

    let pool = Arc::new(ThreadPool::new(executor::Config {
        name: "worker".to_string(),
        low_watermark: cfg.executor.low_watermark,
        high_watermark: cfg.executor.high_watermark,
        max_queue_size: cfg.executor.max_queue_size,
        idle_time: cfg.executor.idle_time,
        ..executor::Config::default()
    }));

    let shutdown = GracefulShutdown::new();
    shutdown.add(1);

    let result = threaded::serve(&cfg.server.bind_addr, store, Arc::clone(&pool));
    shutdown.done();

    if let Err(err) = &result {
        error!(component = "main", event = "serve_failed", error = %err);
    }
    pool.stop(true);
    result.context("server loop exited with an error")
}

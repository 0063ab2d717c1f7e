use std::io::{self, BufRead};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use ss_runtime::{init_tracing, MetricsRegistry, Stopwatch};
use ss_service::{serve, NotificationBoard, ServiceConfig, ServiceState, UserRegistry};
use tracing::{error, info, warn};

/// Sales series server.
#[derive(Parser)]
#[command(name = "sales_server")]
#[command(about = "Serves sales events and aggregates over a framed TCP protocol", long_about = None)]
struct Cli {
    /// JSON configuration file; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the per-day series files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of day series kept in memory.
    #[arg(short = 's', long)]
    cache_size: Option<usize>,

    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => ServiceConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }
    if let Some(size) = cli.cache_size {
        cfg.cache_size = size;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    cfg.validate()?;

    let metrics = MetricsRegistry::default();
    let stopwatch = Stopwatch::start();
    let state = Arc::new(
        ServiceState::from_config(&cfg, Arc::new(NotificationBoard::new()), metrics.clone())
            .context("opening series state")?,
    );
    info!(
        data_dir = %cfg.data_dir.display(),
        cache_size = cfg.cache_size,
        date = %state.current_date(),
        history_days = state.max_days(),
        "sales_server starting"
    );
    if cfg.cache_size >= state.max_days() {
        warn!(
            cache_size = cfg.cache_size,
            history_days = state.max_days(),
            "cache holds the whole history"
        );
    }

    let listener = TcpListener::bind(("0.0.0.0", cfg.port))
        .with_context(|| format!("binding port {}", cfg.port))?;

    {
        let state = Arc::clone(&state);
        thread::Builder::new()
            .name("console".into())
            .spawn(move || watch_console(&state, &metrics, &stopwatch))?;
    }

    serve(listener, state, Arc::new(UserRegistry::new()), &cfg)?;
    Ok(())
}

/// Typing `quit` on stdin flushes modified series and exits.
fn watch_console(state: &ServiceState, metrics: &MetricsRegistry, stopwatch: &Stopwatch) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
            return;
        };
        if line.trim() != "quit" {
            continue;
        }

        info!("sales_server shutting down");
        let code = match state.shutdown() {
            Ok(_) => 0,
            Err(err) => {
                error!(error = %err, "flush failed");
                1
            }
        };
        info!(
            "{}",
            metrics
                .snapshot()
                .to_json_line("shutdown", Some(stopwatch.elapsed()))
        );
        std::process::exit(code);
    }
}

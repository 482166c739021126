use std::env;
use std::sync::Arc;

use anyhow::Context;
use libris_cache::config::loader::load_config;
use libris_cache::{
    ClientOptions, HealthMonitor, MemoryTier, RemoteCacheClient, metrics, observability,
};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From LIBRIS_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (libris.toml), optional
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (LIBRIS_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = config_path.as_deref().unwrap_or("libris.toml"),
        source = %source,
        "Configuration loaded"
    );
    observability::apply_logging_level(&cfg.logging.level);
    metrics::init_metrics();

    if let Err(e) = run(&cfg, use_memory_tier()).await {
        tracing::error!(error = %e, "Probe failed");
        observability::shutdown_tracing();
        std::process::exit(1);
    }

    observability::shutdown_tracing();
}

async fn run(cfg: &libris_cache::CacheConfig, memory: bool) -> anyhow::Result<()> {
    let client = if memory {
        tracing::info!("Using in-process remote tier");
        RemoteCacheClient::new(Arc::new(MemoryTier::new()), ClientOptions::from_config(cfg))
    } else {
        RemoteCacheClient::connect(cfg).context("failed to build Redis client")?
    };
    let client = Arc::new(client);

    let monitor = HealthMonitor::new(client.clone(), &cfg.health, &cfg.pool);
    let handle = monitor.start().context("failed to start health monitor")?;

    let mut ticker = tokio::time::interval(cfg.health.interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let status = monitor.get_health_status();
                tracing::info!(
                    state = ?status.state,
                    healthy = status.is_healthy,
                    degraded = status.degraded,
                    failures = status.consecutive_failures,
                    response_ms = status.metrics.response_time.as_millis() as u64,
                    error_rate = status.metrics.error_rate,
                    message = %status.message,
                    "Remote cache health"
                );
            }
        }
    }

    handle.stop().await;
    client.close();

    let status = monitor.get_health_status();
    tracing::info!(
        status = %serde_json::to_string(&*status).context("failed to encode health status")?,
        "Final health status"
    );
    if let Some(rendered) = metrics::render_metrics() {
        tracing::info!(metrics = %rendered, "Metrics snapshot");
    }
    Ok(())
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: LIBRIS_CONFIG
/// 3. Default: libris.toml when present, else built-in defaults
fn resolve_config_path() -> (Option<String>, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (Some(path), ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("LIBRIS_CONFIG") {
        if !path.is_empty() {
            return (Some(path), ConfigSource::EnvironmentVariable);
        }
    }

    (None, ConfigSource::Default)
}

fn use_memory_tier() -> bool {
    env::args().skip(1).any(|arg| arg == "--memory")
}

//! memtier daemon
//!
//! Runs an [`OptimizationEngine`] and serves its health, metrics and
//! performance report over HTTP.
//!
//! # Endpoints
//!
//! ```text
//! GET /healthz   health checks as JSON (503 when unhealthy)
//! GET /readyz    200 once the engine is running
//! GET /metrics   Prometheus text exposition
//! GET /report    performance report as JSON
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use memtier::cache::EvictionPolicy;
use memtier::monitoring::HealthStatus;
use memtier::{EngineConfig, Error, OptimizationEngine, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// memtier - tiered cache and batch scheduler for LLM-memory pipelines
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override its values
    #[arg(long, env = "MEMTIER_CONFIG")]
    config: Option<PathBuf>,

    /// L1 capacity in entries
    #[arg(long, env = "MEMTIER_L1_CAPACITY")]
    l1_capacity: Option<usize>,

    /// L2 capacity in entries
    #[arg(long, env = "MEMTIER_L2_MAX_ENTRIES")]
    l2_max_entries: Option<usize>,

    /// L2 capacity in megabytes
    #[arg(long, env = "MEMTIER_L2_MAX_MEMORY_MB")]
    l2_max_memory_mb: Option<u64>,

    /// L2 eviction policy (lru, lfu, fifo)
    #[arg(long, env = "MEMTIER_EVICTION")]
    eviction: Option<String>,

    /// L3 cache directory
    #[arg(long, env = "MEMTIER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Tasks per batch
    #[arg(long, env = "MEMTIER_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Longest a partial batch waits before flushing, in milliseconds
    #[arg(long, env = "MEMTIER_MAX_WAIT_MS")]
    max_wait_ms: Option<u64>,

    /// HTTP bind address
    #[arg(long, env = "MEMTIER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_yaml_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(capacity) = self.l1_capacity {
            config.cache.l1.capacity = capacity;
        }
        if let Some(max_entries) = self.l2_max_entries {
            config.cache.l2.max_entries = max_entries;
        }
        if let Some(mb) = self.l2_max_memory_mb {
            config.cache.l2.max_bytes = mb * 1024 * 1024;
        }
        if let Some(eviction) = &self.eviction {
            config.cache.l2.eviction = eviction.parse::<EvictionPolicy>()?;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.l3.directory = dir.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch.batch_size = batch_size;
        }
        if let Some(ms) = self.max_wait_ms {
            config.batch.max_wait = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.engine_config()?;
    info!("Starting memtier");
    info!("  L1 capacity: {}", config.cache.l1.capacity);
    info!(
        "  L2 capacity: {} entries / {} bytes ({})",
        config.cache.l2.max_entries, config.cache.l2.max_bytes, config.cache.l2.eviction
    );
    info!("  L3 directory: {}", config.cache.l3.directory.display());
    info!(
        "  Batch size: {}, max wait: {:?}",
        config.batch.batch_size, config.batch.max_wait
    );

    let engine = Arc::new(OptimizationEngine::start(config)?);

    let addr: SocketAddr = args
        .listen_addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address: {}", e)))?;
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let cancel = CancellationToken::new();
    let server = tokio::spawn(run_http_server(
        listener,
        Arc::clone(&engine),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    if let Err(e) = server.await {
        error!("HTTP server task failed: {}", e);
    }
    engine.shutdown().await;

    info!("memtier shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = args.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn", level)));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

async fn run_http_server(
    listener: TcpListener,
    engine: Arc<OptimizationEngine>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!("HTTP accept error: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let engine = Arc::clone(&engine);
                async move { Ok::<_, Infallible>(route(&engine, &req)) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("HTTP connection error: {}", e);
            }
        });
    }
    info!("HTTP server stopped");
}

fn route<B>(engine: &OptimizationEngine, req: &Request<B>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "method not allowed");
    }

    match req.uri().path() {
        "/healthz" => {
            let health = engine.health();
            let status = if health.status == HealthStatus::Unhealthy {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            json_response(status, &health)
        }
        "/readyz" => {
            if engine.monitor().health_check().is_ready() {
                respond(StatusCode::OK, "text/plain", "ok")
            } else {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "not ready")
            }
        }
        "/metrics" => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            engine.export_metrics(),
        ),
        "/report" => json_response(StatusCode::OK, &engine.get_performance_report()),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("serialization failed: {}", e),
        ),
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

//! Client pool host
//!
//! Owns the process lifecycle around the provider client pool:
//! 1. Loads configuration and installs logging + Prometheus
//! 2. Builds the pool and starts the expiry sweeper
//! 3. Serves `/health` and `/metrics`
//! 4. On SIGINT/SIGTERM drains the listener, stops the sweeper, and closes
//!    every pooled client exactly once via `ClientPool::shutdown`

mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use client_pool::{ClientPool, spawn_sweeper};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::HttpClientFactory;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Time allowed for in-flight health/metrics requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type Pool = ClientPool<HttpClientFactory>;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Build the pool from configuration.
fn build_pool(config: &Config) -> std::result::Result<Pool, error::Error> {
    let factory = HttpClientFactory::new(config.factory_config());
    Ok(ClientPool::new(factory, config.pool_config())?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting client-pool-host");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        ttl_secs = config.pool.ttl_secs,
        max_entries = config.pool.max_entries,
        sweep_interval_secs = config.pool.sweep_interval_secs,
        verify_credentials = config.providers.verify_credentials,
        "configuration loaded"
    );

    let pool = Arc::new(build_pool(&config)?);
    let sweeper = config
        .sweep_interval()
        .map(|interval| spawn_sweeper(Arc::clone(&pool), interval));

    let app = build_router(
        AppState {
            pool: Arc::clone(&pool),
            prometheus,
            started_at: Instant::now(),
        },
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| error::Error::Bind {
            addr: listen_addr,
            source,
        })?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt, not at server start
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("listener drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    drain_pool(&pool, sweeper).await;

    info!("shutdown complete");
    Ok(())
}

/// Stop the sweeper and close every pooled client.
///
/// The sweeper is aborted first so nothing purges concurrently with the drain.
async fn drain_pool(pool: &Pool, sweeper: Option<JoinHandle<()>>) {
    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await;
    }
    let stats = pool.stats().await;
    info!(
        entries = stats.entries,
        created = stats.created,
        reused = stats.reused,
        "draining client pool"
    );
    pool.shutdown().await;
}

/// Health endpoint: process uptime plus pool statistics.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats().await;
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pool": stats,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::Secret;
    use provider::{HttpFactoryConfig, ProviderClient, ProviderId};
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    /// Pool whose factory never touches the network (no credential probe).
    fn test_pool(max_entries: usize) -> Arc<Pool> {
        let factory = HttpClientFactory::new(HttpFactoryConfig {
            openai_base_url: "http://127.0.0.1:9".into(),
            anthropic_base_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(1),
            verify_credentials: false,
        });
        Arc::new(
            ClientPool::new(
                factory,
                client_pool::PoolConfig {
                    ttl: Duration::from_secs(900),
                    max_entries,
                },
            )
            .unwrap(),
        )
    }

    fn test_app(pool: Arc<Pool>) -> Router {
        build_router(
            AppState {
                pool,
                prometheus: test_prometheus_handle(),
                started_at: Instant::now(),
            },
            8,
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_empty_pool() {
        let (status, body) = get_json(test_app(test_pool(4)), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["pool"]["entries"], 0);
        assert_eq!(body["pool"]["max_entries"], 4);
        assert_eq!(body["pool"]["ttl_secs"], 900);
    }

    #[tokio::test]
    async fn health_reflects_pooled_clients() {
        let pool = test_pool(4);
        pool.acquire(ProviderId::OpenAi, &Secret::from("sk-one"))
            .await
            .unwrap();
        pool.acquire(ProviderId::OpenAi, &Secret::from("sk-one"))
            .await
            .unwrap();
        pool.acquire(ProviderId::Anthropic, &Secret::from("sk-two"))
            .await
            .unwrap();

        let (_, body) = get_json(test_app(pool), "/health").await;
        assert_eq!(body["pool"]["entries"], 2);
        assert_eq!(body["pool"]["created"], 2);
        assert_eq!(body["pool"]["reused"], 1);
    }

    #[tokio::test]
    async fn health_never_exposes_credentials() {
        let pool = test_pool(4);
        pool.acquire(ProviderId::Anthropic, &Secret::from("sk-ant-secret-value"))
            .await
            .unwrap();

        let response = test_app(pool)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("sk-ant-secret-value"));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_format() {
        let response = test_app(test_pool(4))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = test_app(test_pool(4))
            .oneshot(Request::builder().uri("/v1/compare").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn drain_pool_closes_clients_and_stops_sweeper() {
        let pool = test_pool(4);
        let client = pool
            .acquire(ProviderId::OpenAi, &Secret::from("sk-drain"))
            .await
            .unwrap();
        let sweeper = spawn_sweeper(Arc::clone(&pool), Duration::from_secs(60));

        drain_pool(&pool, Some(sweeper)).await;

        assert!(pool.is_empty().await);
        assert!(client.is_closed());
        assert_eq!(client.provider(), ProviderId::OpenAi);

        // A second drain is a no-op
        drain_pool(&pool, None).await;
        assert!(pool.is_empty().await);
    }

    #[test]
    fn build_pool_rejects_invalid_sizing() {
        let config: Config = toml::from_str(
            r#"
[server]
listen_addr = "127.0.0.1:9090"

[pool]
max_entries = 0
"#,
        )
        .unwrap();

        let err = build_pool(&config).err().unwrap();
        assert!(err.to_string().contains("max_entries"), "got: {err}");
    }
}

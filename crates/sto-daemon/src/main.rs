//! sto-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, builds
//! the shared state, wires middleware, and starts the HTTP server. All route
//! handlers live in `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sto_config::{ConfigSurface, UnusedKeyPolicy};
use sto_daemon::{routes, state};
use sto_sale::SystemClock;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let loaded = sto_config::load_layered_yaml(&paths)
        .with_context(|| format!("load config {paths:?}"))?;
    let report = sto_config::report_unused_keys(
        ConfigSurface::Daemon,
        &loaded.config_json,
        unused_key_policy_from_env(),
    )?;
    for p in &report.unused_leaf_pointers {
        warn!(pointer = %p, "config key not used by daemon");
    }

    let admin_token = sto_config::resolve_admin_token(&loaded.config_json)?;
    if admin_token.is_none() {
        warn!("no admin token configured; admin routes are closed");
    }

    let shared = Arc::new(state::AppState::boot(
        &loaded,
        admin_token,
        Arc::new(SystemClock),
    )?);
    info!(config_hash = %loaded.config_hash, state = %shared.sale.state(), "sale loaded");

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_settlement_retry(Arc::clone(&shared), Duration::from_secs(30));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("sto-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("STO_DAEMON_ADDR").ok()?.parse().ok()
}

/// `STO_CONFIG` is a comma-separated list of layers in merge order.
fn config_paths_from_env() -> Vec<String> {
    std::env::var("STO_CONFIG")
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec!["config/sale.base.yaml".to_string()])
}

fn unused_key_policy_from_env() -> UnusedKeyPolicy {
    match std::env::var("STO_CONFIG_STRICT").as_deref() {
        Ok("1") | Ok("true") => UnusedKeyPolicy::Fail,
        _ => UnusedKeyPolicy::Warn,
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

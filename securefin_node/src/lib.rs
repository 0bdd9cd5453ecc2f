pub mod anchor_service;
pub mod api;
pub mod auth;
pub mod config;
pub mod digest;
pub mod ledger;
pub mod model;
pub mod storage;

use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::anchor_service::AnchorService;
use crate::api::{AppState, RateLimitSettings};
use crate::auth::JwtKeys;
use crate::config::{validate_config, Config, LogFormat};
use crate::ledger::{EthLedgerClient, LedgerClient, LedgerMode, SimulatedLedger};
use crate::storage::create_storage;

/// Install the global subscriber; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if result.is_err() {
        warn!("tracing subscriber already installed");
    }
}

/// Open storage, connect the ledger and assemble the handler state.
pub async fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let stores = create_storage(&cfg.storage_mode, &cfg.sled_path)
        .with_context(|| format!("failed to open {} storage", cfg.storage_mode.as_str()))?;
    info!("💾 Storage backend: {}", cfg.storage_mode.as_str());

    let ledger: Arc<dyn LedgerClient> = match cfg.ledger_mode {
        LedgerMode::Rpc => Arc::new(
            EthLedgerClient::connect(cfg.ledger.clone())
                .await
                .context("failed to build ledger client")?,
        ),
        LedgerMode::Simulated => {
            warn!("⚠️  Using simulated ledger - nothing is written on-chain");
            Arc::new(SimulatedLedger::new())
        }
    };
    info!("🔗 Ledger: {}", ledger.describe());

    let anchor = AnchorService::new(stores.transactions.clone(), ledger, cfg.anchor_options());
    Ok(AppState {
        transactions: stores.transactions,
        users: stores.users,
        anchor: Arc::new(anchor),
        jwt: Arc::new(JwtKeys::new(&cfg.jwt_secret, cfg.jwt_expiry_secs)),
        storage_mode: cfg.storage_mode.clone(),
    })
}

/// Validate the config, then serve the API until ctrl-c.
pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let validation = validate_config(&cfg);
    validation.print_summary();
    if !validation.valid {
        bail!("configuration invalid ({} errors)", validation.errors.len());
    }

    let state = build_state(&cfg).await?;
    let limits = RateLimitSettings {
        max_requests: cfg.rate_limit_max_requests,
        window_secs: cfg.rate_limit_window_secs,
    };
    let app = api::router(state, limits);

    info!("🚀 Starting API server on {}", cfg.api_addr);
    axum::Server::try_bind(&cfg.api_addr)
        .with_context(|| format!("failed to bind {}", cfg.api_addr))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server crashed")?;

    info!("👋 API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}

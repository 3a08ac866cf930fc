#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    auth::{HttpIdentityVerifier, IdentityVerifier, RejectingIdentityVerifier},
    config::Config,
    db::VaultDb,
    idempotency::IdempotencyStore,
    server::{AppState, build_router},
    vault::VaultService,
};

pub mod api_envelope;
pub mod auth;
pub mod config;
pub mod db;
pub mod idempotency;
pub mod rate_limit;
pub mod scheduler;
pub mod server;
pub mod vault;

/// Builds the vault service over Postgres when a database URL is configured,
/// otherwise over the in-memory stores.
pub async fn build_vault(
    config: &Config,
) -> Result<(VaultService, Arc<dyn IdempotencyStore>)> {
    let (store, idempotency) = match config.db_url.as_deref() {
        Some(url) => {
            let db = Arc::new(VaultDb::connect(url).await?);
            db.migrate().await?;
            (vault::store::postgres(db.clone()), idempotency::postgres(db))
        }
        None => {
            info!("DB_URL not set; using in-memory vault stores");
            (vault::store::memory(), idempotency::memory())
        }
    };
    let service = VaultService::new(store).with_network(config.network.clone());
    Ok((service, idempotency))
}

fn identity_verifier(config: &Config) -> Result<Arc<dyn IdentityVerifier>> {
    match config.auth_base_url.as_deref() {
        Some(base_url) => {
            let verifier = HttpIdentityVerifier::new(
                base_url,
                config.auth_api_key.clone(),
                Duration::from_millis(config.auth_timeout_ms),
            )
            .context("build identity provider client")?;
            Ok(Arc::new(verifier))
        }
        None => {
            tracing::warn!("VAULT_AUTH_BASE_URL not set; bearer tokens will be rejected");
            Ok(Arc::new(RejectingIdentityVerifier))
        }
    }
}

pub async fn build_state(config: Config) -> Result<AppState> {
    if config.api_key.is_none() {
        tracing::warn!("VAULT_CLUB_API_KEY not set; every keyed request will be rejected");
    }
    let (vault, idempotency) = build_vault(&config).await?;
    let identity = identity_verifier(&config)?;
    Ok(AppState::new(config, vault, idempotency, identity))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        network = %config.network,
        "vault club service listening"
    );

    let scheduler_enabled = config.harvest_scheduler_enabled;
    let interval = Duration::from_secs(config.harvest_interval_seconds);
    let state = build_state(config).await?;
    if scheduler_enabled {
        info!(
            interval_seconds = interval.as_secs(),
            "vault harvest scheduler enabled"
        );
        let _scheduler = scheduler::spawn_harvest_scheduler(state.vault().clone(), interval);
    }

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

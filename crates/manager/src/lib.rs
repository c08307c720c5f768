// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warren manager gateway.
//!
//! Resolves client queries (`getForId`, `getForKey`, `getOrCreateForKey`,
//! `create`) to actor ids and routes HTTP, SSE, and WebSocket streams to
//! the actor — inline into an embedded runner, or proxied to a remote
//! one.

pub mod config;
pub mod proxy;
pub mod query;
pub mod registry;
pub mod transport;

pub use config::ManagerConfig;
pub use query::{ActorQuery, ResolvedActor};
pub use registry::{ActorRecord, ListFilter, ManagerDriver, MemoryManagerDriver};
pub use transport::{build_router, spawn_server, ManagerState, Routing};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wire an inline manager over an embedded runner. The manager driver
/// shares the runner's storage so creation allocates blobs the runner can
/// wake from.
pub fn inline_state(
    runner: Arc<warren::Runner>,
    storage: Arc<dyn warren::StorageDriver>,
    auth_token: Option<String>,
) -> Arc<ManagerState> {
    let actor_names = runner.registry().names();
    Arc::new(ManagerState {
        driver: Arc::new(MemoryManagerDriver::new(storage)),
        routing: Routing::Inline { runner },
        auth_token,
        serverless: false,
        cloudflare_compat: false,
        client_endpoint: None,
        actor_names,
    })
}

/// Run the standalone gateway (proxy mode) to completion.
pub async fn run(config: ManagerConfig) -> anyhow::Result<()> {
    // reqwest is built with rustls-no-provider; install the ring provider
    // once for the whole process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    config.validate()?;
    let runner_url =
        config.runner_url.clone().ok_or_else(|| anyhow::anyhow!("runner url is required"))?;

    let storage: Arc<dyn warren::StorageDriver> = Arc::new(warren::MemoryStorage::new());
    let state = Arc::new(ManagerState {
        driver: Arc::new(MemoryManagerDriver::new(storage)),
        routing: Routing::Proxy { target: proxy::ProxyTarget::new(runner_url) },
        auth_token: config.auth_token.clone(),
        serverless: config.serverless,
        cloudflare_compat: config.cloudflare_compat,
        client_endpoint: config.client_endpoint.clone(),
        actor_names: Vec::new(),
    });

    let shutdown = CancellationToken::new();
    let addr = spawn_server(&config.host, config.port, state, shutdown.clone()).await?;
    info!("manager gateway ready on {addr}");

    // First signal: graceful shutdown. Second: force exit.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => info!("received SIGTERM"),
    }
    shutdown.cancel();
    Ok(())
}

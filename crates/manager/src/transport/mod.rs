// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager HTTP surface and the client-facing actor routes.

pub mod actors;
pub mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use warren::error::WarrenError;
use warren::protocol::Encoding;
use warren::transport::{error_response, headers};

use crate::registry::ManagerDriver;

/// How the gateway reaches actors.
pub enum Routing {
    /// Actors run in this process; requests dispatch straight into the
    /// embedded runner's handlers.
    Inline { runner: Arc<warren::Runner> },
    /// Actors run in a remote runner; requests are rebuilt and proxied.
    Proxy { target: crate::proxy::ProxyTarget },
}

pub struct ManagerState {
    pub driver: Arc<dyn ManagerDriver>,
    pub routing: Routing,
    pub auth_token: Option<String>,
    pub serverless: bool,
    pub cloudflare_compat: bool,
    pub client_endpoint: Option<String>,
    /// Actor definition names advertised in `/metadata` (inline mode).
    pub actor_names: Vec<String>,
}

/// Build the manager axum router.
pub fn build_router(state: Arc<ManagerState>) -> Router {
    Router::new()
        .route("/", get(http::banner))
        .route("/health", get(http::health))
        .route("/metadata", get(http::metadata))
        .route("/actors", get(http::list_actors).put(http::get_or_create_actor).post(http::create_actor))
        .route("/start", get(http::serverless_start))
        .route("/actors/connect/websocket", get(actors::connect_websocket))
        .route("/actors/connect/sse", get(actors::connect_sse))
        .route("/actors/action/{name}", post(actors::action))
        .route("/actors/message", post(actors::connection_message))
        .route("/actors/raw/http/{*path}", any(actors::raw_http))
        .route("/actors/raw/websocket/{*path}", get(actors::raw_websocket))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve; returns the bound address.
pub async fn spawn_server(
    host: &str,
    port: u16,
    state: Arc<ManagerState>,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    let router = build_router(state);
    info!("manager listening on {addr}");
    tokio::spawn(async move {
        let result =
            axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
        if let Err(e) = result {
            error!("manager server error: {e}");
        }
    });
    Ok(addr)
}

/// Bearer-token gate. `/` and `/health` stay open for probes.
async fn auth_layer(
    State(state): State<Arc<ManagerState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(req).await;
    };
    let path = req.uri().path();
    if path == "/" || path == "/health" {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(headers::TOKEN)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match presented {
        Some(token) if token == expected => next.run(req).await,
        _ => error_response(Encoding::Json, &WarrenError::unauthorized()).into_response(),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

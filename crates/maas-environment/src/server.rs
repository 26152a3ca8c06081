// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::handlers::{self, AppState};

/// Build the full router over the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Forward-auth for the reverse proxy. `get` also answers the HEAD
        // requests Traefik sends for HEAD originals.
        .route("/auth/mcp-bearer-check", get(handlers::mcp_bearer_check))
        // Instance data registry, consumed by container-resident clients.
        .route(
            "/api/instance-data-registry/{instance_id}/{key}",
            get(handlers::registry_get)
                .put(handlers::registry_set)
                .delete(handlers::registry_delete),
        )
        // Admin lifecycle surface.
        .route(
            "/api/instances",
            post(handlers::create_instance).get(handlers::list_instances),
        )
        .route("/api/instances/recreate-all", post(handlers::recreate_all_instances))
        .route("/api/instances/{instance_id}", get(handlers::get_instance))
        .route(
            "/api/instances/by-account/{account_id}",
            delete(handlers::remove_instance_for_account),
        )
        .route("/api/instances/{instance_id}/restart", post(handlers::restart_instance))
        .route("/api/instances/{instance_id}/recreate", post(handlers::recreate_instance))
        .route("/api/instances/{instance_id}/status", get(handlers::instance_status))
        .route(
            "/api/instances/{instance_id}/process-status",
            get(handlers::process_status),
        )
        .route("/api/instances/{instance_id}/env", put(handlers::update_env_vars))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until a shutdown signal arrives.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

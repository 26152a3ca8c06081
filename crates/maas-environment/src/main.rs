// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! MaaS Environment - Instance Lifecycle Management Server
//!
//! An HTTP server responsible for:
//! - Instance lifecycle (create, stop, restart, recreate, status)
//! - Forward-auth bearer checks for the reverse proxy
//! - The per-instance data registry

use std::sync::Arc;

use tracing::{info, warn};

use maas_environment::auth::McpBearerChecker;
use maas_environment::config::Config;
use maas_environment::db::PgInstanceRepository;
use maas_environment::engine::{ContainerEngine, DockerEngine};
use maas_environment::handlers::AppState;
use maas_environment::instance_types::InstanceTypeCatalog;
use maas_environment::lifecycle::McpInstancesService;
use maas_environment::registry::{InstanceDataRegistry, PgRegistryRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maas_environment=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        root_domain = %config.root_domain,
        "Starting MaaS Environment"
    );

    // The catalog must be valid before we serve anything.
    let catalog = Arc::new(InstanceTypeCatalog::load(&config.instance_types_path)?);
    info!(
        types = catalog.declared_types().count(),
        path = %config.instance_types_path.display(),
        "Instance type catalog loaded"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    // Create tables if they don't exist
    sqlx::raw_sql(include_str!("../migrations/schema.sql"))
        .execute(&pool)
        .await?;

    info!("Database schema verified");

    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::new(
        catalog.clone(),
        config.docker.clone(),
        config.root_domain.clone(),
        config.forward_auth_url(),
    ));
    info!(engine_type = engine.engine_type(), "Container engine initialized");

    let repo = Arc::new(PgInstanceRepository::new(pool.clone()));
    let service = Arc::new(McpInstancesService::new(
        repo.clone(),
        engine,
        catalog,
        config.root_domain.clone(),
        config.max_instances_per_account,
    ));
    let checker = Arc::new(McpBearerChecker::new(repo.clone(), config.root_domain.clone()));
    let registry = Arc::new(InstanceDataRegistry::new(
        repo,
        Arc::new(PgRegistryRepository::new(pool)),
    ));

    if config.admin_token.is_none() {
        warn!("MAAS_ADMIN_TOKEN not set, admin endpoints are disabled");
    }

    let state = Arc::new(AppState {
        service,
        checker,
        registry,
        admin_token: config.admin_token.clone(),
    });

    maas_environment::server::serve(config.http_addr, state).await?;

    info!("MaaS Environment shut down");

    Ok(())
}

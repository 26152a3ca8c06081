// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for maas-environment.

use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Instance type catalog failed to load or validate.
    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::instance_types::CatalogError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Account already holds the maximum number of instances.
    #[error("Maximum number of MCP instances reached for this account (max {0})")]
    QuotaExceeded(u32),

    /// Docker container creation or start failed; the persisted row has
    /// been rolled back.
    #[error("Failed to create Docker container for MCP instance {0}")]
    ContainerCreateFailed(String),

    /// Instance was not found.
    #[error("MCP instance not found: {0}")]
    InstanceNotFound(String),

    /// Account has no instance.
    #[error("No MCP instance for account: {0}")]
    NoInstanceForAccount(String),

    /// Caller acted on an instance owned by another account.
    #[error("Instance {0} does not belong to the requesting account")]
    OwnershipViolation(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the environment [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

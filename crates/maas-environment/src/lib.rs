// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! MaaS Environment - Instance Lifecycle and Container Orchestration
//!
//! This crate provisions and manages per-account sandboxed MCP instances
//! running as Docker containers behind a Traefik-compatible reverse proxy.
//! It handles the instance type catalog, container orchestration through the
//! Docker CLI, lifecycle sequencing with rollback, and the authenticated
//! forward-auth and data registry surfaces.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Reverse Proxy (Traefik)                    │
//! │   mcp-<slug>.<domain>  vnc-<slug>.<domain>   forward-auth      │
//! └───────────────────────────────────────────────────────────────┘
//!                │                                 │
//!                ▼                                 ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  maas-environment (this crate)                 │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────────┐  │
//! │  │   Type    │ │ Lifecycle │ │ Container │ │ Forward-auth / │  │
//! │  │  Catalog  │ │  Service  │ │  Engine   │ │ Data registry  │  │
//! │  └───────────┘ └───────────┘ └───────────┘ └───────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//!        │                │                │
//!        ▼                ▼                ▼
//!   instance_types   PostgreSQL      Docker CLI
//!       .toml       (instances,    (via wrapper or
//!                    registry)      bare binary)
//! ```
//!
//! # Container state machine
//!
//! ```text
//!   created ──start──▶ running ──stop──▶ stopped ──start──▶ running
//!      │                  │                 │
//!      └──────── any inspect/exec failure ──┴──▶ error
//!
//!   terminal only on explicit `docker rm`
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`instance_types`]: Declarative instance type catalog
//! - [`instance`]: The instance aggregate and derived identity
//! - [`invoker`]: External process invocation with a hard timeout
//! - [`engine`]: Container engine trait, Docker and mock implementations
//! - [`labels`]: Traefik label synthesis
//! - [`db`]: Instance persistence
//! - [`lifecycle`]: The lifecycle orchestrator
//! - [`status`]: Status report DTOs
//! - [`auth`]: Forward-auth bearer verification
//! - [`registry`]: Per-instance key-value registry
//! - [`handlers`], [`server`]: HTTP surface

/// Configuration loaded from environment variables.
pub mod config;

/// Instance aggregate, types, and derived naming.
pub mod instance;

/// Declarative instance type catalog, validated at load time.
pub mod instance_types;

/// External process invocation.
pub mod invoker;

/// Container engine implementations.
pub mod engine;

/// Reverse-proxy label synthesis.
pub mod labels;

/// Instance persistence.
pub mod db;

/// Instance lifecycle orchestration.
pub mod lifecycle;

/// Status report DTOs.
pub mod status;

/// Forward-auth bearer verification.
pub mod auth;

/// Per-instance key-value data registry.
pub mod registry;

/// Error types.
pub mod error;

/// HTTP request handlers.
pub mod handlers;

/// HTTP server wiring.
pub mod server;

pub use config::Config;
pub use error::{Error, Result};

// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for maas-environment.
//!
//! All environment variables are read once here, at boot. Docker invocation
//! mode (wrapper, sudo, validate-only) is resolved into explicit settings
//! that get injected into the engine; business logic never reads the process
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HTTP server address.
    pub http_addr: SocketAddr,
    /// Root domain used to derive instance subdomains.
    pub root_domain: String,
    /// Webapp domain; the forward-auth URL lives under it.
    pub webapp_domain: String,
    /// Path to the instance type catalog TOML file.
    pub instance_types_path: PathBuf,
    /// Maximum instances per account.
    pub max_instances_per_account: u32,
    /// Bearer token protecting the admin lifecycle/registry endpoints.
    pub admin_token: Option<String>,
    /// Docker invocation settings.
    pub docker: DockerConfig,
}

/// How Docker commands are invoked.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Constrained wrapper script; used when the file exists.
    pub wrapper_path: PathBuf,
    /// Call the wrapper directly instead of through `sudo -n`
    /// (development and test modes).
    pub no_sudo: bool,
    /// Short-circuit container creation as successful without invoking
    /// Docker; used to test orchestration without a daemon.
    pub validate_only: bool,
    /// Docker binary used when the wrapper is absent.
    pub docker_bin: String,
    /// Shared Docker network joined by every instance container.
    pub network: String,
    /// Hard wall-clock timeout per Docker command.
    pub command_timeout: Duration,
}

impl DockerConfig {
    /// Resolve the command prefix for Docker invocations.
    ///
    /// Prefers the constrained wrapper when present (through `sudo -n` in
    /// production, directly when `no_sudo` is set), falling back to the bare
    /// Docker binary.
    pub fn invoker_prefix(&self) -> Vec<String> {
        if self.wrapper_path.is_file() {
            let wrapper = self.wrapper_path.display().to_string();
            if self.no_sudo {
                return vec![wrapper];
            }
            return vec!["sudo".to_string(), "-n".to_string(), wrapper];
        }
        vec![self.docker_bin.clone()]
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("MAAS_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("MAAS_DATABASE_URL"))?;

        let port: u16 = std::env::var("MAAS_HTTP_PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let root_domain = std::env::var("APP_ROOT_DOMAIN")
            .unwrap_or_else(|_| "mcp-as-a-service.com".to_string());
        let webapp_domain = std::env::var("APP_WEBAPP_DOMAIN")
            .unwrap_or_else(|_| format!("app.{root_domain}"));

        let instance_types_path = PathBuf::from(
            std::env::var("MAAS_INSTANCE_TYPES_FILE")
                .unwrap_or_else(|_| "config/instance_types.toml".to_string()),
        );

        let max_instances_per_account = std::env::var("MAAS_MAX_INSTANCES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let admin_token = std::env::var("MAAS_ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Self {
            database_url,
            http_addr,
            root_domain,
            webapp_domain,
            instance_types_path,
            max_instances_per_account,
            admin_token,
            docker: DockerConfig {
                wrapper_path: PathBuf::from(
                    std::env::var("MAAS_DOCKER_WRAPPER")
                        .unwrap_or_else(|_| "bin/docker-cli-wrapper.sh".to_string()),
                ),
                no_sudo: env_flag("MAAS_WRAPPER_NO_SUDO"),
                validate_only: env_flag("MAAS_WRAPPER_VALIDATE_ONLY"),
                docker_bin: std::env::var("DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
                network: std::env::var("MAAS_DOCKER_NETWORK")
                    .unwrap_or_else(|_| "maas-mcp-instances".to_string()),
                command_timeout: Duration::from_secs(
                    std::env::var("MAAS_DOCKER_TIMEOUT_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(60),
                ),
            },
        })
    }

    /// Absolute forward-auth URL advertised to the reverse proxy.
    pub fn forward_auth_url(&self) -> String {
        format!("https://{}/auth/mcp-bearer-check", self.webapp_domain)
    }
}

fn env_flag(var: &str) -> bool {
    std::env::var(var).map(|v| v == "1" || v == "true").unwrap_or(false)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}

// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker CLI engine.
//!
//! Translates instances into `docker` invocations through the process
//! invoker and maps the results back to container states and health
//! booleans. In production the invocations go through a constrained
//! wrapper script so the set of permissible subcommands can be locked
//! down without code changes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::DockerConfig;
use crate::instance::{ContainerState, McpInstance};
use crate::instance_types::{DEFAULT_ACCEPT_STATUS_LT, EndpointConfig, InstanceTypeCatalog};
use crate::invoker::ProcessInvoker;
use crate::labels::build_traefik_labels;

use super::traits::ContainerEngine;

/// Container engine backed by the Docker CLI.
pub struct DockerEngine {
    invoker: ProcessInvoker,
    catalog: Arc<InstanceTypeCatalog>,
    docker: DockerConfig,
    root_domain: String,
    forward_auth_url: String,
}

impl DockerEngine {
    /// Create an engine for the given catalog and Docker configuration.
    pub fn new(
        catalog: Arc<InstanceTypeCatalog>,
        docker: DockerConfig,
        root_domain: String,
        forward_auth_url: String,
    ) -> Self {
        Self {
            invoker: ProcessInvoker::new(docker.command_timeout),
            catalog,
            docker,
            root_domain,
            forward_auth_url,
        }
    }

    /// Run one Docker verb, prefixed with the resolved invoker.
    async fn run_docker(&self, args: Vec<String>) -> crate::invoker::RunProcessResult {
        let mut command = self.docker.invoker_prefix();
        command.extend(args);
        self.invoker.run(&command).await
    }

    /// Run a single-verb operation on the instance's container.
    async fn simple_verb(&self, verb: &str, instance: &McpInstance) -> bool {
        let Some(name) = instance.container_name.as_deref() else {
            error!(instance_id = %instance.id, verb, "Instance has no container name");
            return false;
        };
        if self.docker.validate_only {
            debug!(verb, container = name, "Validate-only mode, skipping docker");
            return true;
        }
        let result = self.run_docker(vec![verb.to_string(), name.to_string()]).await;
        if !result.success() {
            error!(
                container = name,
                verb,
                exit_code = result.exit_code,
                detail = result.failure_detail(),
                "Docker verb failed"
            );
        }
        result.success()
    }

    /// Build the full `docker run` argument list for an instance.
    ///
    /// Pure with respect to the instance and catalog, so it is testable
    /// without a Docker daemon.
    pub fn build_run_args(&self, instance: &McpInstance) -> Option<Vec<String>> {
        let name = instance.container_name.as_deref()?;
        let slug = instance.instance_slug.as_deref()?;
        let instance_type = instance.instance_type();
        let type_cfg = self.catalog.get(instance_type)?;

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name.to_string(),
            "--memory=1g".into(),
            "--restart=always".into(),
            format!("--network={}", self.docker.network),
        ];

        let mut env_vars: Vec<String> = vec![
            format!("INSTANCE_ID={slug}"),
            format!("INSTANCE_TYPE={instance_type}"),
            format!("SCREEN_WIDTH={}", instance.screen_width),
            format!("SCREEN_HEIGHT={}", instance.screen_height),
            format!("COLOR_DEPTH={}", instance.color_depth),
            format!("VNC_PASSWORD={}", instance.vnc_password),
        ];
        for (key, value) in &type_cfg.docker.env {
            env_vars.push(format!("{key}={value}"));
        }
        for (key, value) in &instance.env_vars {
            env_vars.push(format!("{key}={value}"));
        }
        for env in env_vars {
            args.push("-e".into());
            args.push(env);
        }

        let labels = build_traefik_labels(
            type_cfg,
            slug,
            &self.root_domain,
            &self.docker.network,
            &self.forward_auth_url,
        );
        for label in labels {
            args.push("--label".into());
            args.push(label);
        }

        // Wrapper allows only the image name without a tag.
        args.push(self.catalog.image_for_type(instance_type));

        Some(args)
    }

    /// Probe one endpoint, using its health config or the conventional
    /// fixed probe when none is declared.
    async fn probe_endpoint(&self, instance: &McpInstance, endpoint_id: &str) -> bool {
        let type_cfg = match self.catalog.get(instance.instance_type()) {
            Some(cfg) => cfg,
            None => return false,
        };
        let Some(ep) = type_cfg.endpoints.get(endpoint_id) else {
            return false;
        };
        let (path, accept_lt) = probe_target(endpoint_id, ep);
        let code = self.exec_curl_status(instance, ep.port, path).await;
        code > 0 && code < accept_lt
    }
}

/// Probe path and threshold for an endpoint.
///
/// The declared health config wins; without one, the `mcp` endpoint gets
/// the conventional `/mcp` probe (MCP servers routinely 404 the root) and
/// everything else the root, both at the default threshold.
fn probe_target<'a>(endpoint_id: &str, ep: &'a EndpointConfig) -> (&'a str, u16) {
    match ep.http_health() {
        Some(h) => (h.path.as_str(), h.accept_status_lt),
        None if endpoint_id == "mcp" => ("/mcp", DEFAULT_ACCEPT_STATUS_LT),
        None => ("/", DEFAULT_ACCEPT_STATUS_LT),
    }
}

/// Map `docker inspect --format {{.State.Status}}` output to a state.
pub fn parse_container_state(exit_code: i32, stdout: &str) -> ContainerState {
    if exit_code != 0 {
        return ContainerState::Error;
    }
    match stdout.trim() {
        "running" => ContainerState::Running,
        "exited" | "stopped" => ContainerState::Stopped,
        "created" => ContainerState::Created,
        _ => ContainerState::Error,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn engine_type(&self) -> &'static str {
        "docker"
    }

    async fn create_container(&self, instance: &McpInstance) -> bool {
        let Some(args) = self.build_run_args(instance) else {
            error!(
                instance_id = %instance.id,
                "Cannot create container: missing derived fields or unknown type"
            );
            return false;
        };
        if self.docker.validate_only {
            debug!(instance_id = %instance.id, "Validate-only mode, skipping docker run");
            return true;
        }
        let result = self.run_docker(args).await;
        if result.success() {
            info!(
                instance_id = %instance.id,
                container = instance.container_name.as_deref().unwrap_or(""),
                "Container created"
            );
        } else {
            error!(
                instance_id = %instance.id,
                exit_code = result.exit_code,
                detail = result.failure_detail(),
                "docker run failed"
            );
        }
        result.success()
    }

    async fn start_container(&self, instance: &McpInstance) -> bool {
        self.simple_verb("start", instance).await
    }

    async fn stop_container(&self, instance: &McpInstance) -> bool {
        self.simple_verb("stop", instance).await
    }

    async fn remove_container(&self, instance: &McpInstance) -> bool {
        self.simple_verb("rm", instance).await
    }

    async fn restart_container(&self, instance: &McpInstance) -> bool {
        self.simple_verb("restart", instance).await
    }

    async fn container_state(&self, instance: &McpInstance) -> ContainerState {
        let Some(name) = instance.container_name.as_deref() else {
            return ContainerState::Error;
        };
        if self.docker.validate_only {
            return ContainerState::Running;
        }
        let result = self
            .run_docker(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}}".into(),
                name.to_string(),
            ])
            .await;
        parse_container_state(result.exit_code, &result.stdout)
    }

    async fn exec_curl_status(&self, instance: &McpInstance, port: u16, path: &str) -> u16 {
        let Some(name) = instance.container_name.as_deref() else {
            return 0;
        };
        if self.docker.validate_only {
            return 200;
        }
        let probe = format!(
            "curl -s -o /dev/null -w \"%{{http_code}}\" http://localhost:{port}{path}"
        );
        let result = self
            .run_docker(vec![
                "exec".into(),
                name.to_string(),
                "sh".into(),
                "-lc".into(),
                probe,
            ])
            .await;
        if !result.success() {
            return 0;
        }
        result.stdout.trim().trim_matches('"').parse().unwrap_or(0)
    }

    async fn is_container_healthy(&self, instance: &McpInstance) -> bool {
        if self.container_state(instance).await != ContainerState::Running {
            return false;
        }
        let Some(type_cfg) = self.catalog.get(instance.instance_type()) else {
            return false;
        };
        for (endpoint_id, ep) in &type_cfg.endpoints {
            // Endpoints without a health config pass by omission.
            let Some(health) = ep.http_health() else {
                continue;
            };
            let code = self.exec_curl_status(instance, ep.port, &health.path).await;
            if code == 0 || code >= health.accept_status_lt {
                debug!(
                    instance_id = %instance.id,
                    endpoint = endpoint_id,
                    code,
                    "Endpoint health probe failed"
                );
                return false;
            }
        }
        true
    }

    async fn is_mcp_endpoint_up(&self, instance: &McpInstance) -> bool {
        if self.container_state(instance).await != ContainerState::Running {
            return false;
        }
        self.probe_endpoint(instance, "mcp").await
    }

    async fn is_novnc_endpoint_up(&self, instance: &McpInstance) -> bool {
        if self.container_state(instance).await != ContainerState::Running {
            return false;
        }
        self.probe_endpoint(instance, "vnc").await
    }
}

// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle orchestration.
//!
//! [`McpInstancesService`] coordinates the repository and the container
//! engine: quota enforcement, secret and identity generation, the
//! create→start sequence with rollback, stop→remove, restart, and recreate.
//! Engine failures become explicit state updates or typed errors, so the
//! persisted row always reflects the last known truth. No operation retries
//! itself; compensations run synchronously in the same call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::InstanceRepository;
use crate::engine::ContainerEngine;
use crate::error::{Error, Result};
use crate::instance::{ContainerState, InstanceType, McpInstance};
use crate::instance_types::InstanceTypeCatalog;
use crate::status::{
    ContainerStatus, EndpointStatus, InstanceStatus, ProcessStatus, ServiceStatus,
};

/// Outcome of recreating one instance during [`McpInstancesService::recreate_all`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecreateOutcome {
    /// Instance that was recreated.
    pub instance_id: Uuid,
    /// Derived slug, when present.
    pub instance_slug: Option<String>,
    /// Whether the fresh container came up.
    pub success: bool,
}

/// Orchestrator for instance lifecycle operations.
pub struct McpInstancesService {
    repo: Arc<dyn InstanceRepository>,
    engine: Arc<dyn ContainerEngine>,
    catalog: Arc<InstanceTypeCatalog>,
    root_domain: String,
    max_instances_per_account: u32,
}

impl McpInstancesService {
    /// Wire the service to its repository, engine, and catalog.
    pub fn new(
        repo: Arc<dyn InstanceRepository>,
        engine: Arc<dyn ContainerEngine>,
        catalog: Arc<InstanceTypeCatalog>,
        root_domain: String,
        max_instances_per_account: u32,
    ) -> Self {
        Self {
            repo,
            engine,
            catalog,
            root_domain,
            max_instances_per_account,
        }
    }

    /// Create an instance for an account and start its container.
    ///
    /// Sequence: quota check, secret generation, row insert, derived-field
    /// computation, container create+start. When the engine fails, the row
    /// inserted by this call is deleted again so no persisted instance ever
    /// points at a container that was never created.
    pub async fn create_for_account(
        &self,
        account_id: &str,
        instance_type: Option<InstanceType>,
    ) -> Result<McpInstance> {
        let count = self.repo.count_for_account(account_id).await?;
        if count >= self.max_instances_per_account {
            return Err(Error::QuotaExceeded(self.max_instances_per_account));
        }

        // A request without a type gets the current default offering; the
        // legacy fallback is only for persisted rows with no recorded type.
        let instance_type = instance_type.unwrap_or(InstanceType::PlaywrightV1);
        if self.catalog.get(instance_type).is_none() {
            return Err(Error::InvalidRequest(format!(
                "instance type not in catalog: {instance_type}"
            )));
        }

        let mut instance = McpInstance::new(account_id, instance_type);
        self.repo.insert(&instance).await?;

        instance.generate_derived_fields(&self.root_domain);
        self.repo.update(&instance).await?;

        if !self.engine.create_and_start_container(&instance).await {
            error!(
                instance_id = %instance.id,
                account_id,
                "Container create+start failed, rolling back instance row"
            );
            self.repo.delete(instance.id).await?;
            return Err(Error::ContainerCreateFailed(instance.id.to_string()));
        }

        instance.container_state = ContainerState::Running;
        self.repo.update(&instance).await?;

        info!(
            instance_id = %instance.id,
            account_id,
            slug = instance.instance_slug.as_deref().unwrap_or(""),
            %instance_type,
            "Instance created"
        );
        Ok(instance)
    }

    /// Stop and remove the account's instance, then delete its row.
    ///
    /// Container teardown is best-effort: a container that is already
    /// stopped or gone does not keep the row alive. Only the row deletion
    /// can fail this operation.
    pub async fn stop_and_remove_for_account(&self, account_id: &str) -> Result<()> {
        let instance = self
            .repo
            .find_one_by_account(account_id)
            .await?
            .ok_or_else(|| Error::NoInstanceForAccount(account_id.to_string()))?;
        self.stop_and_remove(&instance).await
    }

    /// Stop and remove one instance by id, then delete its row.
    pub async fn stop_and_remove_by_id(&self, instance_id: Uuid) -> Result<()> {
        let instance = self
            .repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;
        self.stop_and_remove(&instance).await
    }

    async fn stop_and_remove(&self, instance: &McpInstance) -> Result<()> {
        if !self.engine.stop_and_remove_container(instance).await {
            warn!(
                instance_id = %instance.id,
                "Container stop and remove both failed, deleting row anyway"
            );
        }
        self.repo.delete(instance.id).await?;
        info!(instance_id = %instance.id, "Instance removed");
        Ok(())
    }

    /// Restart the instance's container.
    ///
    /// The resulting state (Running on success, Error on failure) is always
    /// persisted so the row never goes stale.
    pub async fn restart(&self, instance_id: Uuid) -> Result<bool> {
        let mut instance = self
            .repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        let ok = self.engine.restart_container(&instance).await;
        instance.container_state = if ok {
            ContainerState::Running
        } else {
            ContainerState::Error
        };
        self.repo.update(&instance).await?;
        Ok(ok)
    }

    /// Replace the instance's container, keeping its identity and secrets.
    ///
    /// The existing container is stopped and removed regardless of its
    /// state, then a fresh one is created from the same persisted row.
    /// Passwords and bearer tokens are never rotated here, so credentials
    /// held by clients stay valid across host-level container loss. Rows
    /// predating derived naming get their fields computed on the way.
    pub async fn recreate_container(&self, instance_id: Uuid) -> Result<bool> {
        let mut instance = self
            .repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        // The old container may already be gone; that is fine.
        self.engine.stop_and_remove_container(&instance).await;

        if !instance.has_derived_fields() {
            instance.generate_derived_fields(&self.root_domain);
            self.repo.update(&instance).await?;
        }

        let ok = self.engine.create_and_start_container(&instance).await;
        instance.container_state = if ok {
            ContainerState::Running
        } else {
            ContainerState::Error
        };
        self.repo.update(&instance).await?;

        info!(instance_id = %instance.id, success = ok, "Instance container recreated");
        Ok(ok)
    }

    /// Recreate every instance in the system, one at a time.
    ///
    /// Used after host maintenance when all containers are gone. Failures
    /// are collected per instance, never aborting the sweep.
    pub async fn recreate_all(&self) -> Result<Vec<RecreateOutcome>> {
        let instances = self.repo.list_all().await?;
        let mut outcomes = Vec::with_capacity(instances.len());
        for instance in instances {
            let success = match self.recreate_container(instance.id).await {
                Ok(ok) => ok,
                Err(e) => {
                    error!(instance_id = %instance.id, error = %e, "Recreate failed");
                    false
                }
            };
            outcomes.push(RecreateOutcome {
                instance_id: instance.id,
                instance_slug: instance.instance_slug.clone(),
                success,
            });
        }
        Ok(outcomes)
    }

    /// Coarse aggregate status: container state plus both endpoint probes.
    ///
    /// Read-only; probes are independent, so a failed MCP probe does not
    /// prevent checking noVNC. The websocket signal shares the noVNC probe
    /// (the web VNC client and its transport live behind the same port).
    pub async fn process_status(&self, instance_id: Uuid) -> Result<ProcessStatus> {
        let instance = self
            .repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        let running = self.engine.container_state(&instance).await == ContainerState::Running;
        let mcp = self.engine.is_mcp_endpoint_up(&instance).await;
        let novnc = self.engine.is_novnc_endpoint_up(&instance).await;

        Ok(ProcessStatus {
            all_running: running && mcp && novnc,
            services: ServiceStatus {
                xvfb: running,
                mcp,
                novnc,
                websocket: novnc,
            },
        })
    }

    /// Detailed per-endpoint status for one instance.
    pub async fn instance_status(&self, instance_id: Uuid) -> Result<InstanceStatus> {
        let instance = self
            .repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        let state = self.engine.container_state(&instance).await;
        let healthy = self.engine.is_container_healthy(&instance).await;
        let running = state == ContainerState::Running;

        let mut endpoints = Vec::new();
        if let Some(type_cfg) = self.catalog.get(instance.instance_type()) {
            let slug = instance.instance_slug.as_deref().unwrap_or("");
            for (endpoint_id, ep) in &type_cfg.endpoints {
                // Only declared probes run here; an endpoint without a
                // health config reports down instead of a guessed probe.
                let is_up = if running && let Some(health) = ep.http_health() {
                    let code = self
                        .engine
                        .exec_curl_status(&instance, ep.port, &health.path)
                        .await;
                    code > 0 && code < health.accept_status_lt
                } else {
                    false
                };
                let external_urls = ep
                    .external_paths
                    .iter()
                    .map(|p| format!("https://{endpoint_id}-{slug}.{}{p}", self.root_domain))
                    .collect();
                endpoints.push(EndpointStatus {
                    endpoint_id: endpoint_id.clone(),
                    port: ep.port,
                    is_up,
                    external_urls,
                    requires_auth: ep.requires_bearer(endpoint_id),
                    has_health: ep.http_health().is_some(),
                });
            }
        }

        Ok(InstanceStatus {
            container: ContainerStatus {
                name: instance.container_name.clone(),
                state,
                healthy,
            },
            endpoints,
        })
    }

    /// Replace the instance's user environment variables wholesale.
    ///
    /// Ownership-checked before anything else; the container is not
    /// rebuilt, so new values take effect on the next recreate or restart.
    pub async fn update_environment_variables(
        &self,
        account_id: &str,
        instance_id: Uuid,
        vars: BTreeMap<String, String>,
    ) -> Result<McpInstance> {
        let mut instance = self
            .repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;
        if instance.account_id != account_id {
            return Err(Error::OwnershipViolation(instance_id.to_string()));
        }

        for key in vars.keys() {
            if !is_valid_env_key(key) {
                return Err(Error::InvalidRequest(format!(
                    "invalid environment variable name: {key}"
                )));
            }
            if RESERVED_ENV_KEYS.contains(&key.as_str()) {
                return Err(Error::InvalidRequest(format!(
                    "environment variable name is reserved: {key}"
                )));
            }
        }

        instance.env_vars = vars;
        self.repo.update(&instance).await?;
        Ok(instance)
    }

    /// Fetch one instance by id.
    pub async fn get(&self, instance_id: Uuid) -> Result<McpInstance> {
        self.repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))
    }

    /// Every instance, oldest first.
    pub async fn list_all(&self) -> Result<Vec<McpInstance>> {
        self.repo.list_all().await
    }

    /// All instances owned by an account.
    pub async fn list_for_account(&self, account_id: &str) -> Result<Vec<McpInstance>> {
        self.repo.find_by_account(account_id).await
    }
}

/// Env vars injected into every container by the engine; user-supplied
/// values may not shadow them.
const RESERVED_ENV_KEYS: [&str; 6] = [
    "INSTANCE_ID",
    "INSTANCE_TYPE",
    "SCREEN_WIDTH",
    "SCREEN_HEIGHT",
    "COLOR_DEPTH",
    "VNC_PASSWORD",
];

/// Env var names: uppercase letters, digits, underscores; no leading digit.
fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_validation() {
        assert!(is_valid_env_key("API_KEY"));
        assert!(is_valid_env_key("_PRIVATE"));
        assert!(is_valid_env_key("KEY2"));
        assert!(!is_valid_env_key(""));
        assert!(!is_valid_env_key("2KEY"));
        assert!(!is_valid_env_key("api_key"));
        assert!(!is_valid_env_key("API-KEY"));
        assert!(!is_valid_env_key("API KEY"));
    }
}

// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container engine trait definition.

use async_trait::async_trait;
use tracing::warn;

use crate::instance::{ContainerState, McpInstance};

/// Trait for container engines.
///
/// Engines translate an instance into container runtime operations and
/// interpret the results. They are pure execution backends and never touch
/// the database; persistence is handled by the caller.
///
/// All boolean verbs report success as observed at the runtime. Stopping or
/// removing a container that no longer exists is a soft failure; callers
/// decide whether that matters.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine type identifier (e.g. "docker", "mock").
    fn engine_type(&self) -> &'static str;

    /// Create the instance's container without starting it.
    ///
    /// Requires derived naming fields to be set; fails without invoking the
    /// runtime when they are missing.
    async fn create_container(&self, instance: &McpInstance) -> bool;

    /// Start an existing container.
    async fn start_container(&self, instance: &McpInstance) -> bool;

    /// Stop a running container.
    async fn stop_container(&self, instance: &McpInstance) -> bool;

    /// Remove a container.
    async fn remove_container(&self, instance: &McpInstance) -> bool;

    /// Restart a container.
    async fn restart_container(&self, instance: &McpInstance) -> bool;

    /// Observe the container's state at the runtime.
    async fn container_state(&self, instance: &McpInstance) -> ContainerState;

    /// Probe an HTTP status code from inside the container.
    ///
    /// Returns 0 when the probe could not be executed at all.
    async fn exec_curl_status(&self, instance: &McpInstance, port: u16, path: &str) -> u16;

    /// Whether the container is running and every endpoint with a declared
    /// health probe answers within its accepted status range.
    async fn is_container_healthy(&self, instance: &McpInstance) -> bool;

    /// Whether the MCP endpoint answers its health probe.
    async fn is_mcp_endpoint_up(&self, instance: &McpInstance) -> bool;

    /// Whether the noVNC endpoint answers its health probe.
    async fn is_novnc_endpoint_up(&self, instance: &McpInstance) -> bool;

    /// Create and start in one step, removing the container again when the
    /// start fails so no half-created container lingers.
    async fn create_and_start_container(&self, instance: &McpInstance) -> bool {
        if !self.create_container(instance).await {
            return false;
        }
        if self.start_container(instance).await {
            return true;
        }
        warn!(
            instance_id = %instance.id,
            "Container start failed after create, removing"
        );
        self.remove_container(instance).await;
        false
    }

    /// Stop then remove. Succeeds if either verb succeeds, so a container
    /// that is already stopped (or gone stopped-side) can still be removed.
    async fn stop_and_remove_container(&self, instance: &McpInstance) -> bool {
        let stopped = self.stop_container(instance).await;
        let removed = self.remove_container(instance).await;
        stopped || removed
    }
}

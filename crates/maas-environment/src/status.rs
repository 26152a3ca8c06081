// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status report types returned by the lifecycle service.

use serde::Serialize;

use crate::instance::ContainerState;

/// Coarse per-service view used by the account dashboard.
///
/// `all_running` is the single flag the UI keys on: the container is
/// running and both the MCP and noVNC endpoints answer their probes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub all_running: bool,
    pub services: ServiceStatus,
}

/// Per-service booleans backing [`ProcessStatus`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// The X virtual framebuffer inside the container. Tracks container
    /// state; there is no separate probe for it.
    pub xvfb: bool,
    pub mcp: bool,
    pub novnc: bool,
    /// The websockify bridge noVNC rides on. Tracks the noVNC probe.
    pub websocket: bool,
}

/// Detailed per-endpoint report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub container: ContainerStatus,
    pub endpoints: Vec<EndpointStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: Option<String>,
    pub state: ContainerState,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub endpoint_id: String,
    pub port: u16,
    pub is_up: bool,
    /// Externally reachable URLs for this endpoint, one per declared
    /// external path.
    pub external_urls: Vec<String>,
    pub requires_auth: bool,
    /// Whether the endpoint declares an HTTP health probe. When false,
    /// nothing is probed and `is_up` is reported as false.
    pub has_health: bool,
}

// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container engine for testing.
//!
//! Simulates container state transitions in memory and records every verb
//! so orchestration logic can be tested without a Docker daemon.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::instance::{ContainerState, McpInstance};

use super::traits::ContainerEngine;

/// Mock container engine for testing.
pub struct MockEngine {
    states: Arc<Mutex<HashMap<Uuid, ContainerState>>>,
    invocations: Arc<Mutex<Vec<String>>>,
    failing_verbs: Arc<Mutex<HashSet<&'static str>>>,
    /// When false, health and endpoint probes report down even for running
    /// containers.
    pub endpoints_up: std::sync::atomic::AtomicBool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine where every verb succeeds.
    pub fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            invocations: Arc::new(Mutex::new(Vec::new())),
            failing_verbs: Arc::new(Mutex::new(HashSet::new())),
            endpoints_up: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Make a verb (`create`, `start`, `stop`, `rm`, `restart`) fail.
    pub async fn fail_verb(&self, verb: &'static str) {
        self.failing_verbs.lock().await.insert(verb);
    }

    /// Verbs recorded so far, as `<verb> <container-name>` strings.
    pub async fn invocations(&self) -> Vec<String> {
        self.invocations.lock().await.clone()
    }

    /// Force a container into a specific state.
    pub async fn set_state(&self, instance_id: Uuid, state: ContainerState) {
        self.states.lock().await.insert(instance_id, state);
    }

    async fn record(&self, verb: &str, instance: &McpInstance) {
        let name = instance.container_name.as_deref().unwrap_or("<unnamed>");
        self.invocations.lock().await.push(format!("{verb} {name}"));
    }

    async fn verb_fails(&self, verb: &str) -> bool {
        self.failing_verbs.lock().await.contains(verb)
    }

    fn probes_pass(&self) -> bool {
        self.endpoints_up.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn create_container(&self, instance: &McpInstance) -> bool {
        self.record("create", instance).await;
        if !instance.has_derived_fields() || self.verb_fails("create").await {
            return false;
        }
        self.states
            .lock()
            .await
            .insert(instance.id, ContainerState::Created);
        true
    }

    async fn start_container(&self, instance: &McpInstance) -> bool {
        self.record("start", instance).await;
        if self.verb_fails("start").await {
            return false;
        }
        self.states
            .lock()
            .await
            .insert(instance.id, ContainerState::Running);
        true
    }

    async fn stop_container(&self, instance: &McpInstance) -> bool {
        self.record("stop", instance).await;
        if self.verb_fails("stop").await {
            return false;
        }
        let mut states = self.states.lock().await;
        match states.get(&instance.id) {
            Some(_) => {
                states.insert(instance.id, ContainerState::Stopped);
                true
            }
            // Stopping a container that never existed.
            None => false,
        }
    }

    async fn remove_container(&self, instance: &McpInstance) -> bool {
        self.record("rm", instance).await;
        if self.verb_fails("rm").await {
            return false;
        }
        self.states.lock().await.remove(&instance.id).is_some()
    }

    async fn restart_container(&self, instance: &McpInstance) -> bool {
        self.record("restart", instance).await;
        if self.verb_fails("restart").await {
            return false;
        }
        let mut states = self.states.lock().await;
        match states.get(&instance.id) {
            Some(_) => {
                states.insert(instance.id, ContainerState::Running);
                true
            }
            None => false,
        }
    }

    async fn container_state(&self, instance: &McpInstance) -> ContainerState {
        self.states
            .lock()
            .await
            .get(&instance.id)
            .copied()
            .unwrap_or(ContainerState::Error)
    }

    async fn exec_curl_status(&self, instance: &McpInstance, _port: u16, _path: &str) -> u16 {
        if self.container_state(instance).await == ContainerState::Running && self.probes_pass() {
            200
        } else {
            0
        }
    }

    async fn is_container_healthy(&self, instance: &McpInstance) -> bool {
        self.container_state(instance).await == ContainerState::Running && self.probes_pass()
    }

    async fn is_mcp_endpoint_up(&self, instance: &McpInstance) -> bool {
        self.is_container_healthy(instance).await
    }

    async fn is_novnc_endpoint_up(&self, instance: &McpInstance) -> bool {
        self.is_container_healthy(instance).await
    }
}

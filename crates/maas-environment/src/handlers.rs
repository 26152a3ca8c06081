// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP request handlers.
//!
//! Thin adapters over the lifecycle service, the bearer checker, and the
//! data registry. Handlers translate outcomes into status codes and never
//! mutate container state themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::auth::{BearerCheckOutcome, McpBearerChecker, constant_time_eq};
use crate::error::Error;
use crate::instance::{InstanceType, McpInstance};
use crate::lifecycle::McpInstancesService;
use crate::registry::{InstanceDataRegistry, RegistryReadOutcome};

/// Header carrying the resolved slug back to the proxy on success.
pub const INSTANCE_ID_HEADER: &str = "X-MCP-Instance-Id";
/// Context header injected by the proxy middleware.
pub const INSTANCE_CONTEXT_HEADER: &str = "X-MCP-Instance";

/// Shared state for all HTTP handlers.
pub struct AppState {
    /// Lifecycle orchestrator.
    pub service: Arc<McpInstancesService>,
    /// Forward-auth bearer checker.
    pub checker: Arc<McpBearerChecker>,
    /// Instance data registry.
    pub registry: Arc<InstanceDataRegistry>,
    /// Token guarding the admin surface; `None` disables it entirely.
    pub admin_token: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::QuotaExceeded(_) => StatusCode::CONFLICT,
            Error::InstanceNotFound(_) | Error::NoInstanceForAccount(_) => StatusCode::NOT_FOUND,
            Error::OwnershipViolation(_) => StatusCode::FORBIDDEN,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::ContainerCreateFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Instance view returned by the admin surface.
///
/// Includes the secrets: the admin surface is the only place credentials
/// can be read back after creation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResponse {
    pub id: Uuid,
    pub account_id: String,
    pub instance_type: InstanceType,
    pub instance_slug: Option<String>,
    pub container_name: Option<String>,
    pub container_state: String,
    pub mcp_subdomain: Option<String>,
    pub vnc_subdomain: Option<String>,
    pub vnc_password: String,
    pub mcp_bearer: String,
    pub registry_bearer: String,
    pub env_vars: BTreeMap<String, String>,
}

impl From<McpInstance> for InstanceResponse {
    fn from(i: McpInstance) -> Self {
        let instance_type = i.instance_type();
        Self {
            id: i.id,
            account_id: i.account_id,
            instance_type,
            instance_slug: i.instance_slug,
            container_name: i.container_name,
            container_state: i.container_state.as_str().to_string(),
            mcp_subdomain: i.mcp_subdomain,
            vnc_subdomain: i.vnc_subdomain,
            vnc_password: i.vnc_password,
            mcp_bearer: i.mcp_bearer,
            registry_bearer: i.registry_bearer,
            env_vars: i.env_vars,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?.trim();
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Reject admin requests without the configured admin bearer.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "admin authorization required" })),
        )
            .into_response()
    };
    let Some(expected) = state.admin_token.as_deref() else {
        // No token configured means the admin surface is switched off.
        return Err(unauthorized());
    };
    match bearer_from_headers(headers) {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(unauthorized()),
    }
}

/// `GET /auth/mcp-bearer-check` — forward-auth decision for the proxy.
pub async fn mcp_bearer_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let authorization = header_str(&headers, header::AUTHORIZATION.as_str());
    let instance_header = header_str(&headers, INSTANCE_CONTEXT_HEADER);
    let host = header_str(&headers, "x-forwarded-host")
        .or_else(|| header_str(&headers, header::HOST.as_str()));

    let outcome = match state.checker.check(authorization, instance_header, host).await {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    match outcome {
        BearerCheckOutcome::Authorized(slug) => {
            ([(INSTANCE_ID_HEADER, slug)], StatusCode::NO_CONTENT).into_response()
        }
        BearerCheckOutcome::MissingBearer | BearerCheckOutcome::InvalidBearer => (
            [(header::WWW_AUTHENTICATE.as_str(), "Bearer")],
            StatusCode::UNAUTHORIZED,
        )
            .into_response(),
        BearerCheckOutcome::MalformedHost | BearerCheckOutcome::UnknownSlug => {
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// `GET /api/instance-data-registry/{id}/{key}` — bearer-authenticated read.
pub async fn registry_get(
    State(state): State<Arc<AppState>>,
    Path((instance_id, key)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> Response {
    let Some(bearer) = bearer_from_headers(&headers) else {
        return (
            [(header::WWW_AUTHENTICATE.as_str(), "Bearer")],
            StatusCode::UNAUTHORIZED,
        )
            .into_response();
    };
    match state.registry.read(instance_id, &key, bearer).await {
        Ok(RegistryReadOutcome::Found(entry)) => (StatusCode::OK, Json(entry)).into_response(),
        Ok(RegistryReadOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Body for admin registry writes.
#[derive(Debug, Deserialize)]
pub struct RegistrySetRequest {
    /// Value to store.
    pub value: String,
}

/// `PUT /api/instance-data-registry/{id}/{key}` — admin write.
pub async fn registry_set(
    State(state): State<Arc<AppState>>,
    Path((instance_id, key)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Json(body): Json<RegistrySetRequest>,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.registry.write(instance_id, &key, &body.value).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /api/instance-data-registry/{id}/{key}` — admin delete.
pub async fn registry_delete(
    State(state): State<Arc<AppState>>,
    Path((instance_id, key)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.registry.remove(instance_id, &key).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Body for instance creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    /// Owning account.
    pub account_id: String,
    /// Requested type; absent means the default (playwright-v1).
    pub instance_type: Option<InstanceType>,
}

/// `POST /api/instances` — create and start an instance.
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateInstanceRequest>,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state
        .service
        .create_for_account(&body.account_id, body.instance_type)
        .await
    {
        Ok(instance) => {
            (StatusCode::CREATED, Json(InstanceResponse::from(instance))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /api/instances` — list every instance.
pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.list_all().await {
        Ok(instances) => {
            let out: Vec<InstanceResponse> = instances.into_iter().map(Into::into).collect();
            Json(out).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /api/instances/{id}` — fetch one instance.
pub async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.get(instance_id).await {
        Ok(instance) => Json(InstanceResponse::from(instance)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /api/instances/by-account/{account_id}` — stop, remove, delete.
pub async fn remove_instance_for_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.stop_and_remove_for_account(&account_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct OperationResponse {
    success: bool,
}

/// `POST /api/instances/{id}/restart`.
pub async fn restart_instance(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.restart(instance_id).await {
        Ok(success) => Json(OperationResponse { success }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/instances/{id}/recreate`.
pub async fn recreate_instance(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.recreate_container(instance_id).await {
        Ok(success) => Json(OperationResponse { success }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/instances/recreate-all`.
pub async fn recreate_all_instances(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.recreate_all().await {
        Ok(outcomes) => Json(outcomes).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/instances/{id}/process-status`.
pub async fn process_status(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.process_status(instance_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/instances/{id}/status`.
pub async fn instance_status(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state.service.instance_status(instance_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Body for environment variable replacement.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnvRequest {
    /// Account asserting ownership of the instance.
    pub account_id: String,
    /// Full replacement set.
    pub env_vars: BTreeMap<String, String>,
}

/// `PUT /api/instances/{id}/env` — replace user env vars.
pub async fn update_env_vars(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<UpdateEnvRequest>,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    match state
        .service
        .update_environment_variables(&body.account_id, instance_id, body.env_vars)
        .await
    {
        Ok(instance) => Json(InstanceResponse::from(instance)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /health` — liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

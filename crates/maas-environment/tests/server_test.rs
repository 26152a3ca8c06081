// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface tests: forward-auth, data registry, and the admin API,
//! exercised through the router with the in-memory backends.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use maas_environment::auth::McpBearerChecker;
use maas_environment::db::MemoryInstanceRepository;
use maas_environment::engine::MockEngine;
use maas_environment::handlers::AppState;
use maas_environment::instance::{InstanceType, McpInstance};
use maas_environment::instance_types::InstanceTypeCatalog;
use maas_environment::lifecycle::McpInstancesService;
use maas_environment::registry::{InstanceDataRegistry, MemoryRegistryRepository};
use maas_environment::server::build_router;

const ROOT_DOMAIN: &str = "mcp-as-a-service.com";
const ADMIN_TOKEN: &str = "test-admin-token";

const CATALOG: &str = r#"
[instance_types._legacy]
display_name = "Legacy"
description = "Pre-migration browser automation"

[instance_types._legacy.endpoints.mcp]
port = 8080
auth = "bearer"

[instance_types.playwright-v1]
display_name = "Playwright"
description = "Browser automation"

[instance_types.playwright-v1.endpoints.mcp]
port = 8080
auth = "bearer"
health = { http = { path = "/mcp", accept_status_lt = 500 } }

[instance_types.playwright-v1.endpoints.vnc]
port = 6080
external_paths = ["/vnc.html"]
"#;

struct TestApp {
    router: Router,
    service: Arc<McpInstancesService>,
    registry: Arc<InstanceDataRegistry>,
}

fn test_app() -> TestApp {
    let repo = Arc::new(MemoryInstanceRepository::new());
    let engine = Arc::new(MockEngine::new());
    let catalog = Arc::new(InstanceTypeCatalog::from_toml_str(CATALOG).unwrap());
    let service = Arc::new(McpInstancesService::new(
        repo.clone(),
        engine,
        catalog,
        ROOT_DOMAIN.to_string(),
        5,
    ));
    let checker = Arc::new(McpBearerChecker::new(repo.clone(), ROOT_DOMAIN.to_string()));
    let registry = Arc::new(InstanceDataRegistry::new(
        repo,
        Arc::new(MemoryRegistryRepository::new()),
    ));
    let state = Arc::new(AppState {
        service: service.clone(),
        checker,
        registry: registry.clone(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
    });
    TestApp {
        router: build_router(state),
        service,
        registry,
    }
}

async fn provisioned_instance(app: &TestApp) -> McpInstance {
    app.service
        .create_for_account("acct-1", Some(InstanceType::PlaywrightV1))
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_answers() {
    let app = test_app();
    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_check_authorizes_valid_token() {
    let app = test_app();
    let instance = provisioned_instance(&app).await;
    let slug = instance.instance_slug.clone().unwrap();

    let request = Request::get("/auth/mcp-bearer-check")
        .header(header::AUTHORIZATION, format!("Bearer {}", instance.mcp_bearer))
        .header("X-Forwarded-Host", format!("mcp-{slug}.{ROOT_DOMAIN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("X-MCP-Instance-Id")
            .and_then(|v| v.to_str().ok()),
        Some(slug.as_str())
    );
}

#[tokio::test]
async fn bearer_check_rejects_bad_token_and_unknown_slug() {
    let app = test_app();
    let instance = provisioned_instance(&app).await;
    let slug = instance.instance_slug.clone().unwrap();

    // Wrong bearer: 401 with a challenge.
    let request = Request::get("/auth/mcp-bearer-check")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .header("X-Forwarded-Host", format!("mcp-{slug}.{ROOT_DOMAIN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    // Unknown slug: 403.
    let request = Request::get("/auth/mcp-bearer-check")
        .header(header::AUTHORIZATION, "Bearer whatever")
        .header("X-Forwarded-Host", format!("mcp-nosuch0.{ROOT_DOMAIN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // No usable host at all: 403.
    let request = Request::get("/auth/mcp-bearer-check")
        .header(header::AUTHORIZATION, "Bearer whatever")
        .header("X-Forwarded-Host", "unrelated.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn registry_read_requires_bearer_and_hides_failures() {
    let app = test_app();
    let instance = provisioned_instance(&app).await;
    app.registry
        .write(instance.id, "api_key", "s3cret")
        .await
        .unwrap();

    let path = format!("/api/instance-data-registry/{}/api_key", instance.id);

    // Valid bearer: 200 with the entry.
    let request = Request::get(path.as_str())
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", instance.registry_bearer),
        )
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["value"], "s3cret");
    assert_eq!(json["key"], "api_key");

    // Wrong bearer and missing key produce the same 404.
    let request = Request::get(path.as_str())
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let missing = format!("/api/instance-data-registry/{}/nope", instance.id);
    let request = Request::get(missing.as_str())
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", instance.registry_bearer),
        )
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Missing header entirely: 401.
    let request = Request::get(path.as_str()).body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_require_the_admin_bearer() {
    let app = test_app();
    let request = Request::post("/api/instances")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"accountId":"acct-1"}"#))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_via_api_returns_credentials_once() {
    let app = test_app();
    let request = Request::post("/api/instances")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"accountId":"acct-1","instanceType":"playwright-v1"}"#,
        ))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["accountId"], "acct-1");
    assert_eq!(json["instanceType"], "playwright-v1");
    assert_eq!(json["containerState"], "running");
    let slug = json["instanceSlug"].as_str().unwrap();
    assert_eq!(
        json["mcpSubdomain"].as_str().unwrap(),
        format!("mcp-{slug}.{ROOT_DOMAIN}")
    );
    assert!(!json["mcpBearer"].as_str().unwrap().is_empty());
    assert!(!json["vncPassword"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn process_status_and_env_update_via_api() {
    let app = test_app();
    let instance = provisioned_instance(&app).await;

    let request = Request::get(format!("/api/instances/{}/process-status", instance.id))
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["allRunning"], true);
    assert_eq!(json["services"]["mcp"], true);

    let request = Request::put(format!("/api/instances/{}/env", instance.id))
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"accountId":"acct-1","envVars":{"API_KEY":"abc"}}"#,
        ))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["envVars"]["API_KEY"], "abc");

    // Acting as the wrong account is rejected.
    let request = Request::put(format!("/api/instances/{}/env", instance.id))
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"accountId":"acct-2","envVars":{}}"#))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn quota_exceeded_maps_to_conflict() {
    let app = test_app();
    for _ in 0..5 {
        provisioned_instance(&app).await;
    }
    let request = Request::post("/api/instances")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"accountId":"acct-1","instanceType":"playwright-v1"}"#,
        ))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn remove_by_account_deletes_the_instance() {
    let app = test_app();
    let instance = provisioned_instance(&app).await;

    let request = Request::delete("/api/instances/by-account/acct-1")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::get(format!("/api/instances/{}", instance.id))
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

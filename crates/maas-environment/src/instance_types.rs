// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance type catalog.
//!
//! Loads the declarative instance type catalog from a TOML file, validates it
//! at load time, and exposes it as an immutable value. A broken catalog fails
//! the boot, never a request.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::instance::InstanceType;

/// Default health threshold: HTTP status must be strictly below this.
pub const DEFAULT_ACCEPT_STATUS_LT: u16 = 500;

/// Errors from loading and validating the instance type catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("Catalog file not readable: {path}: {source}")]
    Unreadable {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TOML syntax or shape error.
    #[error("Catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Root key `instance_types` missing or empty.
    #[error("Root key instance_types missing or empty")]
    MissingRoot,

    /// Type key outside the closed enumeration.
    #[error("Unknown instance type key: {0}")]
    UnknownType(String),

    /// A required field is missing or empty.
    #[error("{field} is required for {type_key}")]
    MissingField {
        /// Name of the offending field.
        field: &'static str,
        /// Type key the field belongs to.
        type_key: String,
    },

    /// Endpoint port missing or not positive.
    #[error("endpoint.port must be a positive integer for {0}")]
    InvalidPort(String),

    /// A path that must be absolute is not.
    #[error("{field} must be an absolute path for {endpoint_id}")]
    NonAbsolutePath {
        /// Name of the offending field.
        field: &'static str,
        /// Endpoint the path belongs to.
        endpoint_id: String,
    },

    /// Health threshold outside [100, 599].
    #[error("endpoint.health.http.accept_status_lt out of range for {0}")]
    InvalidAcceptStatus(String),

    /// A type lacks the mandatory `mcp` endpoint.
    #[error("Each type must define an \"mcp\" endpoint: {0}")]
    MissingMcpEndpoint(String),
}

/// HTTP health probe configuration for one endpoint.
#[derive(Debug, Clone)]
pub struct HttpHealthConfig {
    /// Absolute path probed inside the container.
    pub path: String,
    /// Probe passes when `0 < status < accept_status_lt`.
    pub accept_status_lt: u16,
}

/// Health configuration for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealthConfig {
    /// HTTP probe; `None` means the endpoint has no probe.
    pub http: Option<HttpHealthConfig>,
}

/// One externally routable endpoint of an instance type.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Container-internal port.
    pub port: u16,
    /// Auth mode; currently only `"bearer"` is meaningful.
    pub auth: Option<String>,
    /// External URL paths, each absolute.
    pub external_paths: Vec<String>,
    /// Optional health configuration.
    pub health: Option<EndpointHealthConfig>,
}

impl EndpointConfig {
    /// Whether requests to this endpoint must pass the forward-auth check.
    /// The `mcp` endpoint always does, by name.
    pub fn requires_bearer(&self, endpoint_id: &str) -> bool {
        self.auth.as_deref() == Some("bearer") || endpoint_id == "mcp"
    }

    /// The HTTP health probe, if configured.
    pub fn http_health(&self) -> Option<&HttpHealthConfig> {
        self.health.as_ref().and_then(|h| h.http.as_ref())
    }
}

/// Docker settings for one instance type.
#[derive(Debug, Clone, Default)]
pub struct InstanceDockerConfig {
    /// Explicit image reference; empty means convention-derived.
    pub image: String,
    /// Fixed environment variables injected into every container.
    pub env: BTreeMap<String, String>,
}

/// Validated configuration for one instance type.
#[derive(Debug, Clone)]
pub struct InstanceTypeConfig {
    /// Human-readable name.
    pub display_name: String,
    /// Human-readable description.
    pub description: String,
    /// Docker image and fixed env.
    pub docker: InstanceDockerConfig,
    /// Endpoints keyed by id; always contains `mcp`.
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

/// The validated catalog, loaded once and treated as read-only.
#[derive(Debug, Clone)]
pub struct InstanceTypeCatalog {
    types: BTreeMap<InstanceType, InstanceTypeConfig>,
}

// Raw deserialization targets; all shape/range validation happens in
// `validate`, not at use sites.

#[derive(Debug, Deserialize)]
struct RawCatalog {
    instance_types: Option<BTreeMap<String, RawTypeConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawTypeConfig {
    display_name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    docker: RawDockerConfig,
    endpoints: Option<BTreeMap<String, RawEndpointConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDockerConfig {
    image: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    port: Option<i64>,
    auth: Option<String>,
    #[serde(default)]
    external_paths: Vec<String>,
    health: Option<RawHealthConfig>,
}

#[derive(Debug, Deserialize)]
struct RawHealthConfig {
    http: Option<RawHttpHealthConfig>,
}

#[derive(Debug, Deserialize)]
struct RawHttpHealthConfig {
    path: Option<String>,
    accept_status_lt: Option<i64>,
}

impl InstanceTypeCatalog {
    /// Load and validate the catalog from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate catalog TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let parsed: RawCatalog = toml::from_str(raw)?;
        validate(parsed)
    }

    /// Configuration for one type, if declared.
    pub fn get(&self, instance_type: InstanceType) -> Option<&InstanceTypeConfig> {
        self.types.get(&instance_type)
    }

    /// All declared types.
    pub fn declared_types(&self) -> impl Iterator<Item = InstanceType> + '_ {
        self.types.keys().copied()
    }

    /// Image name for a type: explicit `docker.image` when configured,
    /// otherwise derived by convention from the type value.
    pub fn image_for_type(&self, instance_type: InstanceType) -> String {
        if let Some(cfg) = self.get(instance_type)
            && !cfg.docker.image.is_empty()
        {
            return cfg.docker.image.clone();
        }
        match instance_type {
            InstanceType::Legacy => "maas-mcp-instance".to_string(),
            other => format!("maas-mcp-instance-{}", other.as_str()),
        }
    }
}

fn validate(raw: RawCatalog) -> Result<InstanceTypeCatalog, CatalogError> {
    let raw_types = match raw.instance_types {
        Some(t) if !t.is_empty() => t,
        _ => return Err(CatalogError::MissingRoot),
    };

    let mut types = BTreeMap::new();
    for (type_key, raw_type) in raw_types {
        let instance_type = InstanceType::from_str(&type_key)
            .map_err(|_| CatalogError::UnknownType(type_key.clone()))?;

        let display_name = match raw_type.display_name {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(CatalogError::MissingField {
                    field: "display_name",
                    type_key,
                });
            }
        };
        let description = match raw_type.description {
            Some(desc) if !desc.is_empty() => desc,
            _ => {
                return Err(CatalogError::MissingField {
                    field: "description",
                    type_key,
                });
            }
        };

        let raw_endpoints = raw_type.endpoints.ok_or_else(|| CatalogError::MissingField {
            field: "endpoints",
            type_key: type_key.clone(),
        })?;

        let mut endpoints = BTreeMap::new();
        for (endpoint_id, raw_ep) in raw_endpoints {
            endpoints.insert(endpoint_id.clone(), validate_endpoint(&endpoint_id, raw_ep)?);
        }

        if !endpoints.contains_key("mcp") {
            return Err(CatalogError::MissingMcpEndpoint(type_key));
        }

        types.insert(
            instance_type,
            InstanceTypeConfig {
                display_name,
                description,
                docker: InstanceDockerConfig {
                    image: raw_type.docker.image.unwrap_or_default(),
                    env: raw_type.docker.env,
                },
                endpoints,
            },
        );
    }

    Ok(InstanceTypeCatalog { types })
}

fn validate_endpoint(
    endpoint_id: &str,
    raw: RawEndpointConfig,
) -> Result<EndpointConfig, CatalogError> {
    let port = match raw.port {
        Some(p) if p > 0 && p <= u16::MAX as i64 => p as u16,
        _ => return Err(CatalogError::InvalidPort(endpoint_id.to_string())),
    };

    for path in &raw.external_paths {
        if !path.starts_with('/') {
            return Err(CatalogError::NonAbsolutePath {
                field: "endpoint.external_paths",
                endpoint_id: endpoint_id.to_string(),
            });
        }
    }

    let health = match raw.health {
        None => None,
        Some(raw_health) => {
            let http = match raw_health.http {
                None => None,
                Some(raw_http) => {
                    let path = match raw_http.path {
                        Some(p) if p.starts_with('/') => p,
                        _ => {
                            return Err(CatalogError::NonAbsolutePath {
                                field: "endpoint.health.http.path",
                                endpoint_id: endpoint_id.to_string(),
                            });
                        }
                    };
                    let accept = raw_http
                        .accept_status_lt
                        .unwrap_or(DEFAULT_ACCEPT_STATUS_LT as i64);
                    if !(100..=599).contains(&accept) {
                        return Err(CatalogError::InvalidAcceptStatus(endpoint_id.to_string()));
                    }
                    Some(HttpHealthConfig {
                        path,
                        accept_status_lt: accept as u16,
                    })
                }
            };
            Some(EndpointHealthConfig { http })
        }
    };

    Ok(EndpointConfig {
        port,
        auth: raw.auth,
        external_paths: raw.external_paths,
        health,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [instance_types.playwright-v1]
        display_name = "Playwright Browser"
        description = "Browser automation via Playwright MCP"

        [instance_types.playwright-v1.docker]
        image = ""

        [instance_types.playwright-v1.endpoints.mcp]
        port = 8080
        auth = "bearer"
        external_paths = ["/mcp"]

        [instance_types.playwright-v1.endpoints.mcp.health.http]
        path = "/mcp"
        accept_status_lt = 500

        [instance_types.playwright-v1.endpoints.vnc]
        port = 6080
        external_paths = ["/vnc.html"]

        [instance_types.playwright-v1.endpoints.vnc.health.http]
        path = "/"

        [instance_types.linux-cmd-line-v1]
        display_name = "Linux Command Line"
        description = "Shell sandbox"

        [instance_types.linux-cmd-line-v1.docker]
        image = "maas-mcp-instance-linux-cmd-line-v1"

        [instance_types.linux-cmd-line-v1.docker.env]
        TERM = "xterm-256color"

        [instance_types.linux-cmd-line-v1.endpoints.mcp]
        port = 8080
    "#;

    #[test]
    fn valid_catalog_loads_and_every_type_has_mcp() {
        let catalog = InstanceTypeCatalog::from_toml_str(VALID).unwrap();
        for instance_type in catalog.declared_types() {
            let cfg = catalog.get(instance_type).unwrap();
            assert!(cfg.endpoints.contains_key("mcp"), "{instance_type} lacks mcp");
        }
        let pw = catalog.get(InstanceType::PlaywrightV1).unwrap();
        assert_eq!(pw.endpoints["mcp"].port, 8080);
        assert_eq!(pw.endpoints["vnc"].http_health().unwrap().path, "/");
        assert_eq!(
            pw.endpoints["vnc"].http_health().unwrap().accept_status_lt,
            DEFAULT_ACCEPT_STATUS_LT
        );
    }

    #[test]
    fn missing_root_key_fails() {
        let err = InstanceTypeCatalog::from_toml_str("[other]\nx = 1").unwrap_err();
        assert!(matches!(err, CatalogError::MissingRoot));
    }

    #[test]
    fn unknown_type_key_fails() {
        let raw = r#"
            [instance_types.windows-v1]
            display_name = "Windows"
            description = "nope"
            [instance_types.windows-v1.endpoints.mcp]
            port = 8080
        "#;
        let err = InstanceTypeCatalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownType(k) if k == "windows-v1"));
    }

    #[test]
    fn missing_display_name_fails() {
        let raw = r#"
            [instance_types.playwright-v1]
            description = "Browser automation"
            [instance_types.playwright-v1.endpoints.mcp]
            port = 8080
        "#;
        let err = InstanceTypeCatalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::MissingField { field: "display_name", .. }
        ));
    }

    #[test]
    fn missing_mcp_endpoint_fails() {
        let raw = r#"
            [instance_types.playwright-v1]
            display_name = "Playwright"
            description = "Browser automation"
            [instance_types.playwright-v1.endpoints.vnc]
            port = 6080
        "#;
        let err = InstanceTypeCatalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, CatalogError::MissingMcpEndpoint(_)));
    }

    #[test]
    fn non_positive_port_fails() {
        let raw = r#"
            [instance_types.playwright-v1]
            display_name = "Playwright"
            description = "Browser automation"
            [instance_types.playwright-v1.endpoints.mcp]
            port = 0
        "#;
        let err = InstanceTypeCatalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPort(_)));
    }

    #[test]
    fn relative_external_path_fails() {
        let raw = r#"
            [instance_types.playwright-v1]
            display_name = "Playwright"
            description = "Browser automation"
            [instance_types.playwright-v1.endpoints.mcp]
            port = 8080
            external_paths = ["mcp"]
        "#;
        let err = InstanceTypeCatalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, CatalogError::NonAbsolutePath { .. }));
    }

    #[test]
    fn accept_status_out_of_range_fails() {
        let raw = r#"
            [instance_types.playwright-v1]
            display_name = "Playwright"
            description = "Browser automation"
            [instance_types.playwright-v1.endpoints.mcp]
            port = 8080
            [instance_types.playwright-v1.endpoints.mcp.health.http]
            path = "/mcp"
            accept_status_lt = 600
        "#;
        let err = InstanceTypeCatalog::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidAcceptStatus(_)));
    }

    #[test]
    fn image_for_type_prefers_explicit_image() {
        let catalog = InstanceTypeCatalog::from_toml_str(VALID).unwrap();
        assert_eq!(
            catalog.image_for_type(InstanceType::LinuxCmdLineV1),
            "maas-mcp-instance-linux-cmd-line-v1"
        );
        // Empty image falls back to the convention-derived name.
        assert_eq!(
            catalog.image_for_type(InstanceType::PlaywrightV1),
            "maas-mcp-instance-playwright-v1"
        );
        // Undeclared legacy type still derives a name.
        assert_eq!(catalog.image_for_type(InstanceType::Legacy), "maas-mcp-instance");
    }
}

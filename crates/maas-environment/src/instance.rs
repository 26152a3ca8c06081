// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance aggregate and its derived identity.
//!
//! An [`McpInstance`] owns one Docker container and the secrets handed to
//! clients. Derived naming (slug, container name, subdomains) is computed
//! exactly once from the instance id and the root domain; secrets are
//! generated at construction and never rotated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of instance types.
///
/// Persisted rows from before typed instances carry no type; that absence is
/// mapped to [`InstanceType::Legacy`] in [`McpInstance::instance_type`] and
/// nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    /// Pre-migration instances without a recorded type.
    #[serde(rename = "_legacy")]
    Legacy,
    /// Browser automation via Playwright MCP.
    #[serde(rename = "playwright-v1")]
    PlaywrightV1,
    /// Command-line sandbox.
    #[serde(rename = "linux-cmd-line-v1")]
    LinuxCmdLineV1,
}

impl InstanceType {
    /// Stable string form used in config keys, container env, and the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Legacy => "_legacy",
            InstanceType::PlaywrightV1 => "playwright-v1",
            InstanceType::LinuxCmdLineV1 => "linux-cmd-line-v1",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = UnknownInstanceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "_legacy" => Ok(InstanceType::Legacy),
            "playwright-v1" => Ok(InstanceType::PlaywrightV1),
            "linux-cmd-line-v1" => Ok(InstanceType::LinuxCmdLineV1),
            other => Err(UnknownInstanceType(other.to_string())),
        }
    }
}

/// Error for strings outside the closed instance type enumeration.
#[derive(Debug, thiserror::Error)]
#[error("Unknown instance type: {0}")]
pub struct UnknownInstanceType(pub String);

/// Container state as tracked by the lifecycle service.
///
/// Mutated only by the lifecycle service after an engine operation reports
/// its outcome; presentation code never writes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container created but not started.
    Created,
    /// Container running.
    Running,
    /// Container stopped or exited.
    Stopped,
    /// Container missing or in an unexpected state.
    Error,
}

impl ContainerState {
    /// Stable string form used in the database and status DTOs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Error => "error",
        }
    }

    /// Parse the persisted form; anything unexpected maps to `Error`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "stopped" => ContainerState::Stopped,
            _ => ContainerState::Error,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provisioned sandbox instance bound to an account and a container.
#[derive(Debug, Clone, Serialize)]
pub struct McpInstance {
    /// Unique identifier, assigned at construction, immutable.
    pub id: Uuid,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// Owning account.
    pub account_id: String,
    /// Recorded type; `None` for pre-migration rows. Use
    /// [`McpInstance::instance_type`] to read this.
    pub recorded_type: Option<InstanceType>,
    /// Short DNS-safe identifier, derived from the id. `None` until
    /// [`McpInstance::generate_derived_fields`] has run.
    pub instance_slug: Option<String>,
    /// Docker container name (`mcp-instance-<slug>`).
    pub container_name: Option<String>,
    /// Last container state persisted by the lifecycle service.
    pub container_state: ContainerState,
    /// Virtual screen width in pixels.
    pub screen_width: i32,
    /// Virtual screen height in pixels.
    pub screen_height: i32,
    /// Virtual screen color depth in bits.
    pub color_depth: i32,
    /// VNC access password, generated once.
    pub vnc_password: String,
    /// Bearer token for the MCP endpoint, generated once.
    pub mcp_bearer: String,
    /// Bearer token for the instance data registry, generated once.
    pub registry_bearer: String,
    /// MCP subdomain (`mcp-<slug>.<root-domain>`).
    pub mcp_subdomain: Option<String>,
    /// VNC subdomain (`vnc-<slug>.<root-domain>`).
    pub vnc_subdomain: Option<String>,
    /// User-supplied environment variables, owned by the instance and
    /// replaced wholesale on update.
    pub env_vars: BTreeMap<String, String>,
}

impl McpInstance {
    /// Default virtual screen width.
    pub const DEFAULT_SCREEN_WIDTH: i32 = 1280;
    /// Default virtual screen height.
    pub const DEFAULT_SCREEN_HEIGHT: i32 = 720;
    /// Default color depth.
    pub const DEFAULT_COLOR_DEPTH: i32 = 24;

    /// Create a new instance with freshly generated secrets.
    ///
    /// Derived naming fields stay `None` until
    /// [`generate_derived_fields`](Self::generate_derived_fields) runs.
    pub fn new(account_id: &str, instance_type: InstanceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            account_id: account_id.to_string(),
            recorded_type: Some(instance_type),
            instance_slug: None,
            container_name: None,
            container_state: ContainerState::Created,
            screen_width: Self::DEFAULT_SCREEN_WIDTH,
            screen_height: Self::DEFAULT_SCREEN_HEIGHT,
            color_depth: Self::DEFAULT_COLOR_DEPTH,
            vnc_password: generate_secret(24),
            mcp_bearer: generate_secret(32),
            registry_bearer: generate_secret(32),
            mcp_subdomain: None,
            vnc_subdomain: None,
            env_vars: BTreeMap::new(),
        }
    }

    /// Effective instance type; absent recorded types are legacy rows.
    pub fn instance_type(&self) -> InstanceType {
        self.recorded_type.unwrap_or(InstanceType::Legacy)
    }

    /// Compute slug, container name, and subdomains from the id.
    ///
    /// Deterministic for a given id and domain, so re-running it on an
    /// existing row always produces the same values.
    pub fn generate_derived_fields(&mut self, root_domain: &str) {
        let slug = derive_slug(&self.id);
        self.container_name = Some(format!("mcp-instance-{slug}"));
        self.mcp_subdomain = Some(format!("mcp-{slug}.{root_domain}"));
        self.vnc_subdomain = Some(format!("vnc-{slug}.{root_domain}"));
        self.instance_slug = Some(slug);
    }

    /// Whether derived naming has been computed.
    pub fn has_derived_fields(&self) -> bool {
        self.instance_slug.is_some() && self.container_name.is_some()
    }
}

/// Derive the short DNS-safe slug from an instance id.
///
/// Takes the first 64 bits of the UUID's hex form, re-encodes them in
/// lowercase base36, and truncates to 8 characters.
pub fn derive_slug(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    // 16 hex chars = 64 bits; the simple form is always 32 chars.
    let value = u64::from_str_radix(&hex[..16], 16).unwrap_or(0);
    let mut base36 = to_base36(value);
    base36.truncate(8);
    base36
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

/// Generate a URL-safe base64 secret from `len` random bytes.
pub fn generate_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}

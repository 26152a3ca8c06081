// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forward-auth bearer verification.
//!
//! The reverse proxy calls `/auth/mcp-bearer-check` before letting a request
//! through to an instance's MCP endpoint. This module decides the outcome:
//! it resolves the instance slug from the forwarded headers, looks up the
//! stored MCP bearer (cache-assisted), and compares tokens in constant time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::db::InstanceRepository;
use crate::error::Result;

/// How long a slug→bearer cache entry stays valid.
pub const TOKEN_CACHE_TTL: Duration = Duration::from_secs(300);

/// Outcome of one bearer check, mapped to an HTTP status by the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerCheckOutcome {
    /// Token matches; carries the resolved slug for `X-MCP-Instance-Id`.
    Authorized(String),
    /// `Authorization` header missing or not a bearer scheme. 401.
    MissingBearer,
    /// Bearer present but does not match the stored token. 401.
    InvalidBearer,
    /// No host or instance header the slug could be read from. 403.
    MalformedHost,
    /// Slug resolved but no instance carries it. 403.
    UnknownSlug,
}

struct CachedToken {
    bearer: String,
    inserted: Instant,
}

/// Verifies proxied bearer tokens against stored instance secrets.
pub struct McpBearerChecker {
    repo: Arc<dyn InstanceRepository>,
    root_domain: String,
    // Keyed by a hash of the slug so raw slugs never sit in the map keys.
    cache: DashMap<String, CachedToken>,
}

impl McpBearerChecker {
    /// Create a checker over the instance repository.
    pub fn new(repo: Arc<dyn InstanceRepository>, root_domain: String) -> Self {
        Self {
            repo,
            root_domain,
            cache: DashMap::new(),
        }
    }

    /// Run the full check for one proxied request.
    ///
    /// `instance_header` is the `X-MCP-Instance` context header injected by
    /// the proxy middleware; when absent the slug is parsed from the
    /// forwarded host (`mcp-<slug>.<root-domain>`).
    pub async fn check(
        &self,
        authorization: Option<&str>,
        instance_header: Option<&str>,
        host: Option<&str>,
    ) -> Result<BearerCheckOutcome> {
        let Some(token) = bearer_token(authorization) else {
            return Ok(BearerCheckOutcome::MissingBearer);
        };

        let slug = match instance_header.map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => slug.to_string(),
            None => match host.and_then(|h| slug_from_host(h, &self.root_domain)) {
                Some(slug) => slug,
                None => return Ok(BearerCheckOutcome::MalformedHost),
            },
        };

        let Some(expected) = self.bearer_for_slug(&slug).await? else {
            debug!(slug, "Bearer check for unknown slug");
            return Ok(BearerCheckOutcome::UnknownSlug);
        };

        if constant_time_eq(token, &expected) {
            Ok(BearerCheckOutcome::Authorized(slug))
        } else {
            Ok(BearerCheckOutcome::InvalidBearer)
        }
    }

    /// Stored MCP bearer for a slug, served from the cache when fresh.
    async fn bearer_for_slug(&self, slug: &str) -> Result<Option<String>> {
        let key = hex::encode(Sha256::digest(slug.as_bytes()));
        if let Some(entry) = self.cache.get(&key)
            && entry.inserted.elapsed() < TOKEN_CACHE_TTL
        {
            return Ok(Some(entry.bearer.clone()));
        }

        let Some(instance) = self.repo.find_by_slug(slug).await? else {
            self.cache.remove(&key);
            return Ok(None);
        };
        self.cache.insert(
            key,
            CachedToken {
                bearer: instance.mcp_bearer.clone(),
                inserted: Instant::now(),
            },
        );
        Ok(Some(instance.mcp_bearer))
    }

    /// Drop a slug's cache entry (e.g. after the instance is removed).
    pub fn evict(&self, slug: &str) {
        let key = hex::encode(Sha256::digest(slug.as_bytes()));
        self.cache.remove(&key);
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?.trim();
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Parse the instance slug out of a forwarded host header.
///
/// Accepts a comma-separated chain (first entry wins), strips any port, and
/// requires the shape `mcp-<slug>.<root_domain>` with a non-empty slug of
/// lowercase base36 characters.
pub fn slug_from_host(host: &str, root_domain: &str) -> Option<String> {
    let first = host.split(',').next()?.trim();
    let without_port = first.split(':').next()?;
    let subdomain = without_port.strip_suffix(root_domain)?.strip_suffix('.')?;
    let slug = subdomain.strip_prefix("mcp-")?;
    if slug.is_empty()
        || !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return None;
    }
    Some(slug.to_string())
}

/// Compare two secrets without leaking their difference position.
///
/// Compares fixed-length digests instead of the raw strings, so the loop
/// length never depends on where the inputs diverge.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    let mut diff = 0u8;
    for (x, y) in da.iter().zip(db.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance persistence.
//!
//! The lifecycle service talks to storage through [`InstanceRepository`] so
//! orchestration can be tested against [`MemoryInstanceRepository`] while
//! production runs on [`PgInstanceRepository`].

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::Result;
use crate::instance::{ContainerState, InstanceType, McpInstance};

/// Storage abstraction for instances.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Number of instances owned by an account.
    async fn count_for_account(&self, account_id: &str) -> Result<u32>;

    /// Persist a new instance row.
    async fn insert(&self, instance: &McpInstance) -> Result<()>;

    /// Persist changes to an existing instance.
    async fn update(&self, instance: &McpInstance) -> Result<()>;

    /// Delete an instance row.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Fetch by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<McpInstance>>;

    /// Fetch one instance for an account, if any.
    async fn find_one_by_account(&self, account_id: &str) -> Result<Option<McpInstance>>;

    /// All instances for an account.
    async fn find_by_account(&self, account_id: &str) -> Result<Vec<McpInstance>>;

    /// Fetch by derived slug.
    async fn find_by_slug(&self, slug: &str) -> Result<Option<McpInstance>>;

    /// Every instance in the system, oldest first.
    async fn list_all(&self) -> Result<Vec<McpInstance>>;
}

/// Instance row as stored in Postgres.
#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    account_id: String,
    instance_type: Option<String>,
    instance_slug: Option<String>,
    container_name: Option<String>,
    container_state: String,
    screen_width: i32,
    screen_height: i32,
    color_depth: i32,
    vnc_password: String,
    mcp_bearer: String,
    registry_bearer: String,
    mcp_subdomain: Option<String>,
    vnc_subdomain: Option<String>,
    env_vars: Json<BTreeMap<String, String>>,
}

impl From<InstanceRow> for McpInstance {
    fn from(row: InstanceRow) -> Self {
        McpInstance {
            id: row.id,
            created_at: row.created_at,
            account_id: row.account_id,
            // Unknown stored types read back as legacy rather than failing
            // the whole query.
            recorded_type: row
                .instance_type
                .as_deref()
                .and_then(|t| InstanceType::from_str(t).ok()),
            instance_slug: row.instance_slug,
            container_name: row.container_name,
            container_state: ContainerState::from_db(&row.container_state),
            screen_width: row.screen_width,
            screen_height: row.screen_height,
            color_depth: row.color_depth,
            vnc_password: row.vnc_password,
            mcp_bearer: row.mcp_bearer,
            registry_bearer: row.registry_bearer,
            mcp_subdomain: row.mcp_subdomain,
            vnc_subdomain: row.vnc_subdomain,
            env_vars: row.env_vars.0,
        }
    }
}

const SELECT_COLUMNS: &str = "id, created_at, account_id, instance_type, instance_slug, \
     container_name, container_state, screen_width, screen_height, color_depth, \
     vnc_password, mcp_bearer, registry_bearer, mcp_subdomain, vnc_subdomain, env_vars";

/// Postgres-backed repository.
pub struct PgInstanceRepository {
    pool: PgPool,
}

impl PgInstanceRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceRepository for PgInstanceRepository {
    async fn count_for_account(&self, account_id: &str) -> Result<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mcp_instances WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u32)
    }

    async fn insert(&self, instance: &McpInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mcp_instances (
                id, created_at, account_id, instance_type, instance_slug,
                container_name, container_state, screen_width, screen_height,
                color_depth, vnc_password, mcp_bearer, registry_bearer,
                mcp_subdomain, vnc_subdomain, env_vars
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(instance.id)
        .bind(instance.created_at)
        .bind(instance.account_id.as_str())
        .bind(instance.recorded_type.map(|t| t.as_str()))
        .bind(instance.instance_slug.as_deref())
        .bind(instance.container_name.as_deref())
        .bind(instance.container_state.as_str())
        .bind(instance.screen_width)
        .bind(instance.screen_height)
        .bind(instance.color_depth)
        .bind(instance.vnc_password.as_str())
        .bind(instance.mcp_bearer.as_str())
        .bind(instance.registry_bearer.as_str())
        .bind(instance.mcp_subdomain.as_deref())
        .bind(instance.vnc_subdomain.as_deref())
        .bind(Json(&instance.env_vars))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, instance: &McpInstance) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mcp_instances SET
                instance_type = $2,
                instance_slug = $3,
                container_name = $4,
                container_state = $5,
                screen_width = $6,
                screen_height = $7,
                color_depth = $8,
                mcp_subdomain = $9,
                vnc_subdomain = $10,
                env_vars = $11
            WHERE id = $1
            "#,
        )
        .bind(instance.id)
        .bind(instance.recorded_type.map(|t| t.as_str()))
        .bind(instance.instance_slug.as_deref())
        .bind(instance.container_name.as_deref())
        .bind(instance.container_state.as_str())
        .bind(instance.screen_width)
        .bind(instance.screen_height)
        .bind(instance.color_depth)
        .bind(instance.mcp_subdomain.as_deref())
        .bind(instance.vnc_subdomain.as_deref())
        .bind(Json(&instance.env_vars))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM mcp_instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<McpInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mcp_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_one_by_account(&self, account_id: &str) -> Result<Option<McpInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mcp_instances \
             WHERE account_id = $1 ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_account(&self, account_id: &str) -> Result<Vec<McpInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mcp_instances \
             WHERE account_id = $1 ORDER BY created_at ASC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<McpInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mcp_instances WHERE instance_slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_all(&self) -> Result<Vec<McpInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mcp_instances ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// In-memory repository used by tests.
#[derive(Default)]
pub struct MemoryInstanceRepository {
    instances: tokio::sync::Mutex<std::collections::HashMap<Uuid, McpInstance>>,
}

impl MemoryInstanceRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceRepository for MemoryInstanceRepository {
    async fn count_for_account(&self, account_id: &str) -> Result<u32> {
        let instances = self.instances.lock().await;
        Ok(instances
            .values()
            .filter(|i| i.account_id == account_id)
            .count() as u32)
    }

    async fn insert(&self, instance: &McpInstance) -> Result<()> {
        self.instances
            .lock()
            .await
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update(&self, instance: &McpInstance) -> Result<()> {
        self.instances
            .lock()
            .await
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.instances.lock().await.remove(&id);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<McpInstance>> {
        Ok(self.instances.lock().await.get(&id).cloned())
    }

    async fn find_one_by_account(&self, account_id: &str) -> Result<Option<McpInstance>> {
        let instances = self.instances.lock().await;
        let mut owned: Vec<_> = instances
            .values()
            .filter(|i| i.account_id == account_id)
            .collect();
        owned.sort_by_key(|i| i.created_at);
        Ok(owned.first().map(|i| (*i).clone()))
    }

    async fn find_by_account(&self, account_id: &str) -> Result<Vec<McpInstance>> {
        let instances = self.instances.lock().await;
        let mut owned: Vec<_> = instances
            .values()
            .filter(|i| i.account_id == account_id)
            .cloned()
            .collect();
        owned.sort_by_key(|i| i.created_at);
        Ok(owned)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<McpInstance>> {
        let instances = self.instances.lock().await;
        Ok(instances
            .values()
            .find(|i| i.instance_slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<McpInstance>> {
        let instances = self.instances.lock().await;
        let mut all: Vec<_> = instances.values().cloned().collect();
        all.sort_by_key(|i| i.created_at);
        Ok(all)
    }
}

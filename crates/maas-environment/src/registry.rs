// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance data registry.
//!
//! A small per-instance key-value store consumed by container-resident
//! clients. Reads are authenticated with the instance's registry bearer;
//! an invalid bearer and a missing key are deliberately indistinguishable
//! to the caller, so the registry never confirms which keys exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::constant_time_eq;
use crate::db::InstanceRepository;
use crate::error::Result;

/// One stored registry value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Owning instance.
    pub instance_id: Uuid,
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
}

/// Storage abstraction for registry entries.
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// Fetch one entry.
    async fn get(&self, instance_id: Uuid, key: &str) -> Result<Option<RegistryEntry>>;

    /// Insert or overwrite one entry.
    async fn set(&self, instance_id: Uuid, key: &str, value: &str) -> Result<()>;

    /// Delete one entry; reports whether it existed.
    async fn delete(&self, instance_id: Uuid, key: &str) -> Result<bool>;
}

/// Postgres-backed registry storage.
pub struct PgRegistryRepository {
    pool: PgPool,
}

impl PgRegistryRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistryRepository for PgRegistryRepository {
    async fn get(&self, instance_id: Uuid, key: &str) -> Result<Option<RegistryEntry>> {
        let entry = sqlx::query_as::<_, RegistryEntry>(
            "SELECT instance_id, key, value FROM registry_entries \
             WHERE instance_id = $1 AND key = $2",
        )
        .bind(instance_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn set(&self, instance_id: Uuid, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO registry_entries (instance_id, key, value) VALUES ($1, $2, $3) \
             ON CONFLICT (instance_id, key) DO UPDATE SET value = $3, updated_at = NOW()",
        )
        .bind(instance_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, instance_id: Uuid, key: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM registry_entries WHERE instance_id = $1 AND key = $2",
        )
        .bind(instance_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory registry storage used by tests.
#[derive(Default)]
pub struct MemoryRegistryRepository {
    entries: tokio::sync::Mutex<BTreeMap<(Uuid, String), String>>,
}

impl MemoryRegistryRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryRepository for MemoryRegistryRepository {
    async fn get(&self, instance_id: Uuid, key: &str) -> Result<Option<RegistryEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&(instance_id, key.to_string()))
            .map(|value| RegistryEntry {
                instance_id,
                key: key.to_string(),
                value: value.clone(),
            }))
    }

    async fn set(&self, instance_id: Uuid, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert((instance_id, key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, instance_id: Uuid, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .await
            .remove(&(instance_id, key.to_string()))
            .is_some())
    }
}

/// Read outcome for an authenticated registry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryReadOutcome {
    /// Bearer valid and key present.
    Found(RegistryEntry),
    /// Bearer invalid, instance unknown, or key absent — one 404 for all.
    NotFound,
}

/// The registry service: bearer-authenticated reads, admin writes.
pub struct InstanceDataRegistry {
    instances: Arc<dyn InstanceRepository>,
    entries: Arc<dyn RegistryRepository>,
}

impl InstanceDataRegistry {
    /// Wire the registry to instance and entry storage.
    pub fn new(
        instances: Arc<dyn InstanceRepository>,
        entries: Arc<dyn RegistryRepository>,
    ) -> Self {
        Self { instances, entries }
    }

    /// Authenticated read with the instance's registry bearer.
    ///
    /// Every failure mode short of a missing header collapses into
    /// [`RegistryReadOutcome::NotFound`].
    pub async fn read(
        &self,
        instance_id: Uuid,
        key: &str,
        bearer: &str,
    ) -> Result<RegistryReadOutcome> {
        let Some(instance) = self.instances.find_by_id(instance_id).await? else {
            return Ok(RegistryReadOutcome::NotFound);
        };
        if !constant_time_eq(bearer, &instance.registry_bearer) {
            return Ok(RegistryReadOutcome::NotFound);
        }
        match self.entries.get(instance_id, key).await? {
            Some(entry) => Ok(RegistryReadOutcome::Found(entry)),
            None => Ok(RegistryReadOutcome::NotFound),
        }
    }

    /// Insert or overwrite an entry (admin surface, no bearer involved).
    pub async fn write(&self, instance_id: Uuid, key: &str, value: &str) -> Result<()> {
        self.entries.set(instance_id, key, value).await
    }

    /// Delete an entry (admin surface); reports whether it existed.
    pub async fn remove(&self, instance_id: Uuid, key: &str) -> Result<bool> {
        self.entries.delete(instance_id, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryInstanceRepository;
    use crate::instance::{InstanceType, McpInstance};

    async fn registry_with_instance() -> (InstanceDataRegistry, McpInstance) {
        let instances = Arc::new(MemoryInstanceRepository::new());
        let instance = McpInstance::new("acct-1", InstanceType::LinuxCmdLineV1);
        instances.insert(&instance).await.unwrap();
        let registry =
            InstanceDataRegistry::new(instances, Arc::new(MemoryRegistryRepository::new()));
        (registry, instance)
    }

    #[tokio::test]
    async fn read_with_valid_bearer_finds_entry() {
        let (registry, instance) = registry_with_instance().await;
        registry.write(instance.id, "api_key", "s3cret").await.unwrap();

        let outcome = registry
            .read(instance.id, "api_key", &instance.registry_bearer)
            .await
            .unwrap();
        match outcome {
            RegistryReadOutcome::Found(entry) => {
                assert_eq!(entry.value, "s3cret");
                assert_eq!(entry.instance_id, instance.id);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_bearer_and_missing_key_are_indistinguishable() {
        let (registry, instance) = registry_with_instance().await;
        registry.write(instance.id, "api_key", "s3cret").await.unwrap();

        let bad_bearer = registry
            .read(instance.id, "api_key", "wrong-bearer")
            .await
            .unwrap();
        let missing_key = registry
            .read(instance.id, "nope", &instance.registry_bearer)
            .await
            .unwrap();
        let unknown_instance = registry
            .read(Uuid::new_v4(), "api_key", &instance.registry_bearer)
            .await
            .unwrap();

        assert_eq!(bad_bearer, RegistryReadOutcome::NotFound);
        assert_eq!(missing_key, RegistryReadOutcome::NotFound);
        assert_eq!(unknown_instance, RegistryReadOutcome::NotFound);
    }

    #[tokio::test]
    async fn write_overwrites_and_delete_reports_presence() {
        let (registry, instance) = registry_with_instance().await;
        registry.write(instance.id, "k", "v1").await.unwrap();
        registry.write(instance.id, "k", "v2").await.unwrap();

        let outcome = registry
            .read(instance.id, "k", &instance.registry_bearer)
            .await
            .unwrap();
        assert!(matches!(outcome, RegistryReadOutcome::Found(e) if e.value == "v2"));

        assert!(registry.remove(instance.id, "k").await.unwrap());
        assert!(!registry.remove(instance.id, "k").await.unwrap());
    }
}

//! Per-tenant plugin state.
//!
//! One `plugin_states` document per (plugin, tenant): the enabled flag, an
//! optional settings blob, and who changed it last. Rows are created on the
//! first toggle and updated in place afterwards; no history is kept.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::error::PluginError;
use crate::adapter::{AdapterResult, DatabaseAdapter, DatabaseAdapterExt, Filter, filter};

/// Collection holding [`PluginState`] rows.
pub const PLUGIN_STATE_COLLECTION: &str = "plugin_states";

/// Persisted state of one plugin for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginState {
    pub plugin_id: String,
    pub tenant_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Reads and writes per-tenant plugin state.
#[async_trait]
pub trait PluginSettings: Send + Sync {
    /// The stored state, or `None` if the plugin was never toggled for this tenant.
    async fn get_plugin_state(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<Option<PluginState>, PluginError>;

    /// Upsert the enabled flag. Returns whether the write succeeded.
    async fn set_plugin_state(
        &self,
        plugin_id: &str,
        tenant_id: &str,
        enabled: bool,
        user_id: Option<&str>,
    ) -> bool;

    /// Upsert the settings blob. A new row starts with `enabled_if_new`.
    async fn update_plugin_settings(
        &self,
        plugin_id: &str,
        tenant_id: &str,
        settings: Value,
        enabled_if_new: bool,
        user_id: Option<&str>,
    ) -> bool;

    /// Every stored state for a tenant.
    async fn list_plugin_states(&self, tenant_id: &str) -> Result<Vec<PluginState>, PluginError>;
}

fn state_key(plugin_id: &str, tenant_id: &str) -> Filter {
    filter([
        ("pluginId", json!(plugin_id)),
        ("tenantId", json!(tenant_id)),
    ])
}

/// [`PluginSettings`] stored in a [`DatabaseAdapter`] collection.
#[derive(Clone)]
pub struct StoredPluginSettings {
    db: Arc<dyn DatabaseAdapter>,
}

impl StoredPluginSettings {
    pub fn new(db: Arc<dyn DatabaseAdapter>) -> Self {
        Self { db }
    }

    /// Apply `patch` to the existing row, or insert `new_state` if there is none.
    async fn upsert(
        &self,
        plugin_id: &str,
        tenant_id: &str,
        mut patch: Filter,
        new_state: PluginState,
    ) -> Result<(), PluginError> {
        let settings_err = |e: crate::adapter::AdapterError| PluginError::Settings {
            plugin: plugin_id.to_string(),
            details: e.to_string(),
        };

        patch.insert("updatedAt".into(), json!(new_state.updated_at));
        patch.insert("updatedBy".into(), json!(new_state.updated_by));

        let key = state_key(plugin_id, tenant_id);
        let updated = self
            .db
            .update_many(PLUGIN_STATE_COLLECTION, &key, &patch)
            .await
            .map_err(settings_err)?;

        if updated == 0 {
            let inserted = self
                .db
                .insert_as(PLUGIN_STATE_COLLECTION, &new_state)
                .await
                .map_err(settings_err)?;
            debug!(plugin = %plugin_id, tenant = %tenant_id, "created plugin state");
            self.collapse_duplicates(&key, &patch, &inserted)
                .await
                .map_err(settings_err)?;
        }

        Ok(())
    }

    /// Two first writes for the same key can both miss the update and both
    /// insert. The oldest row wins: a writer whose row is not the oldest
    /// merges its patch into the survivor and deletes its own row.
    async fn collapse_duplicates(
        &self,
        key: &Filter,
        patch: &Filter,
        inserted: &Value,
    ) -> AdapterResult<()> {
        let rows = self.db.find_many(PLUGIN_STATE_COLLECTION, key).await?;
        if rows.len() < 2 {
            return Ok(());
        }

        let Some(ours) = inserted.get("_id") else {
            return Ok(());
        };
        if rows.first().and_then(|row| row.get("_id")) == Some(ours) {
            return Ok(());
        }

        self.db.update_many(PLUGIN_STATE_COLLECTION, key, patch).await?;
        self.db
            .delete_many(PLUGIN_STATE_COLLECTION, &filter([("_id", ours.clone())]))
            .await?;
        debug!(rows = rows.len(), "collapsed duplicate plugin state rows");
        Ok(())
    }
}

#[async_trait]
impl PluginSettings for StoredPluginSettings {
    async fn get_plugin_state(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<Option<PluginState>, PluginError> {
        let states: Vec<PluginState> = self
            .db
            .find_many_as(PLUGIN_STATE_COLLECTION, &state_key(plugin_id, tenant_id))
            .await
            .map_err(|e| PluginError::Settings {
                plugin: plugin_id.to_string(),
                details: e.to_string(),
            })?;

        Ok(states.into_iter().next())
    }

    async fn set_plugin_state(
        &self,
        plugin_id: &str,
        tenant_id: &str,
        enabled: bool,
        user_id: Option<&str>,
    ) -> bool {
        let new_state = PluginState {
            plugin_id: plugin_id.to_string(),
            tenant_id: tenant_id.to_string(),
            enabled,
            settings: None,
            updated_by: user_id.map(str::to_string),
            updated_at: Utc::now(),
        };
        let patch = filter([("enabled", json!(enabled))]);

        match self.upsert(plugin_id, tenant_id, patch, new_state).await {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %plugin_id, tenant = %tenant_id, error = %e, "failed to store plugin state");
                false
            }
        }
    }

    async fn update_plugin_settings(
        &self,
        plugin_id: &str,
        tenant_id: &str,
        settings: Value,
        enabled_if_new: bool,
        user_id: Option<&str>,
    ) -> bool {
        let patch = filter([("settings", settings.clone())]);
        let new_state = PluginState {
            plugin_id: plugin_id.to_string(),
            tenant_id: tenant_id.to_string(),
            enabled: enabled_if_new,
            settings: Some(settings),
            updated_by: user_id.map(str::to_string),
            updated_at: Utc::now(),
        };

        match self.upsert(plugin_id, tenant_id, patch, new_state).await {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %plugin_id, tenant = %tenant_id, error = %e, "failed to store plugin settings");
                false
            }
        }
    }

    async fn list_plugin_states(&self, tenant_id: &str) -> Result<Vec<PluginState>, PluginError> {
        self.db
            .find_many_as(
                PLUGIN_STATE_COLLECTION,
                &filter([("tenantId", json!(tenant_id))]),
            )
            .await
            .map_err(|e| PluginError::Settings {
                plugin: "*".to_string(),
                details: e.to_string(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::adapter::{MemoryAdapter, Operation};

    fn service() -> (Arc<MemoryAdapter>, StoredPluginSettings) {
        let db = Arc::new(MemoryAdapter::new());
        let settings = StoredPluginSettings::new(db.clone());
        (db, settings)
    }

    #[tokio::test]
    async fn missing_state_is_none() {
        let (_db, settings) = service();
        assert!(settings.get_plugin_state("seo", "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn toggle_creates_then_updates_a_single_row() {
        let (db, settings) = service();

        assert!(settings.set_plugin_state("seo", "acme", false, Some("admin")).await);
        let state = settings.get_plugin_state("seo", "acme").await.unwrap().unwrap();
        assert!(!state.enabled);
        assert_eq!(state.updated_by.as_deref(), Some("admin"));

        assert!(settings.set_plugin_state("seo", "acme", true, None).await);
        let state = settings.get_plugin_state("seo", "acme").await.unwrap().unwrap();
        assert!(state.enabled);
        assert_eq!(state.updated_by, None);

        assert_eq!(db.count(PLUGIN_STATE_COLLECTION).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn states_are_scoped_by_tenant() {
        let (_db, settings) = service();
        settings.set_plugin_state("seo", "acme", false, None).await;

        assert!(settings.get_plugin_state("seo", "other").await.unwrap().is_none());
        assert_eq!(settings.list_plugin_states("acme").await.unwrap().len(), 1);
        assert!(settings.list_plugin_states("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settings_blob_keeps_enabled_flag() {
        let (_db, settings) = service();
        settings.set_plugin_state("seo", "acme", false, None).await;

        assert!(
            settings
                .update_plugin_settings("seo", "acme", json!({ "strategy": "mobile" }), true, None)
                .await
        );
        let state = settings.get_plugin_state("seo", "acme").await.unwrap().unwrap();
        assert!(!state.enabled, "existing flag must not be reset");
        assert_eq!(state.settings, Some(json!({ "strategy": "mobile" })));
    }

    #[tokio::test]
    async fn settings_blob_on_new_row_uses_default_flag() {
        let (_db, settings) = service();
        settings
            .update_plugin_settings("seo", "acme", json!({}), true, None)
            .await;
        let state = settings.get_plugin_state("seo", "acme").await.unwrap().unwrap();
        assert!(state.enabled);
    }

    /// Inserts a competing row right before the first state insert, as a
    /// second process toggling the same plugin would.
    struct RacingAdapter {
        inner: MemoryAdapter,
        raced: AtomicBool,
    }

    #[async_trait]
    impl DatabaseAdapter for RacingAdapter {
        fn name(&self) -> &'static str {
            "racing"
        }

        async fn count(&self, collection: &str) -> AdapterResult<u64> {
            self.inner.count(collection).await
        }

        async fn insert(&self, collection: &str, doc: Value) -> AdapterResult<Value> {
            if collection == PLUGIN_STATE_COLLECTION && !self.raced.swap(true, Ordering::SeqCst) {
                let mut rival = doc.clone();
                rival["enabled"] = json!(true);
                rival["updatedBy"] = json!("rival");
                self.inner.insert(collection, rival).await?;
            }
            self.inner.insert(collection, doc).await
        }

        async fn delete_many(&self, collection: &str, filter: &Filter) -> AdapterResult<u64> {
            self.inner.delete_many(collection, filter).await
        }

        async fn find_many(&self, collection: &str, filter: &Filter) -> AdapterResult<Vec<Value>> {
            self.inner.find_many(collection, filter).await
        }

        async fn update_many(
            &self,
            collection: &str,
            filter: &Filter,
            patch: &Filter,
        ) -> AdapterResult<u64> {
            self.inner.update_many(collection, filter, patch).await
        }
    }

    #[tokio::test]
    async fn racing_first_writes_collapse_to_one_row() {
        let db = Arc::new(RacingAdapter {
            inner: MemoryAdapter::new(),
            raced: AtomicBool::new(false),
        });
        let settings = StoredPluginSettings::new(db.clone());

        assert!(settings.set_plugin_state("seo", "acme", false, Some("admin")).await);

        assert_eq!(db.count(PLUGIN_STATE_COLLECTION).await.unwrap(), 1);
        let state = settings.get_plugin_state("seo", "acme").await.unwrap().unwrap();
        assert!(!state.enabled, "the later toggle must survive the collapse");
    }

    #[tokio::test]
    async fn write_failure_reports_false() {
        let (db, settings) = service();
        db.fail_next(Operation::UpdateMany, PLUGIN_STATE_COLLECTION);
        assert!(!settings.set_plugin_state("seo", "acme", true, None).await);
    }

    #[tokio::test]
    async fn read_failure_is_a_settings_error() {
        let (db, settings) = service();
        db.fail_next(Operation::FindMany, PLUGIN_STATE_COLLECTION);
        let err = settings.get_plugin_state("seo", "acme").await.unwrap_err();
        assert_eq!(err.code(), "SETTINGS_ERROR");
    }
}

//! Plugin migration runner.
//!
//! Applies each plugin's declared migrations in version order, tracking which
//! have been applied per (plugin, tenant) in the `plugin_migrations`
//! collection. A migration's record is written right after its `up` step
//! succeeds; that insert is the commit point. There is no transaction around
//! the pair, so a crash between the two re-runs the step next time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::definition::{Migration, Plugin};
use super::error::{ErrorPayload, PluginError};
use super::registry::{PluginRegistry, RegisteredPlugin};
use crate::adapter::{DatabaseAdapter, DatabaseAdapterExt, Filter, filter};

/// Collection holding [`MigrationRecord`]s.
pub const MIGRATION_COLLECTION: &str = "plugin_migrations";

/// Default lifetime of a migration claim.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(600);

/// Plugin id used by the row that materializes the bookkeeping collection.
const SENTINEL_ID: &str = "__sentinel__";

/// Proof that a migration was applied for a tenant. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub plugin_id: String,
    pub migration_id: String,
    pub version: u32,
    pub tenant_id: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of a successful [`MigrationRunner::run_migrations`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub plugin_id: String,
    pub tenant_id: String,
    /// Newly applied migration ids, in execution order.
    pub applied: Vec<String>,
    /// Migration ids that were already applied.
    pub skipped: Vec<String>,
}

/// What happened to one plugin during [`MigrationRunner::run_all_migrations`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PluginOutcome {
    Migrated(MigrationReport),
    Skipped { reason: String },
    Failed(ErrorPayload),
}

/// Per-plugin results of a full migration pass for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub tenant_id: String,
    /// Keyed by plugin id, in registry order.
    pub outcomes: IndexMap<String, PluginOutcome>,
}

impl MigrationSummary {
    fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            outcomes: IndexMap::new(),
        }
    }

    /// True when no plugin failed.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Failed plugins and their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ErrorPayload)> {
        self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
            PluginOutcome::Failed(e) => Some((id.as_str(), e)),
            _ => None,
        })
    }

    /// Total number of migrations applied in this pass.
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .values()
            .map(|outcome| match outcome {
                PluginOutcome::Migrated(report) => report.applied.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Migrations in execution order: ascending version, declaration order on ties.
pub fn execution_order(migrations: &[Migration]) -> Vec<&Migration> {
    let mut ordered: Vec<(usize, &Migration)> = migrations.iter().enumerate().collect();
    ordered.sort_by_key(|(index, m)| (m.version, *index));
    ordered.into_iter().map(|(_, m)| m).collect()
}

fn record_key(plugin_id: &str, tenant_id: &str) -> Filter {
    filter([
        ("pluginId", json!(plugin_id)),
        ("tenantId", json!(tenant_id)),
    ])
}

/// Applies plugin migrations against one database adapter.
pub struct MigrationRunner {
    registry: Arc<PluginRegistry>,
    db: Arc<dyn DatabaseAdapter>,
    owner: String,
    claim_ttl: Duration,
}

impl MigrationRunner {
    /// Create a runner with a random claim owner id.
    pub fn new(registry: Arc<PluginRegistry>, db: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            registry,
            db,
            owner: format!("svelty-{}", Uuid::now_v7()),
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }

    /// Identify this process in migration claims.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// How long a migration claim stays valid if never released.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Make sure the bookkeeping collection exists before records are written.
    ///
    /// Probes with `count`. If the probe fails, asks the adapter to create the
    /// collection when it can; creation failures are tolerated. Stores that
    /// cannot create collections explicitly get a sentinel row inserted and
    /// immediately deleted, which materializes the collection.
    pub async fn ensure_migration_table(&self) -> Result<(), PluginError> {
        match self.db.count(MIGRATION_COLLECTION).await {
            Ok(rows) => {
                debug!(rows, "migration collection present");
                return Ok(());
            }
            Err(e) => debug!(error = %e, "migration collection probe failed, creating it"),
        }

        if let Some(manager) = self.db.collections() {
            match manager.create_collection(MIGRATION_COLLECTION).await {
                Ok(()) => {
                    info!(adapter = self.db.name(), "created migration collection");
                    return Ok(());
                }
                Err(e) => warn!(
                    adapter = self.db.name(),
                    error = %e,
                    "explicit migration collection creation failed, falling back to sentinel"
                ),
            }
        }

        let sentinel = json!({
            "pluginId": SENTINEL_ID,
            "migrationId": SENTINEL_ID,
            "version": 0,
            "tenantId": SENTINEL_ID,
            "appliedAt": Utc::now(),
        });
        self.db
            .insert(MIGRATION_COLLECTION, sentinel)
            .await
            .map_err(|e| PluginError::runner("ensure_migration_table", e))?;

        if let Err(e) = self
            .db
            .delete_many(
                MIGRATION_COLLECTION,
                &filter([("pluginId", json!(SENTINEL_ID))]),
            )
            .await
        {
            warn!(error = %e, "failed to remove migration collection sentinel");
        }

        Ok(())
    }

    /// Applied migration records for a plugin and tenant.
    pub async fn applied_records(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<MigrationRecord>, PluginError> {
        self.db
            .find_many_as(MIGRATION_COLLECTION, &record_key(plugin_id, tenant_id))
            .await
            .map_err(|e| PluginError::Query {
                plugin: plugin_id.to_string(),
                tenant: tenant_id.to_string(),
                details: e.to_string(),
            })
    }

    /// Ids of migrations already applied for a plugin and tenant.
    pub async fn applied_migration_ids(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<HashSet<String>, PluginError> {
        Ok(self
            .applied_records(plugin_id, tenant_id)
            .await?
            .into_iter()
            .map(|r| r.migration_id)
            .collect())
    }

    /// Migrations not yet applied for a plugin and tenant, in execution order.
    pub async fn pending_migrations(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<Migration>, PluginError> {
        let entry = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        let applied = self.applied_migration_ids(plugin_id, tenant_id).await?;

        Ok(execution_order(&entry.plugin.migrations)
            .into_iter()
            .filter(|m| !applied.contains(&m.id))
            .cloned()
            .collect())
    }

    /// Apply a plugin's pending migrations for a tenant.
    ///
    /// Stops at the first failing migration. Migrations applied earlier in
    /// the same call stay recorded.
    pub async fn run_migrations(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<MigrationReport, PluginError> {
        let entry = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;

        let mut report = MigrationReport {
            plugin_id: plugin_id.to_string(),
            tenant_id: tenant_id.to_string(),
            ..MigrationReport::default()
        };

        if entry.plugin.migrations.is_empty() {
            return Ok(report);
        }

        let claim = self.claim(plugin_id, tenant_id).await?;
        let result = self
            .apply_pending(&entry.plugin, tenant_id, &mut report)
            .await;
        self.release(claim).await;

        result.map(|()| report)
    }

    async fn apply_pending(
        &self,
        plugin: &Plugin,
        tenant_id: &str,
        report: &mut MigrationReport,
    ) -> Result<(), PluginError> {
        let applied = self.applied_migration_ids(&plugin.id, tenant_id).await?;

        for migration in execution_order(&plugin.migrations) {
            if applied.contains(&migration.id) {
                debug!(
                    plugin = %plugin.id,
                    tenant = %tenant_id,
                    migration = %migration.id,
                    "migration already applied, skipping"
                );
                report.skipped.push(migration.id.clone());
                continue;
            }

            debug!(
                plugin = %plugin.id,
                tenant = %tenant_id,
                migration = %migration.id,
                version = migration.version,
                "executing migration"
            );

            migration
                .up(Arc::clone(&self.db))
                .await
                .map_err(|e| PluginError::MigrationFailed {
                    plugin: plugin.id.clone(),
                    migration: migration.id.clone(),
                    details: format!("{e:#}"),
                })?;

            let record = MigrationRecord {
                plugin_id: plugin.id.clone(),
                migration_id: migration.id.clone(),
                version: migration.version,
                tenant_id: tenant_id.to_string(),
                applied_at: Utc::now(),
            };
            self.db
                .insert_as(MIGRATION_COLLECTION, &record)
                .await
                .map_err(|e| {
                    PluginError::runner(
                        format!("record {}:{} for tenant {tenant_id}", plugin.id, migration.id),
                        e,
                    )
                })?;

            info!(
                plugin = %plugin.id,
                tenant = %tenant_id,
                migration = %migration.id,
                version = migration.version,
                "applied migration"
            );
            report.applied.push(migration.id.clone());
        }

        Ok(())
    }

    /// Apply migrations for every statically enabled plugin.
    ///
    /// One plugin failing does not stop the others: its error is logged and
    /// recorded in the summary, and the call still returns `Ok`. Inspect
    /// [`MigrationSummary::is_complete`] to detect partial failure. Only a
    /// failure to prepare the bookkeeping collection is returned as `Err`.
    pub async fn run_all_migrations(&self, tenant_id: &str) -> Result<MigrationSummary, PluginError> {
        self.run_pass(self.registry.get_all(), tenant_id).await
    }

    /// Apply migrations for a single plugin, reported like [`Self::run_all_migrations`].
    ///
    /// Other plugins are left untouched. A statically disabled plugin is
    /// skipped the same way the full pass skips it.
    pub async fn run_plugin_pass(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<MigrationSummary, PluginError> {
        let entry = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        self.run_pass(vec![entry], tenant_id).await
    }

    async fn run_pass(
        &self,
        entries: Vec<Arc<RegisteredPlugin>>,
        tenant_id: &str,
    ) -> Result<MigrationSummary, PluginError> {
        self.ensure_migration_table().await?;

        let mut summary = MigrationSummary::new(tenant_id);

        for entry in entries {
            let plugin_id = entry.id().to_string();

            if !entry.plugin.metadata.enabled {
                debug!(plugin = %plugin_id, "plugin disabled, skipping migrations");
                summary.outcomes.insert(
                    plugin_id,
                    PluginOutcome::Skipped {
                        reason: "disabled".into(),
                    },
                );
                continue;
            }

            let outcome = match self.run_migrations(&plugin_id, tenant_id).await {
                Ok(report) => PluginOutcome::Migrated(report),
                Err(e) => {
                    warn!(
                        plugin = %plugin_id,
                        tenant = %tenant_id,
                        code = e.code(),
                        error = %e,
                        "plugin migrations failed, continuing with remaining plugins"
                    );
                    PluginOutcome::Failed(ErrorPayload::from(&e))
                }
            };
            summary.outcomes.insert(plugin_id, outcome);
        }

        info!(
            tenant = %tenant_id,
            plugins = summary.outcomes.len(),
            applied = summary.applied_count(),
            complete = summary.is_complete(),
            "migration pass finished"
        );

        Ok(summary)
    }

    /// Revert the most recently ordered applied migration of a plugin.
    ///
    /// Runs its `down` step and deletes its record. Returns the reverted id,
    /// or `None` when nothing is applied.
    pub async fn revert_last(
        &self,
        plugin_id: &str,
        tenant_id: &str,
    ) -> Result<Option<String>, PluginError> {
        let entry = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;

        let claim = self.claim(plugin_id, tenant_id).await?;
        let result = self.revert_newest(&entry.plugin, tenant_id).await;
        self.release(claim).await;

        result
    }

    async fn revert_newest(
        &self,
        plugin: &Plugin,
        tenant_id: &str,
    ) -> Result<Option<String>, PluginError> {
        let applied = self.applied_migration_ids(&plugin.id, tenant_id).await?;
        let Some(migration) = execution_order(&plugin.migrations)
            .into_iter()
            .rev()
            .find(|m| applied.contains(&m.id))
        else {
            return Ok(None);
        };

        if !migration.has_down() {
            return Err(PluginError::MigrationFailed {
                plugin: plugin.id.clone(),
                migration: migration.id.clone(),
                details: "migration has no down step and cannot be reverted".into(),
            });
        }

        migration
            .down(Arc::clone(&self.db))
            .await
            .map_err(|e| PluginError::MigrationFailed {
                plugin: plugin.id.clone(),
                migration: migration.id.clone(),
                details: format!("down: {e:#}"),
            })?;

        let mut key = record_key(&plugin.id, tenant_id);
        key.insert("migrationId".into(), json!(migration.id));
        self.db
            .delete_many(MIGRATION_COLLECTION, &key)
            .await
            .map_err(|e| {
                PluginError::runner(
                    format!("delete record {}:{} for tenant {tenant_id}", plugin.id, migration.id),
                    e,
                )
            })?;

        info!(
            plugin = %plugin.id,
            tenant = %tenant_id,
            migration = %migration.id,
            "reverted migration"
        );
        Ok(Some(migration.id.clone()))
    }

    /// Claim `(plugin, tenant)` when the adapter supports claims.
    async fn claim(&self, plugin_id: &str, tenant_id: &str) -> Result<Option<String>, PluginError> {
        let Some(claims) = self.db.claims() else {
            return Ok(None);
        };

        let key = format!("migrate:{plugin_id}:{tenant_id}");
        let claimed = claims
            .try_claim(&key, &self.owner, self.claim_ttl)
            .await
            .map_err(|e| PluginError::runner(format!("claim {key}"), e))?;

        if claimed {
            debug!(key = %key, owner = %self.owner, "claimed migrations");
            Ok(Some(key))
        } else {
            Err(PluginError::MigrationLocked {
                plugin: plugin_id.to_string(),
                tenant: tenant_id.to_string(),
                key,
            })
        }
    }

    async fn release(&self, key: Option<String>) {
        let (Some(key), Some(claims)) = (key, self.db.claims()) else {
            return;
        };
        if let Err(e) = claims.release(&key, &self.owner).await {
            warn!(key = %key, error = %e, "failed to release migration claim");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapter::{MemoryAdapter, Operation};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(log: &Log, id: &str, version: u32) -> Migration {
        let log = Arc::clone(log);
        let name = id.to_string();
        Migration::new(id, version, move |_db| {
            let log = Arc::clone(&log);
            let name = name.clone();
            async move {
                log.lock().push(name);
                Ok(())
            }
        })
    }

    fn failing(id: &str, version: u32) -> Migration {
        Migration::new(id, version, |_db| async { anyhow::bail!("index build failed") })
    }

    fn setup(plugin: Plugin) -> (Arc<MemoryAdapter>, MigrationRunner) {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(plugin).unwrap();
        let db = Arc::new(MemoryAdapter::new());
        let runner = MigrationRunner::new(registry, db.clone());
        (db, runner)
    }

    #[test]
    fn execution_order_sorts_by_version_then_declaration() {
        let noop = |id: &str, v| Migration::new(id, v, |_db| async { Ok(()) });
        let migrations = vec![noop("c", 3), noop("a1", 1), noop("b", 2), noop("a2", 1)];
        let ids: Vec<_> = execution_order(&migrations)
            .into_iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a1", "a2", "b", "c"]);
    }

    #[tokio::test]
    async fn unknown_plugin_is_not_found() {
        let (_db, runner) = setup(Plugin::new("seo", "1.0.0"));
        let err = runner.run_migrations("ghost", "default").await.unwrap_err();
        assert_eq!(err.code(), "PLUGIN_NOT_FOUND");
    }

    #[tokio::test]
    async fn plugin_pass_touches_only_the_named_plugin() {
        let log: Log = Arc::default();
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Plugin::new("seo", "1.0.0").with_migration(recording(&log, "seo_001", 1)))
            .unwrap();
        registry
            .register(Plugin::new("stats", "1.0.0").with_migration(recording(&log, "stats_001", 1)))
            .unwrap();
        registry
            .register(
                Plugin::new("off", "1.0.0")
                    .enabled(false)
                    .with_migration(recording(&log, "off_001", 1)),
            )
            .unwrap();
        let runner = MigrationRunner::new(registry, Arc::new(MemoryAdapter::new()));

        let summary = runner.run_plugin_pass("seo", "default").await.unwrap();
        let ids: Vec<_> = summary.outcomes.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["seo"]);
        assert_eq!(summary.applied_count(), 1);
        assert_eq!(*log.lock(), vec!["seo_001"]);

        let summary = runner.run_plugin_pass("off", "default").await.unwrap();
        assert!(matches!(summary.outcomes["off"], PluginOutcome::Skipped { .. }));
        assert_eq!(*log.lock(), vec!["seo_001"]);

        let err = runner.run_plugin_pass("ghost", "default").await.unwrap_err();
        assert_eq!(err.code(), "PLUGIN_NOT_FOUND");
    }

    #[tokio::test]
    async fn plugin_without_migrations_succeeds_trivially() {
        let (db, runner) = setup(Plugin::new("seo", "1.0.0"));
        let report = runner.run_migrations("seo", "default").await.unwrap();
        assert!(report.applied.is_empty());
        assert!(!db.has_collection(MIGRATION_COLLECTION));
    }

    #[tokio::test]
    async fn runs_in_version_order_and_records_each() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0")
            .with_migration(recording(&log, "003", 3))
            .with_migration(recording(&log, "001", 1))
            .with_migration(recording(&log, "002", 2));
        let (_db, runner) = setup(plugin);

        let report = runner.run_migrations("seo", "default").await.unwrap();
        assert_eq!(*log.lock(), vec!["001", "002", "003"]);
        assert_eq!(report.applied, vec!["001", "002", "003"]);

        let records = runner.applied_records("seo", "default").await.unwrap();
        let versions: Vec<_> = records.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn second_run_executes_nothing() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0")
            .with_migration(recording(&log, "001", 1))
            .with_migration(recording(&log, "002", 2));
        let (_db, runner) = setup(plugin);

        runner.run_migrations("seo", "default").await.unwrap();
        log.lock().clear();

        let report = runner.run_migrations("seo", "default").await.unwrap();
        assert!(log.lock().is_empty());
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, vec!["001", "002"]);
    }

    #[tokio::test]
    async fn failure_keeps_earlier_records_and_stops() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0")
            .with_migration(recording(&log, "001", 1))
            .with_migration(failing("002", 2))
            .with_migration(recording(&log, "003", 3));
        let (_db, runner) = setup(plugin);

        let err = runner.run_migrations("seo", "default").await.unwrap_err();
        assert_eq!(err.code(), "MIGRATION_ERROR");
        assert_eq!(err.migration_id(), Some("002"));
        assert!(err.to_string().contains("index build failed"));

        assert_eq!(*log.lock(), vec!["001"]);
        let applied = runner.applied_migration_ids("seo", "default").await.unwrap();
        assert_eq!(applied, HashSet::from(["001".to_string()]));
    }

    #[tokio::test]
    async fn record_write_failure_is_a_runner_error() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0").with_migration(recording(&log, "001", 1));
        let (db, runner) = setup(plugin);
        db.fail_next(Operation::Insert, MIGRATION_COLLECTION);

        let err = runner.run_migrations("seo", "default").await.unwrap_err();
        assert_eq!(err.code(), "MIGRATION_RUNNER_ERROR");
        // The step ran but was not committed, so it runs again next time.
        let report = runner.run_migrations("seo", "default").await.unwrap();
        assert_eq!(report.applied, vec!["001"]);
        assert_eq!(*log.lock(), vec!["001", "001"]);
    }

    #[tokio::test]
    async fn query_failure_is_reported() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0").with_migration(recording(&log, "001", 1));
        let (db, runner) = setup(plugin);
        db.fail_next(Operation::FindMany, MIGRATION_COLLECTION);

        let err = runner.run_migrations("seo", "default").await.unwrap_err();
        assert_eq!(err.code(), "QUERY_ERROR");
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn claim_held_elsewhere_blocks_the_run() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0").with_migration(recording(&log, "001", 1));
        let (db, runner) = setup(plugin);

        let claims = db.claims().unwrap();
        assert!(
            claims
                .try_claim("migrate:seo:default", "other-node", DEFAULT_CLAIM_TTL)
                .await
                .unwrap()
        );

        let err = runner.run_migrations("seo", "default").await.unwrap_err();
        assert_eq!(err.code(), "MIGRATION_LOCKED");
        assert!(log.lock().is_empty());

        claims.release("migrate:seo:default", "other-node").await.unwrap();
        assert!(runner.run_migrations("seo", "default").await.is_ok());
    }

    #[tokio::test]
    async fn claim_is_released_after_failure() {
        let plugin = Plugin::new("seo", "1.0.0").with_migration(failing("001", 1));
        let (db, runner) = setup(plugin);
        let runner = runner.with_owner("node-a");

        assert!(runner.run_migrations("seo", "default").await.is_err());
        let claims = db.claims().unwrap();
        assert!(
            claims
                .try_claim("migrate:seo:default", "node-b", DEFAULT_CLAIM_TTL)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn ensure_table_creates_collection_explicitly() {
        let (db, runner) = setup(Plugin::new("seo", "1.0.0"));
        runner.ensure_migration_table().await.unwrap();
        assert_eq!(db.count(MIGRATION_COLLECTION).await.unwrap(), 0);
        // Idempotent.
        runner.ensure_migration_table().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_table_falls_back_to_sentinel() {
        let registry = Arc::new(PluginRegistry::new());
        let db = Arc::new(MemoryAdapter::without_collection_manager());
        let runner = MigrationRunner::new(registry, db.clone());

        runner.ensure_migration_table().await.unwrap();
        assert!(db.has_collection(MIGRATION_COLLECTION));
        assert_eq!(db.count(MIGRATION_COLLECTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_table_tolerates_failed_creation() {
        let (db, runner) = setup(Plugin::new("seo", "1.0.0"));
        db.fail_next(Operation::CreateCollection, MIGRATION_COLLECTION);

        runner.ensure_migration_table().await.unwrap();
        assert_eq!(db.count(MIGRATION_COLLECTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_table_fails_when_sentinel_cannot_be_written() {
        let registry = Arc::new(PluginRegistry::new());
        let db = Arc::new(MemoryAdapter::without_collection_manager());
        db.fail_next(Operation::Insert, MIGRATION_COLLECTION);
        let runner = MigrationRunner::new(registry, db.clone());

        let err = runner.ensure_migration_table().await.unwrap_err();
        assert_eq!(err.code(), "MIGRATION_RUNNER_ERROR");
    }

    #[tokio::test]
    async fn pending_lists_unapplied_in_order() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0")
            .with_migration(recording(&log, "002", 2))
            .with_migration(recording(&log, "001", 1));
        let (db, runner) = setup(plugin);

        let pending: Vec<_> = runner
            .pending_migrations("seo", "default")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(pending, vec!["001", "002"]);

        db.insert_as(
            MIGRATION_COLLECTION,
            &MigrationRecord {
                plugin_id: "seo".into(),
                migration_id: "001".into(),
                version: 1,
                tenant_id: "default".into(),
                applied_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let pending = runner.pending_migrations("seo", "default").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "002");
    }

    #[tokio::test]
    async fn revert_runs_down_of_newest_and_forgets_it() {
        let log: Log = Arc::default();
        let down_log = Arc::clone(&log);
        let plugin = Plugin::new("seo", "1.0.0")
            .with_migration(recording(&log, "001", 1))
            .with_migration(recording(&log, "002", 2).with_down(move |_db| {
                let down_log = Arc::clone(&down_log);
                async move {
                    down_log.lock().push("down 002".into());
                    Ok(())
                }
            }));
        let (_db, runner) = setup(plugin);
        runner.run_migrations("seo", "default").await.unwrap();

        let reverted = runner.revert_last("seo", "default").await.unwrap();
        assert_eq!(reverted.as_deref(), Some("002"));
        assert_eq!(log.lock().last().map(String::as_str), Some("down 002"));

        let applied = runner.applied_migration_ids("seo", "default").await.unwrap();
        assert_eq!(applied, HashSet::from(["001".to_string()]));

        // 001 has no down step.
        let err = runner.revert_last("seo", "default").await.unwrap_err();
        assert_eq!(err.migration_id(), Some("001"));
    }

    #[tokio::test]
    async fn revert_with_nothing_applied_is_none() {
        let log: Log = Arc::default();
        let plugin = Plugin::new("seo", "1.0.0").with_migration(recording(&log, "001", 1));
        let (_db, runner) = setup(plugin);
        assert_eq!(runner.revert_last("seo", "default").await.unwrap(), None);
    }

    #[test]
    fn summary_tracks_failures() {
        let mut summary = MigrationSummary::new("default");
        summary.outcomes.insert(
            "ok".into(),
            PluginOutcome::Migrated(MigrationReport {
                applied: vec!["001".into()],
                ..MigrationReport::default()
            }),
        );
        assert!(summary.is_complete());
        assert_eq!(summary.applied_count(), 1);

        summary.outcomes.insert(
            "bad".into(),
            PluginOutcome::Failed(ErrorPayload::from(&PluginError::not_found("bad"))),
        );
        assert!(!summary.is_complete());
        let failed: Vec<_> = summary.failures().map(|(id, _)| id).collect();
        assert_eq!(failed, vec!["bad"]);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = PluginOutcome::Skipped {
            reason: "disabled".into(),
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v, json!({ "status": "skipped", "reason": "disabled" }));
    }
}

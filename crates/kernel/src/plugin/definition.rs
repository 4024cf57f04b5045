//! Compiled-in plugin definitions.
//!
//! A [`Plugin`] is built once at startup and never changes afterwards:
//! - id, name, version, description
//! - static metadata (default enabled flag, collection allow-list)
//! - an ordered list of [`Migration`]s
//! - an optional [`SsrHook`] that enriches entries during server rendering

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::PluginError;
use crate::adapter::DatabaseAdapter;

/// Boxed future returned by migration steps.
pub type MigrationFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A migration step: receives the database adapter, returns when done.
pub type MigrationFn = Arc<dyn Fn(Arc<dyn DatabaseAdapter>) -> MigrationFuture + Send + Sync>;

fn boxed_step<F, Fut>(step: F) -> MigrationFn
where
    F: Fn(Arc<dyn DatabaseAdapter>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |db: Arc<dyn DatabaseAdapter>| -> MigrationFuture { Box::pin(step(db)) })
}

/// A single versioned schema/data change owned by one plugin.
///
/// Steps may run more than once if the process dies between a successful
/// `up` and its bookkeeping record, so they must tolerate re-execution.
#[derive(Clone)]
pub struct Migration {
    /// Unique within the owning plugin.
    pub id: String,
    /// Execution order (ascending); equal versions run in declaration order.
    pub version: u32,
    pub description: String,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl Migration {
    /// Create a migration from an async `up` step.
    ///
    /// ```ignore
    /// Migration::new("001_create_results", 1, |db| async move {
    ///     db.insert("results", json!({ "seeded": true })).await?;
    ///     Ok(())
    /// })
    /// ```
    pub fn new<F, Fut>(id: impl Into<String>, version: u32, up: F) -> Self
    where
        F: Fn(Arc<dyn DatabaseAdapter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            version,
            description: String::new(),
            up: boxed_step(up),
            down: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a `down` step that undoes `up`.
    pub fn with_down<F, Fut>(mut self, down: F) -> Self
    where
        F: Fn(Arc<dyn DatabaseAdapter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.down = Some(boxed_step(down));
        self
    }

    /// Whether this migration can be reverted.
    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    /// Run the `up` step.
    pub async fn up(&self, db: Arc<dyn DatabaseAdapter>) -> anyhow::Result<()> {
        (self.up)(db).await
    }

    /// Run the `down` step.
    pub async fn down(&self, db: Arc<dyn DatabaseAdapter>) -> anyhow::Result<()> {
        match &self.down {
            Some(down) => down(db).await,
            None => anyhow::bail!("migration '{}' has no down step", self.id),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("has_down", &self.has_down())
            .finish()
    }
}

/// Context handed to SSR hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrContext {
    pub collection_id: String,
    pub tenant_id: Option<String>,
}

impl SsrContext {
    pub fn new(collection_id: impl Into<String>, tenant_id: Option<&str>) -> Self {
        Self {
            collection_id: collection_id.into(),
            tenant_id: tenant_id.map(str::to_string),
        }
    }
}

/// Server-side rendering hook: enriches a list of content entries with
/// plugin-specific data before they are rendered.
#[async_trait]
pub trait SsrHook: Send + Sync {
    async fn enrich(&self, ctx: &SsrContext, entries: Vec<Value>) -> anyhow::Result<Vec<Value>>;
}

/// Static plugin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Enabled unless a tenant-level state says otherwise.
    pub enabled: bool,
    /// Collections the plugin applies to. Empty means all collections.
    #[serde(default)]
    pub enabled_collections: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            enabled: true,
            enabled_collections: Vec::new(),
            author: None,
        }
    }
}

/// A compiled-in plugin definition.
#[derive(Clone)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    /// Semantic version (e.g., "1.0.0").
    pub version: String,
    pub description: String,
    pub metadata: PluginMetadata,
    /// Declared migrations, in declaration order.
    pub migrations: Vec<Migration>,
    pub ssr_hook: Option<Arc<dyn SsrHook>>,
}

impl Plugin {
    /// Start a plugin definition. `name` defaults to `id`.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            description: String::new(),
            metadata: PluginMetadata::default(),
            migrations: Vec::new(),
            ssr_hook: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = Some(author.into());
        self
    }

    /// Set the static enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.metadata.enabled = enabled;
        self
    }

    /// Restrict the plugin to the given collections.
    pub fn with_enabled_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.enabled_collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Append a migration.
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Attach the SSR hook.
    pub fn with_ssr_hook(mut self, hook: Arc<dyn SsrHook>) -> Self {
        self.ssr_hook = Some(hook);
        self
    }

    /// Validate the definition before registration.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.trim().is_empty() {
            return Err(PluginError::invalid("plugin definition has empty 'id' field"));
        }

        if self.version.trim().is_empty() {
            return Err(PluginError::invalid(format!(
                "plugin '{}' has empty 'version' field",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for migration in &self.migrations {
            if migration.id.trim().is_empty() {
                return Err(PluginError::invalid(format!(
                    "plugin '{}' declares a migration with an empty id",
                    self.id
                )));
            }
            if !seen.insert(migration.id.as_str()) {
                return Err(PluginError::invalid(format!(
                    "plugin '{}' declares migration '{}' more than once",
                    self.id, migration.id
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("metadata", &self.metadata)
            .field("migrations", &self.migrations)
            .field("has_ssr_hook", &self.ssr_hook.is_some())
            .finish()
    }
}

//! Plugin registry - the set of known plugins for this process.
//!
//! Plugins are kept in registration order, which is also the order SSR hooks
//! run in and the order the migration driver visits plugins.
//!
//! The registry is an explicit instance shared through `Arc`; nothing here is
//! global, so every test can build its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::definition::{Plugin, SsrContext, SsrHook};
use super::error::PluginError;
use super::settings::PluginSettings;

/// A plugin as held by the registry.
#[derive(Debug)]
pub struct RegisteredPlugin {
    pub plugin: Plugin,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredPlugin {
    pub fn id(&self) -> &str {
        &self.plugin.id
    }
}

#[derive(Debug, Default)]
struct Entries {
    plugins: IndexMap<String, Arc<RegisteredPlugin>>,
    sealed: bool,
}

/// Registry of compiled-in plugins.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<Entries>,
    settings: Option<Arc<dyn PluginSettings>>,
}

impl PluginRegistry {
    /// Create an empty registry without a settings service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `settings` for per-tenant enabled state.
    pub fn with_settings(mut self, settings: Arc<dyn PluginSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// The configured settings service, if any.
    pub fn settings(&self) -> Option<&Arc<dyn PluginSettings>> {
        self.settings.as_ref()
    }

    /// Register a plugin.
    ///
    /// Registering an id that is already present is a successful no-op, so
    /// startup initialization can run more than once. Once the registry is
    /// [sealed](Self::seal), new ids are refused.
    pub fn register(&self, plugin: Plugin) -> Result<(), PluginError> {
        plugin.validate()?;

        let mut entries = self.entries.write();
        if let Some(existing) = entries.plugins.get(&plugin.id) {
            if existing.plugin.version != plugin.version {
                warn!(
                    plugin = %plugin.id,
                    registered = %existing.plugin.version,
                    ignored = %plugin.version,
                    "plugin already registered with a different version, keeping the first"
                );
            } else {
                debug!(plugin = %plugin.id, "plugin already registered");
            }
            return Ok(());
        }

        if entries.sealed {
            return Err(PluginError::Registration {
                plugin: plugin.id,
                details: "registry is sealed; plugins can only be added during startup".into(),
            });
        }

        info!(
            plugin = %plugin.id,
            version = %plugin.version,
            migrations = plugin.migrations.len(),
            "registered plugin"
        );
        entries.plugins.insert(
            plugin.id.clone(),
            Arc::new(RegisteredPlugin {
                plugin,
                registered_at: Utc::now(),
            }),
        );

        Ok(())
    }

    /// Refuse further new registrations. Re-registering known ids stays a no-op.
    pub fn seal(&self) {
        self.entries.write().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.entries.read().sealed
    }

    /// Get a plugin by id.
    pub fn get(&self, id: &str) -> Option<Arc<RegisteredPlugin>> {
        self.entries.read().plugins.get(id).cloned()
    }

    /// All plugins, in registration order.
    pub fn get_all(&self) -> Vec<Arc<RegisteredPlugin>> {
        self.entries.read().plugins.values().cloned().collect()
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.read().plugins.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().plugins.is_empty()
    }

    /// Effective enabled state of a plugin for a tenant.
    ///
    /// A stored tenant state wins; otherwise the static `metadata.enabled`
    /// applies. A settings lookup failure falls back to the static value.
    /// Unknown plugins are disabled.
    pub async fn is_enabled(&self, plugin_id: &str, tenant_id: Option<&str>) -> bool {
        match self.get(plugin_id) {
            Some(entry) => self.resolve_enabled(&entry, tenant_id).await,
            None => false,
        }
    }

    async fn resolve_enabled(&self, entry: &RegisteredPlugin, tenant_id: Option<&str>) -> bool {
        if let (Some(settings), Some(tenant_id)) = (&self.settings, tenant_id) {
            match settings.get_plugin_state(entry.id(), tenant_id).await {
                Ok(Some(state)) => return state.enabled,
                Ok(None) => {}
                Err(e) => warn!(
                    plugin = %entry.id(),
                    tenant = %tenant_id,
                    error = %e,
                    "failed to read plugin state, using static default"
                ),
            }
        }

        entry.plugin.metadata.enabled
    }

    /// Whether a plugin applies to a collection for a tenant.
    ///
    /// The enabled state is resolved first; a disabled plugin is never
    /// enabled for any collection, whatever its allow-list says. Only then
    /// is the allow-list checked (empty means every collection).
    pub async fn is_enabled_for_collection(
        &self,
        plugin_id: &str,
        collection_id: &str,
        tenant_id: Option<&str>,
    ) -> bool {
        let Some(entry) = self.get(plugin_id) else {
            return false;
        };

        if !self.resolve_enabled(&entry, tenant_id).await {
            return false;
        }

        let allowed = &entry.plugin.metadata.enabled_collections;
        allowed.is_empty() || allowed.iter().any(|c| c == collection_id)
    }

    /// Enable or disable a plugin for a tenant.
    ///
    /// Returns `false` when no settings service is configured, when the
    /// plugin is unknown, or when the write fails.
    pub async fn toggle_plugin(
        &self,
        plugin_id: &str,
        enabled: bool,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> bool {
        let Some(settings) = &self.settings else {
            warn!(plugin = %plugin_id, "cannot toggle plugin: no settings service configured");
            return false;
        };

        if self.get(plugin_id).is_none() {
            warn!(plugin = %plugin_id, "cannot toggle unknown plugin");
            return false;
        }

        let stored = settings
            .set_plugin_state(plugin_id, tenant_id, enabled, user_id)
            .await;
        if stored {
            info!(plugin = %plugin_id, tenant = %tenant_id, enabled, "plugin toggled");
        }
        stored
    }

    /// Store a settings blob for a plugin and tenant.
    pub async fn update_plugin_settings(
        &self,
        plugin_id: &str,
        tenant_id: &str,
        settings_blob: Value,
        user_id: Option<&str>,
    ) -> bool {
        let (Some(settings), Some(entry)) = (&self.settings, self.get(plugin_id)) else {
            return false;
        };

        settings
            .update_plugin_settings(
                plugin_id,
                tenant_id,
                settings_blob,
                entry.plugin.metadata.enabled,
                user_id,
            )
            .await
    }

    /// SSR hooks that apply to a collection, in registration order.
    pub async fn get_ssr_hooks(
        &self,
        collection_id: &str,
        tenant_id: Option<&str>,
    ) -> Vec<(String, Arc<dyn SsrHook>)> {
        let mut hooks = Vec::new();

        for entry in self.get_all() {
            let Some(hook) = &entry.plugin.ssr_hook else {
                continue;
            };
            if self
                .is_enabled_for_collection(entry.id(), collection_id, tenant_id)
                .await
            {
                hooks.push((entry.id().to_string(), Arc::clone(hook)));
            }
        }

        hooks
    }

    /// Run every applicable SSR hook over `entries`, in registration order.
    ///
    /// A failing hook is logged and skipped: the next hook receives the
    /// entries as they were before it.
    pub async fn run_ssr_hooks(&self, ctx: &SsrContext, entries: Vec<Value>) -> Vec<Value> {
        let mut entries = entries;

        for (plugin_id, hook) in self
            .get_ssr_hooks(&ctx.collection_id, ctx.tenant_id.as_deref())
            .await
        {
            match hook.enrich(ctx, entries.clone()).await {
                Ok(enriched) => entries = enriched,
                Err(e) => warn!(
                    plugin = %plugin_id,
                    collection = %ctx.collection_id,
                    error = %e,
                    "SSR hook failed, leaving entries unchanged"
                ),
            }
        }

        entries
    }
}

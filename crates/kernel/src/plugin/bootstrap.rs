//! Startup wiring for the plugin subsystem.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::definition::Plugin;
use super::error::{ErrorPayload, PluginError};
use super::gate::apply_gate;
use super::migration::{MigrationRunner, MigrationSummary};
use super::registry::PluginRegistry;
use crate::adapter::DatabaseAdapter;
use crate::config::Config;

/// Result of [`initialize_plugins`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    /// Plugin ids registered (or already present), in registry order.
    pub registered: Vec<String>,
    /// Definitions that failed validation or registration.
    pub rejected: Vec<ErrorPayload>,
    /// One migration summary per tenant, in [`Config::tenants`] order.
    pub migrations: Vec<MigrationSummary>,
}

impl StartupReport {
    /// True when every plugin registered and every migration succeeded.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.migrations.iter().all(MigrationSummary::is_complete)
    }
}

/// Build a migration runner that identifies itself with the configured instance id.
pub fn migration_runner(
    registry: Arc<PluginRegistry>,
    db: Arc<dyn DatabaseAdapter>,
    config: &Config,
) -> MigrationRunner {
    MigrationRunner::new(registry, db)
        .with_owner(format!("{}:{}", config.instance_id, std::process::id()))
        .with_claim_ttl(config.migration_claim_ttl)
}

/// Register plugin definitions, applying `DISABLED_PLUGINS`, then seal the
/// registry. Returns the errors of definitions that were left out.
pub fn register_plugins(
    registry: &PluginRegistry,
    config: &Config,
    plugins: Vec<Plugin>,
) -> Vec<ErrorPayload> {
    let mut rejected = Vec::new();
    for plugin in plugins {
        let plugin = apply_gate(plugin, &config.disabled_plugins);
        let plugin_id = plugin.id.clone();
        if let Err(e) = registry.register(plugin) {
            warn!(plugin = %plugin_id, code = e.code(), error = %e, "skipping plugin");
            rejected.push(ErrorPayload::from(&e));
        }
    }
    registry.seal();
    rejected
}

/// Register the compiled-in plugins and migrate every configured tenant.
///
/// A plugin that fails to register is reported and left out; a plugin whose
/// migrations fail stays registered and is reported in its tenant's summary.
/// Only a failure to prepare the migration bookkeeping aborts startup.
/// Running this again is safe: registration and migrations are idempotent.
pub async fn initialize_plugins(
    registry: Arc<PluginRegistry>,
    db: Arc<dyn DatabaseAdapter>,
    config: &Config,
    plugins: Vec<Plugin>,
) -> Result<StartupReport, PluginError> {
    let mut report = StartupReport {
        rejected: register_plugins(&registry, config, plugins),
        registered: registry.ids(),
        ..StartupReport::default()
    };

    let runner = migration_runner(Arc::clone(&registry), db, config);
    for tenant in config.tenants() {
        let summary = runner.run_all_migrations(&tenant).await?;
        report.migrations.push(summary);
    }

    info!(
        plugins = report.registered.len(),
        rejected = report.rejected.len(),
        tenants = report.migrations.len(),
        clean = report.is_clean(),
        "plugin subsystem initialized"
    );

    Ok(report)
}

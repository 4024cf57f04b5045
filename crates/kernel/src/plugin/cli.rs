//! CLI command implementations for plugin management.
//!
//! These commands operate on a sealed registry and the configured database
//! adapter, without running the startup migration pass.

use anyhow::{Context, Result, bail};

use super::migration::{MigrationRunner, MigrationSummary, PluginOutcome};
use super::registry::PluginRegistry;

fn print_summary(summary: &MigrationSummary) {
    println!("Tenant '{}':", summary.tenant_id);
    println!("{:<20} {:<10} {}", "PLUGIN", "STATUS", "DETAILS");
    println!("{}", "-".repeat(71));

    for (plugin_id, outcome) in &summary.outcomes {
        let (status, details) = match outcome {
            PluginOutcome::Migrated(report) if report.applied.is_empty() => {
                ("ok", "up to date".to_string())
            }
            PluginOutcome::Migrated(report) => ("ok", format!("applied {}", report.applied.join(", "))),
            PluginOutcome::Skipped { reason } => ("skipped", reason.clone()),
            PluginOutcome::Failed(e) => ("FAILED", format!("{}: {}", e.code, e.message)),
        };
        println!("{plugin_id:<20} {status:<10} {details}");
    }
    println!();
}

/// Run pending migrations for every tenant, for all plugins or just one.
///
/// Returns `Ok(false)` when any plugin failed, so the binary can exit non-zero.
pub async fn cmd_migrate(
    runner: &MigrationRunner,
    tenants: &[String],
    plugin: Option<&str>,
    json: bool,
) -> Result<bool> {
    if let Some(id) = plugin.filter(|id| runner.registry().get(id).is_none()) {
        bail!("plugin '{id}' is not registered");
    }

    let mut summaries = Vec::with_capacity(tenants.len());
    for tenant in tenants {
        let summary = match plugin {
            Some(id) => runner.run_plugin_pass(id, tenant).await,
            None => runner.run_all_migrations(tenant).await,
        }
        .with_context(|| format!("migration pass for tenant '{tenant}' failed"))?;
        summaries.push(summary);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            print_summary(summary);
        }
    }

    Ok(summaries.iter().all(MigrationSummary::is_complete))
}

/// List registered plugins with their state for one tenant.
pub async fn cmd_plugin_list(runner: &MigrationRunner, tenant: &str) -> Result<()> {
    let registry = runner.registry();
    if registry.is_empty() {
        println!("No plugins registered.");
        return Ok(());
    }

    let states = match registry.settings() {
        Some(settings) => settings.list_plugin_states(tenant).await?,
        None => Vec::new(),
    };

    println!(
        "{:<20} {:<10} {:<10} {:<12} {:<10}",
        "PLUGIN", "VERSION", "DEFAULT", "TENANT", "MIGRATIONS"
    );
    println!("{}", "-".repeat(71));

    for entry in registry.get_all() {
        let plugin = &entry.plugin;
        let default = if plugin.metadata.enabled { "enabled" } else { "disabled" };
        let tenant_state = match states.iter().find(|s| s.plugin_id == plugin.id) {
            Some(s) if s.enabled => "enabled",
            Some(_) => "disabled",
            None => "-",
        };
        let applied = runner.applied_migration_ids(&plugin.id, tenant).await?.len();

        println!(
            "{:<20} {:<10} {:<10} {:<12} {}/{}",
            plugin.id,
            plugin.version,
            default,
            tenant_state,
            applied,
            plugin.migrations.len()
        );
    }

    Ok(())
}

/// Enable or disable a plugin for a tenant.
pub async fn cmd_plugin_toggle(
    registry: &PluginRegistry,
    plugin_id: &str,
    enabled: bool,
    tenant: &str,
    user: Option<&str>,
) -> Result<()> {
    if registry.get(plugin_id).is_none() {
        bail!("plugin '{plugin_id}' is not registered");
    }

    if !registry.toggle_plugin(plugin_id, enabled, tenant, user).await {
        bail!("failed to store state for plugin '{plugin_id}' (see log)");
    }

    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{verb} plugin '{plugin_id}' for tenant '{tenant}'.");
    Ok(())
}

/// Revert the newest applied migration of a plugin for a tenant.
pub async fn cmd_plugin_revert(runner: &MigrationRunner, plugin_id: &str, tenant: &str) -> Result<()> {
    match runner.revert_last(plugin_id, tenant).await? {
        Some(migration) => println!("Reverted '{plugin_id}' migration '{migration}' for tenant '{tenant}'."),
        None => println!("Plugin '{plugin_id}' has no applied migrations for tenant '{tenant}'."),
    }
    Ok(())
}

//! Startup gating of compiled-in plugins.
//!
//! Operators can switch plugins off for a deployment with the
//! `DISABLED_PLUGINS` environment variable without touching per-tenant state.

use super::definition::Plugin;

/// Compute whether a plugin starts statically enabled.
///
/// A plugin is enabled only if:
/// 1. Its definition enables it by default, AND
/// 2. Its id is NOT listed in `DISABLED_PLUGINS`.
///
/// Per-tenant state stored later still overrides the result.
pub fn should_enable(default_enabled: bool, disabled_plugins: &[String], plugin_id: &str) -> bool {
    default_enabled && !disabled_plugins.iter().any(|d| d == plugin_id)
}

/// Apply [`should_enable`] to a plugin definition before registration.
pub fn apply_gate(plugin: Plugin, disabled_plugins: &[String]) -> Plugin {
    let enabled = should_enable(plugin.metadata.enabled, disabled_plugins, &plugin.id);
    plugin.enabled(enabled)
}

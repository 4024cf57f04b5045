//! Plugin system error types with clear, actionable messages.
//!
//! Every error names the plugin (and tenant or migration where relevant) and
//! maps to a stable code via [`PluginError::code`], so callers and logs can
//! branch on the code rather than the message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the plugin registry, settings service and migration runner.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin definition is missing a required field or is inconsistent.
    #[error("invalid plugin: {reason}")]
    InvalidPlugin { reason: String },

    /// Registration could not be completed.
    #[error("plugin '{plugin}': registration failed: {details}")]
    Registration { plugin: String, details: String },

    /// No plugin with this id is registered.
    #[error("plugin '{plugin}' is not registered")]
    NotFound { plugin: String },

    /// A migration's `up` (or `down`) step failed.
    #[error("plugin '{plugin}': migration '{migration}' failed: {details}")]
    MigrationFailed {
        plugin: String,
        migration: String,
        details: String,
    },

    /// The orchestration around migrations failed (bookkeeping writes,
    /// collection setup, claims).
    #[error("migration runner failed ({context}): {details}")]
    Runner { context: String, details: String },

    /// Reading the applied-migrations set failed.
    #[error("plugin '{plugin}': failed to read applied migrations for tenant '{tenant}': {details}")]
    Query {
        plugin: String,
        tenant: String,
        details: String,
    },

    /// Another process holds the migration claim for this plugin and tenant.
    #[error("plugin '{plugin}': migrations for tenant '{tenant}' are already running elsewhere (claim '{key}'); retry later")]
    MigrationLocked {
        plugin: String,
        tenant: String,
        key: String,
    },

    /// The settings service could not read or write plugin state.
    #[error("plugin '{plugin}': settings error: {details}")]
    Settings { plugin: String, details: String },
}

impl PluginError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPlugin { .. } => "INVALID_PLUGIN",
            Self::Registration { .. } => "REGISTRATION_ERROR",
            Self::NotFound { .. } => "PLUGIN_NOT_FOUND",
            Self::MigrationFailed { .. } => "MIGRATION_ERROR",
            Self::Runner { .. } => "MIGRATION_RUNNER_ERROR",
            Self::Query { .. } => "QUERY_ERROR",
            Self::MigrationLocked { .. } => "MIGRATION_LOCKED",
            Self::Settings { .. } => "SETTINGS_ERROR",
        }
    }

    /// The failing migration id, for [`PluginError::MigrationFailed`].
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::MigrationFailed { migration, .. } => Some(migration),
            _ => None,
        }
    }

    /// Create an invalid plugin error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidPlugin {
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(plugin: impl Into<String>) -> Self {
        Self::NotFound {
            plugin: plugin.into(),
        }
    }

    /// Create a runner error.
    pub fn runner(context: impl Into<String>, details: impl ToString) -> Self {
        Self::Runner {
            context: context.into(),
            details: details.to_string(),
        }
    }
}

/// Serializable `{code, message}` pair for reporting a [`PluginError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
}

impl From<&PluginError> for ErrorPayload {
    fn from(e: &PluginError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            migration_id: e.migration_id().map(str::to_string),
        }
    }
}

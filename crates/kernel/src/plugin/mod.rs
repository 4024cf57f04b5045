//! Plugin system for Svelty.
//!
//! This module handles:
//! - Registering compiled-in plugin definitions
//! - Resolving per-tenant enablement and collecting SSR hooks
//! - Persisting per-tenant plugin state and settings
//! - Running versioned plugin migrations

mod bootstrap;
pub mod builtin;
pub mod cli;
mod definition;
mod error;
mod gate;
mod migration;
mod registry;
mod settings;

pub use bootstrap::{StartupReport, initialize_plugins, migration_runner, register_plugins};
pub use builtin::builtin_plugins;
pub use definition::{
    Migration, MigrationFn, MigrationFuture, Plugin, PluginMetadata, SsrContext, SsrHook,
};
pub use error::{ErrorPayload, PluginError};
pub use gate::{apply_gate, should_enable};
pub use migration::{
    DEFAULT_CLAIM_TTL, MIGRATION_COLLECTION, MigrationRecord, MigrationReport, MigrationRunner,
    MigrationSummary, PluginOutcome, execution_order,
};
pub use registry::{PluginRegistry, RegisteredPlugin};
pub use settings::{PLUGIN_STATE_COLLECTION, PluginSettings, PluginState, StoredPluginSettings};

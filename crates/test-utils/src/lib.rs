//! Svelty test utilities.
//!
//! Helpers for integration testing: plugin and migration fixtures, a shared
//! call log for observing which migration steps ran, and small assertion
//! helpers for JSON documents.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use svelty_kernel::plugin::{Migration, Plugin};

/// Records the order in which migration steps ran.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call.
    pub fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Everything recorded so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// A migration whose `up` records `"{prefix}{id}"` in `log`.
///
/// `prefix` lets one log observe several plugins or tenants.
pub fn recording_migration(log: &CallLog, prefix: &str, id: &str, version: u32) -> Migration {
    let log = log.clone();
    let entry = format!("{prefix}{id}");
    let down_log = log.clone();
    let down_entry = format!("down {entry}");
    Migration::new(id, version, move |_db| {
        let log = log.clone();
        let entry = entry.clone();
        async move {
            log.push(entry);
            Ok(())
        }
    })
    .with_down(move |_db| {
        let log = down_log.clone();
        let entry = down_entry.clone();
        async move {
            log.push(entry);
            Ok(())
        }
    })
}

/// A migration whose `up` always fails with `message`.
pub fn failing_migration(id: &str, version: u32, message: &str) -> Migration {
    let message = message.to_string();
    Migration::new(id, version, move |_db| {
        let message = message.clone();
        async move { anyhow::bail!(message) }
    })
}

/// Create a test plugin definition with default values.
pub fn test_plugin(id: &str) -> TestPlugin {
    TestPlugin {
        plugin: Plugin::new(id, "1.0.0").with_name(format!("Test plugin {id}")),
    }
}

/// A plugin builder for creating test fixtures.
#[derive(Debug, Clone)]
pub struct TestPlugin {
    plugin: Plugin,
}

impl TestPlugin {
    /// Set the version.
    pub fn with_version(mut self, version: &str) -> Self {
        self.plugin.version = version.to_string();
        self
    }

    /// Set as statically disabled.
    pub fn disabled(mut self) -> Self {
        self.plugin = self.plugin.enabled(false);
        self
    }

    /// Restrict to collections.
    pub fn for_collections(mut self, collections: &[&str]) -> Self {
        self.plugin = self
            .plugin
            .with_enabled_collections(collections.iter().copied());
        self
    }

    /// Add recording migrations with the given `(id, version)` pairs, in order.
    pub fn with_recorded_migrations(mut self, log: &CallLog, migrations: &[(&str, u32)]) -> Self {
        let prefix = format!("{}:", self.plugin.id);
        for (id, version) in migrations {
            self.plugin = self
                .plugin
                .with_migration(recording_migration(log, &prefix, id, *version));
        }
        self
    }

    /// Add an arbitrary migration.
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.plugin = self.plugin.with_migration(migration);
        self
    }

    pub fn build(self) -> Plugin {
        self.plugin
    }
}

/// Assertion helpers for JSON documents.
pub mod assert {
    use super::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "expected key '{key}' in JSON: {value}"
        );
    }

    /// Assert that a JSON value does not have a specific key.
    pub fn lacks_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_none(),
            "unexpected key '{key}' in JSON: {value}"
        );
    }
}

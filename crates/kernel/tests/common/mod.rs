#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every test builds its own [`TestKernel`] over a fresh in-memory adapter,
//! wired the same way the `svelty` binary wires the real one.

#![allow(dead_code)]

use std::sync::Arc;

use svelty_kernel::Config;
use svelty_kernel::adapter::{DatabaseAdapter, MemoryAdapter};
use svelty_kernel::plugin::{MigrationRunner, PluginRegistry, StoredPluginSettings};

/// Registry, settings service and runner over one in-memory store.
pub struct TestKernel {
    pub memory: Arc<MemoryAdapter>,
    pub db: Arc<dyn DatabaseAdapter>,
    pub registry: Arc<PluginRegistry>,
    pub runner: MigrationRunner,
}

impl TestKernel {
    /// Kernel with a settings service.
    pub fn new() -> Self {
        Self::with_memory(MemoryAdapter::new(), true)
    }

    /// Kernel whose registry has no settings service.
    pub fn without_settings() -> Self {
        Self::with_memory(MemoryAdapter::new(), false)
    }

    /// Kernel over a store that cannot create collections explicitly.
    pub fn without_collection_manager() -> Self {
        Self::with_memory(MemoryAdapter::without_collection_manager(), true)
    }

    fn with_memory(memory: MemoryAdapter, settings: bool) -> Self {
        let memory = Arc::new(memory);
        let db: Arc<dyn DatabaseAdapter> = memory.clone();
        let mut registry = PluginRegistry::new();
        if settings {
            registry = registry.with_settings(Arc::new(StoredPluginSettings::new(Arc::clone(&db))));
        }
        let registry = Arc::new(registry);
        let runner = MigrationRunner::new(Arc::clone(&registry), Arc::clone(&db)).with_owner("test");
        Self {
            memory,
            db,
            registry,
            runner,
        }
    }
}

/// Configuration from explicit variables, ignoring the process environment.
pub fn config(vars: &[(&str, &str)]) -> Config {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|name| {
        vars.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    })
    .expect("test configuration must parse")
}

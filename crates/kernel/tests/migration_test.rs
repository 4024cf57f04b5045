#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the plugin migration runner.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test migration_test
//! ```
//!
//! ## Test Coverage
//!
//! - Version ordering and idempotent re-runs
//! - Abort on first failure with earlier records kept
//! - Per-tenant bookkeeping
//! - Lenient all-plugins driver
//! - Bookkeeping collection setup with and without explicit creation
//! - Revert of the newest applied migration

mod common;

use std::collections::HashSet;

use svelty_kernel::plugin::{MIGRATION_COLLECTION, PluginOutcome};
use svelty_test_utils::{CallLog, failing_migration, recording_migration, test_plugin};

use common::TestKernel;

#[tokio::test]
async fn migrations_run_in_version_order_once() {
    let kernel = TestKernel::new();
    let log = CallLog::new();
    kernel
        .registry
        .register(
            test_plugin("seo")
                .with_recorded_migrations(&log, &[("003_c", 3), ("001_a", 1), ("002_b", 2)])
                .build(),
        )
        .unwrap();

    let report = kernel.runner.run_migrations("seo", "default").await.unwrap();
    assert_eq!(report.applied, vec!["001_a", "002_b", "003_c"]);
    assert_eq!(log.calls(), vec!["seo:001_a", "seo:002_b", "seo:003_c"]);

    log.clear();
    let report = kernel.runner.run_migrations("seo", "default").await.unwrap();
    assert!(report.applied.is_empty());
    assert!(log.is_empty(), "second run must not execute any step");
}

#[tokio::test]
async fn equal_versions_run_in_declaration_order() {
    let kernel = TestKernel::new();
    let log = CallLog::new();
    kernel
        .registry
        .register(
            test_plugin("seo")
                .with_recorded_migrations(&log, &[("b", 1), ("a", 1), ("c", 0)])
                .build(),
        )
        .unwrap();

    kernel.runner.run_migrations("seo", "default").await.unwrap();
    assert_eq!(log.calls(), vec!["seo:c", "seo:b", "seo:a"]);
}

#[tokio::test]
async fn failure_stops_the_plugin_and_names_the_migration() {
    let kernel = TestKernel::new();
    let log = CallLog::new();
    kernel
        .registry
        .register(
            test_plugin("seo")
                .with_migration(recording_migration(&log, "", "001", 1))
                .with_migration(failing_migration("002", 2, "column already exists"))
                .with_migration(recording_migration(&log, "", "003", 3))
                .build(),
        )
        .unwrap();

    let err = kernel.runner.run_migrations("seo", "default").await.unwrap_err();
    assert_eq!(err.code(), "MIGRATION_ERROR");
    assert_eq!(err.migration_id(), Some("002"));
    assert!(err.to_string().contains("column already exists"));

    assert_eq!(log.calls(), vec!["001"]);
    let applied = kernel
        .runner
        .applied_migration_ids("seo", "default")
        .await
        .unwrap();
    assert_eq!(applied, HashSet::from(["001".to_string()]));
}

#[tokio::test]
async fn tenants_are_migrated_independently() {
    let kernel = TestKernel::new();
    let log = CallLog::new();
    kernel
        .registry
        .register(
            test_plugin("seo")
                .with_recorded_migrations(&log, &[("001", 1), ("002", 2)])
                .build(),
        )
        .unwrap();

    let summary = kernel.runner.run_all_migrations("default").await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.applied_count(), 2);
    assert!(
        kernel
            .runner
            .applied_migration_ids("seo", "other")
            .await
            .unwrap()
            .is_empty()
    );

    let report = kernel.runner.run_migrations("seo", "other").await.unwrap();
    assert_eq!(report.applied, vec!["001", "002"]);
    assert_eq!(
        log.calls(),
        vec!["seo:001", "seo:002", "seo:001", "seo:002"]
    );
}

#[tokio::test]
async fn all_plugins_driver_isolates_failures() {
    let kernel = TestKernel::new();
    let log = CallLog::new();
    kernel
        .registry
        .register(
            test_plugin("broken")
                .with_migration(failing_migration("001", 1, "boom"))
                .build(),
        )
        .unwrap();
    kernel
        .registry
        .register(
            test_plugin("seo")
                .with_recorded_migrations(&log, &[("001", 1)])
                .build(),
        )
        .unwrap();
    kernel
        .registry
        .register(
            test_plugin("off")
                .disabled()
                .with_recorded_migrations(&log, &[("001", 1)])
                .build(),
        )
        .unwrap();

    let summary = kernel.runner.run_all_migrations("default").await.unwrap();

    assert!(!summary.is_complete());
    let order: Vec<_> = summary.outcomes.keys().map(String::as_str).collect();
    assert_eq!(order, vec!["broken", "seo", "off"]);
    assert!(matches!(summary.outcomes["broken"], PluginOutcome::Failed(ref e) if e.code == "MIGRATION_ERROR"));
    assert!(matches!(summary.outcomes["seo"], PluginOutcome::Migrated(_)));
    assert!(matches!(summary.outcomes["off"], PluginOutcome::Skipped { .. }));
    assert_eq!(log.calls(), vec!["seo:001"]);
}

#[tokio::test]
async fn migration_table_is_prepared_by_the_driver() {
    let kernel = TestKernel::without_collection_manager();
    kernel.runner.run_all_migrations("default").await.unwrap();
    assert!(kernel.memory.has_collection(MIGRATION_COLLECTION));
    assert_eq!(kernel.db.count(MIGRATION_COLLECTION).await.unwrap(), 0);
}

#[tokio::test]
async fn revert_undoes_newest_migration_then_reapplies() {
    let kernel = TestKernel::new();
    let log = CallLog::new();
    kernel
        .registry
        .register(
            test_plugin("seo")
                .with_recorded_migrations(&log, &[("001", 1), ("002", 2)])
                .build(),
        )
        .unwrap();
    kernel.runner.run_migrations("seo", "default").await.unwrap();

    let reverted = kernel.runner.revert_last("seo", "default").await.unwrap();
    assert_eq!(reverted.as_deref(), Some("002"));

    let pending = kernel
        .runner
        .pending_migrations("seo", "default")
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "002");

    let report = kernel.runner.run_migrations("seo", "default").await.unwrap();
    assert_eq!(report.applied, vec!["002"]);
    assert_eq!(
        log.calls(),
        vec!["seo:001", "seo:002", "down seo:002", "seo:002"]
    );
}

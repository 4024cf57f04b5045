//! PageSpeed Insights scores.
//!
//! Stores one result per audit run and, during server rendering, attaches the
//! newest stored result for each entry under the entry's `pagespeed` key.
//! Fetching scores from the PageSpeed API is done elsewhere; this plugin only
//! owns the storage and the rendering hook.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::adapter::{AdapterResult, DatabaseAdapter, DatabaseAdapterExt, Filter, filter};
use crate::plugin::{Migration, Plugin, SsrContext, SsrHook};

pub const PLUGIN_ID: &str = "pagespeed";

/// Collection holding [`PageSpeedResult`] documents.
pub const PAGESPEED_RESULTS: &str = "plugin_pagespeed_results";

/// Device profile an audit ran with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Mobile,
    Desktop,
}

/// One audit of one entry's public URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSpeedResult {
    pub entry_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub url: String,
    pub strategy: Strategy,
    /// Lighthouse performance score, 0-100.
    pub performance: u8,
    #[serde(default)]
    pub accessibility: Option<u8>,
    #[serde(default)]
    pub seo: Option<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// Store an audit result.
pub async fn record_result(db: &dyn DatabaseAdapter, result: &PageSpeedResult) -> AdapterResult<()> {
    db.insert_as(PAGESPEED_RESULTS, result).await?;
    debug!(entry = %result.entry_id, score = result.performance, "stored pagespeed result");
    Ok(())
}

/// The `pagespeed` plugin definition.
pub fn plugin(db: Arc<dyn DatabaseAdapter>) -> Plugin {
    Plugin::new(PLUGIN_ID, "1.0.0")
        .with_name("PageSpeed Insights")
        .with_description("Shows Lighthouse scores next to content entries")
        .with_migration(
            Migration::new("001_create_results", 1, |db| async move {
                if let Some(manager) = db.collections() {
                    manager.create_collection(PAGESPEED_RESULTS).await?;
                }
                Ok(())
            })
            .with_description("Create the results collection")
            .with_down(|db| async move {
                db.delete_many(PAGESPEED_RESULTS, &Filter::new()).await?;
                Ok(())
            }),
        )
        .with_ssr_hook(Arc::new(PageSpeedHook::new(db)))
}

/// Attaches the newest stored result to each rendered entry.
pub struct PageSpeedHook {
    db: Arc<dyn DatabaseAdapter>,
}

impl PageSpeedHook {
    pub fn new(db: Arc<dyn DatabaseAdapter>) -> Self {
        Self { db }
    }

    async fn latest_by_entry(
        &self,
        tenant_id: Option<&str>,
    ) -> AdapterResult<HashMap<String, PageSpeedResult>> {
        // Rows without a tenant may omit the field entirely, so the
        // tenant-less scope is applied after the read.
        let scope = match tenant_id {
            Some(tenant) => filter([("tenantId", json!(tenant))]),
            None => Filter::new(),
        };
        let results: Vec<PageSpeedResult> = self.db.find_many_as(PAGESPEED_RESULTS, &scope).await?;

        let mut latest: HashMap<String, PageSpeedResult> = HashMap::new();
        for result in results {
            if result.tenant_id.as_deref() != tenant_id {
                continue;
            }
            let newer = latest
                .get(&result.entry_id)
                .is_none_or(|current| result.fetched_at >= current.fetched_at);
            if newer {
                latest.insert(result.entry_id.clone(), result);
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl SsrHook for PageSpeedHook {
    async fn enrich(&self, ctx: &SsrContext, mut entries: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        if entries.is_empty() {
            return Ok(entries);
        }

        let latest = self.latest_by_entry(ctx.tenant_id.as_deref()).await?;
        if latest.is_empty() {
            return Ok(entries);
        }

        for entry in &mut entries {
            let Some(obj) = entry.as_object_mut() else {
                continue;
            };
            let Some(result) = obj
                .get("_id")
                .and_then(Value::as_str)
                .and_then(|id| latest.get(id))
            else {
                continue;
            };
            obj.insert(
                PLUGIN_ID.to_string(),
                json!({
                    "performance": result.performance,
                    "accessibility": result.accessibility,
                    "seo": result.seo,
                    "strategy": result.strategy,
                    "fetchedAt": result.fetched_at,
                }),
            );
        }

        Ok(entries)
    }
}

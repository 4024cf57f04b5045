//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL. When None, the in-memory adapter is used.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Whether plugin state and migrations are tracked per tenant (default: false).
    pub multi_tenant: bool,

    /// Tenant id used when multi-tenancy is off (default: "default").
    pub default_tenant: String,

    /// Tenants migrated at startup in multi-tenant mode (from TENANTS env var).
    pub tenants: Vec<String>,

    /// Plugin ids forced statically disabled (from DISABLED_PLUGINS env var).
    pub disabled_plugins: Vec<String>,

    /// Lifetime of a migration claim (default: 600 seconds).
    pub migration_claim_ttl: Duration,

    /// Owner id written into migration claims (default: hostname).
    pub instance_id: String,
}

fn comma_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{name} must be a boolean, got '{other}'"),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let multi_tenant = match lookup("MULTI_TENANT") {
            Some(v) => parse_bool("MULTI_TENANT", &v)?,
            None => false,
        };

        let default_tenant = lookup("DEFAULT_TENANT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "default".to_string());

        let tenants = comma_list(lookup("TENANTS"));
        let disabled_plugins = comma_list(lookup("DISABLED_PLUGINS"));

        let migration_claim_ttl = lookup("MIGRATION_CLAIM_TTL_SECS")
            .unwrap_or_else(|| "600".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("MIGRATION_CLAIM_TTL_SECS must be a valid u64")?;

        let instance_id = lookup("INSTANCE_ID")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
            })
            .unwrap_or_else(|| "svelty".to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            multi_tenant,
            default_tenant,
            tenants,
            disabled_plugins,
            migration_claim_ttl,
            instance_id,
        })
    }

    /// Tenants that startup migrates and that CLI commands default to.
    pub fn tenants(&self) -> Vec<String> {
        if self.multi_tenant && !self.tenants.is_empty() {
            self.tenants.clone()
        } else {
            vec![self.default_tenant.clone()]
        }
    }
}

//! Svelty CMS Kernel
//!
//! Registers the compiled-in plugins, runs their migrations and exposes
//! plugin administration commands.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use svelty_kernel::Config;
use svelty_kernel::db;
use svelty_kernel::plugin::{
    PluginRegistry, StoredPluginSettings, builtin_plugins, cli, initialize_plugins,
    migration_runner, register_plugins,
};

/// Svelty plugin kernel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pending plugin migrations.
    Migrate {
        /// Tenant to migrate (default: every configured tenant).
        #[arg(long)]
        tenant: Option<String>,

        /// Only migrate this plugin.
        #[arg(long)]
        plugin: Option<String>,

        /// Print the per-plugin results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage plugins.
    Plugin {
        #[command(subcommand)]
        command: PluginCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List registered plugins and their state.
    List {
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Enable a plugin for a tenant.
    Enable {
        id: String,
        #[arg(long)]
        tenant: Option<String>,
        /// User recorded as the author of the change.
        #[arg(long)]
        user: Option<String>,
    },

    /// Disable a plugin for a tenant.
    Disable {
        id: String,
        #[arg(long)]
        tenant: Option<String>,
        /// User recorded as the author of the change.
        #[arg(long)]
        user: Option<String>,
    },

    /// Revert the newest applied migration of a plugin.
    Revert {
        id: String,
        #[arg(long)]
        tenant: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("command failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        multi_tenant = config.multi_tenant,
        tenants = config.tenants().len(),
        "Configuration loaded"
    );

    let db = db::connect(&config)
        .await
        .context("failed to initialize database adapter")?;
    let registry = Arc::new(
        PluginRegistry::new()
            .with_settings(Arc::new(StoredPluginSettings::new(Arc::clone(&db)))),
    );
    let plugins = builtin_plugins(Arc::clone(&db));

    let Some(command) = cli.command else {
        let report = initialize_plugins(registry, db, &config, plugins).await?;
        for summary in &report.migrations {
            for (plugin, e) in summary.failures() {
                warn!(plugin = %plugin, tenant = %summary.tenant_id, code = %e.code, "{}", e.message);
            }
        }
        return Ok(report.is_clean());
    };

    register_plugins(&registry, &config, plugins);
    let runner = migration_runner(Arc::clone(&registry), Arc::clone(&db), &config);
    let tenant_or_default = |tenant: Option<String>| tenant.unwrap_or_else(|| config.default_tenant.clone());

    match command {
        Command::Migrate {
            tenant,
            plugin,
            json,
        } => {
            let tenants = match tenant {
                Some(t) => vec![t],
                None => config.tenants(),
            };
            cli::cmd_migrate(&runner, &tenants, plugin.as_deref(), json).await
        }
        Command::Plugin { command } => {
            match command {
                PluginCommand::List { tenant } => {
                    cli::cmd_plugin_list(&runner, &tenant_or_default(tenant)).await?;
                }
                PluginCommand::Enable { id, tenant, user } => {
                    let tenant = tenant_or_default(tenant);
                    cli::cmd_plugin_toggle(&registry, &id, true, &tenant, user.as_deref()).await?;
                }
                PluginCommand::Disable { id, tenant, user } => {
                    let tenant = tenant_or_default(tenant);
                    cli::cmd_plugin_toggle(&registry, &id, false, &tenant, user.as_deref()).await?;
                }
                PluginCommand::Revert { id, tenant } => {
                    cli::cmd_plugin_revert(&runner, &id, &tenant_or_default(tenant)).await?;
                }
            }
            Ok(true)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

//! Svelty CMS Kernel Library
//!
//! Plugin registry, per-tenant plugin state and the plugin migration runner.
//! The `svelty` binary wires these together for startup and administration.

pub mod adapter;
pub mod config;
pub mod db;
pub mod plugin;

pub use config::Config;

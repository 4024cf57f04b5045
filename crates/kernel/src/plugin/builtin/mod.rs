//! Plugins compiled into the kernel.

pub mod pagespeed;

use std::sync::Arc;

use super::definition::Plugin;
use crate::adapter::DatabaseAdapter;

/// Every compiled-in plugin, in registration order.
pub fn builtin_plugins(db: Arc<dyn DatabaseAdapter>) -> Vec<Plugin> {
    vec![pagespeed::plugin(db)]
}

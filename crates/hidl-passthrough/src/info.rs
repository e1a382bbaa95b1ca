//! Module metadata reported to the host.

use crate::config::VALID_MODARGS;

/// Module version from Cargo.toml
pub const MODULE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const MODULE_DESCRIPTION: &str = "Droid HIDL passthrough";

pub const MODULE_USAGE: &str =
    "module_id=<which droid hw module to load, default primary> helper=<spawn helper binary, default true>";

/// Description, version and argument usage of the module.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModuleInfo {
    pub description: &'static str,
    pub version: &'static str,
    pub usage: &'static str,
    pub valid_args: &'static [&'static str],
}

impl Default for ModuleInfo {
    fn default() -> Self {
        Self {
            description: MODULE_DESCRIPTION,
            version: MODULE_VERSION,
            usage: MODULE_USAGE,
            valid_args: VALID_MODARGS,
        }
    }
}

impl ModuleInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

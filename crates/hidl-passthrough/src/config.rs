//! Module configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::InitError;
use crate::helper::{CommandSpawner, HelperSpawner, default_helper_binary};
use crate::logging::LogLevel;
use crate::modargs::{ModArgs, ModArgsError};

pub const ARG_MODULE_ID: &str = "module_id";
pub const ARG_HELPER: &str = "helper";

/// Only these keys are accepted in module arguments.
pub const VALID_MODARGS: &[&str] = &[ARG_MODULE_ID, ARG_HELPER];

pub const DEFAULT_MODULE_ID: &str = "primary";

pub struct ModuleConfig {
    /// Hardware module to bind, as published by the card component.
    pub module_id: String,
    /// Whether to start the helper binary.
    pub helper: bool,
    pub helper_binary: PathBuf,
    /// Picks the severity helper output is forwarded at.
    pub log_level: LogLevel,
    pub spawner: Arc<dyn HelperSpawner>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_id: DEFAULT_MODULE_ID.to_string(),
            helper: true,
            helper_binary: default_helper_binary(),
            log_level: LogLevel::from_env(),
            spawner: Arc::new(CommandSpawner),
        }
    }
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the host's module argument string.
    pub fn from_args(args: Option<&str>) -> Result<Self, InitError> {
        let args = ModArgs::parse(args, VALID_MODARGS)?;
        let helper = match args.get_bool(ARG_HELPER) {
            Ok(helper) => helper.unwrap_or(true),
            Err(ModArgsError::InvalidBoolean { .. }) => return Err(InitError::InvalidHelperFlag),
            Err(e) => return Err(e.into()),
        };

        Ok(Self::new()
            .with_module_id(args.get_or(ARG_MODULE_ID, DEFAULT_MODULE_ID))
            .with_helper(helper))
    }

    pub fn with_module_id(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = module_id.into();
        self
    }

    pub fn with_helper(mut self, helper: bool) -> Self {
        self.helper = helper;
        self
    }

    pub fn with_helper_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.helper_binary = binary.into();
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn HelperSpawner>) -> Self {
        self.spawner = spawner;
        self
    }
}

impl std::fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("module_id", &self.module_id)
            .field("helper", &self.helper)
            .field("helper_binary", &self.helper_binary)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

//! Module tag → constructor map
//!
//! Every module a build supports is registered explicitly; there is no discovery.

use std::collections::BTreeMap;

use super::{Module, example, system};
use crate::config::ResolvedJobConfig;
use crate::error::ConfigError;

type CreateFn = fn(&serde_json::Value) -> Result<Box<dyn Module>, String>;

/// How to build one kind of module
#[derive(Clone, Copy)]
pub struct Creator {
    pub create: CreateFn,
}

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    creators: BTreeMap<String, Creator>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every module shipped in this crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("example", Creator { create: example::create });
        registry.register("system", Creator { create: system::create });
        registry
    }

    /// Register `creator` under `tag`, replacing a previous registration
    pub fn register(&mut self, tag: impl Into<String>, creator: Creator) {
        self.creators.insert(tag.into(), creator);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.creators.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }

    /// Build the module a job config asks for
    pub fn create(&self, config: &ResolvedJobConfig) -> Result<Box<dyn Module>, ConfigError> {
        let creator = self.creators.get(&config.module).ok_or_else(|| {
            ConfigError::UnknownModule { job: config.full_name(), module: config.module.clone() }
        })?;

        (creator.create)(&config.options)
            .map_err(|reason| ConfigError::ModuleOptions { job: config.full_name(), reason })
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.creators.keys()).finish()
    }
}

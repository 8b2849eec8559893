use std::collections::HashSet;

use anyhow::Context;
use tracing::{trace, warn};

use crate::error::ConfigError;

/// Top-level plugin configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PluginConfig {
    /// Name reported in the `plugin` field of every chart definition
    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,

    /// Lower bound applied to every job's `update_every`
    #[serde(default = "default_min_update_every")]
    pub min_update_every: u32,

    /// Length of one scheduler tick in seconds
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugin_name: default_plugin_name(),
            min_update_every: default_min_update_every(),
            tick_seconds: default_tick_seconds(),
            jobs: vec![],
        }
    }
}

/// Raw per-job configuration as it appears in the config file
///
/// Numeric fields are signed so that negative values make it to [`JobConfig::resolve`]
/// instead of failing the whole file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct JobConfig {
    pub module: String,
    pub name: Option<String>,
    #[serde(default = "default_update_every")]
    pub update_every: i64,
    #[serde(default)]
    pub autodetection_retry: i64,
    #[serde(default = "default_chart_cleanup")]
    pub chart_cleanup: i64,
    #[serde(default = "default_retries")]
    pub retries: i64,
    /// Module specific settings, handed to the module constructor untouched
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Validated job configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJobConfig {
    pub module: String,
    pub name: String,
    pub update_every: u32,
    pub autodetection_retry: u32,
    pub chart_cleanup: u32,
    pub retries: u32,
    pub options: serde_json::Value,
}

impl ResolvedJobConfig {
    /// Create a config for `module` with every setting at its default
    pub fn new(module: impl Into<String>) -> Self {
        let module = module.into();
        Self {
            name: module.clone(),
            module,
            update_every: 1,
            autodetection_retry: 0,
            chart_cleanup: 10,
            retries: 60,
            options: serde_json::Value::Null,
        }
    }

    /// `<module>` when the job is named after its module, `<module>_<name>` otherwise
    pub fn full_name(&self) -> String {
        full_name(&self.module, &self.name)
    }
}

pub fn full_name(module: &str, name: &str) -> String {
    if module == name {
        module.to_string()
    } else {
        format!("{module}_{name}")
    }
}

impl JobConfig {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: None,
            update_every: default_update_every(),
            autodetection_retry: 0,
            chart_cleanup: default_chart_cleanup(),
            retries: default_retries(),
            options: serde_json::Value::Null,
        }
    }

    pub fn job_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.module)
    }

    pub fn resolve(&self, min_update_every: u32) -> Result<ResolvedJobConfig, ConfigError> {
        let job = full_name(&self.module, self.job_name());

        let update_every = bounded(&job, "update_every", self.update_every, 1, ">= 1")?;
        let autodetection_retry =
            bounded(&job, "autodetection_retry", self.autodetection_retry, 0, ">= 0")?;
        let chart_cleanup = bounded(&job, "chart_cleanup", self.chart_cleanup, 0, ">= 0")?;
        let retries = bounded(&job, "retries", self.retries, 0, ">= 0")?;

        let update_every = if update_every < min_update_every {
            warn!(
                job = %job,
                update_every,
                min_update_every,
                "raising update_every to the plugin minimum"
            );
            min_update_every
        } else {
            update_every
        };

        Ok(ResolvedJobConfig {
            module: self.module.clone(),
            name: self.job_name().to_string(),
            update_every,
            autodetection_retry,
            chart_cleanup,
            retries,
            options: self.options.clone(),
        })
    }
}

fn bounded(
    job: &str,
    field: &'static str,
    value: i64,
    min: i64,
    expected: &'static str,
) -> Result<u32, ConfigError> {
    if value < min {
        return Err(ConfigError::InvalidValue { job: job.to_string(), field, value, expected });
    }

    u32::try_from(value).map_err(|_| ConfigError::InvalidValue {
        job: job.to_string(),
        field,
        value,
        expected: "<= u32::MAX",
    })
}

impl PluginConfig {
    /// Validate every job
    ///
    /// Invalid jobs are returned as errors next to the valid ones, so a single bad entry
    /// never prevents the others from starting.
    pub fn resolve_jobs(&self) -> (Vec<ResolvedJobConfig>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut resolved = vec![];
        let mut errors = vec![];

        for job in &self.jobs {
            match job.resolve(self.min_update_every.max(1)) {
                Ok(config) => {
                    if seen.insert(config.full_name()) {
                        resolved.push(config);
                    } else {
                        errors.push(ConfigError::DuplicateJob(config.full_name()));
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        (resolved, errors)
    }
}

fn default_plugin_name() -> String {
    String::from("orchestrator")
}

fn default_min_update_every() -> u32 {
    1
}

fn default_tick_seconds() -> u64 {
    1
}

fn default_update_every() -> i64 {
    1
}

fn default_chart_cleanup() -> i64 {
    10
}

fn default_retries() -> i64 {
    60
}

pub fn read_config_file(path: &str) -> anyhow::Result<PluginConfig> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

//! Configuration file support (`.ecotest.toml`) in a workspace/registry
//! root, merged with CLI overrides the way a project-local config and a
//! one-off flag are expected to compose: the CLI wins when both are set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use ecotest_retry::RetryPolicy;

use crate::types::RunOptions;

pub const CONFIG_FILE: &str = ".ecotest.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EcotestConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_worker_count")]
    pub workers: usize,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub per_package_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { workers: default_worker_count(), per_package_timeout: default_timeout() }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { policy: RetryPolicy::Default }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".ecotest")
}

/// CLI-supplied overrides; `None`/`Some` mirrors the config file's optional
/// fields so `build_run_options` can apply "CLI wins when set" uniformly.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub workers: Option<usize>,
    pub runtime_version: Option<String>,
    pub per_package_timeout: Option<Duration>,
    pub log_dir: Option<PathBuf>,
}

impl EcotestConfig {
    /// Search `root` for `.ecotest.toml`. Returns `Ok(None)` if absent — an
    /// absent config is not an error, unlike a present-but-malformed one.
    pub fn load_from_root(root: &Path) -> Result<Option<Self>> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: EcotestConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            bail!("scheduler.workers must be greater than 0");
        }
        if self.scheduler.per_package_timeout.is_zero() {
            bail!("scheduler.per_package_timeout must be greater than 0");
        }
        Ok(())
    }

    /// Merge this config (or the defaults, if there was none) with CLI
    /// overrides into the [`RunOptions`] the scheduler actually runs with.
    pub fn build_run_options(&self, cli: CliOverrides, runtime_version: String) -> RunOptions {
        RunOptions {
            worker_count: cli.workers.unwrap_or(self.scheduler.workers),
            runtime_version: cli.runtime_version.unwrap_or(runtime_version),
            log_dir: cli.log_dir.unwrap_or_else(|| self.log.dir.clone()),
            per_package_timeout: Some(cli.per_package_timeout.unwrap_or(self.scheduler.per_package_timeout)),
            install_retry: self.retry.policy.to_config(),
        }
    }
}

/// The default `.ecotest.toml` contents written by `ecotest init`, kept in
/// sync with [`EcotestConfig::default`].
pub fn default_toml_template() -> String {
    toml::to_string_pretty(&EcotestConfig::default()).expect("default config always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_config_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EcotestConfig::load_from_root(dir.path()).unwrap().is_none());
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not valid toml [[[").unwrap();
        assert!(EcotestConfig::load_from_root(dir.path()).is_err());
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut config = EcotestConfig::default();
        config.scheduler.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_overrides_win_over_config_file() {
        let config = EcotestConfig::default();
        let cli = CliOverrides { workers: Some(1), ..Default::default() };
        let opts = config.build_run_options(cli, "1.0.0".to_string());
        assert_eq!(opts.worker_count, 1);
    }

    #[test]
    fn missing_cli_override_falls_back_to_config() {
        let mut config = EcotestConfig::default();
        config.scheduler.workers = 7;
        let opts = config.build_run_options(CliOverrides::default(), "1.0.0".to_string());
        assert_eq!(opts.worker_count, 7);
    }

    #[test]
    fn default_template_round_trips() {
        let template = default_toml_template();
        let parsed: EcotestConfig = toml::from_str(&template).unwrap();
        assert_eq!(parsed.scheduler.workers, EcotestConfig::default().scheduler.workers);
    }
}

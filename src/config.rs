//! Run configuration: an optional `cofactor.toml` merged under the command-line
//! flags.
//!
//! Precedence is flag > file > built-in default. Every field in the file is
//! optional, so a file may set only what it cares about:
//!
//! ```toml
//! workers = 16
//! mr_rounds = 25
//! status_interval_secs = 30
//! early_stop_slack = 64
//! output_path = "factorize_output.txt"
//! ledger_path = "cofactor.ledger"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::divisor::{default_pool_size, StopPolicy};
use crate::primality::DEFAULT_MR_ROUNDS;

pub const DEFAULT_CONFIG_FILE: &str = "cofactor.toml";
pub const DEFAULT_OUTPUT_FILE: &str = "factorize_output.txt";
pub const DEFAULT_LEDGER_FILE: &str = "cofactor.ledger";
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;
/// Slack per worker when early stop is requested without an explicit value.
pub const SLACK_PER_WORKER: u64 = 4;

/// Contents of the TOML file. Absent keys fall through to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub workers: Option<usize>,
    pub mr_rounds: Option<u32>,
    pub status_interval_secs: Option<u64>,
    /// Extra candidates dispatched after the first hit. Unset means exact search.
    pub early_stop_slack: Option<u64>,
    pub output_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

/// Values given on the command line, each overriding the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub mr_rounds: Option<u32>,
    pub status_interval_secs: Option<u64>,
    pub early_stop_slack: Option<u64>,
    pub output_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorizeConfig {
    pub workers: usize,
    pub mr_rounds: u32,
    pub status_interval_secs: u64,
    pub early_stop_slack: Option<u64>,
    pub output_path: PathBuf,
    pub ledger_path: PathBuf,
}

impl Default for FactorizeConfig {
    fn default() -> Self {
        FactorizeConfig {
            workers: default_pool_size(),
            mr_rounds: DEFAULT_MR_ROUNDS,
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
            early_stop_slack: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_FILE),
        }
    }
}

impl FactorizeConfig {
    /// Merge file values and flag overrides over the defaults, then validate.
    pub fn resolve(file: FileConfig, flags: Overrides) -> Result<Self> {
        let defaults = FactorizeConfig::default();
        let config = FactorizeConfig {
            workers: flags.workers.or(file.workers).unwrap_or(defaults.workers),
            mr_rounds: flags
                .mr_rounds
                .or(file.mr_rounds)
                .unwrap_or(defaults.mr_rounds),
            status_interval_secs: flags
                .status_interval_secs
                .or(file.status_interval_secs)
                .unwrap_or(defaults.status_interval_secs),
            early_stop_slack: flags.early_stop_slack.or(file.early_stop_slack),
            output_path: flags
                .output_path
                .or(file.output_path)
                .unwrap_or(defaults.output_path),
            ledger_path: flags
                .ledger_path
                .or(file.ledger_path)
                .unwrap_or(defaults.ledger_path),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.mr_rounds == 0 {
            bail!("mr_rounds must be at least 1");
        }
        if self.status_interval_secs == 0 {
            bail!("status_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn stop_policy(&self) -> StopPolicy {
        match self.early_stop_slack {
            Some(slack) => StopPolicy::Slack(slack),
            None => StopPolicy::Exact,
        }
    }
}

/// Parse a config file body.
pub fn parse_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content)?;
    Ok(config)
}

/// Load the config file. An explicit path must exist; the default path is
/// optional and silently skipped when missing.
pub fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    if !path.exists() {
        if required {
            bail!("config file {} not found", path.display());
        }
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse_config(&content).with_context(|| format!("parsing config file {}", path.display()))
}

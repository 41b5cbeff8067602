use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reseller_quota_ledger::LedgerConfig;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub data_dir: PathBuf,
    pub sweep_interval_secs: u64,
    pub sweep_on_startup: bool,
    pub warning_threshold_percent: f64,
    pub log_level: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/quota"),
            sweep_interval_secs: 300,
            sweep_on_startup: true,
            warning_threshold_percent: 90.0,
            log_level: "info".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(dir) = env::var("QUOTA_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(interval) = env::var("SWEEP_INTERVAL_SECS") {
            cfg.sweep_interval_secs = interval
                .parse()
                .context("SWEEP_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(flag) = env::var("SWEEP_ON_STARTUP") {
            cfg.sweep_on_startup = parse_bool(&flag)
                .with_context(|| format!("SWEEP_ON_STARTUP is invalid: {flag}"))?;
        }
        if let Ok(threshold) = env::var("WARNING_THRESHOLD_PERCENT") {
            cfg.warning_threshold_percent = threshold
                .parse()
                .context("WARNING_THRESHOLD_PERCENT must be a floating point number")?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_directory(&self.data_dir)?;

        if self.sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than zero");
        }
        if !(self.warning_threshold_percent > 0.0 && self.warning_threshold_percent <= 100.0) {
            anyhow::bail!("WARNING_THRESHOLD_PERCENT must be within (0, 100]");
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            warning_threshold_percent: self.warning_threshold_percent,
        }
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}

use std::{path::Path, sync::LazyLock, time::Duration};

use anyhow::Context as _;
use codec_bus::{exchange::ExchangeConfig, pipeline::PipelineSettings};
use serde::{Deserialize, Serialize};

use crate::media::types::InputConfig;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "MEDIACODEC_CONFIG";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    /// Bound on each acquire call, in milliseconds
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub input_slots: usize,
    pub output_slots: usize,
    pub input_capacity: usize,
    pub output_capacity: usize,
    /// Log every available frame
    pub log_frames: bool,
    /// Also forward frames to a raw frame stream
    pub raw_frames: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let exchange = ExchangeConfig::default();
        let settings = PipelineSettings::default();
        Self {
            input: InputConfig::default(),
            timeout_ms: settings.timeout.as_millis() as u64,
            max_retries: settings.max_retries,
            input_slots: exchange.input_slots,
            output_slots: exchange.output_slots,
            input_capacity: exchange.input_capacity,
            output_capacity: exchange.output_capacity,
            log_frames: true,
            raw_frames: false,
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("parse config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Reads the file named by `MEDIACODEC_CONFIG`, or the defaults if unset.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn exchange(&self) -> ExchangeConfig {
        ExchangeConfig {
            input_slots: self.input_slots.max(1),
            output_slots: self.output_slots.max(1),
            input_capacity: self.input_capacity,
            output_capacity: self.output_capacity,
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
        }
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(|| {
        AppConfig::load().unwrap_or_else(|e| {
            log::warn!("using default config: {:#}", e);
            AppConfig::default()
        })
    });
    &CONFIG
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

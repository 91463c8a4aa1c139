//! Configuration management for toolbar-hammer
//!
//! Handles TOML config file parsing. Every key is optional; a missing
//! default config file means defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::WindowMode;
use crate::coordinator::{CoordinatorSettings, RetryPolicy};
use crate::error::{HammerError, Result};
use crate::toolbar::ToolbarPattern;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_target_app")]
    pub target_app: String,

    #[serde(default)]
    pub window_mode: WindowMode,

    #[serde(default)]
    pub toolbar: ToolbarPattern,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub poll_interval_ms: u64,
}

fn default_target_app() -> String {
    "MarginNote 4".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_app: default_target_app(),
            window_mode: WindowMode::default(),
            toolbar: ToolbarPattern::default(),
            retry: RetryConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        RetryConfig {
            interval_ms: policy.interval.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            poll_interval_ms: 1000,
        }
    }
}

pub fn config_path() -> PathBuf {
    let mut path = dirs::config_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("toolbar-hammer");
    path.push("config.toml");
    path
}

/// Load the config from `path`, or from the default location when `None`.
///
/// An explicit path must exist; the default one may be absent.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (config_path(), false),
    };

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(HammerError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    let config = parse(&content)
        .map_err(|e| HammerError::Config(format!("{} ({})", e, path.display())))?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn parse(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| HammerError::Config(format!("Invalid config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.target_app.trim().is_empty() {
            return Err(HammerError::Config("target_app must not be empty".to_string()));
        }

        let toolbar = &self.toolbar;
        if toolbar.button_width <= 0.0 || toolbar.button_height <= 0.0 {
            return Err(HammerError::Config(
                "toolbar button size must be positive".to_string(),
            ));
        }
        if toolbar.tolerance <= 0.0 {
            return Err(HammerError::Config(
                "toolbar tolerance must be positive".to_string(),
            ));
        }
        if toolbar.group_role.is_empty() || toolbar.button_role.is_empty() {
            return Err(HammerError::Config("toolbar roles must not be empty".to_string()));
        }

        if self.retry.interval_ms == 0 {
            return Err(HammerError::Config(
                "retry interval_ms must be positive".to_string(),
            ));
        }
        if self.lifecycle.poll_interval_ms == 0 {
            return Err(HammerError::Config(
                "lifecycle poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle.poll_interval_ms)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            target_app: self.target_app.clone(),
            window_mode: self.window_mode,
            toolbar: self.toolbar.clone(),
            retry: RetryPolicy {
                interval: Duration::from_millis(self.retry.interval_ms),
                max_attempts: self.retry.max_attempts,
            },
        }
    }
}

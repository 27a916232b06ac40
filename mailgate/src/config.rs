use std::path::{Path, PathBuf};

use mailgate_common::logging::LoggingConfig;
use mailgate_delivery::DeliveryConfig;
use mailgate_smtp::ListenerConfig;
use mailgate_webhook::WebhookConfig;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "MAILGATE_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./mailgate.config.ron", "/etc/mailgate/mailgate.config.ron"];

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub smtp: ListenerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Loads the configuration from `explicit` if given, otherwise from the
    /// first file found by [`find_config_file`].
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(PathBuf, Self)> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => find_config_file(
                std::env::var(CONFIG_ENV).ok(),
                &DEFAULT_PATHS.map(PathBuf::from),
            )?,
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        let config = Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))?;

        Ok((path, config))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `MAILGATE_CONFIG` environment variable
/// 2. ./mailgate.config.ron (current working directory)
/// 3. /etc/mailgate/mailgate.config.ron (system-wide config)
pub fn find_config_file(env_path: Option<String>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// `load_config` module: reads the optional YAML config file and applies environment overrides.
///
/// The file never holds secrets. Credentials come from the environment or a
/// token file (see [`crate::credentials`]); everything else has a default, so
/// the tool runs without any config file at all.
///
/// Accepted shape:
///
/// ```yaml
/// pipeline:
///   concurrency: 10
///   max_batch_size: 50
///   retry:
///     max_attempts: 10
///     initial_delay_ms: 100
/// api:
///   base_url: https://photoslibrary.googleapis.com
///   token_file: ./token.json
/// ```
use anyhow::Result;
use gphotos_upload_core::PipelineConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::upload::DEFAULT_BASE_URL;

/// Overrides `api.base_url`, mostly for pointing the tool at a test server.
pub const BASE_URL_ENV: &str = "GPHOTOS_API_BASE_URL";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    pub api: ApiSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub token_file: Option<PathBuf>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_file: None,
        }
    }
}

impl CliConfig {
    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Self {
        let mut config = CliConfig::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            info!(base_url = %base_url, "{BASE_URL_ENV} found in env, overriding api.base_url");
            self.api.base_url = base_url;
        }
    }
}

/// Loads a YAML config file and applies environment overrides on top.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config.apply_env();
    config.pipeline.trace_loaded();
    Ok(config)
}

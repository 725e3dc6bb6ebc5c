//! Session controller configuration: YAML file with `${ENV:default}`
//! expansion, the same loader the teacher server uses for its pattern and
//! router configs.

pub mod loader;

use serde::{Deserialize, Serialize};

pub use loader::{deep_merge, load_yaml_config, load_yaml_file};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_concurrency() -> usize {
    scheduler::DEFAULT_CONCURRENCY
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Upstream model gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
}

/// Upstream search provider connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Complete session controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    pub gateway: GatewayConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Loads from `CONFIG_PATH`, falling back to `./config/session.yaml`
    /// and `../config/session.yaml`, mirroring the teacher's search order
    /// for `orchestrator-server.toml`.
    pub fn load() -> crate::Result<Config> {
        if let Ok(path) = std::env::var("CONFIG_PATH") {
            return load_yaml_config(path).map_err(|e| crate::OrchestratorError::Config(e.to_string()));
        }
        for candidate in ["config/session.yaml", "../config/session.yaml"] {
            let path = std::path::Path::new(candidate);
            if path.exists() {
                return load_yaml_config(path).map_err(|e| crate::OrchestratorError::Config(e.to_string()));
            }
        }
        Err(crate::OrchestratorError::Config(
            "no configuration file found; set CONFIG_PATH or place config/session.yaml".into(),
        ))
    }
}

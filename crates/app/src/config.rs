use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional TOML config merged over built-in defaults; CLI flags win over
/// both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub grace_period_secs: Option<u64>,
    pub confidence_threshold: Option<f32>,
    pub worker_cmd: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let body = std::fs::read_to_string(path)?;
        let config = toml::from_str(&body)?;
        Ok(config)
    }
}

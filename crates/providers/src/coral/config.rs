use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::warn;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CoralFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub stream_max_retries: Option<u32>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct CoralConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub user_id: Option<String>,
    pub model: Option<String>,
    /// Limit for connecting and receiving response headers. The body is
    /// bounded by `stream_idle_timeout` instead.
    pub timeout: Duration,
    pub stream_max_retries: u32,
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for CoralConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "http://localhost:8000".to_string(),
            user_id: None,
            model: None,
            timeout: Duration::from_millis(30_000),
            stream_max_retries: 3,
            stream_idle_timeout: Duration::from_millis(120_000),
            proxy: None,
        }
    }
}

impl CoralConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let file_cfg = match Self::config_path() {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(&path)?;
                match toml::from_str::<CoralFileConfig>(&raw) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(target: "providers::coral", "ignoring {}: {}", path.display(), e);
                        CoralFileConfig::default()
                    }
                }
            }
            _ => CoralFileConfig::default(),
        };
        Ok(Self::merge(file_cfg, |k| env::var(k).ok()))
    }

    /// Environment wins over the file, the file over defaults.
    fn merge(file_cfg: CoralFileConfig, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = CoralConfig::default();
        if let Some(u) = file_cfg.base_url {
            cfg.base_url = u;
        }
        if let Some(u) = var("CORAL_API_URL") {
            cfg.base_url = u;
        }
        cfg.api_key = var("CORAL_API_KEY").filter(|k| !k.trim().is_empty());
        cfg.user_id = var("CORAL_USER_ID").or(file_cfg.user_id);
        cfg.model = file_cfg.model;
        if let Some(t) = file_cfg.timeout_ms {
            cfg.timeout = Duration::from_millis(t);
        }
        if let Some(r) = file_cfg.stream_max_retries {
            cfg.stream_max_retries = r;
        }
        if let Some(idle) = file_cfg.stream_idle_timeout_ms {
            cfg.stream_idle_timeout = Duration::from_millis(idle);
        }
        cfg.proxy = var("HTTPS_PROXY").or_else(|| var("HTTP_PROXY"));
        cfg
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".coral").join("config.toml")
        } else {
            base.config_dir().join("coral").join("config.toml")
        };
        Some(p)
    }
}

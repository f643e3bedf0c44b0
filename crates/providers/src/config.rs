use directories::BaseDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::warn;

/// On-disk settings, all optional. Environment variables win over the file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileConfig {
    pub relay: Option<RelayFileConfig>,
    pub backend: Option<BackendFileConfig>,
    pub pod: Option<PodFileConfig>,
    pub client: Option<ClientFileConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ensure_pod_on_turn: Option<bool>,
    pub stream_idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PodFileConfig {
    pub api_url: Option<String>,
    pub pod_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Reads `path`, or the default location when `None`. A missing file
    /// yields defaults; an unreadable one is logged and ignored.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Some(p) => p,
                None => return Self::default(),
            },
        };
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text).unwrap_or_else(|e| {
                warn!(target: "providers::config", "ignoring {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!(target: "providers::config", "cannot read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

pub fn config_path() -> Option<PathBuf> {
    let base = BaseDirs::new()?;
    let p = if cfg!(target_os = "windows") {
        base.home_dir().join(".chat-relay").join("config.toml")
    } else {
        base.config_dir().join("chat-relay").join("config.toml")
    };
    Some(p)
}

pub fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn env_u64(name: &str) -> Option<u64> {
    let raw = env_string(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(target: "providers::config", "{} is not a number: {:?}", name, raw);
            None
        }
    }
}

pub fn env_bool(name: &str) -> Option<bool> {
    let raw = env_string(name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(target: "providers::config", "{} is not a boolean: {:?}", name, raw);
            None
        }
    }
}

/// Rejects anything that is not an absolute http(s) URL and strips a
/// trailing slash.
pub fn normalize_base_url(raw: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("invalid url {:?}: {}", raw, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("unsupported url scheme {:?} in {:?}", parsed.scheme(), raw);
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

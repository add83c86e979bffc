use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::persist::{self, PersistError};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 600;
pub const MAX_SERVER_URL_LEN: usize = 2048;
pub const CONFIG_DIR_ENV: &str = "QFIELDSYNC_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: Url,
    pub request_timeout: Duration,
    pub config_dir: PathBuf,
}

impl ClientConfig {
    pub fn preferences_path(&self) -> PathBuf {
        self.config_dir.join(crate::preferences::PREFERENCES_FILE_NAME)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedClientConfig {
    pub server_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for SavedClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Values given on the command line; `None` falls back to the saved config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Please fix the following:\n\n- {}", .0.join("\n- "))]
    Invalid(Vec<String>),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

pub fn validate_saved_config(cfg: &SavedClientConfig) -> Result<Url, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut parsed = None;

    let server_url = cfg.server_url.trim();
    if server_url.is_empty() {
        errors.push("Server URL is required.".to_owned());
    } else if server_url.len() > MAX_SERVER_URL_LEN {
        errors.push(format!(
            "Server URL is too long ({} > {} chars).",
            server_url.len(),
            MAX_SERVER_URL_LEN
        ));
    } else {
        match Url::parse(server_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => parsed = Some(url),
            Ok(_) => errors.push("Server URL must start with http:// or https://.".to_owned()),
            Err(err) => errors.push(format!("Server URL is invalid: {err}")),
        }
    }

    if cfg.timeout_secs == 0 || cfg.timeout_secs > MAX_TIMEOUT_SECS {
        errors.push(format!(
            "Request timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds."
        ));
    }

    match parsed {
        Some(url) if errors.is_empty() => Ok(url),
        _ => Err(ConfigError::Invalid(errors)),
    }
}

/// Config directory: explicit override, then `QFIELDSYNC_CONFIG_DIR`, then
/// the platform config directory.
pub fn config_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_owned();
    }
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qfieldsync")
}

pub fn load_saved_config(dir: &Path) -> Result<Option<SavedClientConfig>, ConfigError> {
    let cfg: Option<SavedClientConfig> = persist::load_json(&dir.join(CONFIG_FILE_NAME))?;
    if let Some(cfg) = &cfg {
        validate_saved_config(cfg)?;
    }
    Ok(cfg)
}

pub fn save_saved_config(dir: &Path, cfg: &SavedClientConfig) -> Result<(), ConfigError> {
    validate_saved_config(cfg)?;
    persist::save_json_with_retry(&dir.join(CONFIG_FILE_NAME), cfg)?;
    Ok(())
}

/// Merges command-line overrides over the saved config and defaults.
///
/// An explicitly given server URL is saved for later runs.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ClientConfig, ConfigError> {
    let dir = config_dir(overrides.config_dir.as_deref());

    let saved = match load_saved_config(&dir) {
        Ok(saved) => saved,
        Err(err) => {
            warn!("saved config invalid; using defaults: {}", err);
            None
        }
    };

    let mut cfg = saved.clone().unwrap_or_default();
    if let Some(server_url) = &overrides.server_url {
        cfg.server_url = server_url.trim().to_owned();
    }
    if let Some(timeout_secs) = overrides.timeout_secs {
        cfg.timeout_secs = timeout_secs;
    }

    let server_url = validate_saved_config(&cfg)?;

    if overrides.server_url.is_some() && saved.as_ref() != Some(&cfg) {
        if let Err(err) = save_saved_config(&dir, &cfg) {
            warn!("failed to save config: {}", err);
        }
    }

    Ok(ClientConfig {
        server_url,
        request_timeout: Duration::from_secs(cfg.timeout_secs),
        config_dir: dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme_and_zero_timeout() {
        let cfg = SavedClientConfig {
            server_url: "ws://cloud.example".to_owned(),
            timeout_secs: 0,
        };
        let err = validate_saved_config(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("http://"));
                assert!(errors[1].contains("timeout"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn override_wins_and_is_saved() {
        let dir = tempfile::tempdir().expect("create tempdir");
        save_saved_config(
            dir.path(),
            &SavedClientConfig {
                server_url: "https://old.example".to_owned(),
                timeout_secs: 12,
            },
        )
        .expect("save config");

        let resolved = resolve_config(&ConfigOverrides {
            server_url: Some("https://new.example/".to_owned()),
            timeout_secs: None,
            config_dir: Some(dir.path().to_owned()),
        })
        .expect("resolve config");
        assert_eq!(resolved.server_url.as_str(), "https://new.example/");
        assert_eq!(resolved.request_timeout, Duration::from_secs(12));

        let saved = load_saved_config(dir.path()).unwrap().unwrap();
        assert_eq!(saved.server_url, "https://new.example/");
    }

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let resolved = resolve_config(&ConfigOverrides {
            config_dir: Some(dir.path().to_owned()),
            ..ConfigOverrides::default()
        })
        .expect("resolve config");
        assert_eq!(resolved.server_url.as_str(), "http://127.0.0.1:8000/");
        assert_eq!(
            resolved.request_timeout,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
        assert!(!dir.path().join("config.json").exists());
    }
}

use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub base_uri: String,
    pub submit_lock: bool,
    pub session_timeout_secs: u64,
    pub development_mode: bool,
    pub is_mobile: bool,
    pub storage_url: String,
    /// Template roots; later roots take precedence.
    pub templates: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_uri: "http://localhost:8080/server/".into(),
            submit_lock: false,
            session_timeout_secs: 1800,
            development_mode: false,
            is_mobile: false,
            storage_url: "sqlite://./data/offline.db".into(),
            templates: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    base_uri: Option<String>,
    submit_lock: Option<bool>,
    session_timeout_secs: Option<u64>,
    development_mode: Option<bool>,
    is_mobile: Option<bool>,
    storage_url: Option<String>,
    templates: Option<Vec<String>>,
}

/// Defaults, then the config file (when present), then `APP__*` environment
/// variables.
pub fn load_configuration(path: Option<&Path>) -> anyhow::Result<Configuration> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let mut configuration = Configuration::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        configuration = apply_file(configuration, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
    }

    Ok(apply_env(configuration, |name| std::env::var(name).ok()))
}

fn apply_file(mut configuration: Configuration, raw: &str) -> anyhow::Result<Configuration> {
    let file: ConfigFile = toml::from_str(raw)?;
    if let Some(v) = file.base_uri {
        configuration.base_uri = v;
    }
    if let Some(v) = file.submit_lock {
        configuration.submit_lock = v;
    }
    if let Some(v) = file.session_timeout_secs {
        configuration.session_timeout_secs = v;
    }
    if let Some(v) = file.development_mode {
        configuration.development_mode = v;
    }
    if let Some(v) = file.is_mobile {
        configuration.is_mobile = v;
    }
    if let Some(v) = file.storage_url {
        configuration.storage_url = v;
    }
    if let Some(v) = file.templates {
        configuration.templates = v;
    }
    Ok(configuration)
}

fn apply_env<F>(mut configuration: Configuration, lookup: F) -> Configuration
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("APP__BASE_URI") {
        configuration.base_uri = v;
    }
    if let Some(v) = lookup("APP__SUBMIT_LOCK").and_then(|v| parse_flag(&v)) {
        configuration.submit_lock = v;
    }
    if let Some(v) = lookup("APP__SESSION_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
        configuration.session_timeout_secs = v;
    }
    if let Some(v) = lookup("APP__DEVELOPMENT_MODE").and_then(|v| parse_flag(&v)) {
        configuration.development_mode = v;
    }
    if let Some(v) = lookup("APP__IS_MOBILE").and_then(|v| parse_flag(&v)) {
        configuration.is_mobile = v;
    }
    if let Some(v) = lookup("APP__STORAGE_URL") {
        configuration.storage_url = v;
    }
    configuration
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Turns plain file paths into sqlite urls; `memory` selects the in-process
/// store and is returned unchanged.
pub fn normalize_storage_url(raw: &str) -> String {
    let raw = raw.trim();

    if raw.is_empty() {
        return Configuration::default().storage_url;
    }

    if raw == "memory" || raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }

    if let Some(path) = raw.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw.replace('\\', "/"))
}

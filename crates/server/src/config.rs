use std::fs;

use anyhow::Context;
use shared::protocol::{DEFAULT_GEMINI_API_BASE, DEFAULT_GEMINI_MODEL};
use url::Url;

const SETTINGS_FILE: &str = "relay.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub relay_bind: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_bind: "127.0.0.1:8787".into(),
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.into(),
            gemini_api_base: DEFAULT_GEMINI_API_BASE.into(),
            max_body_bytes: 64 * 1024,
        }
    }
}

impl Settings {
    /// Upstream base URL, always with a trailing slash so model paths join
    /// underneath it.
    pub fn api_base_url(&self) -> anyhow::Result<Url> {
        let raw = self.gemini_api_base.trim();
        let with_slash = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        Url::parse(&with_slash)
            .with_context(|| format!("invalid upstream api base '{}'", self.gemini_api_base))
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file, then environment variables. Later
/// sources win; the `APP__` spelling wins over the short one.
pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(file_cfg) = file_contents.and_then(|raw| raw.parse::<toml::Table>().ok()) {
        if let Some(v) = file_string(&file_cfg, "bind_addr") {
            settings.relay_bind = v;
        }
        if let Some(v) = file_string(&file_cfg, "gemini_model") {
            settings.gemini_model = v;
        }
        if let Some(v) = file_string(&file_cfg, "gemini_api_base") {
            settings.gemini_api_base = v;
        }
        if let Some(parsed) =
            file_string(&file_cfg, "max_body_bytes").and_then(|v| v.parse::<usize>().ok())
        {
            settings.max_body_bytes = parsed;
        }
    }

    if let Some(v) = env("RELAY_BIND") {
        settings.relay_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.relay_bind = v;
    }

    if let Some(v) = env("GEMINI_API_KEY") {
        settings.gemini_api_key = Some(v);
    }
    if let Some(v) = env("APP__GEMINI_API_KEY") {
        settings.gemini_api_key = Some(v);
    }
    settings.gemini_api_key = settings
        .gemini_api_key
        .filter(|key| !key.trim().is_empty());

    if let Some(v) = env("GEMINI_MODEL") {
        settings.gemini_model = v;
    }
    if let Some(v) = env("APP__GEMINI_MODEL") {
        settings.gemini_model = v;
    }

    if let Some(v) = env("GEMINI_API_BASE") {
        settings.gemini_api_base = v;
    }
    if let Some(v) = env("APP__GEMINI_API_BASE") {
        settings.gemini_api_base = v;
    }

    if let Some(v) = env("APP__MAX_BODY_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_body_bytes = parsed;
        }
    }

    settings
}

/// Accepts both quoted and bare scalar values.
fn file_string(table: &toml::Table, key: &str) -> Option<String> {
    match table.get(key)? {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Integer(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

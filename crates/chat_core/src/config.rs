use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths::config_json_path;

pub const DEFAULT_API_BASE: &str = "http://localhost:2024";
pub const DEFAULT_ASSISTANT_ID: &str = "agent";
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub http_proxy_auth: Option<ProxyAuth>,
    #[serde(default)]
    pub https_proxy_auth: Option<ProxyAuth>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub assistant_id: Option<String>,
    /// Sent with every run request, after the defaults.
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    /// Reject untyped `data:` lines instead of inferring their event type.
    #[serde(default)]
    pub strict_framing: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

const CONFIG_FILE_PATH: &str = "config.toml";

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load from the user config file, then `./config.toml`, then apply
    /// environment overrides.
    pub fn new() -> Self {
        let mut config = Self::load_from(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Built-in defaults with no file or environment input.
    pub fn empty() -> Self {
        Config {
            http_proxy: String::new(),
            https_proxy: String::new(),
            http_proxy_auth: None,
            https_proxy_auth: None,
            api_key: None,
            api_base: None,
            assistant_id: None,
            extra_headers: BTreeMap::new(),
            strict_framing: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// JSON file wins over TOML file; unreadable or invalid files are skipped.
    pub fn load_from(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match std::fs::read_to_string(json_path) {
                Ok(content) => match serde_json::from_str::<Config>(&content) {
                    Ok(file_config) => return file_config,
                    Err(err) => log::warn!("Failed to parse {}: {}", json_path.display(), err),
                },
                Err(err) => log::warn!("Failed to read {}: {}", json_path.display(), err),
            }
        }

        if toml_path.exists() {
            match std::fs::read_to_string(toml_path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(file_config) => return file_config,
                    Err(err) => log::warn!("Failed to parse {}: {}", toml_path.display(), err),
                },
                Err(err) => log::warn!("Failed to read {}: {}", toml_path.display(), err),
            }
        }

        Self::empty()
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(http_proxy) = lookup("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = lookup("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(api_key) = lookup("API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(api_base) = lookup("API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Some(assistant_id) = lookup("ASSISTANT_ID") {
            self.assistant_id = Some(assistant_id);
        }
        if let Some(strict) = lookup("GRAPH_CHAT_STRICT_FRAMING") {
            self.strict_framing = parse_bool_env(&strict);
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .map(|base| base.trim_end_matches('/'))
            .unwrap_or(DEFAULT_API_BASE)
    }

    pub fn assistant_id(&self) -> &str {
        self.assistant_id.as_deref().unwrap_or(DEFAULT_ASSISTANT_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_bool_env_true_values() {
        for value in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert!(parse_bool_env(value), "value {value:?} should be true");
        }
    }

    #[test]
    fn parse_bool_env_false_values() {
        for value in ["0", "false", "no", "off", "", "  "] {
            assert!(!parse_bool_env(value), "value {value:?} should be false");
        }
    }

    #[test]
    fn load_from_prefers_json_over_toml() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&json_path, r#"{"api_base": "http://json:1", "assistant_id": "a1"}"#)
            .unwrap();
        std::fs::write(&toml_path, "api_base = \"http://toml:2\"\n").unwrap();

        let config = Config::load_from(&json_path, &toml_path);
        assert_eq!(config.api_base(), "http://json:1");
        assert_eq!(config.assistant_id(), "a1");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn load_from_falls_back_to_toml_when_json_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&json_path, "{not json").unwrap();
        std::fs::write(
            &toml_path,
            "api_base = \"http://toml:2/\"\nstrict_framing = true\n\n[extra_headers]\nx-tenant = \"acme\"\n",
        )
        .unwrap();

        let config = Config::load_from(&json_path, &toml_path);
        assert_eq!(config.api_base(), "http://toml:2");
        assert!(config.strict_framing);
        assert_eq!(config.extra_headers.get("x-tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn load_from_missing_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("a.json"), &dir.path().join("b.toml"));

        assert_eq!(config.api_base(), DEFAULT_API_BASE);
        assert_eq!(config.assistant_id(), DEFAULT_ASSISTANT_ID);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("API_KEY", "secret"),
            ("API_BASE", "http://env:3"),
            ("ASSISTANT_ID", "researcher"),
            ("GRAPH_CHAT_STRICT_FRAMING", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::empty();
        config.api_base = Some("http://file:1".to_string());
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.api_base(), "http://env:3");
        assert_eq!(config.assistant_id(), "researcher");
        assert!(config.strict_framing);
        assert!(config.http_proxy.is_empty());
    }
}

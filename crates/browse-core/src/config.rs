//! Configuration: secrets and endpoints from the environment, tunables from browse-agent.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the optional settings file searched in the working directory and its parents
pub const SETTINGS_FILE: &str = "browse-agent.toml";

const DEFAULT_STEEL_API_URL: &str = "https://api.steel.dev";
const DEFAULT_STEEL_CONNECT_URL: &str = "wss://connect.steel.dev";

/// Configuration failures that callers may want to tell apart
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API Key or Credentials not found in .env file (missing: {})", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Full runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub steel: Option<SteelConfig>,
    pub browser: BrowserConfig,
    pub settings: Settings,
}

/// OpenAI-compatible chat endpoint
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Steel remote session broker
#[derive(Clone)]
pub struct SteelConfig {
    pub api_key: String,
    pub api_url: String,
    pub connect_url: String,
}

impl std::fmt::Debug for SteelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteelConfig")
            .field("api_url", &self.api_url)
            .field("connect_url", &self.connect_url)
            .finish_non_exhaustive()
    }
}

/// Local browser options from the environment
#[derive(Debug, Clone, Default)]
pub struct BrowserConfig {
    /// Existing DevTools endpoint to attach to (ws:// or http://)
    pub cdp_url: Option<String>,
    /// Explicit Chrome binary
    pub chrome_path: Option<PathBuf>,
    /// Overrides `[browser] headless` when set
    pub headless: Option<bool>,
}

/// Tunables loaded from browse-agent.toml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Replaces the built-in assistant instructions
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature; provider default when unset
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_steps() -> usize {
    25
}

fn default_page_load_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_content_chars() -> usize {
    20_000
}

fn default_debug_port() -> u16 {
    9222
}

fn default_headless() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
            temperature: None,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            page_load_timeout_secs: default_page_load_timeout(),
            command_timeout_secs: default_command_timeout(),
            max_content_chars: default_max_content_chars(),
            debug_port: default_debug_port(),
            headless: default_headless(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Settings {
    /// Load settings from the first browse-agent.toml found, or defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_path() {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Search the current directory and parents, then the user config dir
    pub fn find_path() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            for _ in 0..10 {
                let candidate = current.join(SETTINGS_FILE);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join("browse-agent").join("config.toml"))
            .filter(|path| path.exists())
    }
}

impl Config {
    /// Build configuration from the process environment and the settings file
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Settings::load()?;
        Self::from_lookup(|key| std::env::var(key).ok(), settings)
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F, settings: Settings) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut missing = Vec::new();
        let mut require = |key: &str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key.to_string());
            }
            value.unwrap_or_default()
        };

        let api_key = require("GEMINI_API_KEY");
        let model = require("MODEL_NAME");
        let base_url = require("BASE_URL");

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let steel = get("STEEL_API_KEY")
            .or_else(|| get("steel_api_key"))
            .map(|api_key| SteelConfig {
                api_key,
                api_url: get("STEEL_API_URL").unwrap_or_else(|| DEFAULT_STEEL_API_URL.to_string()),
                connect_url: get("STEEL_CONNECT_URL")
                    .unwrap_or_else(|| DEFAULT_STEEL_CONNECT_URL.to_string()),
            });

        let headless = match get("BROWSER_HEADLESS") {
            Some(value) => Some(parse_bool("BROWSER_HEADLESS", &value)?),
            None => None,
        };

        Ok(Self {
            llm: LlmConfig {
                api_key,
                model,
                base_url,
            },
            steel,
            browser: BrowserConfig {
                cdp_url: get("BROWSER_CDP_URL"),
                chrome_path: get("CHROME_PATH").map(PathBuf::from),
                headless,
            },
            settings,
        })
    }

    /// Steel configuration, required for remote sessions
    pub fn steel(&self) -> Result<&SteelConfig, ConfigError> {
        self.steel
            .as_ref()
            .ok_or_else(|| ConfigError::Missing(vec!["STEEL_API_KEY".to_string()]))
    }

    /// Effective headless flag (environment wins over settings)
    pub fn headless(&self) -> bool {
        self.browser.headless.unwrap_or(self.settings.browser.headless)
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("GEMINI_API_KEY", "key-123"),
            ("MODEL_NAME", "gemini-2.0-flash"),
            ("BASE_URL", "https://generativelanguage.googleapis.com/v1beta/openai/"),
        ]
    }

    #[test]
    fn test_missing_everything_lists_all_vars() {
        let err = Config::from_lookup(lookup(&[]), Settings::default()).unwrap_err();
        match err {
            ConfigError::Missing(vars) => {
                assert_eq!(vars, vec!["GEMINI_API_KEY", "MODEL_NAME", "BASE_URL"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let err = Config::from_lookup(
            lookup(&[("GEMINI_API_KEY", "k"), ("MODEL_NAME", "  "), ("BASE_URL", "http://x")]),
            Settings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref v) if v == &["MODEL_NAME"]));
        assert!(err.to_string().starts_with("API Key or Credentials not found"));
    }

    #[test]
    fn test_required_only() {
        let config = Config::from_lookup(lookup(&required()), Settings::default()).unwrap();
        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert!(config.steel.is_none());
        assert!(config.steel().is_err());
        assert!(config.headless());
        assert!(config.browser.cdp_url.is_none());
    }

    #[test]
    fn test_steel_key_lowercase_alias() {
        let mut vars = required();
        vars.push(("steel_api_key", "steel-abc"));
        let config = Config::from_lookup(lookup(&vars), Settings::default()).unwrap();
        let steel = config.steel().unwrap();
        assert_eq!(steel.api_key, "steel-abc");
        assert_eq!(steel.api_url, "https://api.steel.dev");
        assert_eq!(steel.connect_url, "wss://connect.steel.dev");
    }

    #[test]
    fn test_headless_env_overrides_settings() {
        let mut vars = required();
        vars.push(("BROWSER_HEADLESS", "no"));
        let config = Config::from_lookup(lookup(&vars), Settings::default()).unwrap();
        assert!(!config.headless());

        let mut vars = required();
        vars.push(("BROWSER_HEADLESS", "sometimes"));
        let err = Config::from_lookup(lookup(&vars), Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = Config::from_lookup(lookup(&required()), Settings::default()).unwrap();
        let rendered = format!("{:?}", config.llm);
        assert!(!rendered.contains("key-123"));
    }

    #[test]
    fn test_parse_settings() {
        let toml = r#"
[agent]
max_iterations = 4
system_prompt = "Be brief."
temperature = 0.2

[browser]
max_steps = 12
headless = false
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.agent.max_iterations, 4);
        assert_eq!(settings.agent.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(settings.agent.temperature, Some(0.2));
        assert_eq!(settings.browser.max_steps, 12);
        assert!(!settings.browser.headless);
        assert_eq!(settings.browser.debug_port, 9222);
        assert_eq!(settings.http.max_retries, 3);
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[http]\ntimeout_secs = 5\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.http.timeout_secs, 5);
        assert_eq!(settings.agent.max_iterations, 10);
        assert!(settings.agent.temperature.is_none());

        std::fs::write(&path, "[http\n").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}

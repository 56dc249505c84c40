use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::session::ProviderKind;

const ENV_CONFIG_PATH: &str = "DOC_REVIEW_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_SESSION_IDLE_TTL: &str = "SESSION_IDLE_TTL_SECS";
const ENV_MAX_BODY_BYTES: &str = "MAX_BODY_BYTES";
const ENV_PROVIDER_TIMEOUT: &str = "PROVIDER_TIMEOUT_SECS";
const ENV_PROVIDER_MAX_ATTEMPTS: &str = "PROVIDER_MAX_ATTEMPTS";
const ENV_PROVIDER_RETRY_DELAY: &str = "PROVIDER_RETRY_DELAY_MS";
const ENV_SUMMARY_TIMEOUT: &str = "SUMMARY_TIMEOUT_SECS";

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024; // 50 MiB
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PROVIDER_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_PROVIDER_RETRY_DELAY_MS: u64 = 2000;
const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 120;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
const DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Endpoint and default model of a provider preset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderPreset {
    pub endpoint: String,
    pub model: String,
}

/// Built-in provider presets, overridable from the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderPresets {
    #[serde(default = "ProviderPresets::default_openai")]
    pub openai: ProviderPreset,
    #[serde(default = "ProviderPresets::default_deepseek")]
    pub deepseek: ProviderPreset,
}

impl ProviderPresets {
    fn default_openai() -> ProviderPreset {
        ProviderPreset {
            endpoint: OPENAI_ENDPOINT.to_string(),
            model: OPENAI_MODEL.to_string(),
        }
    }

    fn default_deepseek() -> ProviderPreset {
        ProviderPreset {
            endpoint: DEEPSEEK_ENDPOINT.to_string(),
            model: DEEPSEEK_MODEL.to_string(),
        }
    }

    /// Preset for a provider kind; `custom` has none
    pub fn preset(&self, kind: ProviderKind) -> Option<&ProviderPreset> {
        match kind {
            ProviderKind::OpenAi => Some(&self.openai),
            ProviderKind::DeepSeek => Some(&self.deepseek),
            ProviderKind::Custom => None,
        }
    }

    /// Model used by `custom` endpoints when the caller names none
    pub fn fallback_model(&self) -> &str {
        &self.openai.model
    }
}

impl Default for ProviderPresets {
    fn default() -> Self {
        Self {
            openai: Self::default_openai(),
            deepseek: Self::default_deepseek(),
        }
    }
}

/// Attempt count, delay and per-attempt timeout applied to every provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicyConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for CallPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PROVIDER_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_PROVIDER_RETRY_DELAY_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub providers: ProviderPresets,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub max_body_bytes: usize,
    pub providers: ProviderPresets,
    pub call_policy: CallPolicyConfig,
    pub summary_timeout: Duration,
    /// `None` keeps abandoned sessions until restart
    pub session_idle_ttl: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "127.0.0.1".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            providers: ProviderPresets::default(),
            call_policy: CallPolicyConfig::default(),
            summary_timeout: Duration::from_secs(DEFAULT_SUMMARY_TIMEOUT_SECS),
            session_idle_ttl: Some(Duration::from_secs(DEFAULT_SESSION_IDLE_TTL_SECS)),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let port = env_parse("PORT").unwrap_or(DEFAULT_PORT);
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let config_path = std::env::var(ENV_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let providers = Self::load_config_file(&config_path)
            .map(|cf| cf.providers)
            .unwrap_or_default();

        let call_policy = CallPolicyConfig {
            max_attempts: env_parse(ENV_PROVIDER_MAX_ATTEMPTS)
                .filter(|attempts| *attempts > 0)
                .unwrap_or(DEFAULT_PROVIDER_MAX_ATTEMPTS),
            retry_delay: Duration::from_millis(
                env_parse(ENV_PROVIDER_RETRY_DELAY).unwrap_or(DEFAULT_PROVIDER_RETRY_DELAY_MS),
            ),
            attempt_timeout: Duration::from_secs(
                env_parse(ENV_PROVIDER_TIMEOUT).unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            ),
        };

        let summary_timeout = Duration::from_secs(
            env_parse(ENV_SUMMARY_TIMEOUT).unwrap_or(DEFAULT_SUMMARY_TIMEOUT_SECS),
        );

        let session_idle_ttl = match env_parse::<u64>(ENV_SESSION_IDLE_TTL)
            .unwrap_or(DEFAULT_SESSION_IDLE_TTL_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            port,
            host,
            max_body_bytes: env_parse(ENV_MAX_BODY_BYTES).unwrap_or(DEFAULT_MAX_BODY_BYTES),
            providers,
            call_policy,
            summary_timeout,
            session_idle_ttl,
        }
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::parse_config_file(&contents, path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    fn parse_config_file(contents: &str, path: &Path) -> Option<ConfigFile> {
        let contents = contents.trim();
        if contents.is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Some(ConfigFile::default());
        }

        match serde_yaml::from_str(contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                Some(config)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

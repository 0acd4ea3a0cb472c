//! Environment-driven engine configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::openai::{DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_URL, DEFAULT_TEMPERATURE};
use crate::orchestrator::{
    DispatchConfig, OrchestratorConfig, DEFAULT_COOLDOWN_SECS, DEFAULT_INTERVAL,
    DEFAULT_QUEUE_CAPACITY,
};

/// Everything the binary reads from the environment.
#[derive(Clone)]
pub struct EngineConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub model: String,
    pub temperature: f32,
    pub api_key: String,
    pub api_url: String,
    pub queue_max_size: usize,
    pub cooldown_seconds: u64,
    pub policy_dir: PathBuf,
    pub audit_db: String,
    pub server_host: String,
    pub server_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: DEFAULT_INTERVAL.as_secs(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_key: String::new(),
            api_url: DEFAULT_OPENAI_URL.to_string(),
            queue_max_size: DEFAULT_QUEUE_CAPACITY,
            cooldown_seconds: DEFAULT_COOLDOWN_SECS,
            policy_dir: PathBuf::from("policies"),
            audit_db: "opencore.db".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("enabled", &self.enabled)
            .field("interval_seconds", &self.interval_seconds)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("api_url", &self.api_url)
            .field("queue_max_size", &self.queue_max_size)
            .field("cooldown_seconds", &self.cooldown_seconds)
            .field("policy_dir", &self.policy_dir)
            .field("audit_db", &self.audit_db)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .finish()
    }
}

impl EngineConfig {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing keys take defaults; unparseable
    /// values take defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            enabled: parse_or(&get, "GPT_ENABLED", defaults.enabled),
            interval_seconds: parse_or(&get, "GPT_INTERVAL_SECONDS", defaults.interval_seconds)
                .max(1),
            model: get("GPT_MODEL").unwrap_or(defaults.model),
            temperature: parse_or(&get, "GPT_TEMPERATURE", defaults.temperature),
            api_key: get("GPT_API_KEY").unwrap_or_default(),
            api_url: get("GPT_API_URL").unwrap_or(defaults.api_url),
            queue_max_size: parse_or(&get, "GPT_QUEUE_MAX_SIZE", defaults.queue_max_size),
            cooldown_seconds: parse_or(&get, "GPT_COOLDOWN_SECONDS", defaults.cooldown_seconds),
            policy_dir: get("GPT_POLICY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.policy_dir),
            audit_db: get("GPT_AUDIT_DB").unwrap_or(defaults.audit_db),
            server_host: get("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: get("SERVER_PORT")
                .or_else(|| get("PORT"))
                .map(|v| parse_value("SERVER_PORT", &v, defaults.server_port))
                .unwrap_or(defaults.server_port),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            enabled: self.enabled,
            interval: Duration::from_secs(self.interval_seconds),
            queue_capacity: self.queue_max_size,
            cooldown: Duration::from_secs(self.cooldown_seconds),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        Some(raw) => parse_value(key, &raw, default),
        None => default,
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str, default: T) -> T {
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = raw, "Invalid configuration value, using default");
        default
    })
}

/// Load `.env.local` then `.env` from the workspace root, if present.
/// Variables already set in the environment win.
pub fn load_dotenv_from_repo_root() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
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

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None);
        assert!(!config.enabled);
        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.queue_max_size, 100);
        assert_eq!(config.cooldown_seconds, 60);
        assert_eq!(config.server_addr(), "0.0.0.0:3000");
        assert_eq!(config.api_url, DEFAULT_OPENAI_URL);
    }

    #[test]
    fn reads_values() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("GPT_ENABLED", "true"),
            ("GPT_INTERVAL_SECONDS", "15"),
            ("GPT_MODEL", "gpt-4o-mini"),
            ("GPT_TEMPERATURE", "0.2"),
            ("GPT_API_KEY", "sk-secret"),
            ("GPT_QUEUE_MAX_SIZE", "5"),
            ("GPT_POLICY_DIR", "/srv/policies"),
            ("PORT", "8080"),
        ]));
        assert!(config.enabled);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.api_key, "sk-secret");
        assert_eq!(config.policy_dir, PathBuf::from("/srv/policies"));
        assert_eq!(config.server_port, 8080);

        let orchestrator = config.orchestrator();
        assert!(orchestrator.enabled);
        assert_eq!(orchestrator.interval, Duration::from_secs(15));
        assert_eq!(orchestrator.queue_capacity, 5);
        assert_eq!(orchestrator.dispatch.max_attempts, 3);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("GPT_ENABLED", "yes please"),
            ("GPT_QUEUE_MAX_SIZE", "-1"),
            ("GPT_INTERVAL_SECONDS", "0"),
            ("SERVER_PORT", "http"),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.queue_max_size, 100);
        assert_eq!(config.interval_seconds, 1, "zero interval is clamped");
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = EngineConfig::from_lookup(lookup(&[("GPT_API_KEY", "sk-secret")]));
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}

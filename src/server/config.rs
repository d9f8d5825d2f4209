//! Process configuration
//!
//! Read once at start-up from the environment (after `dotenvy` has loaded
//! any `.env` file). Everything has a default except the secrets, which fall
//! back to development values with a warning.

use std::time::Duration;

use crate::server::hub::HubConfig;

const DEV_JWT_SECRET: &str = "dev-only-insecure-secret";

/// Anthropic-backed AI provider settings
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub cost_per_token: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Absent means the in-memory store is used.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub ai_cache_size: usize,
    pub ai_cache_ttl: Duration,
    /// `None` when `ANTHROPIC_API_KEY` is unset.
    pub anthropic: Option<AnthropicConfig>,
    pub allow_unsigned_webhooks: bool,
    pub request_timeout: Duration,
    pub providers_file: Option<String>,
    pub hub: HubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            ai_cache_size: 1000,
            ai_cache_ttl: Duration::from_secs(3600),
            anthropic: None,
            allow_unsigned_webhooks: false,
            request_timeout: Duration::from_secs(30),
            providers_file: None,
            hub: HubConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).unwrap_or_default().trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let jwt_secret = env_non_empty("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set, using an insecure development secret");
            DEV_JWT_SECRET.to_string()
        });

        let anthropic = env_non_empty("ANTHROPIC_API_KEY").map(|api_key| AnthropicConfig {
            api_key,
            model: env_non_empty("ANTHROPIC_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-5-20250514".to_string()),
            cost_per_token: env_parse("ANTHROPIC_COST_PER_TOKEN", 0.000_015),
        });

        Self {
            host: env_non_empty("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            database_url: env_non_empty("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            jwt_secret,
            ai_cache_size: env_parse("AI_CACHE_SIZE", defaults.ai_cache_size).max(1),
            ai_cache_ttl: Duration::from_secs(env_parse("AI_CACHE_TTL_SECS", 3600)),
            anthropic,
            allow_unsigned_webhooks: env_flag("ALLOW_UNSIGNED_WEBHOOKS"),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30).max(1)),
            providers_file: env_non_empty("VOIP_PROVIDERS_FILE"),
            hub: defaults.hub,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.ai_cache_size, 1000);
        assert_eq!(config.ai_cache_ttl, Duration::from_secs(3600));
        assert!(!config.allow_unsigned_webhooks);
        assert_eq!(config.hub.client_queue, 256);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse::<u16>("VOIP_CORE_TEST_UNSET_PORT", 8080), 8080);
    }
}

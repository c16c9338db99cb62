//! Service configuration.
//!
//! Values are read from environment variables; anything missing or
//! unparseable falls back to the defaults below.

use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8082;
const DEFAULT_PLATFORM_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_QUERY_GC_TIME_SECS: u64 = 300;

/// Application configuration shared by all services.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name of the service this configuration was loaded for.
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Base URL of the management platform API (no trailing slash).
    pub platform_api_url: String,
    /// Bearer token sent to the management platform API.
    pub platform_api_token: Option<String>,
    /// Timeout applied to every outgoing platform request.
    pub http_timeout_secs: u64,
    /// How long fetched query data is considered fresh.
    pub query_stale_time_secs: u64,
    /// Extra attempts made by the query cache after a failed fetch.
    pub query_retry: u32,
    /// How long an unused cache entry is kept.
    pub query_gc_time_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            platform_api_url: DEFAULT_PLATFORM_API_URL.to_string(),
            platform_api_token: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            query_stale_time_secs: 0,
            query_retry: 0,
            query_gc_time_secs: DEFAULT_QUERY_GC_TIME_SECS,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn load_with_service(service: &str) -> Self {
        Self::from_lookup(service, |key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(service: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            service_name: service.to_string(),
            host: non_empty("SERVER_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "SERVER_PORT", defaults.port),
            platform_api_url: non_empty("PLATFORM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.platform_api_url),
            platform_api_token: non_empty("PLATFORM_API_TOKEN"),
            http_timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            query_stale_time_secs: parse_or(
                &lookup,
                "QUERY_STALE_TIME_SECS",
                defaults.query_stale_time_secs,
            ),
            query_retry: parse_or(&lookup, "QUERY_RETRY", defaults.query_retry),
            query_gc_time_secs: parse_or(
                &lookup,
                "QUERY_GC_TIME_SECS",
                defaults.query_gc_time_secs,
            ),
        }
    }

    /// Timeout for outgoing platform requests.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Freshness window for cached query data.
    pub fn query_stale_time(&self) -> Duration {
        Duration::from_secs(self.query_stale_time_secs)
    }

    /// Idle time after which a cached query entry is dropped.
    pub fn query_gc_time(&self) -> Duration {
        Duration::from_secs(self.query_gc_time_secs)
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = key, value = %raw, "Invalid config value, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup("pooling-service", |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = load(&[]);
        assert_eq!(config.service_name, "pooling-service");
        assert_eq!(config.bind_addr(), "0.0.0.0:8082");
        assert_eq!(config.platform_api_url, "http://127.0.0.1:8000");
        assert!(config.platform_api_token.is_none());
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.query_stale_time(), Duration::ZERO);
        assert_eq!(config.query_retry, 0);
        assert_eq!(config.query_gc_time(), Duration::from_secs(300));
    }

    #[test]
    fn test_values_are_read_from_lookup() {
        let config = load(&[
            ("SERVER_PORT", "9000"),
            ("PLATFORM_API_URL", "https://api.example.com/"),
            ("PLATFORM_API_TOKEN", "secret"),
            ("QUERY_STALE_TIME_SECS", "60"),
            ("QUERY_RETRY", "2"),
            ("QUERY_GC_TIME_SECS", "30"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.platform_api_url, "https://api.example.com");
        assert_eq!(config.platform_api_token.as_deref(), Some("secret"));
        assert_eq!(config.query_stale_time(), Duration::from_secs(60));
        assert_eq!(config.query_retry, 2);
        assert_eq!(config.query_gc_time(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = load(&[("SERVER_PORT", "not-a-port"), ("HTTP_TIMEOUT_SECS", "-1")]);
        assert_eq!(config.port, 8082);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let config = load(&[("PLATFORM_API_TOKEN", "  ")]);
        assert!(config.platform_api_token.is_none());
    }
}

//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::ServiceConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `REQUEST_TIMEOUT_SECS`: per use case timeout (default: `10`)
/// - `DEFAULT_PAGE_SIZE`: page size for post listings (default: `10`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub request_timeout: Duration,
    pub default_page_size: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            request_timeout: lookup("REQUEST_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            default_page_size: lookup("DEFAULT_PAGE_SIZE")
                .and_then(|n| n.parse().ok())
                .filter(|n: &i64| *n > 0)
                .unwrap_or(defaults.default_page_size),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the settings injected into the services.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            timeout: self.request_timeout,
            default_page_size: self.default_page_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let service = ServiceConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            database_max_connections: 10,
            request_timeout: service.timeout,
            default_page_size: service.default_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_variables() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/posts"),
            ("REQUEST_TIMEOUT_SECS", "3"),
            ("DEFAULT_PAGE_SIZE", "25"),
        ]);
        assert_eq!(config.port, 8081);
        assert!(config.log_json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/posts")
        );

        let service = config.service_config();
        assert_eq!(service.timeout, Duration::from_secs(3));
        assert_eq!(service.default_page_size, 25);
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let config = from_pairs(&[
            ("PORT", "http"),
            ("DATABASE_URL", ""),
            ("DEFAULT_PAGE_SIZE", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.default_page_size, 10);
    }
}

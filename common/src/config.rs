//! Service configuration.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file) and fall back to defaults when missing or malformed.

use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration shared by all services.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name reported in responses and sent to the cluster as app name.
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Bound on establishing a cluster connection.
    pub connect_timeout_secs: u64,
    /// Bound on every engine call.
    pub operation_timeout_secs: u64,
    /// Request MongoDB Stable API v1 in strict mode.
    pub stable_api_strict: bool,
    /// Accept `memory://` connection strings.
    pub allow_memory_engine: bool,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("session-service"),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            stable_api_strict: true,
            allow_memory_engine: true,
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            service_name: service_name.to_string(),
            host: lookup("SERVER_HOST")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.host),
            port: parse_var(&lookup, "SERVER_PORT").unwrap_or(defaults.port),
            connect_timeout_secs: parse_var::<u64, _>(&lookup, "CONNECT_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.connect_timeout_secs),
            operation_timeout_secs: parse_var::<u64, _>(&lookup, "OPERATION_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.operation_timeout_secs),
            stable_api_strict: lookup("MONGO_STABLE_API_STRICT")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.stable_api_strict),
            allow_memory_engine: lookup("ALLOW_MEMORY_ENGINE")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.allow_memory_engine),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
pub fn load_dotenv() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            // Only set if not already set by the environment
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup("test-service", |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert!(config.stable_api_strict);
        assert!(config.allow_memory_engine);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("SERVER_HOST", "127.0.0.1"),
            ("SERVER_PORT", "8088"),
            ("OPERATION_TIMEOUT_SECS", "5"),
            ("MONGO_STABLE_API_STRICT", "off"),
            ("ALLOW_MEMORY_ENGINE", "false"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(config.bind_addr(), "127.0.0.1:8088");
        assert_eq!(config.operation_timeout_secs, 5);
        assert!(!config.stable_api_strict);
        assert!(!config.allow_memory_engine);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = config_from(&[
            ("SERVER_PORT", "not-a-port"),
            ("CONNECT_TIMEOUT_SECS", "0"),
            ("MONGO_STABLE_API_STRICT", "maybe"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.stable_api_strict);
    }
}

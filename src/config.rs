pub use config::ConfigError;

use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Plain environment variables recognised on top of the `EDGE__*` layer.
///
/// These are the names the deployment tooling already exports, so they win
/// over every other source.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "application.host"),
    ("PORT", "application.port"),
    ("APP_ENV", "application.environment"),
    ("ORIGIN_SERVER_URL", "upstream.origin_url"),
    ("API_GATEWAY_URL", "upstream.gateway_url"),
    ("ENABLE_REQUEST_LOGGING", "logging.request_logging"),
    ("LOG_LEVEL", "logging.level"),
    ("AUTH_SERVICE_URL", "auth.service_url"),
    ("AUTH_API_PREFIX", "auth.api_prefix"),
    ("AUTH_STATIC_KEY", "auth.static_key"),
    ("WARMUP_TOKEN", "cache.warmup_token"),
    ("REDIS_HOST", "redis.host"),
    ("REDIS_PORT", "redis.port"),
    ("REDIS_DB", "redis.db"),
    ("REDIS_PASSWORD", "redis.password"),
];

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub upstream: UpstreamSettings,
    pub auth: AuthSettings,
    pub cache: CacheSettings,
    pub redis: RedisSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub origin_url: String,
    pub gateway_url: String,
    pub request_timeout_ms: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub service_url: String,
    pub api_prefix: String,
    pub static_key: String,
    pub cookie_safety_margin_secs: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub ttl_seconds: u64,
    pub lookup_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub lock_ttl_seconds: u64,
    pub write_queue_capacity: usize,
    pub cacheable_paths: Vec<String>,
    pub warmup_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub reconnect_max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub request_logging: bool,
}

impl Settings {
    /// Load settings from `./config` and the process environment.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Path::new("config"), |name| env::var(name).ok())
    }

    /// Load settings from `config_dir`, resolving plain overrides through `lookup`.
    pub fn load<F>(config_dir: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("APP_ENV").unwrap_or_else(|| "development".to_string());
        let file = |name: &str| {
            File::with_name(&config_dir.join(name).to_string_lossy()).required(false)
        };

        let mut builder = Config::builder()
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.port", 3000)?
            .set_default("application.environment", environment.clone())?
            .set_default("upstream.origin_url", "http://localhost:3001")?
            .set_default("upstream.gateway_url", "http://localhost:8000")?
            .set_default("upstream.request_timeout_ms", 10_000)?
            .set_default("upstream.max_body_bytes", 10 * 1024 * 1024)?
            .set_default("auth.api_prefix", "/api/v1/auth")?
            .set_default("auth.static_key", "")?
            .set_default("auth.cookie_safety_margin_secs", 60)?
            .set_default("auth.request_timeout_ms", 5_000)?
            .set_default("cache.backend", "redis")?
            .set_default("cache.ttl_seconds", 60)?
            .set_default("cache.lookup_timeout_ms", 2_000)?
            .set_default("cache.write_timeout_ms", 3_000)?
            .set_default("cache.lock_ttl_seconds", 10)?
            .set_default("cache.write_queue_capacity", 256)?
            .set_default("cache.cacheable_paths", vec!["/", "/categories"])?
            .set_default("redis.host", "127.0.0.1")?
            .set_default("redis.port", 6379)?
            .set_default("redis.db", 0)?
            .set_default("redis.reconnect_base_ms", 100)?
            .set_default("redis.reconnect_cap_ms", 3_000)?
            .set_default("redis.reconnect_max_attempts", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.request_logging", true)?
            .add_source(file("default"))
            .add_source(file(&environment))
            .add_source(file("local"))
            .add_source(Environment::with_prefix("EDGE").separator("__"));

        for (variable, key) in ENV_OVERRIDES {
            builder = builder.set_override_option(*key, lookup(variable))?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.service_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "auth.service_url (AUTH_SERVICE_URL) must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.application.environment.eq_ignore_ascii_case("production")
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }
}

impl UpstreamSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AuthSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cookie_safety_margin(&self) -> Duration {
        Duration::from_secs(self.cookie_safety_margin_secs)
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }
}

impl RedisSettings {
    pub fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: self.db,
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_settings_require_auth_service_url() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load(dir.path(), lookup_from(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_defaults_with_auth_url() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(
            dir.path(),
            lookup_from(&[("AUTH_SERVICE_URL", "http://auth.internal")]),
        )
        .unwrap();

        assert_eq!(settings.application.port, 3000);
        assert_eq!(settings.cache.ttl_seconds, 60);
        assert_eq!(settings.cache.backend, CacheBackendKind::Redis);
        assert_eq!(settings.cache.cacheable_paths, vec!["/", "/categories"]);
        assert_eq!(settings.upstream.request_timeout(), Duration::from_secs(10));
        assert!(settings.cache.warmup_token.is_none());
        assert!(settings.logging.request_logging);
        assert!(!settings.is_production());
    }

    #[test]
    fn test_plain_environment_variables_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(
            dir.path(),
            lookup_from(&[
                ("AUTH_SERVICE_URL", "http://auth.internal"),
                ("PORT", "8088"),
                ("APP_ENV", "production"),
                ("REDIS_PASSWORD", "hunter2"),
                ("REDIS_DB", "3"),
                ("ENABLE_REQUEST_LOGGING", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.application.port, 8088);
        assert!(settings.is_production());
        assert!(!settings.logging.request_logging);
        let info = settings.redis.connection_info();
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_environment_file_is_layered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("staging.toml"),
            "[cache]\nttl_seconds = 120\nbackend = \"memory\"\n",
        )
        .unwrap();

        let settings = Settings::load(
            dir.path(),
            lookup_from(&[
                ("AUTH_SERVICE_URL", "http://auth.internal"),
                ("APP_ENV", "staging"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.cache.ttl_seconds, 120);
        assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
    }
}

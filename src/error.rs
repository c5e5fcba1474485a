use thiserror::Error;

/// Startup and lifecycle errors for the edge proxy.
///
/// Request-scoped failures use [`crate::proxy::ProxyError`] instead; these
/// only surface while the process is being assembled or is shutting down.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Cache store error: {0}")]
    CacheStore(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid upstream URL for {name}: {value}")]
    InvalidUpstream { name: &'static str, value: String },
}

impl Error {
    pub fn invalid_upstream(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidUpstream {
            name,
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

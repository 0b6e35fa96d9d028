use crate::{env_parse, env_required, ConfigError, FromEnv};
use std::env;

/// Redis connection configuration
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
    /// Connection attempts before giving up at start-up
    pub connect_attempts: u32,
    /// Delay before the first retry; doubled on every further attempt
    pub initial_retry_delay_ms: u64,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_attempts: 5,
            initial_retry_delay_ms: 200,
        }
    }
}

impl FromEnv for RedisConfig {
    /// `REDIS_URL` wins over `REDIS_HOST`; one of them must be set
    fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("REDIS_URL")
            .or_else(|_| env_required("REDIS_HOST"))
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        Ok(Self {
            url,
            connect_attempts: env_parse("REDIS_CONNECT_ATTEMPTS", 5)?,
            initial_retry_delay_ms: env_parse("REDIS_RETRY_DELAY_MS", 200)?,
        })
    }
}

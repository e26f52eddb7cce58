use serde::{Deserialize, Serialize};
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub shards: ShardConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub buffer: BufferConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub urls: Vec<String>,
    pub virtual_nodes: u32,
    pub retry_attempts: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub batch_interval_seconds: f64,
    pub batch_size_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let urls = parse_shard_urls(&env::var("SHARD_URLS").unwrap_or_else(|_| {
            "redis://shard1:6379,redis://shard2:6379,redis://shard3:6379".to_string()
        }))?;

        Ok(Self {
            shards: ShardConfig {
                urls,
                virtual_nodes: parse_env("VIRTUAL_NODES", 100)?,
                retry_attempts: parse_env("SHARD_RETRY_ATTEMPTS", 3)?,
                timeout_seconds: parse_env("SHARD_TIMEOUT_SECONDS", 5)?,
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("SERVER_PORT", 3000)?,
            },
            cache: CacheConfig {
                ttl_seconds: parse_env("CACHE_TTL_SECONDS", 5)?,
                capacity: parse_env("CACHE_CAPACITY", 1000)?,
            },
            buffer: BufferConfig {
                batch_interval_seconds: parse_env("BATCH_INTERVAL_SECONDS", 5.0)?,
                batch_size_limit: parse_env("BATCH_SIZE_LIMIT", 1000)?,
            },
            metrics: MetricsConfig {
                interval_seconds: parse_env("METRICS_INTERVAL_SECONDS", 60)?,
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::ConfigurationError(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Split `SHARD_URLS` on commas and validate every entry carries the
/// `redis://` prefix, failing fast rather than at first shard use.
fn parse_shard_urls(raw: &str) -> Result<Vec<String>, AppError> {
    let urls: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if urls.is_empty() {
        return Err(AppError::ConfigurationError(
            "SHARD_URLS configuration is required".to_string(),
        ));
    }

    for url in &urls {
        if !url.starts_with("redis://") {
            return Err(AppError::ConfigurationError(format!(
                "invalid shard URL format: {}",
                url
            )));
        }
    }

    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_redis_prefix() {
        let err = parse_shard_urls("localhost:6379").unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
    }

    #[test]
    fn trims_and_splits_urls() {
        let urls = parse_shard_urls(" redis://a:6379 ,redis://b:6379").unwrap();
        assert_eq!(urls, vec!["redis://a:6379", "redis://b:6379"]);
    }

    #[test]
    fn rejects_empty_list() {
        assert!(parse_shard_urls("").is_err());
    }
}

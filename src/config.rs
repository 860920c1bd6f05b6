//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{
    Algorithm, Clock, FixedWindowCounter, SystemClock, TokenBucket, WindowAlignment,
};

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Algorithm created for each new key
    #[serde(default)]
    pub algorithm: AlgorithmConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Idle time in milliseconds after which a key is evicted
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Cleanup task cadence in milliseconds
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl RegistryConfig {
    /// Get the TTL as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Get the cleanup interval as a duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_cleanup_interval_ms() -> u64 {
    10_000
}

/// Rate limiting algorithm configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    /// Token bucket with lazy refill
    TokenBucket {
        /// Maximum number of tokens
        capacity: u64,
        /// Tokens granted per interval
        #[serde(default = "default_refill_tokens")]
        refill_tokens: u64,
        /// Refill interval in milliseconds
        refill_interval_ms: u64,
    },
    /// Fixed window counter
    FixedWindow {
        /// Maximum admits per window
        limit: u64,
        /// Window size in milliseconds
        window_ms: u64,
        /// Where window boundaries fall
        #[serde(default)]
        alignment: WindowAlignment,
    },
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        AlgorithmConfig::TokenBucket {
            capacity: 10,
            refill_tokens: default_refill_tokens(),
            refill_interval_ms: 1000,
        }
    }
}

fn default_refill_tokens() -> u64 {
    1
}

impl AlgorithmConfig {
    /// Build a fresh algorithm instance reading time from `clock`.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<Box<dyn Algorithm>> {
        let algorithm: Box<dyn Algorithm> = match *self {
            AlgorithmConfig::TokenBucket {
                capacity,
                refill_tokens,
                refill_interval_ms,
            } => Box::new(TokenBucket::with_clock(
                capacity,
                refill_tokens,
                Duration::from_millis(refill_interval_ms),
                clock,
            )?),
            AlgorithmConfig::FixedWindow {
                limit,
                window_ms,
                alignment,
            } => Box::new(FixedWindowCounter::with_options(
                limit,
                Duration::from_millis(window_ms),
                alignment,
                clock,
            )?),
        };
        Ok(algorithm)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Fmt,
    /// One JSON object per line
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` and `--log-level`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every duration and limit is usable.
    pub fn validate(&self) -> Result<()> {
        if self.registry.ttl_ms == 0 {
            return Err(TurnstileError::Config("registry.ttl_ms must be greater than zero".into()));
        }
        if self.registry.cleanup_interval_ms == 0 {
            return Err(TurnstileError::Config(
                "registry.cleanup_interval_ms must be greater than zero".into(),
            ));
        }

        // Algorithm constructors carry the parameter checks
        self.algorithm.build(Arc::new(SystemClock))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.registry.ttl(), Duration::from_secs(60));
        assert_eq!(config.registry.cleanup_interval(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Fmt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_token_bucket_config() {
        let yaml = r#"
registry:
  ttl_ms: 5000
  cleanup_interval_ms: 1000
algorithm:
  type: token_bucket
  capacity: 5
  refill_interval_ms: 500
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.registry.ttl(), Duration::from_secs(5));
        assert_eq!(
            config.algorithm,
            AlgorithmConfig::TokenBucket {
                capacity: 5,
                refill_tokens: 1,
                refill_interval_ms: 500,
            }
        );
    }

    #[test]
    fn test_parse_fixed_window_config() {
        let yaml = r#"
algorithm:
  type: fixed_window
  limit: 100
  window_ms: 60000
  alignment: epoch
logging:
  level: debug
  format: json
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.algorithm,
            AlgorithmConfig::FixedWindow {
                limit: 100,
                window_ms: 60000,
                alignment: WindowAlignment::Epoch,
            }
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.registry.ttl_ms, 60_000);
    }

    #[test]
    fn test_rejects_zero_values() {
        let zero_ttl = "registry:\n  ttl_ms: 0\n";
        assert!(matches!(
            TurnstileConfig::from_yaml(zero_ttl),
            Err(TurnstileError::Config(_))
        ));

        let zero_limit = r#"
algorithm:
  type: fixed_window
  limit: 0
  window_ms: 1000
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(zero_limit),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let yaml = "algorithm:\n  type: sliding_log\n  limit: 1\n";
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_build_algorithm() {
        let config = AlgorithmConfig::FixedWindow {
            limit: 2,
            window_ms: 60_000,
            alignment: WindowAlignment::Construction,
        };
        let algorithm = config.build(Arc::new(SystemClock)).unwrap();

        assert!(algorithm.allow());
        assert!(algorithm.allow());
        assert!(!algorithm.allow());
    }

    #[test]
    fn test_from_missing_file() {
        let result = TurnstileConfig::from_file("/nonexistent/turnstile.yaml");
        assert!(matches!(result, Err(TurnstileError::Io(_))));
    }
}

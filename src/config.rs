use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Event bus
    pub bus_brokers: Vec<String>,
    pub bus_poll_interval: Duration,

    // Telegram
    pub telegram_bot_token: Option<String>,
    pub telegram_bot_debug: bool,
    pub telegram_api_url: String,

    // VK
    pub vk_api_url: String,
    pub vk_api_version: String,
    pub vk_client_id: Option<String>,
    pub vk_client_secret: Option<String>,
    pub vk_redirect_url: Option<String>,
    pub vk_discovery_interval: Duration,

    // Object storage
    pub minio_endpoint: Option<String>,
    pub minio_access_key: Option<String>,
    pub minio_secret_key: Option<String>,
    pub minio_use_ssl: bool,
    pub minio_bucket: String,
    pub upload_dir: PathBuf,

    // gRPC
    pub grpc_host: String,
    pub upload_grpc_port: u16,
    pub comments_grpc_port: u16,
    pub user_service_grpc_port: u16,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
    pub jwt_secret: String,
    pub subscriber_buffer: usize,

    // Summarizer
    pub summarize_url: Option<String>,

    // Workers
    pub stats_worker_id: String,
    pub stats_worker_interval: Duration,
    pub scheduler_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Database
            database_path: parse_database_path(&env_or_default(
                "DB_CONNECT_DSN",
                "./data/socialops.sqlite",
            )),

            // Event bus
            bus_brokers: parse_list(&env_or_default("KAFKA_BROKERS", "localhost:9092")),
            bus_poll_interval: Duration::from_millis(parse_env_u64("EVENT_BUS_POLL_MS", 500)?),

            // Telegram
            telegram_bot_token: optional_env("TELEGRAM_BOT_TOKEN"),
            telegram_bot_debug: parse_env_bool("TELEGRAM_BOT_DEBUG", false)?,
            telegram_api_url: env_or_default("TELEGRAM_API_URL", "https://api.telegram.org"),

            // VK
            vk_api_url: env_or_default("VK_API_URL", "https://api.vk.com/method"),
            vk_api_version: env_or_default("VK_API_VERSION", "5.199"),
            vk_client_id: optional_env("VK_CLIENT_ID"),
            vk_client_secret: optional_env("VK_CLIENT_SECRET"),
            vk_redirect_url: optional_env("VK_REDIRECT_URL"),
            vk_discovery_interval: Duration::from_secs(parse_env_u64(
                "VK_DISCOVERY_INTERVAL_SECS",
                60,
            )?),

            // Object storage
            minio_endpoint: optional_env("MINIO_ENDPOINT"),
            minio_access_key: optional_env("MINIO_ACCESS_KEY"),
            minio_secret_key: optional_env("MINIO_SECRET_KEY"),
            minio_use_ssl: parse_env_bool("MINIO_USE_SSL", false)?,
            minio_bucket: env_or_default("MINIO_BUCKET", "uploads"),
            upload_dir: PathBuf::from(env_or_default("UPLOAD_DIR", "./data/uploads")),

            // gRPC
            grpc_host: env_or_default("UPLOAD_SERVICE_ADDR", "0.0.0.0"),
            upload_grpc_port: parse_env_u16("UPLOAD_SERVICE_GRPC_PORT", 50052)?,
            comments_grpc_port: parse_env_u16("COMMENTS_GRPC_PORT", 50053)?,
            user_service_grpc_port: parse_env_u16("USER_SERVICE_GRPC_PORT", 50051)?,

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
            jwt_secret: required_env("JWT_SECRET")?,
            subscriber_buffer: parse_env_usize("SUBSCRIBER_BUFFER", 64)?,

            // Summarizer
            summarize_url: optional_env("SUMMARIZE_URL"),

            // Workers
            stats_worker_id: optional_env("STATS_WORKER_ID").unwrap_or_else(default_worker_id),
            stats_worker_interval: Duration::from_secs(parse_env_u64(
                "STATS_WORKER_INTERVAL",
                60,
            )?),
            scheduler_interval: Duration::from_secs(parse_env_u64("SCHEDULER_INTERVAL_SECS", 10)?),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "JWT_SECRET".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                name: "SUBSCRIBER_BUFFER".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.stats_worker_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "STATS_WORKER_INTERVAL".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if self.minio_endpoint.is_some()
            && (self.minio_access_key.is_none() || self.minio_secret_key.is_none())
        {
            return Err(ConfigError::InvalidValue {
                name: "MINIO_ENDPOINT".to_string(),
                message: "MINIO_ACCESS_KEY and MINIO_SECRET_KEY are required with an endpoint"
                    .to_string(),
            });
        }
        validate_url("TELEGRAM_API_URL", &self.telegram_api_url)?;
        validate_url("VK_API_URL", &self.vk_api_url)?;
        for (name, value) in [
            ("MINIO_ENDPOINT", &self.minio_endpoint),
            ("SUMMARIZE_URL", &self.summarize_url),
            ("VK_REDIRECT_URL", &self.vk_redirect_url),
        ] {
            if let Some(value) = value {
                validate_url(name, value)?;
            }
        }
        Ok(())
    }

    /// Number of replicas for new bus topics.
    #[must_use]
    pub fn bus_replication(&self) -> i64 {
        self.bus_brokers.len().clamp(1, 3) as i64
    }

    /// Configuration suitable for tests: local storage, no platform tokens.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            bus_brokers: vec!["localhost:9092".to_string()],
            bus_poll_interval: Duration::from_millis(50),
            telegram_bot_token: None,
            telegram_bot_debug: false,
            telegram_api_url: "http://127.0.0.1:0".to_string(),
            vk_api_url: "http://127.0.0.1:0".to_string(),
            vk_api_version: "5.199".to_string(),
            vk_client_id: None,
            vk_client_secret: None,
            vk_redirect_url: None,
            vk_discovery_interval: Duration::from_secs(60),
            minio_endpoint: None,
            minio_access_key: None,
            minio_secret_key: None,
            minio_use_ssl: false,
            minio_bucket: "uploads".to_string(),
            upload_dir: std::env::temp_dir().join("socialops-test-uploads"),
            grpc_host: "127.0.0.1".to_string(),
            upload_grpc_port: 0,
            comments_grpc_port: 0,
            user_service_grpc_port: 0,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            jwt_secret: "test-secret".to_string(),
            subscriber_buffer: 16,
            summarize_url: None,
            stats_worker_id: "stats-worker-test".to_string(),
            stats_worker_interval: Duration::from_secs(60),
            scheduler_interval: Duration::from_secs(10),
        }
    }
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(())
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("stats-worker-{host}-{}", chrono::Utc::now().timestamp())
}

fn parse_database_path(dsn: &str) -> PathBuf {
    let path = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);
    PathBuf::from(path)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_database_path() {
        assert_eq!(
            parse_database_path("sqlite:///var/lib/app.db"),
            PathBuf::from("/var/lib/app.db")
        );
        assert_eq!(
            parse_database_path("sqlite:data/app.db"),
            PathBuf::from("data/app.db")
        );
        assert_eq!(parse_database_path("./x.sqlite"), PathBuf::from("./x.sqlite"));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("a:1, b:2,,c:3 "), vec!["a:1", "b:2", "c:3"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_bus_replication_is_capped() {
        let mut config = Config::for_testing();
        assert_eq!(config.bus_replication(), 1);
        config.bus_brokers = (0..5).map(|i| format!("b{i}:9092")).collect();
        assert_eq!(config.bus_replication(), 3);
        config.bus_brokers.clear();
        assert_eq!(config.bus_replication(), 1);
    }

    #[test]
    fn test_validate_minio_credentials() {
        let mut config = Config::for_testing();
        assert!(config.validate().is_ok());
        config.minio_endpoint = Some("http://minio:9000".to_string());
        assert!(config.validate().is_err());
        config.minio_access_key = Some("key".to_string());
        config.minio_secret_key = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_validate_urls() {
        let mut config = Config::for_testing();
        config.summarize_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
        config.summarize_url = Some("ftp://summary.local/run".to_string());
        assert!(config.validate().is_err());
        config.summarize_url = Some("http://summary.local/summarize".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_requires_jwt_secret() {
        std::env::remove_var("JWT_SECRET");
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingEnvVar(name)) if name == "JWT_SECRET"));

        std::env::set_var("JWT_SECRET", "s3cret");
        std::env::set_var("KAFKA_BROKERS", "k1:9092,k2:9092");
        std::env::set_var("DB_CONNECT_DSN", "sqlite:///tmp/ops.sqlite");
        let config = Config::from_env().unwrap();
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.bus_replication(), 2);
        assert_eq!(config.database_path, PathBuf::from("/tmp/ops.sqlite"));

        std::env::remove_var("JWT_SECRET");
        std::env::remove_var("KAFKA_BROKERS");
        std::env::remove_var("DB_CONNECT_DSN");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_numbers() {
        std::env::set_var("JWT_SECRET", "s3cret");
        std::env::set_var("WEB_PORT", "eighty");
        assert!(matches!(Config::from_env(), Err(ConfigError::ParseInt { name, .. }) if name == "WEB_PORT"));
        std::env::remove_var("WEB_PORT");
        std::env::remove_var("JWT_SECRET");
    }
}

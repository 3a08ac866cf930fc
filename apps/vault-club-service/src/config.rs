use std::{
    env,
    net::{AddrParseError, SocketAddr},
};

use thiserror::Error;

pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "https://staging.sequencetheory.com",
    "https://staging.vaultclub.app",
    "http://localhost:5173",
    "http://localhost:3000",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub service_name: String,
    pub build_sha: String,
    pub db_url: Option<String>,
    pub api_key: Option<String>,
    pub auth_base_url: Option<String>,
    pub auth_api_key: Option<String>,
    pub auth_timeout_ms: u64,
    pub network: String,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub harvest_scheduler_enabled: bool,
    pub harvest_interval_seconds: u64,
    pub allowed_origins: Vec<String>,
    pub request_timeout_ms: u64,
    pub idempotency_claim_ttl_seconds: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid VAULT_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid VAULT_AUTH_TIMEOUT_MS: {0}")]
    InvalidAuthTimeoutMs(String),
    #[error("invalid VAULT_RATE_LIMIT_MAX_REQUESTS: {0}")]
    InvalidRateLimitMaxRequests(String),
    #[error("invalid VAULT_RATE_LIMIT_WINDOW_SECONDS: {0}")]
    InvalidRateLimitWindowSeconds(String),
    #[error("invalid VAULT_HARVEST_SCHEDULER_ENABLED: {0}")]
    InvalidHarvestSchedulerEnabled(String),
    #[error("invalid VAULT_HARVEST_INTERVAL_SECONDS: {0}")]
    InvalidHarvestIntervalSeconds(String),
    #[error("invalid VAULT_REQUEST_TIMEOUT_MS: {0}")]
    InvalidRequestTimeoutMs(String),
    #[error("invalid VAULT_IDEMPOTENCY_CLAIM_TTL_SECONDS: {0}")]
    InvalidIdempotencyClaimTtlSeconds(String),
    #[error("invalid VAULT_ALLOWED_ORIGINS: {0}")]
    InvalidAllowedOrigins(String),
    #[error("invalid VAULT_LOG_FORMAT: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("VAULT_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:4200".to_string())
            .parse()?;
        let service_name =
            lookup("VAULT_SERVICE_NAME").unwrap_or_else(|| "vault-club-service".to_string());
        let build_sha = lookup("VAULT_BUILD_SHA").unwrap_or_else(|| "dev".to_string());
        let db_url = non_empty(lookup("DB_URL")).or_else(|| non_empty(lookup("DATABASE_URL")));
        let api_key = non_empty(lookup("VAULT_CLUB_API_KEY"));
        let auth_base_url = non_empty(lookup("VAULT_AUTH_BASE_URL"))
            .map(|value| value.trim_end_matches('/').to_string());
        let auth_api_key = non_empty(lookup("VAULT_AUTH_API_KEY"));
        let auth_timeout_ms = parse_with_lookup(&lookup, "VAULT_AUTH_TIMEOUT_MS", 5_000, |raw| {
            raw.trim()
                .parse::<u64>()
                .map(|value| value.clamp(250, 60_000))
                .map_err(|error| ConfigError::InvalidAuthTimeoutMs(error.to_string()))
        })?;
        let network = non_empty(lookup("VAULT_NETWORK")).unwrap_or_else(|| "testnet".to_string());
        let rate_limit_max_requests =
            parse_with_lookup(&lookup, "VAULT_RATE_LIMIT_MAX_REQUESTS", 1_000, |raw| {
                match raw.trim().parse::<u32>() {
                    Ok(0) => Err(ConfigError::InvalidRateLimitMaxRequests(
                        "must be greater than zero".to_string(),
                    )),
                    Ok(value) => Ok(value),
                    Err(error) => Err(ConfigError::InvalidRateLimitMaxRequests(error.to_string())),
                }
            })?;
        let rate_limit_window_seconds =
            parse_with_lookup(&lookup, "VAULT_RATE_LIMIT_WINDOW_SECONDS", 3_600, |raw| {
                match raw.trim().parse::<u64>() {
                    Ok(0) => Err(ConfigError::InvalidRateLimitWindowSeconds(
                        "must be greater than zero".to_string(),
                    )),
                    Ok(value) => Ok(value),
                    Err(error) => Err(ConfigError::InvalidRateLimitWindowSeconds(error.to_string())),
                }
            })?;
        let harvest_scheduler_enabled = parse_with_lookup(
            &lookup,
            "VAULT_HARVEST_SCHEDULER_ENABLED",
            false,
            |raw| parse_bool(&raw).map_err(ConfigError::InvalidHarvestSchedulerEnabled),
        )?;
        let harvest_interval_seconds =
            parse_with_lookup(&lookup, "VAULT_HARVEST_INTERVAL_SECONDS", 3_600, |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map(|value| value.max(1))
                    .map_err(|error| ConfigError::InvalidHarvestIntervalSeconds(error.to_string()))
            })?;
        let allowed_origins = parse_with_lookup(
            &lookup,
            "VAULT_ALLOWED_ORIGINS",
            DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
            |raw| parse_origins(&raw),
        )?;
        let request_timeout_ms =
            parse_with_lookup(&lookup, "VAULT_REQUEST_TIMEOUT_MS", 15_000, |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map(|value| value.clamp(1_000, 300_000))
                    .map_err(|error| ConfigError::InvalidRequestTimeoutMs(error.to_string()))
            })?;
        let idempotency_claim_ttl_seconds =
            parse_with_lookup(&lookup, "VAULT_IDEMPOTENCY_CLAIM_TTL_SECONDS", 60, |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map(|value| value.clamp(1, 86_400))
                    .map_err(|error| {
                        ConfigError::InvalidIdempotencyClaimTtlSeconds(error.to_string())
                    })
            })?;
        let log_format = parse_with_lookup(&lookup, "VAULT_LOG_FORMAT", LogFormat::Text, |raw| {
            match raw.trim().to_ascii_lowercase().as_str() {
                "" | "text" | "pretty" => Ok(LogFormat::Text),
                "json" => Ok(LogFormat::Json),
                other => Err(ConfigError::InvalidLogFormat(other.to_string())),
            }
        })?;

        Ok(Self {
            bind_addr,
            service_name,
            build_sha,
            db_url,
            api_key,
            auth_base_url,
            auth_api_key,
            auth_timeout_ms,
            network,
            rate_limit_max_requests,
            rate_limit_window_seconds,
            harvest_scheduler_enabled,
            harvest_interval_seconds,
            allowed_origins,
            request_timeout_ms,
            idempotency_claim_ttl_seconds,
            log_format,
        })
    }
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(other.to_string()),
    }
}

fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut origins = Vec::new();
    for token in raw.split(',') {
        let origin = token.trim().trim_end_matches('/').to_ascii_lowercase();
        if origin.is_empty() {
            continue;
        }
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(ConfigError::InvalidAllowedOrigins(format!(
                "origin must start with http:// or https://: {origin}"
            )));
        }
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }
    Ok(origins)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, ConfigError, DEFAULT_ALLOWED_ORIGINS, LogFormat};

    fn config_from(values: &HashMap<&str, &str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| values.get(key).map(ToString::to_string))
    }

    #[test]
    fn defaults_apply_when_unset() -> Result<(), ConfigError> {
        let config = config_from(&HashMap::new())?;
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:4200");
        assert_eq!(config.service_name, "vault-club-service");
        assert_eq!(config.network, "testnet");
        assert_eq!(config.db_url, None);
        assert_eq!(config.api_key, None);
        assert_eq!(config.auth_timeout_ms, 5_000);
        assert_eq!(config.rate_limit_max_requests, 1_000);
        assert_eq!(config.rate_limit_window_seconds, 3_600);
        assert!(!config.harvest_scheduler_enabled);
        assert_eq!(config.harvest_interval_seconds, 3_600);
        assert_eq!(config.allowed_origins.len(), DEFAULT_ALLOWED_ORIGINS.len());
        assert_eq!(config.request_timeout_ms, 15_000);
        assert_eq!(config.idempotency_claim_ttl_seconds, 60);
        assert_eq!(config.log_format, LogFormat::Text);
        Ok(())
    }

    #[test]
    fn env_overrides_are_normalized() -> Result<(), ConfigError> {
        let values = HashMap::from([
            ("VAULT_BIND_ADDR", "0.0.0.0:8080"),
            ("DATABASE_URL", "postgres://vault@localhost/vault"),
            ("VAULT_CLUB_API_KEY", "  club-key  "),
            ("VAULT_AUTH_BASE_URL", "https://auth.example.com/"),
            ("VAULT_RATE_LIMIT_MAX_REQUESTS", "25"),
            ("VAULT_HARVEST_SCHEDULER_ENABLED", "yes"),
            (
                "VAULT_ALLOWED_ORIGINS",
                "https://App.Example.com/, https://app.example.com ,",
            ),
            ("VAULT_LOG_FORMAT", "JSON"),
        ]);
        let config = config_from(&values)?;
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(
            config.db_url.as_deref(),
            Some("postgres://vault@localhost/vault")
        );
        assert_eq!(config.api_key.as_deref(), Some("club-key"));
        assert_eq!(
            config.auth_base_url.as_deref(),
            Some("https://auth.example.com")
        );
        assert_eq!(config.rate_limit_max_requests, 25);
        assert!(config.harvest_scheduler_enabled);
        assert_eq!(config.allowed_origins, vec!["https://app.example.com"]);
        assert_eq!(config.log_format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn db_url_takes_precedence_over_database_url() -> Result<(), ConfigError> {
        let values = HashMap::from([
            ("DB_URL", "postgres://primary"),
            ("DATABASE_URL", "postgres://fallback"),
        ]);
        let config = config_from(&values)?;
        assert_eq!(config.db_url.as_deref(), Some("postgres://primary"));
        Ok(())
    }

    #[test]
    fn malformed_values_are_rejected() {
        let values = HashMap::from([("VAULT_RATE_LIMIT_MAX_REQUESTS", "0")]);
        assert!(matches!(
            config_from(&values),
            Err(ConfigError::InvalidRateLimitMaxRequests(_))
        ));

        let values = HashMap::from([("VAULT_HARVEST_SCHEDULER_ENABLED", "sometimes")]);
        assert!(matches!(
            config_from(&values),
            Err(ConfigError::InvalidHarvestSchedulerEnabled(message)) if message == "sometimes"
        ));

        let values = HashMap::from([("VAULT_ALLOWED_ORIGINS", "vaultclub.app")]);
        assert!(matches!(
            config_from(&values),
            Err(ConfigError::InvalidAllowedOrigins(_))
        ));

        let values = HashMap::from([("VAULT_IDEMPOTENCY_CLAIM_TTL_SECONDS", "soon")]);
        assert!(matches!(
            config_from(&values),
            Err(ConfigError::InvalidIdempotencyClaimTtlSeconds(_))
        ));

        let values = HashMap::from([("VAULT_BIND_ADDR", "not-an-addr")]);
        assert!(matches!(
            config_from(&values),
            Err(ConfigError::BindAddrParse(_))
        ));
    }
}

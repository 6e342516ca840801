use std::collections::HashMap;
use std::env;
use crate::error::AppError;
use crate::models::Permission;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub erp: ErpConfig,
    pub validation: ValidationConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// One entry of the static API key allow-list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticKeyConfig {
    pub key: String,
    pub identity: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_duration_secs: i64,
    pub api_key_hash_secret: String,
    #[serde(skip_serializing)]
    pub static_keys: Vec<StaticKeyConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_minute: u64,
    pub per_hour: u64,
    pub key_prefix: String,
    pub cleanup_interval_secs: u64,
    /// How long a failed Redis counter store is bypassed before it is tried again.
    pub retry_cooldown_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            key_prefix: "erp-gateway".to_string(),
            cleanup_interval_secs: 300,
            retry_cooldown_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub default_ttl_secs: u64,
    /// TTL overrides keyed by resource type
    pub ttls: HashMap<String, u64>,
    pub fallback_capacity: usize,
    pub op_timeout_ms: u64,
    pub retry_cooldown_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "erp".to_string(),
            default_ttl_secs: 300,
            ttls: HashMap::new(),
            fallback_capacity: 10_000,
            op_timeout_ms: 250,
            retry_cooldown_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErpConfig {
    pub base_url: String,
    pub api_version: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cegid.com/y2".to_string(),
            api_version: "v1".to_string(),
            api_key: String::new(),
            timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub max_argument_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_argument_length: 1024,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    expected: &str,
) -> Result<T, AppError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Configuration(format!("{} must be {}", name, expected))),
        None => Ok(default),
    }
}

/// Parses `invoices=120,products=3600` into a TTL table.
fn parse_ttls(raw: &str) -> Result<HashMap<String, u64>, AppError> {
    let mut ttls = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (resource, secs) = pair
            .split_once('=')
            .ok_or_else(|| AppError::Configuration(format!("CACHE_TTLS entry '{}' must be resource=seconds", pair)))?;
        let secs = secs
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Configuration(format!("CACHE_TTLS entry '{}' has an invalid number", pair)))?;
        ttls.insert(resource.trim().to_string(), secs);
    }
    Ok(ttls)
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        // App config
        let app_name = lookup("APP_NAME").unwrap_or_else(|| "erp-gateway".to_string());
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        // Server config
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = parse_var(&lookup, "SERVER_PORT", 8000u16, "a valid port number")?;
        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        // Auth config
        let jwt_secret = lookup("JWT_SECRET")
            .ok_or_else(|| AppError::Configuration("JWT_SECRET must be set".to_string()))?;
        let jwt_issuer = lookup("JWT_ISSUER").unwrap_or_else(|| "erp-gateway".to_string());
        let token_duration_secs = parse_var(&lookup, "JWT_TOKEN_DURATION_SECS", 3600i64, "a valid number")?;
        let api_key_hash_secret = lookup("API_KEY_HASH_SECRET")
            .ok_or_else(|| AppError::Configuration("API_KEY_HASH_SECRET must be set".to_string()))?;
        let static_keys = match lookup("STATIC_API_KEYS") {
            Some(raw) => serde_json::from_str::<Vec<StaticKeyConfig>>(&raw).map_err(|e| {
                AppError::Configuration(format!("STATIC_API_KEYS must be a JSON array of keys: {}", e))
            })?,
            None => Vec::new(),
        };

        // Rate limiting
        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            per_minute: parse_var(&lookup, "RATE_LIMIT_PER_MINUTE", rate_defaults.per_minute, "a valid number")?,
            per_hour: parse_var(&lookup, "RATE_LIMIT_PER_HOUR", rate_defaults.per_hour, "a valid number")?,
            key_prefix: lookup("RATE_LIMIT_KEY_PREFIX").unwrap_or(rate_defaults.key_prefix),
            cleanup_interval_secs: parse_var(
                &lookup,
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                rate_defaults.cleanup_interval_secs,
                "a valid number",
            )?,
            retry_cooldown_secs: parse_var(
                &lookup,
                "RATE_LIMIT_RETRY_COOLDOWN_SECS",
                rate_defaults.retry_cooldown_secs,
                "a valid number",
            )?,
        };

        // Cache
        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            key_prefix: lookup("CACHE_KEY_PREFIX").unwrap_or(cache_defaults.key_prefix),
            default_ttl_secs: parse_var(&lookup, "CACHE_DEFAULT_TTL_SECS", cache_defaults.default_ttl_secs, "a valid number")?,
            ttls: match lookup("CACHE_TTLS") {
                Some(raw) => parse_ttls(&raw)?,
                None => cache_defaults.ttls,
            },
            fallback_capacity: parse_var(&lookup, "CACHE_FALLBACK_CAPACITY", cache_defaults.fallback_capacity, "a valid number")?,
            op_timeout_ms: parse_var(&lookup, "CACHE_OP_TIMEOUT_MS", cache_defaults.op_timeout_ms, "a valid number")?,
            retry_cooldown_secs: parse_var(
                &lookup,
                "CACHE_RETRY_COOLDOWN_SECS",
                cache_defaults.retry_cooldown_secs,
                "a valid number",
            )?,
            sweep_interval_secs: parse_var(
                &lookup,
                "CACHE_SWEEP_INTERVAL_SECS",
                cache_defaults.sweep_interval_secs,
                "a valid number",
            )?,
        };

        // Upstream ERP
        let erp_defaults = ErpConfig::default();
        let erp = ErpConfig {
            base_url: lookup("ERP_BASE_URL").unwrap_or(erp_defaults.base_url),
            api_version: lookup("ERP_API_VERSION").unwrap_or(erp_defaults.api_version),
            api_key: lookup("ERP_API_KEY").unwrap_or_default(),
            timeout_ms: parse_var(&lookup, "ERP_TIMEOUT_MS", erp_defaults.timeout_ms, "a valid number")?,
            max_retries: parse_var(&lookup, "ERP_MAX_RETRIES", erp_defaults.max_retries, "a valid number")?,
        };

        let validation = ValidationConfig {
            max_argument_length: parse_var(
                &lookup,
                "MAX_ARGUMENT_LENGTH",
                ValidationConfig::default().max_argument_length,
                "a valid number",
            )?,
        };

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
            },
            auth: AuthConfig {
                jwt_secret,
                jwt_issuer,
                token_duration_secs,
                api_key_hash_secret,
                static_keys,
            },
            rate_limit,
            cache,
            erp,
            validation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_minimal_settings_use_defaults() {
        let settings = AppSettings::from_lookup(lookup_from(&[
            ("JWT_SECRET", "secret"),
            ("API_KEY_HASH_SECRET", "pepper"),
        ]))
        .unwrap();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.rate_limit.per_minute, 60);
        assert_eq!(settings.rate_limit.retry_cooldown_secs, 30);
        assert_eq!(settings.cache.default_ttl_secs, 300);
        assert!(settings.cache.redis_url.is_none());
        assert!(settings.auth.static_keys.is_empty());
    }

    #[test]
    fn test_missing_jwt_secret_is_a_configuration_error() {
        let result = AppSettings::from_lookup(lookup_from(&[("API_KEY_HASH_SECRET", "pepper")]));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_static_keys_and_ttls_are_parsed() {
        let settings = AppSettings::from_lookup(lookup_from(&[
            ("JWT_SECRET", "secret"),
            ("API_KEY_HASH_SECRET", "pepper"),
            (
                "STATIC_API_KEYS",
                r#"[{"key": "k-1", "identity": "reporting", "permissions": ["invoices:read", "prompts:read"]}]"#,
            ),
            ("CACHE_TTLS", "invoices=120, products=3600"),
            ("REDIS_URL", "redis://127.0.0.1:6379/0"),
        ]))
        .unwrap();
        assert_eq!(settings.auth.static_keys.len(), 1);
        assert_eq!(settings.auth.static_keys[0].permissions.len(), 2);
        assert_eq!(settings.cache.ttls.get("invoices"), Some(&120));
        assert_eq!(settings.cache.ttls.get("products"), Some(&3600));
        assert_eq!(settings.cache.redis_url.as_deref(), Some("redis://127.0.0.1:6379/0"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let result = AppSettings::from_lookup(lookup_from(&[
            ("JWT_SECRET", "secret"),
            ("API_KEY_HASH_SECRET", "pepper"),
            ("RATE_LIMIT_PER_MINUTE", "lots"),
        ]));
        assert!(matches!(result, Err(AppError::Configuration(_))));

        assert!(parse_ttls("invoices").is_err());
        assert!(parse_ttls("invoices=soon").is_err());
    }
}

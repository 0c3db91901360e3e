use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use schedule::{DEFAULT_COUNTRY_CODE, DEFAULT_GRACE_DAYS};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {message}")]
    Invalid { key: String, message: String },

    #[error("Missing required setting {0}")]
    Missing(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgrest,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgrest" | "supabase" => Ok(StoreBackend::Postgrest),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub base_domain: String,
    pub store_backend: StoreBackend,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub grace_days: u32,
    pub default_country_code: String,
    pub guidelines_path: String,
    pub cors_origin: Option<String>,
    pub super_admin_email: Option<String>,
    pub super_admin_password: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let store_backend = try_load("STORE_BACKEND", "memory")?;

        let (supabase_url, supabase_service_key) = match store_backend {
            StoreBackend::Postgrest => (
                Some(var("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL".into()))?),
                Some(
                    read_secret("SUPABASE_SERVICE_KEY")
                        .ok_or(ConfigError::Missing("SUPABASE_SERVICE_KEY".into()))?,
                ),
            ),
            StoreBackend::Memory => (var("SUPABASE_URL"), read_secret("SUPABASE_SERVICE_KEY")),
        };

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            base_domain: try_load("BASE_DOMAIN", "localhost")?,
            store_backend,
            supabase_url,
            supabase_service_key,
            jwt_secret: read_secret("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET".into()))?,
            token_ttl_days: try_load("TOKEN_TTL_DAYS", "7")?,
            grace_days: try_load("OVERDUE_GRACE_DAYS", &DEFAULT_GRACE_DAYS.to_string())?,
            default_country_code: try_load("DEFAULT_COUNTRY_CODE", DEFAULT_COUNTRY_CODE)?,
            guidelines_path: try_load("GUIDELINES_PATH", "data/guidelines.json")?,
            cors_origin: var("CORS_ORIGIN"),
            super_admin_email: var("SUPER_ADMIN_EMAIL"),
            super_admin_password: read_secret("SUPER_ADMIN_PASSWORD"),
        })
    }
}

impl Default for Config {
    /// In-memory settings for tests and local runs.
    fn default() -> Self {
        Self {
            port: 0,
            base_domain: "localhost".to_string(),
            store_backend: StoreBackend::Memory,
            supabase_url: None,
            supabase_service_key: None,
            jwt_secret: "development-secret".to_string(),
            token_ttl_days: 7,
            grace_days: DEFAULT_GRACE_DAYS,
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            guidelines_path: "data/guidelines.json".to_string(),
            cors_origin: None,
            super_admin_email: None,
            super_admin_password: None,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key: key.to_string(),
                message: e.to_string(),
            }
        })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Some(secret.trim().to_string()),
        Err(e) => {
            warn!("Failed to read {secret_name} from file: {e}, trying environment");
            var(secret_name)
        }
    }
}

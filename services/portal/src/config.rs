//! services/portal/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Machine-to-machine credentials for the client-credentials grant.
#[derive(Clone, Debug)]
pub struct M2mCredentials {
    pub app_id: String,
    pub app_secret: String,
}

/// Identity provider settings.
#[derive(Clone, Debug)]
pub struct LogtoConfig {
    pub endpoint: String,
    pub app_id: String,
    pub app_secret: String,
    /// The API resource indicator access tokens are scoped to.
    pub api_resource: String,
    pub scopes: String,
    pub m2m: Option<M2mCredentials>,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Public URL of this service, used to build redirect URIs.
    pub base_url: String,
    pub cors_origin: String,
    /// Base URL of the Turing API. Absent means every backend call fails fast.
    pub turing_api: Option<String>,
    pub logto: LogtoConfig,
    pub log_level: Level,
    pub query_stale_after: Duration,
    pub upload_chunk_size: usize,
    pub expiry_redirect_delay: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
        };

        // --- Server Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let base_url = trim_slash(
            lookup("BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
        );
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Backend ---
        let turing_api = lookup("TURING_API")
            .or_else(|| lookup("NEXT_PUBLIC_TURING_API"))
            .filter(|v| !v.trim().is_empty())
            .map(trim_slash);

        // --- Identity Provider ---
        let m2m = match (lookup("LOGTO_M2M_APP_ID"), lookup("LOGTO_M2M_APP_SECRET")) {
            (Some(app_id), Some(app_secret)) => Some(M2mCredentials { app_id, app_secret }),
            _ => None,
        };
        let logto = LogtoConfig {
            endpoint: trim_slash(required("LOGTO_ENDPOINT")?),
            app_id: required("LOGTO_APP_ID")?,
            app_secret: required("LOGTO_APP_SECRET")?,
            api_resource: required("LOGTO_API_RESOURCE")?,
            scopes: lookup("LOGTO_SCOPES")
                .unwrap_or_else(|| "openid profile email offline_access".to_string()),
            m2m,
        };

        // --- Tuning ---
        let query_stale_after = Duration::from_secs(parse_or(&lookup, "QUERY_STALE_SECS", 30)?);
        let upload_chunk_size = parse_or(&lookup, "UPLOAD_CHUNK_SIZE", 5 * 1024 * 1024)?;
        let expiry_redirect_delay =
            Duration::from_millis(parse_or(&lookup, "EXPIRY_REDIRECT_DELAY_MS", 100)?);

        if upload_chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "UPLOAD_CHUNK_SIZE".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            base_url,
            cors_origin,
            turing_api,
            logto,
            log_level,
            query_stale_after,
            upload_chunk_size,
            expiry_redirect_delay,
        })
    }

    /// The OAuth redirect URI registered with the identity provider.
    pub fn sign_in_callback_url(&self) -> String {
        format!("{}/api/logto/sign-in-callback", self.base_url)
    }
}

fn trim_slash(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const LOGTO: [(&str, &str); 4] = [
        ("LOGTO_ENDPOINT", "https://auth.example.com/"),
        ("LOGTO_APP_ID", "app"),
        ("LOGTO_APP_SECRET", "secret"),
        ("LOGTO_API_RESOURCE", "https://api.turing.test"),
    ];

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let config = Config::from_lookup(env(&LOGTO)).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.logto.endpoint, "https://auth.example.com");
        assert!(config.turing_api.is_none());
        assert!(config.logto.m2m.is_none());
        assert_eq!(config.query_stale_after, Duration::from_secs(30));
        assert_eq!(config.upload_chunk_size, 5 * 1024 * 1024);
        assert_eq!(
            config.sign_in_callback_url(),
            "http://localhost:3000/api/logto/sign-in-callback"
        );
    }

    #[test]
    fn public_turing_api_name_is_accepted() {
        let mut pairs = LOGTO.to_vec();
        pairs.push(("NEXT_PUBLIC_TURING_API", "https://turing.test/v1/"));
        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.turing_api.as_deref(), Some("https://turing.test/v1"));
    }

    #[test]
    fn missing_identity_provider_settings_are_reported() {
        let err = Config::from_lookup(env(&LOGTO[..3])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "LOGTO_API_RESOURCE"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let mut pairs = LOGTO.to_vec();
        pairs.push(("UPLOAD_CHUNK_SIZE", "lots"));
        let err = Config::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "UPLOAD_CHUNK_SIZE"));
    }
}

// Storefront configuration

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

pub const ENV_BACKEND_URL: &str = "STOREFRONT_BACKEND_URL";
pub const ENV_API_KEY: &str = "STOREFRONT_API_KEY";
pub const ENV_TIMEOUT_MS: &str = "STOREFRONT_TIMEOUT_MS";
pub const ENV_STORAGE_PATH: &str = "STOREFRONT_STORAGE_PATH";
pub const ENV_REQUIRE_CONTACT: &str = "STOREFRONT_REQUIRE_CONTACT";

// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorefrontConfig {
    pub backend: BackendConfig,
    // Where the cart and date mirrors live; None keeps them in memory only
    pub storage_path: Option<PathBuf>,
    // Demand contact details and a payment method before submitting a checkout
    pub require_contact: bool,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            storage_path: None,
            require_contact: false,
        }
    }
}

impl StorefrontConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    // Backend URL and API key are required; everything else falls back to the defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
        };

        let timeout_ms = match lookup(ENV_TIMEOUT_MS) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: ENV_TIMEOUT_MS.to_string(),
                value: raw.clone(),
            })?,
            None => defaults.backend.timeout_ms,
        };

        let require_contact = match lookup(ENV_REQUIRE_CONTACT) {
            Some(raw) => parse_flag(&raw).ok_or_else(|| ConfigError::InvalidValue {
                name: ENV_REQUIRE_CONTACT.to_string(),
                value: raw.clone(),
            })?,
            None => defaults.require_contact,
        };

        Ok(Self {
            backend: BackendConfig {
                base_url: required(ENV_BACKEND_URL)?,
                api_key: required(ENV_API_KEY)?,
                timeout_ms,
            },
            storage_path: lookup(ENV_STORAGE_PATH)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            require_contact,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

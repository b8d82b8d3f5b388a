//! Application configuration module
//! Handles environment variable loading, configuration validation and
//! gateway settings. Per-tenant credentials resolved here feed the default
//! tenant; marketplace resolvers can layer on top.

use crate::mpesa::tenant::{Environment, IdentifierType, TenantConfig};
use crate::orders::OrderStatus;
use std::env;
use std::str::FromStr;
use thiserror::Error;

// The provider's published sandbox app; lets a fresh checkout work against
// the sandbox with zero configuration. `validate()` refuses them in live.
const SANDBOX_APP_KEY: &str = "9v38Dtu5u2BpsITPmLcXNWGMsjZRWSTG";
const SANDBOX_APP_SECRET: &str = "bclwIPkcRqw61yUt";
const SANDBOX_SHORTCODE: &str = "174379";
const SANDBOX_PASSKEY: &str =
    "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919";

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVariable(String),
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL the provider calls back into.
    pub public_base_url: String,
}

/// Gateway (default tenant) configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub env: Environment,
    pub app_key: String,
    pub app_secret: String,
    pub head_office: String,
    pub shortcode: String,
    pub id_type: IdentifierType,
    pub passkey: String,
    pub initiator: String,
    pub initiator_password: String,
    pub account_reference: String,
    pub signature: String,
    pub completion_status: OrderStatus,
    pub trading_name: String,
    pub debug: bool,
    pub cert_dir: String,
    pub reversal_statuses: Vec<String>,
    pub request_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.gateway.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if !self.public_base_url.starts_with("http") {
            return Err(ConfigError::InvalidValue(
                "PUBLIC_BASE_URL must be an absolute URL".to_string(),
            ));
        }
        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_name = env::var("MPESA_ENV").unwrap_or_else(|_| "sandbox".to_string());
        let env = Environment::from_str(&env_name)
            .map_err(|_| ConfigError::InvalidValue(format!("MPESA_ENV={}", env_name)))?;

        let id_type_raw = env::var("MPESA_ID_TYPE").unwrap_or_else(|_| "paybill".to_string());
        let id_type = IdentifierType::from_str(&id_type_raw)
            .map_err(|_| ConfigError::InvalidValue(format!("MPESA_ID_TYPE={}", id_type_raw)))?;

        let completion_raw =
            env::var("MPESA_COMPLETION_STATUS").unwrap_or_else(|_| "completed".to_string());
        let completion_status = OrderStatus::from_str(&completion_raw).map_err(|_| {
            ConfigError::InvalidValue(format!("MPESA_COMPLETION_STATUS={}", completion_raw))
        })?;

        let shortcode =
            env::var("MPESA_SHORTCODE").unwrap_or_else(|_| SANDBOX_SHORTCODE.to_string());
        Ok(GatewayConfig {
            env,
            app_key: env::var("MPESA_APP_KEY").unwrap_or_else(|_| SANDBOX_APP_KEY.to_string()),
            app_secret: env::var("MPESA_APP_SECRET")
                .unwrap_or_else(|_| SANDBOX_APP_SECRET.to_string()),
            head_office: env::var("MPESA_HEAD_OFFICE").unwrap_or_else(|_| shortcode.clone()),
            shortcode,
            id_type,
            passkey: env::var("MPESA_PASSKEY").unwrap_or_else(|_| SANDBOX_PASSKEY.to_string()),
            initiator: env::var("MPESA_INITIATOR").unwrap_or_else(|_| "test".to_string()),
            initiator_password: env::var("MPESA_INITIATOR_PASSWORD").unwrap_or_default(),
            account_reference: env::var("MPESA_ACCOUNT_REFERENCE").unwrap_or_default(),
            signature: env::var("MPESA_SIGNATURE")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().simple().to_string()),
            completion_status,
            trading_name: env::var("MPESA_TRADING_NAME")
                .unwrap_or_else(|_| "Lipwa Store".to_string()),
            debug: env::var("MPESA_DEBUG")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            cert_dir: env::var("MPESA_CERT_DIR").unwrap_or_else(|_| "certs".to_string()),
            reversal_statuses: env::var("MPESA_REVERSAL_STATUSES")
                .unwrap_or_else(|_| "cancelled".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            request_timeout_secs: env::var("MPESA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.env == Environment::Live && self.app_key == SANDBOX_APP_KEY {
            return Err(ConfigError::InvalidValue(
                "MPESA_APP_KEY must be set for the live environment".to_string(),
            ));
        }
        if self.shortcode.trim().is_empty() || self.head_office.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "MPESA_SHORTCODE cannot be empty".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "MPESA_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Credential bundle for the default tenant (id 0).
    pub fn default_tenant(&self) -> TenantConfig {
        TenantConfig {
            tenant_id: 0,
            env: self.env,
            app_key: self.app_key.clone(),
            app_secret: self.app_secret.clone(),
            head_office: self.head_office.clone(),
            shortcode: self.shortcode.clone(),
            id_type: self.id_type,
            passkey: self.passkey.clone(),
            initiator: self.initiator.clone(),
            initiator_password: self.initiator_password.clone(),
            account_reference: self.account_reference.clone(),
            signature: self.signature.clone(),
            completion_status: self.completion_status,
            trading_name: self.trading_name.clone(),
            debug: self.debug,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "plain".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Plain,
        };
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format,
        })
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "development_only_secret_for_local_order_settlement_testing_0123456789";

/// Payment gateway session and callback settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Session initiation endpoint of the hosted payment page provider
    #[validate(url)]
    #[serde(default = "default_gateway_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub store_id: String,

    #[serde(default)]
    pub store_password: String,

    #[validate(length(equal = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Backend endpoints the provider calls back after checkout
    #[validate(url)]
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[validate(url)]
    #[serde(default = "default_fail_url")]
    pub fail_url: String,
    #[validate(url)]
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,

    /// Storefront pages the buyer lands on after a callback was processed
    #[validate(url)]
    #[serde(default = "default_frontend_success_url")]
    pub frontend_success_url: String,
    #[validate(url)]
    #[serde(default = "default_frontend_fail_url")]
    pub frontend_fail_url: String,
    #[validate(url)]
    #[serde(default = "default_frontend_cancel_url")]
    pub frontend_cancel_url: String,

    #[validate(range(min = 1))]
    #[serde(default = "default_circuit_breaker_failures")]
    pub failure_threshold: u32,

    #[serde(default = "default_circuit_breaker_timeout")]
    pub reset_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: default_gateway_api_url(),
            store_id: String::new(),
            store_password: String::new(),
            currency: default_currency(),
            request_timeout_secs: default_gateway_timeout_secs(),
            success_url: default_success_url(),
            fail_url: default_fail_url(),
            cancel_url: default_cancel_url(),
            frontend_success_url: default_frontend_success_url(),
            frontend_fail_url: default_frontend_fail_url(),
            frontend_cancel_url: default_frontend_cancel_url(),
            failure_threshold: default_circuit_breaker_failures(),
            reset_timeout_secs: default_circuit_breaker_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Outbound mail relay settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    /// HTTP relay endpoint; when unset, emails are only logged
    #[validate(url)]
    #[serde(default)]
    pub relay_url: Option<String>,

    #[validate(email)]
    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_mail_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            from_address: default_from_address(),
            request_timeout_secs: default_mail_timeout_secs(),
        }
    }
}

/// Where rendered invoices are stored and how they are addressed
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DocumentConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    #[validate(url)]
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            public_base_url: default_public_base_url(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SettlementConfig {
    /// Upper bound for each invoice/upload/notification step on the success path
    #[validate(range(min = 1))]
    #[serde(default = "default_side_effect_timeout_secs")]
    pub side_effect_timeout_secs: u64,

    /// Enforce the order status transition table on admin updates
    #[serde(default)]
    pub strict_status_transitions: bool,

    #[validate(length(min = 1))]
    #[serde(default = "default_invoice_issuer")]
    pub invoice_issuer: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            side_effect_timeout_secs: default_side_effect_timeout_secs(),
            strict_status_transitions: false,
            invoice_issuer: default_invoice_issuer(),
        }
    }
}

impl SettlementConfig {
    pub fn side_effect_timeout(&self) -> Duration {
        Duration::from_secs(self.side_effect_timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// HS256 secret used to validate bearer tokens
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    #[validate(range(min = 60, max = 86400))]
    #[serde(default = "default_jwt_expiration_secs")]
    pub jwt_expiration_secs: u64,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[validate(range(min = 1))]
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[validate]
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[validate]
    #[serde(default)]
    pub mail: MailConfig,

    #[validate]
    #[serde(default)]
    pub documents: DocumentConfig,

    #[validate]
    #[serde(default)]
    pub settlement: SettlementConfig,
}

impl AppConfig {
    /// Builds a configuration with defaults for everything except the
    /// connection string, signing secret and environment.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration_secs: default_jwt_expiration_secs(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            gateway: GatewayConfig::default(),
            mail: MailConfig::default(),
            documents: DocumentConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    /// Parsed, non-empty CORS origins
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.is_development()
            && (self.gateway.store_id.trim().is_empty()
                || self.gateway.store_password.trim().is_empty())
        {
            let mut err = ValidationError::new("gateway_credentials_required");
            err.message = Some(
                "Set APP__GATEWAY__STORE_ID and APP__GATEWAY__STORE_PASSWORD outside development"
                    .into(),
            );
            errors.add("gateway", err);
        }

        if !self.is_development() && self.cors_origins().is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message =
                Some("Set APP__CORS_ALLOWED_ORIGINS for non-development environments".into());
            errors.add("cors_allowed_origins", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration_secs() -> u64 {
    3600
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_gateway_api_url() -> String {
    "https://sandbox.sslcommerz.com/gwprocess/v4/api.php".to_string()
}

fn default_currency() -> String {
    "BDT".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_success_url() -> String {
    "http://localhost:8080/api/v1/payments/success".to_string()
}
fn default_fail_url() -> String {
    "http://localhost:8080/api/v1/payments/fail".to_string()
}
fn default_cancel_url() -> String {
    "http://localhost:8080/api/v1/payments/cancel".to_string()
}

fn default_frontend_success_url() -> String {
    "http://localhost:3000/payment/success".to_string()
}
fn default_frontend_fail_url() -> String {
    "http://localhost:3000/payment/fail".to_string()
}
fn default_frontend_cancel_url() -> String {
    "http://localhost:3000/payment/cancel".to_string()
}

fn default_circuit_breaker_failures() -> u32 {
    5
}
fn default_circuit_breaker_timeout() -> u64 {
    30
}

fn default_from_address() -> String {
    "no-reply@localhost.localdomain".to_string()
}

fn default_mail_timeout_secs() -> u64 {
    15
}

fn default_storage_dir() -> String {
    "storage/invoices".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/invoices".to_string()
}

fn default_side_effect_timeout_secs() -> u64 {
    30
}

fn default_invoice_issuer() -> String {
    "Commerce Settlement".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = ["your-secret-key", "default-secret-key", "changeme"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("commerce_settlement={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(CONFIG_DIR, &run_env)
}

pub fn load_config_from(config_dir: &str, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(config_dir).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://settlement.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?;

    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let config = builder
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", config_dir, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a secure random string.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SECRET: &str = "k3v9Qz7XwL2pN8rT5yB1mC4dF6gH0jSe2uR8aWq";

    fn production_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            format!("{}-production", SECRET),
            "production".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = AppConfig::new("sqlite::memory:".into(), SECRET.into(), "development".into());
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(!cfg.settlement.strict_status_transitions);
        assert_eq!(cfg.gateway.currency, "BDT");
    }

    #[test]
    fn production_requires_gateway_credentials_and_origins() {
        let cfg = production_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("gateway"));
        assert!(errors.errors().contains_key("cors_allowed_origins"));
    }

    #[test]
    fn production_with_credentials_passes() {
        let mut cfg = production_config();
        cfg.gateway.store_id = "store".into();
        cfg.gateway.store_password = "store@ssl".into();
        cfg.cors_allowed_origins = Some("https://shop.example.com, ".into());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.cors_origins(), vec!["https://shop.example.com"]);
    }

    #[test]
    fn weak_jwt_secret_is_rejected() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            "development".into(),
        );
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));
    }

    #[test]
    fn jwt_secret_needs_thirty_two_characters() {
        let short = &SECRET[..31];
        let cfg = AppConfig::new("sqlite::memory:".into(), short.into(), "development".into());
        assert!(cfg.validate().is_err());

        let exact = &SECRET[..32];
        let cfg = AppConfig::new("sqlite::memory:".into(), exact.into(), "development".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_layers_are_applied() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
                database_url = "sqlite://from-file.db"
                [settlement]
                strict_status_transitions = true
                side_effect_timeout_secs = 5
                [gateway]
                store_id = "teststore"
            "#,
        )
        .unwrap();

        let cfg = load_config_from(dir.path().to_str().unwrap(), "development").unwrap();
        assert_eq!(cfg.database_url, "sqlite://from-file.db");
        assert!(cfg.settlement.strict_status_transitions);
        assert_eq!(cfg.settlement.side_effect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.gateway.store_id, "teststore");
        assert_eq!(cfg.gateway.currency, "BDT");
    }
}

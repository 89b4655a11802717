use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::workflows::accreditation::WorkflowConfig;

const DEVELOPMENT_KEY_PEPPER: &str = "accredit-development-pepper";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub access: AccessConfig,
    pub workflow: WorkflowConfig,
    pub templates_csv: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let key_pepper = match env::var("ACCREDIT_KEY_PEPPER") {
            Ok(value) if !value.trim().is_empty() => value,
            _ if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingKeyPepper)
            }
            _ => DEVELOPMENT_KEY_PEPPER.to_string(),
        };

        let mut workflow = WorkflowConfig::default();
        if let Ok(raw) = env::var("ACCREDIT_TRANSITION_RETRIES") {
            workflow.transition_retries = raw
                .trim()
                .parse::<u8>()
                .map_err(|_| ConfigError::InvalidRetries)?;
        }
        if let Ok(raw) = env::var("ACCREDIT_MISMATCH_TOLERANCE") {
            let tolerance = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidTolerance)?;
            if !tolerance.is_finite() || !(0.0..1.0).contains(&tolerance) {
                return Err(ConfigError::InvalidTolerance);
            }
            workflow.evaluation.mismatch_tolerance = tolerance;
        }
        if let Ok(raw) = env::var("ACCREDIT_MANDATORY_DOCUMENTS") {
            workflow.mandatory_documents = raw
                .split(',')
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(str::to_string)
                .collect();
        }

        let templates_csv = env::var("ACCREDIT_TEMPLATES_CSV")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            access: AccessConfig { key_pepper },
            workflow,
            templates_csv,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Secret material used when hashing API keys.
#[derive(Clone)]
pub struct AccessConfig {
    pub key_pepper: String,
}

impl fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessConfig")
            .field("key_pepper", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingKeyPepper,
    InvalidRetries,
    InvalidTolerance,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingKeyPepper => {
                write!(f, "ACCREDIT_KEY_PEPPER must be set in production")
            }
            ConfigError::InvalidRetries => {
                write!(f, "ACCREDIT_TRANSITION_RETRIES must be a valid u8")
            }
            ConfigError::InvalidTolerance => {
                write!(f, "ACCREDIT_MISMATCH_TOLERANCE must be a number in [0, 1)")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "ACCREDIT_KEY_PEPPER",
            "ACCREDIT_TRANSITION_RETRIES",
            "ACCREDIT_MISMATCH_TOLERANCE",
            "ACCREDIT_MANDATORY_DOCUMENTS",
            "ACCREDIT_TEMPLATES_CSV",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.access.key_pepper, DEVELOPMENT_KEY_PEPPER);
        assert_eq!(config.workflow, WorkflowConfig::default());
        assert!(config.templates_csv.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn production_requires_key_pepper() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        let result = AppConfig::load();
        reset_env();
        assert!(matches!(result, Err(ConfigError::MissingKeyPepper)));
    }

    #[test]
    fn workflow_overrides_are_parsed() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ACCREDIT_TRANSITION_RETRIES", "7");
        env::set_var("ACCREDIT_MISMATCH_TOLERANCE", "0.1");
        env::set_var("ACCREDIT_MANDATORY_DOCUMENTS", "Land Deed, ,Fire NOC");
        let config = AppConfig::load().expect("config loads");
        reset_env();
        assert_eq!(config.workflow.transition_retries, 7);
        assert!((config.workflow.evaluation.mismatch_tolerance - 0.1).abs() < f64::EPSILON);
        assert_eq!(
            config.workflow.mandatory_documents,
            vec!["Land Deed".to_string(), "Fire NOC".to_string()]
        );
    }

    #[test]
    fn rejects_out_of_range_tolerance() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ACCREDIT_MISMATCH_TOLERANCE", "1.5");
        let result = AppConfig::load();
        reset_env();
        assert!(matches!(result, Err(ConfigError::InvalidTolerance)));
    }
}

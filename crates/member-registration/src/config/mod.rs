use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono::Duration;

use crate::registration::DraftPolicy;

const DEFAULT_AUTOSAVE_MS: &str = "1000";
const DEFAULT_DRAFT_TTL_HOURS: &str = "24";

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

/// Top-level configuration for the registration service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub registration: RegistrationConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            registration: RegistrationConfig::from_env()?,
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Draft storage and autosave settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationConfig {
    /// Directory for file-backed drafts; `None` keeps drafts in memory.
    pub draft_dir: Option<PathBuf>,
    pub autosave_window_ms: u64,
    pub draft_ttl_hours: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            draft_dir: None,
            autosave_window_ms: 1_000,
            draft_ttl_hours: 24,
        }
    }
}

impl RegistrationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let draft_dir = env::var("REGISTRATION_DRAFT_DIR")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        let autosave_window_ms = env::var("REGISTRATION_AUTOSAVE_MS")
            .unwrap_or_else(|_| DEFAULT_AUTOSAVE_MS.to_string())
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidAutosaveWindow)?;

        let draft_ttl_hours = env::var("REGISTRATION_DRAFT_TTL_HOURS")
            .unwrap_or_else(|_| DEFAULT_DRAFT_TTL_HOURS.to_string())
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|hours| *hours > 0)
            .ok_or(ConfigError::InvalidDraftTtl)?;

        Ok(Self {
            draft_dir,
            autosave_window_ms,
            draft_ttl_hours,
        })
    }

    pub fn policy(&self) -> DraftPolicy {
        DraftPolicy {
            autosave_window: Duration::milliseconds(
                i64::try_from(self.autosave_window_ms).unwrap_or(i64::MAX),
            ),
            ttl: Duration::hours(i64::from(self.draft_ttl_hours)),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAutosaveWindow,
    InvalidDraftTtl,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAutosaveWindow => write!(
                f,
                "REGISTRATION_AUTOSAVE_MS must be a whole number of milliseconds"
            ),
            ConfigError::InvalidDraftTtl => write!(
                f,
                "REGISTRATION_DRAFT_TTL_HOURS must be a positive whole number of hours"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidAutosaveWindow
            | ConfigError::InvalidDraftTtl => None,
        }
    }
}

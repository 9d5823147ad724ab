use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::ledger::domain::{Amount, GradeLevel, LevelLadder};

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
    pub ledger: LedgerConfig,
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
                with_target: environment != AppEnvironment::Production,
            },
            ledger: LedgerConfig::from_env()?,
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
    pub with_target: bool,
}

pub const DEFAULT_CUTOVER_MONTH: u32 = 9;
pub const DEFAULT_ADMISSION_THRESHOLD: f64 = 10.0;
pub const DEFAULT_REFERENCE_TUITION: Amount = 150_000;

/// Business dials for the tuition ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// First month of a school year; earlier months belong to the previous year.
    pub cutover_month: u32,
    /// Minimum annual average for promotion to the next level.
    pub admission_threshold: f64,
    /// Tuition used to suggest discount-type percentages when no student tuition is known.
    pub reference_tuition: Amount,
    pub levels: LevelLadder,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cutover_month: DEFAULT_CUTOVER_MONTH,
            admission_threshold: DEFAULT_ADMISSION_THRESHOLD,
            reference_tuition: DEFAULT_REFERENCE_TUITION,
            levels: LevelLadder::standard(),
        }
    }
}

impl LedgerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cutover_month = match env::var("LEDGER_CUTOVER_MONTH") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|month| (1..=12).contains(month))
                .ok_or(ConfigError::InvalidCutoverMonth)?,
            Err(_) => defaults.cutover_month,
        };

        let admission_threshold = match env::var("LEDGER_ADMISSION_THRESHOLD") {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite() && *value >= 0.0)
                .ok_or(ConfigError::InvalidAdmissionThreshold)?,
            Err(_) => defaults.admission_threshold,
        };

        let reference_tuition = match env::var("LEDGER_REFERENCE_TUITION") {
            Ok(raw) => raw
                .trim()
                .parse::<Amount>()
                .ok()
                .filter(|amount| *amount > 0)
                .ok_or(ConfigError::InvalidReferenceTuition)?,
            Err(_) => defaults.reference_tuition,
        };

        let levels = match env::var("LEDGER_LEVELS") {
            Ok(raw) => {
                let levels: Vec<GradeLevel> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|level| !level.is_empty())
                    .map(GradeLevel::new)
                    .collect();
                LevelLadder::new(levels).ok_or(ConfigError::EmptyLevelLadder)?
            }
            Err(_) => defaults.levels,
        };

        Ok(Self {
            cutover_month,
            admission_threshold,
            reference_tuition,
            levels,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidCutoverMonth,
    InvalidAdmissionThreshold,
    InvalidReferenceTuition,
    EmptyLevelLadder,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidCutoverMonth => {
                write!(f, "LEDGER_CUTOVER_MONTH must be a month number between 1 and 12")
            }
            ConfigError::InvalidAdmissionThreshold => {
                write!(f, "LEDGER_ADMISSION_THRESHOLD must be a non-negative number")
            }
            ConfigError::InvalidReferenceTuition => {
                write!(f, "LEDGER_REFERENCE_TUITION must be a positive whole amount")
            }
            ConfigError::EmptyLevelLadder => {
                write!(f, "LEDGER_LEVELS must list at least one level")
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

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) fn env_guard() -> &'static std::sync::Mutex<()> {
    static GUARD: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    GUARD.get_or_init(|| std::sync::Mutex::new(()))
}

use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

const DEVELOPMENT_TOKEN_SECRET: &str = "clearance-development-secret";

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
    pub auth: AuthConfig,
    pub clearance: ClearanceConfig,
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

        let token_secret = match env::var("APP_TOKEN_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingTokenSecret)
            }
            _ => DEVELOPMENT_TOKEN_SECRET.to_string(),
        };
        let token_lifetime_secs = env::var("APP_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidTokenLifetime)?;
        let pepper = env::var("APP_PASSWORD_PEPPER")
            .ok()
            .filter(|value| !value.is_empty());

        let certificate_dir = env::var("APP_CERTIFICATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("certificates"));
        let bootstrap_admin = match (env::var("APP_ADMIN_EMAIL"), env::var("APP_ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) if !email.is_empty() && !password.is_empty() => {
                Some(AdminBootstrap { email, password })
            }
            _ => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            auth: AuthConfig {
                token_secret,
                token_issuer: "clearance".to_string(),
                token_lifetime_secs,
                pepper,
                ..AuthConfig::default()
            },
            clearance: ClearanceConfig {
                certificate_dir,
                bootstrap_admin,
            },
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

/// Credential hashing and session token settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_issuer: String,
    pub token_lifetime_secs: u64,
    pub pepper: Option<String>,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
}

impl AuthConfig {
    /// Cheap hashing parameters for test suites and local demos.
    pub fn for_tests() -> Self {
        Self {
            token_secret: "clearance-test-secret".to_string(),
            token_issuer: "clearance-test".to_string(),
            token_lifetime_secs: 900,
            pepper: None,
            hash_memory_kib: 64,
            hash_iterations: 1,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: DEVELOPMENT_TOKEN_SECRET.to_string(),
            token_issuer: "clearance".to_string(),
            token_lifetime_secs: 3600,
            pepper: None,
            hash_memory_kib: 19 * 1024,
            hash_iterations: 2,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_issuer", &self.token_issuer)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("pepper", &self.pepper.as_ref().map(|_| "<redacted>"))
            .field("hash_memory_kib", &self.hash_memory_kib)
            .field("hash_iterations", &self.hash_iterations)
            .finish_non_exhaustive()
    }
}

/// Workflow collaborators configured at the composition root.
#[derive(Debug, Clone)]
pub struct ClearanceConfig {
    pub certificate_dir: PathBuf,
    pub bootstrap_admin: Option<AdminBootstrap>,
}

#[derive(Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingTokenSecret,
    InvalidTokenLifetime,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingTokenSecret => {
                write!(f, "APP_TOKEN_SECRET must be set in production")
            }
            ConfigError::InvalidTokenLifetime => {
                write!(f, "APP_TOKEN_TTL_SECS must be a positive integer")
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

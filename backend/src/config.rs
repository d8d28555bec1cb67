//! Configuration for the auth service.

use std::env;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub firebase: FirebaseConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session token signing.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Shared HS256 secret.
    pub secret: String,
    /// Token lifetime, e.g. `3600`, `45m`, `1h`, `7d`.
    #[serde(default = "default_expires_in")]
    pub expires_in: String,
}

impl JwtConfig {
    pub fn ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.expires_in)
    }
}

/// Firebase project and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseConfig {
    /// Firebase project id. Falls back to the service account's project.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Inline service-account JSON. When absent, application-default
    /// credentials are used.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,
    #[serde(default = "default_identity_toolkit_url")]
    pub identity_toolkit_url: String,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            credentials: None,
            jwks_url: default_jwks_url(),
            identity_toolkit_url: default_identity_toolkit_url(),
            metadata_url: default_metadata_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// `*` or a comma-separated list of origins.
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

impl CorsConfig {
    /// Explicit origins, or `None` when any origin is allowed.
    pub fn origin_list(&self) -> Option<Vec<String>> {
        if self.origins.trim() == "*" {
            return None;
        }
        Some(
            self.origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3001
}
fn default_expires_in() -> String {
    "1h".to_string()
}
fn default_jwks_url() -> String {
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
        .to_string()
}
fn default_identity_toolkit_url() -> String {
    "https://identitytoolkit.googleapis.com".to_string()
}
fn default_metadata_url() -> String {
    "http://metadata.google.internal".to_string()
}
fn default_database_url() -> String {
    "sqlite:./data/auth.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}

/// Longest session token lifetime accepted in `jwt.expires_in`.
const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Plain environment variables understood for compatibility with existing
/// deployments, mapped onto their config keys.
const LEGACY_ENV_VARS: [(&str, &str); 6] = [
    ("PORT", "server.port"),
    ("JWT_SECRET", "jwt.secret"),
    ("JWT_EXPIRES_IN", "jwt.expires_in"),
    ("FIREBASE_PROJECT_ID", "firebase.project_id"),
    ("FIREBASE_CREDENTIALS", "firebase.credentials"),
    ("DATABASE_URL", "database.url"),
];

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Legacy plain variables (`JWT_SECRET`, `PORT`, ...)
    /// 2. Environment variables (AUTH__SECTION__KEY format)
    /// 3. config.toml file (if present)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("jwt.expires_in", default_expires_in())?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("AUTH")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV_VARS {
            builder = builder.set_override_option(key, env::var(var).ok())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Message("jwt.secret must not be empty".to_string()));
        }
        let ttl = self.jwt.ttl()?;
        if ttl > MAX_SESSION_TTL {
            return Err(ConfigError::Message(format!(
                "jwt.expires_in must not exceed {} days",
                MAX_SESSION_TTL.as_secs() / 86_400
            )));
        }
        Ok(())
    }
}

/// Parse a token lifetime such as `3600`, `90s`, `45m`, `1h` or `7d`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::Message(format!("Invalid duration: {:?}", value));

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    if amount == 0 {
        return Err(invalid());
    }

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 3001);
    }

    #[test]
    fn test_default_firebase_endpoints() {
        let firebase = FirebaseConfig::default();
        assert!(firebase.project_id.is_none());
        assert!(firebase.credentials.is_none());
        assert!(firebase.jwks_url.ends_with("securetoken@system.gserviceaccount.com"));
        assert_eq!(firebase.identity_toolkit_url, "https://identitytoolkit.googleapis.com");
    }

    #[rstest]
    #[case("3600", 3600)]
    #[case("90s", 90)]
    #[case("45m", 45 * 60)]
    #[case("1h", 3600)]
    #[case("7d", 7 * 24 * 3600)]
    #[case(" 2h ", 7200)]
    fn test_parse_duration_valid(#[case] input: &str, #[case] secs: u64) {
        assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(secs));
    }

    #[rstest]
    #[case("")]
    #[case("h")]
    #[case("0")]
    #[case("1w")]
    #[case("-5m")]
    #[case("1.5h")]
    fn test_parse_duration_invalid(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[test]
    fn test_cors_origin_list() {
        let any = CorsConfig::default();
        assert!(any.origin_list().is_none());

        let list = CorsConfig {
            origins: "https://a.example, https://b.example,".to_string(),
        };
        assert_eq!(
            list.origin_list().unwrap(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    fn config_with_jwt(secret: &str, expires_in: &str) -> Config {
        Config {
            server: ServerConfig::default(),
            jwt: JwtConfig {
                secret: secret.to_string(),
                expires_in: expires_in.to_string(),
            },
            firebase: FirebaseConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
        }
    }

    #[rstest]
    #[case("secret", "1h", true)]
    #[case("secret", "365d", true)]
    #[case("secret", "366d", false)]
    #[case("secret", "200000000000000d", false)]
    #[case("secret", "soon", false)]
    #[case("   ", "1h", false)]
    fn test_validate(#[case] secret: &str, #[case] expires_in: &str, #[case] ok: bool) {
        assert_eq!(config_with_jwt(secret, expires_in).validate().is_ok(), ok);
    }

    #[test]
    fn test_jwt_ttl() {
        let jwt = JwtConfig {
            secret: "s".to_string(),
            expires_in: "15m".to_string(),
        };
        assert_eq!(jwt.ttl().unwrap(), Duration::from_secs(900));
    }
}

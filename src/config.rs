use std::{env, fmt::Display, str::FromStr, time::Duration};

use actix_web::cookie::Key;
use log::{info, warn};

use crate::{errors::AppError, utils::random_token};

pub const MIN_JWT_SECRET_LENGTH: usize = 32;
pub const MIN_SESSION_KEY_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: Vec<u8>,
    pub token_ttl: chrono::Duration,
    pub session_key: Key,
    pub static_dir: String,
    /// Key rate limits on `Forwarded`/`X-Forwarded-For` instead of the peer address.
    pub trust_proxy: bool,
    pub global_rate_limit: RateLimitSettings,
    pub auth_rate_limit: RateLimitSettings,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        let environment: Environment = try_load("APP_ENV", "development")?;

        let jwt_secret = match secret_var("JWT_SECRET") {
            Some(secret) if secret.len() >= MIN_JWT_SECRET_LENGTH => secret.into_bytes(),
            Some(_) => {
                return Err(AppError::ConfigError(format!(
                    "JWT_SECRET must be at least {MIN_JWT_SECRET_LENGTH} bytes"
                )))
            }
            None if environment == Environment::Production => {
                return Err(AppError::ConfigError("JWT_SECRET must be set in production".into()))
            }
            None => {
                warn!("JWT_SECRET not set, using a random secret; tokens will not survive a restart");
                random_token(MIN_JWT_SECRET_LENGTH).into_bytes()
            }
        };

        let session_key = match secret_var("SESSION_KEY") {
            Some(key) => Key::try_from(key.as_bytes()).map_err(|_| {
                AppError::ConfigError(format!(
                    "SESSION_KEY must be at least {MIN_SESSION_KEY_LENGTH} bytes"
                ))
            })?,
            None if environment == Environment::Production => {
                return Err(AppError::ConfigError("SESSION_KEY must be set in production".into()))
            }
            None => {
                warn!("SESSION_KEY not set, generating one; sessions will not survive a restart");
                Key::generate()
            }
        };

        let token_ttl_hours: i64 = try_load("TOKEN_TTL_HOURS", "24")?;

        Ok(Self {
            environment,
            host: try_load("HOST", "0.0.0.0")?,
            port: try_load("PORT", "8080")?,
            database_url: try_load("DATABASE_URL", "sqlite://household_bills.db")?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            jwt_secret,
            token_ttl: chrono::Duration::hours(token_ttl_hours),
            session_key,
            static_dir: try_load("STATIC_DIR", "static")?,
            trust_proxy: try_load("TRUST_PROXY", "false")?,
            global_rate_limit: RateLimitSettings {
                max_requests: try_load("RATE_LIMIT_MAX", "100")?,
                window: Duration::from_secs(try_load("RATE_LIMIT_WINDOW_SECS", "900")?),
            },
            auth_rate_limit: RateLimitSettings {
                max_requests: try_load("AUTH_RATE_LIMIT_MAX", "10")?,
                window: Duration::from_secs(try_load("AUTH_RATE_LIMIT_WINDOW_SECS", "900")?),
            },
        })
    }

    /// Development defaults with an in-memory database.
    pub fn for_tests() -> Self {
        Self {
            environment: Environment::Development,
            host: "127.0.0.1".into(),
            port: 0,
            database_url: "sqlite::memory:".into(),
            database_max_connections: 1,
            jwt_secret: b"test-secret-that-is-long-enough-for-hs256".to_vec(),
            token_ttl: chrono::Duration::hours(24),
            session_key: Key::generate(),
            static_dir: "static".into(),
            trust_proxy: false,
            global_rate_limit: RateLimitSettings {
                max_requests: 1000,
                window: Duration::from_secs(900),
            },
            auth_rate_limit: RateLimitSettings {
                max_requests: 100,
                window: Duration::from_secs(900),
            },
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| AppError::ConfigError(format!("invalid {key} value '{raw}': {e}")))
}

/// Empty values count as unset, so a copied `.env.example` still boots.
fn secret_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_short_and_long_names() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(
            "Development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn invalid_number_is_a_config_error() {
        env::set_var("HOUSEHOLD_BILLS_TEST_PORT", "eighty");
        let result: Result<u16, _> = try_load("HOUSEHOLD_BILLS_TEST_PORT", "8080");
        assert!(matches!(result, Err(AppError::ConfigError(_))));
        env::remove_var("HOUSEHOLD_BILLS_TEST_PORT");
    }

    #[test]
    fn empty_secrets_fall_back_to_generated_ones_in_development() {
        env::set_var("APP_ENV", "development");
        env::set_var("JWT_SECRET", "");
        env::set_var("SESSION_KEY", "");
        let config = Config::load();
        env::remove_var("JWT_SECRET");
        env::remove_var("SESSION_KEY");
        env::remove_var("APP_ENV");

        let config = config.unwrap();
        assert!(config.jwt_secret.len() >= MIN_JWT_SECRET_LENGTH);
        assert!(!config.trust_proxy);
    }

    #[test]
    fn blank_secret_is_treated_as_unset() {
        env::set_var("HOUSEHOLD_BILLS_TEST_SECRET", "  ");
        assert_eq!(secret_var("HOUSEHOLD_BILLS_TEST_SECRET"), None);
        env::set_var("HOUSEHOLD_BILLS_TEST_SECRET", "value");
        assert_eq!(secret_var("HOUSEHOLD_BILLS_TEST_SECRET").as_deref(), Some("value"));
        env::remove_var("HOUSEHOLD_BILLS_TEST_SECRET");
    }
}

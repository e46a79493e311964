use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Settings of the auth flows, independent of where they were loaded from.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Prefix of the cookie names and TOTP issuer.
    pub app_name: String,
    pub session_ttl: chrono::Duration,
    pub cookie_secure: bool,
    /// Accounts without 2FA must enroll before getting a session, unless exempt.
    pub require_two_factor: bool,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_window: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_name: "catalog".to_string(),
            session_ttl: chrono::Duration::hours(168),
            cookie_secure: true,
            require_two_factor: true,
            rate_limit_max_attempts: 10,
            rate_limit_window: Duration::from_secs(300),
        }
    }
}

impl AuthConfig {
    /// Rejects values that would break cookie names, the TOTP issuer or the limiter.
    pub fn validate(&self) -> Result<(), String> {
        let name_ok = !self.app_name.is_empty()
            && self
                .app_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !name_ok {
            return Err(format!(
                "APP_NAME must be non-empty and use only letters, digits, '_' or '-': {}",
                self.app_name
            ));
        }
        if self.rate_limit_max_attempts == 0 {
            return Err("RATE_LIMIT_MAX_ATTEMPTS must be positive".to_string());
        }
        if self.rate_limit_window.is_zero() {
            return Err("RATE_LIMIT_WINDOW_SECS must be positive".to_string());
        }
        Ok(())
    }
}

/// Environment configuration
/// Loads and validates environment variables
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| "JWT_SECRET must be set".to_string())?;
        if jwt_secret.len() < 32 {
            return Err("JWT_SECRET must be at least 32 characters".to_string());
        }

        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let defaults = AuthConfig::default();
        let auth = AuthConfig {
            app_name: env::var("APP_NAME").unwrap_or(defaults.app_name),
            session_ttl: chrono::Duration::hours(parse_var("SESSION_TTL_HOURS", 168)?),
            cookie_secure: parse_var("COOKIE_SECURE", defaults.cookie_secure)?,
            require_two_factor: parse_var("REQUIRE_TWO_FACTOR", defaults.require_two_factor)?,
            rate_limit_max_attempts: parse_var(
                "RATE_LIMIT_MAX_ATTEMPTS",
                defaults.rate_limit_max_attempts,
            )?,
            rate_limit_window: Duration::from_secs(parse_var("RATE_LIMIT_WINDOW_SECS", 300)?),
        };

        auth.validate()?;

        Ok(Self {
            database_url,
            redis_url,
            jwt_secret,
            bind_addr,
            auth,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

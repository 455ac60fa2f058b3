//! Application configuration

use helpdesk_shared::{AiMode, UserRole};
use std::env;
use std::path::PathBuf;

/// Default upload cap: 10 MiB
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,
    pub cors_allowed_origins: Vec<String>,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub password_expiry_days: i64,
    pub password_expiry_roles: Vec<UserRole>,

    // AI collaborator
    pub ai_mode: AiMode,
    pub ai_service_url: Option<String>,
    pub ai_service_key: Option<String>,

    // Uploads
    pub upload_dir: PathBuf,
    pub upload_max_bytes: usize,

    // Retention cleanup
    /// `None` when retention is unset or zero (cleanup disabled)
    pub conversation_retention_days: Option<u32>,
    pub cleanup_batch_size: u32,
    pub cleanup_cron: String,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let password_expiry_roles = match env::var("PASSWORD_EXPIRY_ROLES") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<UserRole>()
                        .map_err(|_| ConfigError::Invalid("PASSWORD_EXPIRY_ROLES"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => vec![UserRole::Agent],
        };

        let ai_mode = env::var("AI_MODE")
            .unwrap_or_default()
            .parse::<AiMode>()
            .map_err(|_| ConfigError::Invalid("AI_MODE"))?;

        let cleanup_batch_size: u32 = parse_or("CLEANUP_BATCH_SIZE", 100);

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 20),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_minutes: parse_or("JWT_EXPIRY_MINUTES", 15),
            refresh_token_expiry_days: parse_or("REFRESH_TOKEN_EXPIRY_DAYS", 7),
            password_expiry_days: parse_or("PASSWORD_EXPIRY_DAYS", 90),
            password_expiry_roles,

            // AI collaborator
            ai_mode,
            ai_service_url: non_empty("AI_SERVICE_URL"),
            ai_service_key: non_empty("AI_SERVICE_KEY"),

            // Uploads
            upload_dir: PathBuf::from(
                env::var("UPLOAD_DIR").unwrap_or_else(|_| "/var/lib/helpdesk/uploads".to_string()),
            ),
            upload_max_bytes: parse_or("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES),

            // Retention cleanup
            conversation_retention_days: Some(parse_or::<u32>("CONVERSATION_RETENTION_DAYS", 0))
                .filter(|days| *days > 0),
            cleanup_batch_size: cleanup_batch_size.max(1),
            cleanup_cron: env::var("CLEANUP_CRON").unwrap_or_else(|_| "0 0 3 * * *".to_string()),
        })
    }

    /// Whether accounts of this role are subject to password expiry
    pub fn password_expiry_applies(&self, role: UserRole) -> bool {
        self.password_expiry_roles.contains(&role)
    }

    /// Fixed configuration for router-level tests
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            public_url: "http://localhost:3000".to_string(),
            cors_allowed_origins: Vec::new(),
            database_url: "postgres://localhost/helpdesk_test".to_string(),
            database_max_connections: 1,
            jwt_secret: "test-jwt-secret-must-be-at-least-32-characters-long".to_string(),
            jwt_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            password_expiry_days: 90,
            password_expiry_roles: vec![UserRole::Agent],
            ai_mode: AiMode::Hitl,
            ai_service_url: None,
            ai_service_key: Some("test-ai-service-key".to_string()),
            upload_dir: std::env::temp_dir().join("helpdesk-test-uploads"),
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            conversation_retention_days: Some(30),
            cleanup_batch_size: 100,
            cleanup_cron: "0 0 3 * * *".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const OPTIONAL_KEYS: &[&str] = &[
        "PASSWORD_EXPIRY_ROLES",
        "PASSWORD_EXPIRY_DAYS",
        "AI_MODE",
        "CONVERSATION_RETENTION_DAYS",
        "CLEANUP_BATCH_SIZE",
        "UPLOAD_MAX_BYTES",
        "CORS_ALLOWED_ORIGINS",
    ];

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
        for key in OPTIONAL_KEYS {
            env::remove_var(key);
        }
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("JWT_SECRET");
        for key in OPTIONAL_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.password_expiry_days, 90);
        assert_eq!(config.password_expiry_roles, vec![UserRole::Agent]);
        assert_eq!(config.ai_mode, AiMode::Off);
        assert_eq!(config.cleanup_batch_size, 100);
        assert_eq!(config.upload_max_bytes, DEFAULT_UPLOAD_MAX_BYTES);
        assert!(config.conversation_retention_days.is_none());
        assert!(config.password_expiry_applies(UserRole::Agent));
        assert!(!config.password_expiry_applies(UserRole::Admin));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_weak_and_missing_secret() {
        setup_minimal_config();

        env::set_var("JWT_SECRET", "short");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret(_))
        ));

        env::remove_var("JWT_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_retention_zero_is_disabled() {
        setup_minimal_config();

        env::set_var("CONVERSATION_RETENTION_DAYS", "0");
        assert!(Config::from_env().unwrap().conversation_retention_days.is_none());

        env::set_var("CONVERSATION_RETENTION_DAYS", "30");
        assert_eq!(
            Config::from_env().unwrap().conversation_retention_days,
            Some(30)
        );

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_expiry_roles_and_ai_mode_parsing() {
        setup_minimal_config();

        env::set_var("PASSWORD_EXPIRY_ROLES", "agent, admin");
        env::set_var("AI_MODE", "hitl");
        let config = Config::from_env().unwrap();
        assert!(config.password_expiry_applies(UserRole::Admin));
        assert!(config.ai_mode.is_hitl());

        env::set_var("PASSWORD_EXPIRY_ROLES", "agent,owner");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("PASSWORD_EXPIRY_ROLES"))
        ));

        env::set_var("PASSWORD_EXPIRY_ROLES", "agent");
        env::set_var("AI_MODE", "sometimes");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("AI_MODE"))
        ));

        cleanup_config();
    }
}

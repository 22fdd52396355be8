/// Configuration management for the Lotkeeper account service
use crate::error::{ServiceError, ServiceResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub email: Option<EmailConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Base URL embedded in activation/reset/confirmation links
    pub public_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_secret: String,
    /// Lifetime of session credentials issued on login
    pub session_ttl: String,
    /// Failed-login threshold; exceeding it locks the account
    pub max_failed_logins: i64,
    /// TTL of REGISTER tokens for admin-created staff/admin accounts
    pub admin_created_account_ttl: String,
}

/// Reconciliation scheduler configuration
///
/// Durations stay as raw strings here and are parsed when a job runs, so
/// a malformed value aborts that run instead of being replaced by a
/// default at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long an unactivated registration may linger before deletion
    pub registration_grace: String,
    /// How long a failed-login block lasts before auto-unblock
    pub unblock_after: String,
    pub expire_interval_secs: u64,
    pub reminder_interval_secs: u64,
    pub unblock_interval_secs: u64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("LK_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("LK_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ServiceError::Validation("Invalid port number".to_string()))?;
        let public_url = env::var("LK_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));

        let database = env::var("LK_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/lotkeeper.sqlite"));

        let token_secret = env::var("LK_TOKEN_SECRET")
            .map_err(|_| ServiceError::Validation("Token secret required".to_string()))?;
        let session_ttl = env::var("LK_SESSION_TTL").unwrap_or_else(|_| "30m".to_string());
        let max_failed_logins = env::var("LK_MAX_FAILED_LOGINS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ServiceError::Validation("Invalid failed-login threshold".to_string())
            })?;
        let admin_created_account_ttl =
            env::var("LK_ADMIN_CREATED_ACCOUNT_TTL").unwrap_or_else(|_| "12h".to_string());

        let registration_grace =
            env::var("LK_REGISTRATION_GRACE").unwrap_or_else(|_| "48h".to_string());
        let unblock_after = env::var("LK_UNBLOCK_AFTER").unwrap_or_else(|_| "24h".to_string());
        let expire_interval_secs = env::var("LK_EXPIRE_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);
        let reminder_interval_secs = env::var("LK_REMINDER_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);
        let unblock_interval_secs = env::var("LK_UNBLOCK_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        let email = if let Ok(smtp_url) = env::var("LK_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("LK_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(AppConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
            },
            storage: StorageConfig { database },
            auth: AuthConfig {
                token_secret,
                session_ttl,
                max_failed_logins,
                admin_created_account_ttl,
            },
            scheduler: SchedulerConfig {
                registration_grace,
                unblock_after,
                expire_interval_secs,
                reminder_interval_secs,
                unblock_interval_secs,
            },
            email,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ServiceResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ServiceError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.auth.token_secret.len() < 32 {
            return Err(ServiceError::Validation(
                "Token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.auth.max_failed_logins < 1 {
            return Err(ServiceError::Validation(
                "Failed-login threshold must be positive".to_string(),
            ));
        }

        // Session and admin-account TTLs must parse at startup; scheduler
        // durations are deliberately re-parsed per job run instead.
        parse_duration(&self.auth.session_ttl)?;
        parse_duration(&self.auth.admin_created_account_ttl)?;

        Ok(())
    }
}

/// Parse a duration string of the form "90s", "30m", "12h" or "7d"
pub fn parse_duration(value: &str) -> ServiceResult<Duration> {
    let value = value.trim();
    let unit = value
        .chars()
        .last()
        .ok_or_else(|| ServiceError::Config("Empty duration".to_string()))?;
    let number = &value[..value.len() - unit.len_utf8()];

    let amount: i64 = number
        .parse()
        .map_err(|_| ServiceError::Config(format!("Unparseable duration: {:?}", value)))?;
    if amount < 0 {
        return Err(ServiceError::Config(format!(
            "Negative duration: {:?}",
            value
        )));
    }

    match unit {
        's' => Ok(Duration::seconds(amount)),
        'm' => Ok(Duration::minutes(amount)),
        'h' => Ok(Duration::hours(amount)),
        'd' => Ok(Duration::days(amount)),
        _ => Err(ServiceError::Config(format!(
            "Unparseable duration: {:?}",
            value
        ))),
    }
}

/// Fixed configuration used by module tests; thresholds and windows
/// match the scenarios the tests assert on
#[cfg(test)]
pub fn test_config() -> AppConfig {
    AppConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8080,
            public_url: "http://localhost:8080".to_string(),
        },
        storage: StorageConfig {
            database: ":memory:".into(),
        },
        auth: AuthConfig {
            token_secret: "test-secret-key-minimum-32-characters-long".to_string(),
            session_ttl: "30m".to_string(),
            max_failed_logins: 3,
            admin_created_account_ttl: "12h".to_string(),
        },
        scheduler: SchedulerConfig {
            registration_grace: "48h".to_string(),
            unblock_after: "24h".to_string(),
            expire_interval_secs: 3600,
            reminder_interval_secs: 3600,
            unblock_interval_secs: 3600,
        },
        email: None,
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}

/// Account database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role variants an account can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Client,
    Staff,
    Admin,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Client => "client",
            RoleKind::Staff => "staff",
            RoleKind::Admin => "admin",
        }
    }
}

/// Action token variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Register,
    ResetPassword,
    ConfirmEmail,
    ChangeOverwrittenPassword,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Register => "register",
            TokenKind::ResetPassword => "reset_password",
            TokenKind::ConfirmEmail => "confirm_email",
            TokenKind::ChangeOverwrittenPassword => "change_overwritten_password",
        }
    }
}

/// Login activity metadata, embedded 1:1 in the account row
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct ActivityLog {
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_success_ip: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_ip: Option<String>,
    /// Incremented on bad password, reset to 0 on success; never
    /// decremented otherwise
    pub failed_logins: i64,
}

/// Account record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub login: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub language: String,
    /// Registration completed
    pub active: bool,
    /// Administratively or automatically locked
    pub blocked: bool,
    /// Set only when the block came from exceeding the failed-login
    /// threshold; an admin block leaves it NULL. This asymmetry is how
    /// the two block kinds are told apart.
    pub blocked_at: Option<DateTime<Utc>>,
    /// Email confirmed
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped by every versioned edit
    pub version: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub activity: ActivityLog,
}

impl Account {
    /// Whether the block came from the failed-login threshold rather
    /// than an administrator
    pub fn auto_blocked(&self) -> bool {
        self.blocked && self.blocked_at.is_some()
    }
}

/// Role assignment record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserLevel {
    pub id: String,
    pub account_id: String,
    pub role: RoleKind,
}

/// Single-use action token record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActionToken {
    pub id: String,
    pub account_id: String,
    pub kind: TokenKind,
    /// The signed value; expiry lives inside it, not in this row
    pub value: String,
    pub created_at: DateTime<Utc>,
    /// One-shot marker used by the activation-reminder sweep
    pub reminded: bool,
}

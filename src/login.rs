/// Login state machine
///
/// Check order is load-bearing: activation and block checks come before
/// password verification so the failure counter never advances for an
/// account that could not log in anyway, while IP/time metadata is still
/// recorded for audit on every attempt.
use crate::{
    db::{accounts::AccountStore, models::Account},
    error::{ServiceError, ServiceResult},
    mailer::{Mailer, MessageKind},
    password,
    tokens::TokenIssuer,
};
use chrono::{Duration, Utc};

/// Successful login outcome
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub account: Account,
    pub session_token: String,
}

#[derive(Clone)]
pub struct LoginGate {
    accounts: AccountStore,
    issuer: TokenIssuer,
    mailer: Mailer,
    max_failed_logins: i64,
    session_ttl: Duration,
}

impl LoginGate {
    pub fn new(
        accounts: AccountStore,
        issuer: TokenIssuer,
        mailer: Mailer,
        max_failed_logins: i64,
        session_ttl: Duration,
    ) -> Self {
        Self {
            accounts,
            issuer,
            mailer,
            max_failed_logins,
            session_ttl,
        }
    }

    /// Validate credentials and issue a session token
    pub async fn attempt_login(
        &self,
        login: &str,
        password: &str,
        client_ip: &str,
    ) -> ServiceResult<LoginSuccess> {
        // An unknown login must look exactly like a bad password
        let mut account = match self.accounts.find_by_login(login).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        if !account.active {
            self.record_failure(&mut account, client_ip, false).await?;
            return Err(ServiceError::NotActivated);
        }

        if account.blocked {
            self.record_failure(&mut account, client_ip, false).await?;
            return Err(if account.auto_blocked() {
                ServiceError::BlockedByFailedAttempts
            } else {
                ServiceError::BlockedByAdmin
            });
        }

        // Pre-emptive: the counter may already be over the threshold while
        // the blocked bit from the crossing attempt has not landed yet
        if account.activity.failed_logins > self.max_failed_logins {
            self.record_failure(&mut account, client_ip, false).await?;
            return Err(ServiceError::BlockedByFailedAttempts);
        }

        if !password::verify(password, &account.password_hash)? {
            self.record_failure(&mut account, client_ip, true).await?;

            let newly_blocked = account.activity.failed_logins > self.max_failed_logins;
            if newly_blocked {
                account.blocked = true;
                account.blocked_at = Some(Utc::now());
                self.accounts.record_login_state(&account).await?;

                tracing::info!(
                    login = %account.login,
                    failed_logins = account.activity.failed_logins,
                    "Account locked out after repeated failed logins"
                );
                self.notify(&account, MessageKind::AccountBlocked).await;
            }

            self.notify(&account, MessageKind::FailedLoginAttempt).await;

            return Err(if newly_blocked {
                ServiceError::BlockedByFailedAttempts
            } else {
                ServiceError::InvalidCredentials
            });
        }

        // Success: reset the counter, stamp the metadata, issue a session
        account.activity.failed_logins = 0;
        account.activity.last_success_at = Some(Utc::now());
        account.activity.last_success_ip = Some(client_ip.to_string());
        self.accounts.record_login_state(&account).await?;

        let session_token = self.issuer.issue_session(&account.id, self.session_ttl)?;

        tracing::info!(login = %account.login, ip = %client_ip, "Login successful");

        Ok(LoginSuccess {
            account,
            session_token,
        })
    }

    /// Stamp failure metadata; the counter only moves on a genuine
    /// password mismatch
    async fn record_failure(
        &self,
        account: &mut Account,
        client_ip: &str,
        count_attempt: bool,
    ) -> ServiceResult<()> {
        account.activity.last_failure_at = Some(Utc::now());
        account.activity.last_failure_ip = Some(client_ip.to_string());
        if count_attempt {
            account.activity.failed_logins += 1;
        }

        self.accounts.record_login_state(account).await
    }

    async fn notify(&self, account: &Account, kind: MessageKind) {
        if let Err(e) = self
            .mailer
            .send(kind, &account.first_name, &account.email, None, &account.language)
            .await
        {
            tracing::warn!("Failed to send {:?} notification: {}", kind, e);
        }
    }
}

/// Account lifecycle orchestration
///
/// Registration, activation, email change, password reset, blocking and
/// role management. Composes the token issuer with the account and token
/// stores; the authenticated caller is always passed in explicitly.
use crate::{
    config::{parse_duration, AppConfig},
    db::{
        accounts::{AccountStore, NewAccount},
        models::{Account, RoleKind, TokenKind, UserLevel},
        tokens::TokenStore,
    },
    error::{ServiceError, ServiceResult},
    mailer::{Mailer, MessageKind},
    password,
    tokens::{self, TokenIssuer},
};
use chrono::Duration;
use std::sync::Arc;

/// Profile fields collected at registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub login: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub language: String,
}

/// Mutable profile fields; login, email and password never change
/// through this path
#[derive(Debug, Clone)]
pub struct ProfilePatch {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub language: String,
}

#[derive(Clone)]
pub struct LifecycleManager {
    accounts: AccountStore,
    tokens: TokenStore,
    issuer: TokenIssuer,
    mailer: Mailer,
    config: Arc<AppConfig>,
}

impl LifecycleManager {
    pub fn new(
        accounts: AccountStore,
        tokens: TokenStore,
        issuer: TokenIssuer,
        mailer: Mailer,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            issuer,
            mailer,
            config,
        }
    }

    /// Self-service registration; the activation link is valid for half
    /// the reconciliation grace period
    pub async fn register_client(&self, data: Registration) -> ServiceResult<Account> {
        let ttl = parse_duration(&self.config.scheduler.registration_grace)? / 2;
        self.register(data, RoleKind::Client, ttl).await
    }

    /// Administrative staff-account creation; fixed activation window
    pub async fn register_staff(&self, data: Registration) -> ServiceResult<Account> {
        let ttl = parse_duration(&self.config.auth.admin_created_account_ttl)?;
        self.register(data, RoleKind::Staff, ttl).await
    }

    /// Administrative admin-account creation; fixed activation window
    pub async fn register_admin(&self, data: Registration) -> ServiceResult<Account> {
        let ttl = parse_duration(&self.config.auth.admin_created_account_ttl)?;
        self.register(data, RoleKind::Admin, ttl).await
    }

    async fn register(
        &self,
        data: Registration,
        role: RoleKind,
        token_ttl: Duration,
    ) -> ServiceResult<Account> {
        let account = self
            .accounts
            .create(
                NewAccount {
                    login: data.login,
                    password_hash: password::hash(&data.password)?,
                    first_name: data.first_name,
                    last_name: data.last_name,
                    email: data.email,
                    phone: data.phone,
                    language: data.language,
                },
                role,
            )
            .await?;

        let value = self
            .issuer
            .issue(&account.id, TokenKind::Register, token_ttl)?;
        self.tokens
            .create(&account.id, TokenKind::Register, &value)
            .await?;

        tracing::info!(login = %account.login, role = role.as_str(), "Account registered");

        self.notify(
            &account,
            MessageKind::ActivateAccount,
            Some(&self.action_url("activate", &value)),
        )
        .await;

        Ok(account)
    }

    /// Complete a registration. Any verification failure returns false
    /// without touching state, so a retry with a fresh token stays
    /// possible.
    pub async fn activate_account(&self, value: &str) -> ServiceResult<bool> {
        let Some(token) = self.tokens.find_by_value(value).await? else {
            return Ok(false);
        };

        // Resolve the account through the id embedded in the value; the
        // signature check below is what makes it trustworthy
        let Some(account_id) = self.issuer.account_id(value) else {
            return Ok(false);
        };

        let mut account = match self.accounts.find_by_id(&account_id).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        if token.kind != TokenKind::Register
            || !self.issuer.verify(value, &account.id, TokenKind::Register)
        {
            return Ok(false);
        }

        account.active = true;
        account.verified = true;
        self.accounts.edit(&account).await?;
        self.tokens.remove(&token.id).await?;

        tracing::info!(login = %account.login, "Account activated");

        Ok(true)
    }

    /// Start a password reset for the holder of an email address
    pub async fn forget_password(&self, email: &str) -> ServiceResult<()> {
        let account = self.accounts.find_by_email(email).await?;

        if account.blocked {
            return Err(ServiceError::IllegalOperation(
                "Cannot reset the password of a blocked account".to_string(),
            ));
        }
        if !account.active {
            return Err(ServiceError::IllegalOperation(
                "Cannot reset the password of an account that is not activated".to_string(),
            ));
        }

        let value = self
            .issuer
            .issue(&account.id, TokenKind::ResetPassword, Duration::hours(1))?;
        self.tokens
            .create(&account.id, TokenKind::ResetPassword, &value)
            .await?;

        self.notify(
            &account,
            MessageKind::ResetPassword,
            Some(&self.action_url("reset-password", &value)),
        )
        .await;

        Ok(())
    }

    /// Complete a password reset, from either the self-service flow or
    /// an administrative password overwrite
    pub async fn reset_password(&self, value: &str, new_password: &str) -> ServiceResult<()> {
        let token = self
            .tokens
            .find_by_value(value)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredToken)?;

        if !matches!(
            token.kind,
            TokenKind::ResetPassword | TokenKind::ChangeOverwrittenPassword
        ) {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        // Reload fresh rather than trusting anything decoded earlier
        let mut account = match self.accounts.find_by_id(&token.account_id).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidOrExpiredToken),
            Err(e) => return Err(e),
        };

        if !self.issuer.verify(value, &account.id, token.kind) {
            // Dead either way; consume it
            self.tokens.remove(&token.id).await?;
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        if account.blocked {
            return Err(ServiceError::IllegalOperation(
                "Cannot reset the password of a blocked account".to_string(),
            ));
        }
        if !account.active {
            return Err(ServiceError::IllegalOperation(
                "Cannot reset the password of an account that is not activated".to_string(),
            ));
        }

        account.password_hash = password::hash(new_password)?;
        self.accounts.edit(&account).await?;
        self.tokens.remove(&token.id).await?;

        tracing::info!(login = %account.login, "Password reset");

        Ok(())
    }

    /// Authenticated password change, verifying the current password
    pub async fn change_own_password(
        &self,
        account_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        let mut account = self.accounts.find_by_id(account_id).await?;

        if !password::verify(current_password, &account.password_hash)? {
            return Err(ServiceError::InvalidCredentials);
        }

        account.password_hash = password::hash(new_password)?;
        self.accounts.edit(&account).await?;

        Ok(())
    }

    /// Administrative password overwrite: the stored credential becomes
    /// a random one and the holder receives a one-time link to set
    /// their own
    pub async fn force_password_change(
        &self,
        caller_id: &str,
        account_id: &str,
    ) -> ServiceResult<()> {
        if caller_id == account_id {
            return Err(ServiceError::IllegalOperation(
                "Use the regular password change for your own account".to_string(),
            ));
        }

        let mut account = self.accounts.find_by_id(account_id).await?;
        if !account.active {
            return Err(ServiceError::IllegalOperation(
                "Cannot overwrite the password of an account that is not activated".to_string(),
            ));
        }

        account.password_hash = password::hash(&password::random())?;
        self.accounts.edit(&account).await?;

        let value = self.issuer.issue(
            &account.id,
            TokenKind::ChangeOverwrittenPassword,
            Duration::hours(24),
        )?;
        self.tokens
            .create(&account.id, TokenKind::ChangeOverwrittenPassword, &value)
            .await?;

        tracing::info!(login = %account.login, "Password overwritten by administrator");

        self.notify(
            &account,
            MessageKind::PasswordOverwritten,
            Some(&self.action_url("reset-password", &value)),
        )
        .await;

        Ok(())
    }

    /// Start an email change; nothing is applied until the new address
    /// confirms
    pub async fn change_email(&self, account_id: &str, new_email: &str) -> ServiceResult<()> {
        let account = self.accounts.find_by_id(account_id).await?;

        if account.email == new_email {
            return Err(ServiceError::Conflict(
                "New email is the same as the current one".to_string(),
            ));
        }

        match self.accounts.find_by_email(new_email).await {
            Ok(_) => {
                return Err(ServiceError::Conflict("Email already taken".to_string()));
            }
            Err(ServiceError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let value =
            self.issuer
                .issue_email_change(&account.id, new_email, Duration::hours(24))?;
        self.tokens
            .create(&account.id, TokenKind::ConfirmEmail, &value)
            .await?;

        // The confirmation goes to the candidate address, not the current one
        if let Err(e) = self
            .mailer
            .send(
                MessageKind::ConfirmEmailChange,
                &account.first_name,
                new_email,
                Some(&self.action_url("confirm-email", &value)),
                &account.language,
            )
            .await
        {
            tracing::warn!("Failed to send email-change confirmation: {}", e);
        }

        Ok(())
    }

    /// Apply a pending email change. Returns false on a missing or
    /// invalid token; a lost uniqueness race consumes the token and
    /// surfaces as `Conflict`.
    pub async fn confirm_email(&self, value: &str) -> ServiceResult<bool> {
        let Some(token) = self.tokens.find_by_value(value).await? else {
            return Ok(false);
        };

        let mut account = match self.accounts.find_by_id(&token.account_id).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        if token.kind != TokenKind::ConfirmEmail
            || !self
                .issuer
                .verify(value, &account.id, TokenKind::ConfirmEmail)
        {
            return Ok(false);
        }

        // A confirm-email token without a payload is our bug, not the
        // user's; fail loudly
        let pending = self
            .issuer
            .pending_email(value)
            .ok_or(ServiceError::MissingPendingEmail)?;

        account.email = pending;
        match self.accounts.edit(&account).await {
            Ok(_) => {}
            Err(ServiceError::Conflict(msg)) => {
                // Somebody registered the address while the change was
                // pending; the token cannot succeed anymore
                self.tokens
                    .remove_by_kind_and_account(TokenKind::ConfirmEmail, &account.id)
                    .await?;
                return Err(ServiceError::Conflict(msg));
            }
            Err(e) => return Err(e),
        }

        self.tokens.remove(&token.id).await?;

        tracing::info!(login = %account.login, "Email change confirmed");

        Ok(true)
    }

    /// Re-send the pending email-change confirmation, refreshing the
    /// token value in place so the single-token-per-kind invariant holds
    pub async fn resend_email_confirmation(&self, account_id: &str) -> ServiceResult<()> {
        let account = self.accounts.find_by_id(account_id).await?;

        let token = self
            .tokens
            .find_by_kind_and_account(TokenKind::ConfirmEmail, account_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No pending email change".to_string()))?;

        let pending = self
            .issuer
            .pending_email(&token.value)
            .ok_or(ServiceError::MissingPendingEmail)?;

        let fresh = self
            .issuer
            .issue_email_change(account_id, &pending, Duration::hours(24))?;
        self.tokens.update_value(&token.id, &fresh).await?;

        if let Err(e) = self
            .mailer
            .send(
                MessageKind::ConfirmEmailChange,
                &account.first_name,
                &pending,
                Some(&self.action_url("confirm-email", &fresh)),
                &account.language,
            )
            .await
        {
            tracing::warn!("Failed to resend email-change confirmation: {}", e);
        }

        Ok(())
    }

    /// Administrative block. Leaves blocked_at NULL — that is the marker
    /// telling an admin block apart from a failed-login one, and it
    /// keeps the account out of the auto-unblock sweep.
    pub async fn block_account(&self, caller_id: &str, account_id: &str) -> ServiceResult<()> {
        if caller_id == account_id {
            return Err(ServiceError::IllegalOperation(
                "Cannot block your own account".to_string(),
            ));
        }

        let mut account = self.accounts.find_by_id(account_id).await?;

        if account.blocked && account.blocked_at.is_none() {
            return Err(ServiceError::Conflict(
                "Account is already blocked by an administrator".to_string(),
            ));
        }

        account.blocked = true;
        account.blocked_at = None;
        self.accounts.edit(&account).await?;

        tracing::info!(login = %account.login, "Account blocked by administrator");

        self.notify(&account, MessageKind::AccountBlocked, None).await;

        Ok(())
    }

    /// Remove a block of either kind and reopen the login gate
    pub async fn unblock_account(&self, account_id: &str) -> ServiceResult<()> {
        let mut account = self.accounts.find_by_id(account_id).await?;

        if !account.blocked {
            return Err(ServiceError::Conflict(
                "Account is not blocked".to_string(),
            ));
        }

        account.blocked = false;
        account.blocked_at = None;
        self.accounts.edit(&account).await?;
        // Without this the pre-emptive threshold check would lock the
        // account right back out
        self.accounts.clear_failed_logins(&account.id).await?;

        tracing::info!(login = %account.login, "Account unblocked");

        self.notify(&account, MessageKind::AccountUnblocked, None).await;

        Ok(())
    }

    /// Edit mutable profile fields under optimistic concurrency; a stale
    /// expected version is rejected, never silently overwritten
    pub async fn modify_profile(
        &self,
        login: &str,
        patch: ProfilePatch,
        expected_version: i64,
    ) -> ServiceResult<Account> {
        let mut account = self.accounts.find_by_login(login).await?;

        if account.version != expected_version {
            return Err(ServiceError::OptimisticLock);
        }

        account.first_name = patch.first_name;
        account.last_name = patch.last_name;
        account.phone = patch.phone;
        account.language = patch.language;

        self.accounts.edit(&account).await
    }

    /// Grant an additional role
    pub async fn add_role(&self, account_id: &str, role: RoleKind) -> ServiceResult<UserLevel> {
        // Existence check first so a missing account is NotFound, not Conflict
        self.accounts.find_by_id(account_id).await?;
        self.accounts.add_role(account_id, role).await
    }

    /// Detach a role. An account always keeps at least one, and admins
    /// cannot strip their own admin role.
    pub async fn remove_role(
        &self,
        caller_id: &str,
        account_id: &str,
        role: RoleKind,
    ) -> ServiceResult<()> {
        let roles = self.accounts.roles(account_id).await?;

        if !roles.iter().any(|r| r.role == role) {
            return Err(ServiceError::NotFound(
                "Account does not hold this role".to_string(),
            ));
        }

        if roles.len() == 1 {
            return Err(ServiceError::IllegalOperation(
                "An account must retain at least one role".to_string(),
            ));
        }

        if role == RoleKind::Admin && caller_id == account_id {
            return Err(ServiceError::IllegalOperation(
                "Administrators cannot revoke their own admin role".to_string(),
            ));
        }

        self.accounts.remove_role(account_id, role).await?;

        Ok(())
    }

    /// Delete an account that never completed registration, tokens first
    pub async fn delete_abandoned_account(&self, account_id: &str) -> ServiceResult<()> {
        self.tokens.remove_by_account(account_id).await?;
        self.accounts.remove(account_id).await?;

        Ok(())
    }

    fn action_url(&self, action: &str, token_value: &str) -> String {
        tokens::action_url(&self.config.service.public_url, action, token_value)
    }

    async fn notify(&self, account: &Account, kind: MessageKind, url: Option<&str>) {
        if let Err(e) = self
            .mailer
            .send(
                kind,
                &account.first_name,
                &account.email,
                url,
                &account.language,
            )
            .await
        {
            tracing::warn!("Failed to send {:?} notification: {}", kind, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::test_config, db::test_pool};

    async fn manager() -> (LifecycleManager, AccountStore, TokenStore) {
        let pool = test_pool().await;
        let accounts = AccountStore::new(pool.clone());
        let tokens = TokenStore::new(pool);
        let config = Arc::new(test_config());

        let manager = LifecycleManager::new(
            accounts.clone(),
            tokens.clone(),
            TokenIssuer::new(config.auth.token_secret.clone()),
            Mailer::new(None).unwrap(),
            config,
        );

        (manager, accounts, tokens)
    }

    fn registration(login: &str, email: &str) -> Registration {
        Registration {
            login: login.to_string(),
            password: "correct-horse".to_string(),
            first_name: "Anna".to_string(),
            last_name: "Kowalska".to_string(),
            email: email.to_string(),
            phone: Some("+48123456789".to_string()),
            language: "en".to_string(),
        }
    }

    async fn registered_active(
        manager: &LifecycleManager,
        login: &str,
        email: &str,
    ) -> Account {
        let account = manager
            .register_client(registration(login, email))
            .await
            .unwrap();
        let token = manager
            .tokens
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(manager.activate_account(&token.value).await.unwrap());

        manager.accounts.find_by_id(&account.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_register_client_creates_pending_account_with_token() {
        let (manager, accounts, tokens) = manager().await;

        let account = manager
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();

        assert!(!account.active);
        assert!(!account.verified);

        let roles = accounts.roles(&account.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role, RoleKind::Client);

        let token = tokens
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(manager
            .issuer
            .verify(&token.value, &account.id, TokenKind::Register));
    }

    #[tokio::test]
    async fn test_register_duplicate_login_is_conflict() {
        let (manager, _, _) = manager().await;

        manager
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();
        let err = manager
            .register_client(registration("anna", "second@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_admin_holds_admin_role() {
        let (manager, accounts, _) = manager().await;

        let account = manager
            .register_admin(registration("boss", "boss@example.com"))
            .await
            .unwrap();

        let roles = accounts.roles(&account.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role, RoleKind::Admin);
    }

    #[tokio::test]
    async fn test_activation_consumes_token_and_is_idempotent_safe() {
        let (manager, accounts, tokens) = manager().await;

        let account = manager
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();
        let token = tokens
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .unwrap();

        assert!(manager.activate_account(&token.value).await.unwrap());

        let fresh = accounts.find_by_id(&account.id).await.unwrap();
        assert!(fresh.active);
        assert!(fresh.verified);

        // Second use of the consumed value: false, state untouched
        assert!(!manager.activate_account(&token.value).await.unwrap());
        let again = accounts.find_by_id(&account.id).await.unwrap();
        assert_eq!(again.version, fresh.version);
    }

    #[tokio::test]
    async fn test_activation_rejects_garbage_without_mutating() {
        let (manager, _, _) = manager().await;

        assert!(!manager.activate_account("no-such-value").await.unwrap());
    }

    #[tokio::test]
    async fn test_forget_password_rejects_unknown_blocked_and_inactive() {
        let (manager, accounts, _) = manager().await;

        let err = manager
            .forget_password("ghost@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        manager
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();
        let err = manager
            .forget_password("anna@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalOperation(_)));

        let mut active = registered_active(&manager, "marek", "marek@example.com").await;
        active.blocked = true;
        active.blocked_at = None;
        accounts.edit(&active).await.unwrap();
        let err = manager
            .forget_password("marek@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalOperation(_)));
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let (manager, accounts, tokens) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;
        manager.forget_password("anna@example.com").await.unwrap();

        let token = tokens
            .find_by_kind_and_account(TokenKind::ResetPassword, &account.id)
            .await
            .unwrap()
            .unwrap();

        manager
            .reset_password(&token.value, "new-password")
            .await
            .unwrap();

        let fresh = accounts.find_by_id(&account.id).await.unwrap();
        assert!(password::verify("new-password", &fresh.password_hash).unwrap());

        // Consumed: the same link cannot be used twice
        let err = manager
            .reset_password(&token.value, "another")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn test_reset_replaces_previous_token() {
        let (manager, _, tokens) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;
        manager.forget_password("anna@example.com").await.unwrap();
        let first = tokens
            .find_by_kind_and_account(TokenKind::ResetPassword, &account.id)
            .await
            .unwrap()
            .unwrap();

        manager.forget_password("anna@example.com").await.unwrap();

        // The earlier value is gone from the store
        assert!(tokens.find_by_value(&first.value).await.unwrap().is_none());
        let err = manager
            .reset_password(&first.value, "whatever")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn test_email_change_scenario() {
        let (manager, accounts, tokens) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;
        manager
            .change_email(&account.id, "new@example.com")
            .await
            .unwrap();

        let token = tokens
            .find_by_kind_and_account(TokenKind::ConfirmEmail, &account.id)
            .await
            .unwrap()
            .unwrap();

        assert!(manager.confirm_email(&token.value).await.unwrap());

        let fresh = accounts.find_by_id(&account.id).await.unwrap();
        assert_eq!(fresh.email, "new@example.com");

        // The token is consumed; replaying it returns false
        assert!(!manager.confirm_email(&token.value).await.unwrap());
    }

    #[tokio::test]
    async fn test_change_email_rejects_noop_and_taken() {
        let (manager, _, _) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;
        registered_active(&manager, "marek", "marek@example.com").await;

        let err = manager
            .change_email(&account.id, "anna@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err = manager
            .change_email(&account.id, "marek@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_confirm_email_collision_consumes_token() {
        let (manager, _, tokens) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;
        manager
            .change_email(&account.id, "wanted@example.com")
            .await
            .unwrap();

        // The address gets registered while the confirmation is pending
        registered_active(&manager, "marek", "wanted@example.com").await;

        let token = tokens
            .find_by_kind_and_account(TokenKind::ConfirmEmail, &account.id)
            .await
            .unwrap()
            .unwrap();

        let err = manager.confirm_email(&token.value).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(tokens.find_by_value(&token.value).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resend_email_confirmation_refreshes_value_in_place() {
        let (manager, _, tokens) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;

        let err = manager
            .resend_email_confirmation(&account.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        manager
            .change_email(&account.id, "new@example.com")
            .await
            .unwrap();
        let before = tokens
            .find_by_kind_and_account(TokenKind::ConfirmEmail, &account.id)
            .await
            .unwrap()
            .unwrap();

        manager.resend_email_confirmation(&account.id).await.unwrap();

        let after = tokens
            .find_by_kind_and_account(TokenKind::ConfirmEmail, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.id, before.id);
        assert_ne!(after.value, before.value);
        assert_eq!(
            manager.issuer.pending_email(&after.value).as_deref(),
            Some("new@example.com")
        );
    }

    #[tokio::test]
    async fn test_block_unblock_asymmetry() {
        let (manager, accounts, _) = manager().await;

        let admin = registered_active(&manager, "boss", "boss@example.com").await;
        let target = registered_active(&manager, "anna", "anna@example.com").await;

        let err = manager
            .block_account(&admin.id, &admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalOperation(_)));

        manager.block_account(&admin.id, &target.id).await.unwrap();
        let fresh = accounts.find_by_id(&target.id).await.unwrap();
        assert!(fresh.blocked);
        assert!(fresh.blocked_at.is_none()); // admin marker

        let err = manager
            .block_account(&admin.id, &target.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        manager.unblock_account(&target.id).await.unwrap();
        let fresh = accounts.find_by_id(&target.id).await.unwrap();
        assert!(!fresh.blocked);
        assert!(fresh.blocked_at.is_none());

        let err = manager.unblock_account(&target.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unblock_resets_failed_login_counter() {
        let (manager, accounts, _) = manager().await;

        let mut account = registered_active(&manager, "anna", "anna@example.com").await;
        account.blocked = true;
        account.blocked_at = Some(chrono::Utc::now());
        account = accounts.edit(&account).await.unwrap();
        account.activity.failed_logins = 5;
        accounts.record_login_state(&account).await.unwrap();

        manager.unblock_account(&account.id).await.unwrap();

        let fresh = accounts.find_by_id(&account.id).await.unwrap();
        assert!(!fresh.blocked);
        assert_eq!(fresh.activity.failed_logins, 0);
    }

    #[tokio::test]
    async fn test_modify_profile_optimistic_lock() {
        let (manager, accounts, _) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;
        let stale_version = account.version;

        // Another writer bumps the version first
        let mut other = accounts.find_by_id(&account.id).await.unwrap();
        other.phone = Some("+48000000000".to_string());
        accounts.edit(&other).await.unwrap();

        let patch = ProfilePatch {
            first_name: "Joanna".to_string(),
            last_name: "Nowak".to_string(),
            phone: None,
            language: "pl".to_string(),
        };

        let err = manager
            .modify_profile("anna", patch.clone(), stale_version)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OptimisticLock));

        // Refetch and retry with the current version
        let current = accounts.find_by_id(&account.id).await.unwrap();
        let updated = manager
            .modify_profile("anna", patch, current.version)
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Joanna");
        assert_eq!(updated.language, "pl");
    }

    #[tokio::test]
    async fn test_role_removal_guards() {
        let (manager, accounts, _) = manager().await;

        let admin = registered_active(&manager, "boss", "boss@example.com").await;
        let account = registered_active(&manager, "anna", "anna@example.com").await;

        // Only role: rejected
        let err = manager
            .remove_role(&admin.id, &account.id, RoleKind::Client)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalOperation(_)));

        // Missing role: NotFound
        let err = manager
            .remove_role(&admin.id, &account.id, RoleKind::Staff)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        // With a second role the removal goes through
        manager.add_role(&account.id, RoleKind::Staff).await.unwrap();
        manager
            .remove_role(&admin.id, &account.id, RoleKind::Client)
            .await
            .unwrap();

        let roles = accounts.roles(&account.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role, RoleKind::Staff);
    }

    #[tokio::test]
    async fn test_admin_cannot_self_demote() {
        let (manager, _, _) = manager().await;

        let admin = registered_active(&manager, "boss", "boss@example.com").await;
        manager.add_role(&admin.id, RoleKind::Admin).await.unwrap();

        let err = manager
            .remove_role(&admin.id, &admin.id, RoleKind::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalOperation(_)));

        // Another admin may demote them
        let other = registered_active(&manager, "root", "root@example.com").await;
        manager
            .remove_role(&other.id, &admin.id, RoleKind::Admin)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_force_password_change_and_completion() {
        let (manager, accounts, tokens) = manager().await;

        let admin = registered_active(&manager, "boss", "boss@example.com").await;
        let target = registered_active(&manager, "anna", "anna@example.com").await;

        let err = manager
            .force_password_change(&admin.id, &admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalOperation(_)));

        manager
            .force_password_change(&admin.id, &target.id)
            .await
            .unwrap();

        // The old credential no longer verifies
        let fresh = accounts.find_by_id(&target.id).await.unwrap();
        assert!(!password::verify("correct-horse", &fresh.password_hash).unwrap());

        // The holder completes through the reset path
        let token = tokens
            .find_by_kind_and_account(TokenKind::ChangeOverwrittenPassword, &target.id)
            .await
            .unwrap()
            .unwrap();
        manager
            .reset_password(&token.value, "my-own-choice")
            .await
            .unwrap();

        let fresh = accounts.find_by_id(&target.id).await.unwrap();
        assert!(password::verify("my-own-choice", &fresh.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_change_own_password_requires_current() {
        let (manager, accounts, _) = manager().await;

        let account = registered_active(&manager, "anna", "anna@example.com").await;

        let err = manager
            .change_own_password(&account.id, "wrong", "next")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));

        manager
            .change_own_password(&account.id, "correct-horse", "next-password")
            .await
            .unwrap();
        let fresh = accounts.find_by_id(&account.id).await.unwrap();
        assert!(password::verify("next-password", &fresh.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_delete_abandoned_account_cascades_tokens() {
        let (manager, accounts, tokens) = manager().await;

        let account = manager
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();

        manager.delete_abandoned_account(&account.id).await.unwrap();

        assert!(matches!(
            accounts.find_by_id(&account.id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(tokens
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .is_none());
    }
}

/// Reconciliation job implementations
///
/// Each sweep is idempotent: running it again over an already
/// reconciled state finds an empty candidate set and does nothing.
use crate::{
    config::parse_duration,
    context::AppContext,
    db::models::TokenKind,
    error::{ServiceError, ServiceResult},
    mailer::MessageKind,
    tokens::action_url,
};
use chrono::Utc;

/// Delete accounts that never completed registration within the grace
/// period, tokens first. An unparseable grace period aborts the run.
pub async fn expire_unverified_registrations(ctx: &AppContext) -> ServiceResult<u64> {
    let grace = parse_duration(&ctx.config.scheduler.registration_grace)?;
    let cutoff = Utc::now() - grace;

    let candidates = ctx
        .account_store
        .find_unactivated_created_before(cutoff)
        .await?;

    let mut deleted = 0;
    for account in candidates {
        tracing::info!(login = %account.login, "Removing registration that was never activated");
        ctx.lifecycle.delete_abandoned_account(&account.id).await?;
        deleted += 1;
    }

    Ok(deleted)
}

/// One-shot activation reminder at the halfway mark of the grace period.
/// The REGISTER token is re-issued in place with the remaining lifetime
/// of the registration, so the re-sent link stays usable until the
/// expiry sweep collects the account.
pub async fn resend_activation_reminders(ctx: &AppContext) -> ServiceResult<u64> {
    let grace = parse_duration(&ctx.config.scheduler.registration_grace)?;
    let now = Utc::now();
    let halfway = now - grace / 2;

    let mut sent = 0;
    for token in ctx.token_store.find_by_kind(TokenKind::Register).await? {
        if token.reminded {
            continue;
        }

        let account = match ctx.account_store.find_by_id(&token.account_id).await {
            Ok(account) => account,
            // The account went away under us; its tokens follow
            Err(ServiceError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        if account.active || account.created_at > halfway {
            continue;
        }

        let remaining = account.created_at + grace - now;
        if remaining <= chrono::Duration::zero() {
            // Past the grace period already; the expiry sweep owns it
            continue;
        }

        let fresh = ctx
            .issuer
            .issue(&account.id, TokenKind::Register, remaining)?;
        ctx.token_store.update_value(&token.id, &fresh).await?;
        ctx.token_store.mark_reminded(&token.id).await?;

        let url = action_url(&ctx.config.service.public_url, "activate", &fresh);
        if let Err(e) = ctx
            .mailer
            .send(
                MessageKind::ActivationReminder,
                &account.first_name,
                &account.email,
                Some(&url),
                &account.language,
            )
            .await
        {
            tracing::warn!("Failed to send activation reminder: {}", e);
        }

        sent += 1;
    }

    Ok(sent)
}

/// Lift failed-login blocks whose window has elapsed. Admin blocks have
/// no blocked_at timestamp and are never touched here.
pub async fn auto_unblock_expired(ctx: &AppContext) -> ServiceResult<u64> {
    let window = parse_duration(&ctx.config.scheduler.unblock_after)?;
    let cutoff = Utc::now() - window;

    let candidates = ctx.account_store.find_auto_blocked_before(cutoff).await?;

    let mut unblocked = 0;
    for account in candidates {
        match ctx.lifecycle.unblock_account(&account.id).await {
            Ok(()) => unblocked += 1,
            // Raced with a manual unblock; nothing left to do
            Err(ServiceError::Conflict(_)) | Err(ServiceError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(unblocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::AppContext, lifecycle::Registration};
    use chrono::Duration;

    async fn test_ctx() -> AppContext {
        AppContext::for_tests().await
    }

    fn registration(login: &str, email: &str) -> Registration {
        Registration {
            login: login.to_string(),
            password: "correct-horse".to_string(),
            first_name: "Anna".to_string(),
            last_name: "Kowalska".to_string(),
            email: email.to_string(),
            phone: None,
            language: "en".to_string(),
        }
    }

    async fn age_account(ctx: &AppContext, id: &str, hours: i64) {
        sqlx::query("UPDATE account SET created_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - Duration::hours(hours))
            .bind(id)
            .execute(&ctx.db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expiry_sweep_respects_grace_boundary() {
        let ctx = test_ctx().await;

        // Grace period in the test config is 48h
        let stale = ctx
            .lifecycle
            .register_client(registration("stale", "stale@example.com"))
            .await
            .unwrap();
        let fresh = ctx
            .lifecycle
            .register_client(registration("fresh", "fresh@example.com"))
            .await
            .unwrap();

        age_account(&ctx, &stale.id, 49).await;
        age_account(&ctx, &fresh.id, 47).await;

        assert_eq!(expire_unverified_registrations(&ctx).await.unwrap(), 1);
        assert!(ctx.account_store.find_by_id(&stale.id).await.is_err());
        assert!(ctx.account_store.find_by_id(&fresh.id).await.is_ok());

        // Idempotent: a second run finds nothing
        assert_eq!(expire_unverified_registrations(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expiry_sweep_spares_activated_accounts() {
        let ctx = test_ctx().await;

        let account = ctx
            .lifecycle
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();
        let token = ctx
            .token_store
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.lifecycle.activate_account(&token.value).await.unwrap());

        age_account(&ctx, &account.id, 100).await;

        assert_eq!(expire_unverified_registrations(&ctx).await.unwrap(), 0);
        assert!(ctx.account_store.find_by_id(&account.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unparseable_grace_aborts_run() {
        let mut ctx = test_ctx().await;
        let mut config = (*ctx.config).clone();
        config.scheduler.registration_grace = "two days".to_string();
        ctx.config = std::sync::Arc::new(config);

        let err = expire_unverified_registrations(&ctx).await.unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[tokio::test]
    async fn test_reminder_is_one_shot_and_reissues_in_place() {
        let ctx = test_ctx().await;

        let account = ctx
            .lifecycle
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();
        age_account(&ctx, &account.id, 25).await; // past the 24h halfway mark

        let before = ctx
            .token_store
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resend_activation_reminders(&ctx).await.unwrap(), 1);

        let after = ctx
            .token_store
            .find_by_kind_and_account(TokenKind::Register, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.id, before.id);
        assert_ne!(after.value, before.value);
        assert!(after.reminded);

        // The reissued link still activates the account
        assert!(ctx.lifecycle.activate_account(&after.value).await.unwrap());

        // And the sweep never reminds twice
        assert_eq!(resend_activation_reminders(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reminder_skips_young_registrations() {
        let ctx = test_ctx().await;

        ctx.lifecycle
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();

        assert_eq!(resend_activation_reminders(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auto_unblock_ignores_admin_blocks() {
        let ctx = test_ctx().await;

        let auto = ctx
            .lifecycle
            .register_client(registration("auto", "auto@example.com"))
            .await
            .unwrap();
        let admin = ctx
            .lifecycle
            .register_client(registration("admin", "admin@example.com"))
            .await
            .unwrap();

        // One failed-login block past the 24h window, one admin block
        let mut auto = ctx.account_store.find_by_id(&auto.id).await.unwrap();
        auto.blocked = true;
        auto.blocked_at = Some(Utc::now() - Duration::hours(25));
        ctx.account_store.edit(&auto).await.unwrap();

        let mut admin = ctx.account_store.find_by_id(&admin.id).await.unwrap();
        admin.blocked = true;
        admin.blocked_at = None;
        ctx.account_store.edit(&admin).await.unwrap();

        assert_eq!(auto_unblock_expired(&ctx).await.unwrap(), 1);

        let auto = ctx.account_store.find_by_id(&auto.id).await.unwrap();
        assert!(!auto.blocked);
        assert!(auto.blocked_at.is_none());
        assert_eq!(auto.activity.failed_logins, 0);

        let admin = ctx.account_store.find_by_id(&admin.id).await.unwrap();
        assert!(admin.blocked);

        // Idempotent
        assert_eq!(auto_unblock_expired(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auto_unblock_respects_window() {
        let ctx = test_ctx().await;

        let account = ctx
            .lifecycle
            .register_client(registration("anna", "anna@example.com"))
            .await
            .unwrap();

        let mut account = ctx.account_store.find_by_id(&account.id).await.unwrap();
        account.blocked = true;
        account.blocked_at = Some(Utc::now() - Duration::hours(23));
        ctx.account_store.edit(&account).await.unwrap();

        assert_eq!(auto_unblock_expired(&ctx).await.unwrap(), 0);
        let fresh = ctx.account_store.find_by_id(&account.id).await.unwrap();
        assert!(fresh.blocked);
    }
}

/// Application context and dependency wiring
use crate::{
    config::{parse_duration, AppConfig},
    db::{self, accounts::AccountStore, tokens::TokenStore},
    error::ServiceResult,
    lifecycle::LifecycleManager,
    login::LoginGate,
    mailer::Mailer,
    tokens::TokenIssuer,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: SqlitePool,
    pub account_store: AccountStore,
    pub token_store: TokenStore,
    pub issuer: TokenIssuer,
    pub mailer: Mailer,
    pub login_gate: LoginGate,
    pub lifecycle: LifecycleManager,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: AppConfig) -> ServiceResult<Self> {
        config.validate()?;

        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default())
            .await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        Self::wire(Arc::new(config), pool)
    }

    /// Assemble the services over an existing pool
    fn wire(config: Arc<AppConfig>, pool: SqlitePool) -> ServiceResult<Self> {
        let account_store = AccountStore::new(pool.clone());
        let token_store = TokenStore::new(pool.clone());
        let issuer = TokenIssuer::new(config.auth.token_secret.clone());
        let mailer = Mailer::new(config.email.clone())?;

        let login_gate = LoginGate::new(
            account_store.clone(),
            issuer.clone(),
            mailer.clone(),
            config.auth.max_failed_logins,
            parse_duration(&config.auth.session_ttl)?,
        );

        let lifecycle = LifecycleManager::new(
            account_store.clone(),
            token_store.clone(),
            issuer.clone(),
            mailer.clone(),
            Arc::clone(&config),
        );

        Ok(Self {
            config,
            db: pool,
            account_store,
            token_store,
            issuer,
            mailer,
            login_gate,
            lifecycle,
        })
    }

    /// Context over an in-memory database, for module tests
    #[cfg(test)]
    pub async fn for_tests() -> Self {
        let pool = db::test_pool().await;
        Self::wire(Arc::new(crate::config::test_config()), pool).unwrap()
    }
}

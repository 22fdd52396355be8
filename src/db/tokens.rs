/// Action-token repository over the SQLite pool
///
/// Rows carry the signed value; validity is decided by the issuer, not
/// here. The UNIQUE(account_id, kind) constraint keeps at most one live
/// token of a given kind per account, and `create` replaces any existing
/// one to uphold that invariant without a read-modify-write.
use crate::{
    db::models::{ActionToken, TokenKind},
    error::{ServiceError, ServiceResult},
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct TokenStore {
    db: SqlitePool,
}

impl TokenStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Look up a token by its signed value
    pub async fn find_by_value(&self, value: &str) -> ServiceResult<Option<ActionToken>> {
        sqlx::query_as::<_, ActionToken>("SELECT * FROM action_token WHERE value = ?1")
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .map_err(ServiceError::Database)
    }

    /// Look up the live token of a given kind for an account
    pub async fn find_by_kind_and_account(
        &self,
        kind: TokenKind,
        account_id: &str,
    ) -> ServiceResult<Option<ActionToken>> {
        sqlx::query_as::<_, ActionToken>(
            "SELECT * FROM action_token WHERE kind = ?1 AND account_id = ?2",
        )
        .bind(kind)
        .bind(account_id)
        .fetch_optional(&self.db)
        .await
        .map_err(ServiceError::Database)
    }

    /// All live tokens of a kind, for the reconciliation sweeps
    pub async fn find_by_kind(&self, kind: TokenKind) -> ServiceResult<Vec<ActionToken>> {
        sqlx::query_as::<_, ActionToken>(
            "SELECT * FROM action_token WHERE kind = ?1 ORDER BY created_at",
        )
        .bind(kind)
        .fetch_all(&self.db)
        .await
        .map_err(ServiceError::Database)
    }

    /// Persist a freshly issued token, replacing any live one of the same
    /// kind for the account
    pub async fn create(
        &self,
        account_id: &str,
        kind: TokenKind,
        value: &str,
    ) -> ServiceResult<ActionToken> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.db.begin().await.map_err(ServiceError::Database)?;

        sqlx::query("DELETE FROM action_token WHERE account_id = ?1 AND kind = ?2")
            .bind(account_id)
            .bind(kind)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO action_token (id, account_id, kind, value, created_at, reminded)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
        )
        .bind(&id)
        .bind(account_id)
        .bind(kind)
        .bind(value)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ServiceError::Database)?;

        tx.commit().await.map_err(ServiceError::Database)?;

        Ok(ActionToken {
            id: id.clone(),
            account_id: account_id.to_string(),
            kind,
            value: value.to_string(),
            created_at: now,
            reminded: false,
        })
    }

    /// Overwrite a token's value in place, keeping the same row
    pub async fn update_value(&self, id: &str, value: &str) -> ServiceResult<()> {
        sqlx::query("UPDATE action_token SET value = ?1 WHERE id = ?2")
            .bind(value)
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// Flag a REGISTER token as having had its one reminder sent
    pub async fn mark_reminded(&self, id: &str) -> ServiceResult<()> {
        sqlx::query("UPDATE action_token SET reminded = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// Consume a token
    pub async fn remove(&self, id: &str) -> ServiceResult<()> {
        sqlx::query("DELETE FROM action_token WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// Drop every token owned by an account
    pub async fn remove_by_account(&self, account_id: &str) -> ServiceResult<u64> {
        let result = sqlx::query("DELETE FROM action_token WHERE account_id = ?1")
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(result.rows_affected())
    }

    /// Drop the live token of a kind for an account, if any
    pub async fn remove_by_kind_and_account(
        &self,
        kind: TokenKind,
        account_id: &str,
    ) -> ServiceResult<u64> {
        let result = sqlx::query("DELETE FROM action_token WHERE kind = ?1 AND account_id = ?2")
            .bind(kind)
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(result.rows_affected())
    }
}

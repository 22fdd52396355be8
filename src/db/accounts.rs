/// Account repository over the SQLite pool
///
/// Every account/role query in the service goes through this adapter.
/// `edit` is the optimistic-concurrency point: it only writes when the
/// caller's version still matches the stored row, and bumps it on success.
use crate::{
    db::models::{Account, ActivityLog, RoleKind, UserLevel},
    error::{ServiceError, ServiceResult},
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, SqlitePool};
use uuid::Uuid;

/// Profile fields supplied at account creation
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub login: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub language: String,
}

/// Optional filters for paginated listings
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub active: Option<bool>,
    pub role: Option<RoleKind>,
    /// true = blocked by failed logins, false = blocked by an admin
    pub auto_blocked: Option<bool>,
}

#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Look up an account by id
    pub async fn find_by_id(&self, id: &str) -> ServiceResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM account WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))
    }

    /// Look up an account by login
    pub async fn find_by_login(&self, login: &str) -> ServiceResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM account WHERE login = ?1")
            .bind(login)
            .fetch_optional(&self.db)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))
    }

    /// Look up an account by email
    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM account WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("Email not found".to_string()))
    }

    /// Insert a new account together with its initial role.
    /// A login/email collision surfaces as `Conflict`.
    pub async fn create(&self, new: NewAccount, role: RoleKind) -> ServiceResult<Account> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.db.begin().await.map_err(ServiceError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO account (
                id, login, password_hash, first_name, last_name, email, phone,
                language, active, blocked, blocked_at, verified, created_at,
                version, failed_logins
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, NULL, 0, ?9, 0, 0)
            "#,
        )
        .bind(&id)
        .bind(&new.login)
        .bind(&new.password_hash)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.language)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, "Login or email already taken"))?;

        sqlx::query("INSERT INTO user_level (id, account_id, role) VALUES (?1, ?2, ?3)")
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(role)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::Database)?;

        tx.commit().await.map_err(ServiceError::Database)?;

        Ok(Account {
            id,
            login: new.login,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            language: new.language,
            active: false,
            blocked: false,
            blocked_at: None,
            verified: false,
            created_at: now,
            version: 0,
            activity: ActivityLog::default(),
        })
    }

    /// Version-checked update of profile fields, credentials and flags.
    /// Writes only if the stored version still equals `account.version`,
    /// then bumps it; a lost race maps to `OptimisticLock`.
    pub async fn edit(&self, account: &Account) -> ServiceResult<Account> {
        let result = sqlx::query(
            r#"
            UPDATE account
            SET first_name = ?1, last_name = ?2, email = ?3, phone = ?4,
                language = ?5, password_hash = ?6, active = ?7, blocked = ?8,
                blocked_at = ?9, verified = ?10, version = version + 1
            WHERE id = ?11 AND version = ?12
            "#,
        )
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(&account.phone)
        .bind(&account.language)
        .bind(&account.password_hash)
        .bind(account.active)
        .bind(account.blocked)
        .bind(account.blocked_at)
        .bind(account.verified)
        .bind(&account.id)
        .bind(account.version)
        .execute(&self.db)
        .await
        .map_err(|e| map_unique(e, "Email already taken"))?;

        if result.rows_affected() == 0 {
            // Either the row is gone or another writer got there first
            let exists = sqlx::query("SELECT 1 FROM account WHERE id = ?1")
                .bind(&account.id)
                .fetch_optional(&self.db)
                .await
                .map_err(ServiceError::Database)?
                .is_some();

            return Err(if exists {
                ServiceError::OptimisticLock
            } else {
                ServiceError::NotFound("Account not found".to_string())
            });
        }

        let mut updated = account.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Write login activity metadata and the auto-block flags without a
    /// version check. Attempt counting is last-writer-wins by contract;
    /// serialization of concurrent attempts is the storage layer's
    /// concern, not ours.
    pub async fn record_login_state(&self, account: &Account) -> ServiceResult<()> {
        sqlx::query(
            r#"
            UPDATE account
            SET last_success_at = ?1, last_success_ip = ?2,
                last_failure_at = ?3, last_failure_ip = ?4,
                failed_logins = ?5, blocked = ?6, blocked_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(account.activity.last_success_at)
        .bind(&account.activity.last_success_ip)
        .bind(account.activity.last_failure_at)
        .bind(&account.activity.last_failure_ip)
        .bind(account.activity.failed_logins)
        .bind(account.blocked)
        .bind(account.blocked_at)
        .bind(&account.id)
        .execute(&self.db)
        .await
        .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// Zero the failed-login counter, as on a successful login or an
    /// unblock
    pub async fn clear_failed_logins(&self, id: &str) -> ServiceResult<()> {
        sqlx::query("UPDATE account SET failed_logins = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// Hard-delete an account; roles and tokens cascade
    pub async fn remove(&self, id: &str) -> ServiceResult<()> {
        sqlx::query("DELETE FROM account WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(())
    }

    /// All role assignments for an account
    pub async fn roles(&self, account_id: &str) -> ServiceResult<Vec<UserLevel>> {
        sqlx::query_as::<_, UserLevel>(
            "SELECT * FROM user_level WHERE account_id = ?1 ORDER BY role",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await
        .map_err(ServiceError::Database)
    }

    /// Attach a role; a duplicate surfaces as `Conflict`
    pub async fn add_role(&self, account_id: &str, role: RoleKind) -> ServiceResult<UserLevel> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO user_level (id, account_id, role) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(account_id)
            .bind(role)
            .execute(&self.db)
            .await
            .map_err(|e| map_unique(e, "Account already holds this role"))?;

        Ok(UserLevel {
            id,
            account_id: account_id.to_string(),
            role,
        })
    }

    /// Detach a role record; returns whether anything was deleted
    pub async fn remove_role(&self, account_id: &str, role: RoleKind) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM user_level WHERE account_id = ?1 AND role = ?2")
            .bind(account_id)
            .bind(role)
            .execute(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Accounts that never activated and were created before the cutoff —
    /// the expiry sweep's candidate set
    pub async fn find_unactivated_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(
            "SELECT * FROM account WHERE active = 0 AND created_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await
        .map_err(ServiceError::Database)
    }

    /// Accounts auto-blocked before the cutoff — the unblock sweep's
    /// candidate set. Admin blocks (blocked_at IS NULL) never match.
    pub async fn find_auto_blocked_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(
            "SELECT * FROM account WHERE blocked = 1 AND blocked_at IS NOT NULL AND blocked_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await
        .map_err(ServiceError::Database)
    }

    /// Filtered, paginated listing
    pub async fn list(
        &self,
        filter: &AccountFilter,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<Account>> {
        let mut qb = QueryBuilder::new("SELECT account.* FROM account");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY account.created_at LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        qb.build_query_as::<Account>()
            .fetch_all(&self.db)
            .await
            .map_err(ServiceError::Database)
    }

    /// Count matching a filter
    pub async fn count(&self, filter: &AccountFilter) -> ServiceResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS n FROM account");
        push_filter(&mut qb, filter);

        let row = qb
            .build()
            .fetch_one(&self.db)
            .await
            .map_err(ServiceError::Database)?;

        row.try_get("n").map_err(ServiceError::Database)
    }
}

/// Append WHERE clauses for the optional listing filters
fn push_filter(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: &AccountFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(active) = filter.active {
        qb.push(" AND account.active = ");
        qb.push_bind(active);
    }

    if let Some(role) = filter.role {
        qb.push(" AND account.id IN (SELECT account_id FROM user_level WHERE role = ");
        qb.push_bind(role);
        qb.push(")");
    }

    if let Some(auto) = filter.auto_blocked {
        if auto {
            qb.push(" AND account.blocked = 1 AND account.blocked_at IS NOT NULL");
        } else {
            qb.push(" AND account.blocked = 1 AND account.blocked_at IS NULL");
        }
    }
}

/// Remap unique-constraint violations to the domain-level conflict kind
fn map_unique(e: sqlx::Error, message: &str) -> ServiceError {
    match e.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => {
            ServiceError::Conflict(message.to_string())
        }
        _ => ServiceError::Database(e),
    }
}

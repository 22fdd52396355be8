/// Authentication extractors
///
/// The session JWT only proves who the caller is; account state and
/// roles are loaded fresh on every request so blocks and demotions take
/// effect immediately.
use crate::{
    api::middleware::extract_bearer_token,
    context::AppContext,
    db::models::{Account, RoleKind},
    error::ServiceError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or(ServiceError::InvalidCredentials)?;

        let account_id = state.issuer.verify_session(&token)?;

        let account = match state.account_store.find_by_id(&account_id).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        if !account.active {
            return Err(ServiceError::NotActivated);
        }
        if account.blocked {
            return Err(if account.auto_blocked() {
                ServiceError::BlockedByFailedAttempts
            } else {
                ServiceError::BlockedByAdmin
            });
        }

        Ok(AuthContext { account })
    }
}

/// Authenticated caller holding the admin role
#[derive(Debug, Clone)]
pub struct AdminAuthContext {
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let AuthContext { account } = AuthContext::from_request_parts(parts, state).await?;

        let roles = state.account_store.roles(&account.id).await?;
        if !roles.iter().any(|r| r.role == RoleKind::Admin) {
            tracing::warn!(login = %account.login, "Admin operation rejected");
            return Err(ServiceError::IllegalOperation(
                "Admin role required".to_string(),
            ));
        }

        Ok(AdminAuthContext { account })
    }
}

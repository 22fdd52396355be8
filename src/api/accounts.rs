/// Account lifecycle endpoints
use crate::{
    auth::{AdminAuthContext, AuthContext},
    context::AppContext,
    db::{
        accounts::AccountFilter,
        models::{Account, RoleKind},
    },
    error::{ServiceError, ServiceResult},
    lifecycle::{ProfilePatch, Registration},
    tokens::decode_from_url,
};
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/accounts", post(register_client).get(list_accounts))
        .route("/accounts/staff", post(register_staff))
        .route("/accounts/admins", post(register_admin))
        .route("/accounts/activate", get(activate))
        .route("/accounts/forgot-password", post(forgot_password))
        .route("/accounts/reset-password", post(reset_password))
        .route("/accounts/confirm-email", get(confirm_email))
        .route("/accounts/me", get(own_profile).put(update_own_profile))
        .route("/accounts/me/password", post(change_own_password))
        .route("/accounts/me/email", post(change_email))
        .route("/accounts/me/email/resend", post(resend_email_confirmation))
        .route("/accounts/:id", put(update_profile))
        .route("/accounts/:id/block", post(block_account))
        .route("/accounts/:id/unblock", post(unblock_account))
        .route("/accounts/:id/password/overwrite", post(overwrite_password))
        .route("/accounts/:id/roles", post(add_role))
        .route("/accounts/:id/roles/:role", delete(remove_role))
}

/// Registration request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    pub login: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 64))]
    pub first_name: String,
    #[validate(length(min = 1, max = 64))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    /// Preferred locale for notifications; defaults to "en"
    pub language: Option<String>,
}

impl From<RegisterRequest> for Registration {
    fn from(req: RegisterRequest) -> Self {
        Registration {
            login: req.login,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            phone: req.phone,
            language: req.language.unwrap_or_else(|| "en".to_string()),
        }
    }
}

/// Account representation returned by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: String,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub language: String,
    pub active: bool,
    pub blocked: bool,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub version: i64,
    pub roles: Vec<RoleKind>,
}

impl AccountResponse {
    fn new(account: Account, roles: Vec<RoleKind>) -> Self {
        Self {
            id: account.id,
            login: account.login,
            first_name: account.first_name,
            last_name: account.last_name,
            email: account.email,
            phone: account.phone,
            language: account.language,
            active: account.active,
            blocked: account.blocked,
            verified: account.verified,
            created_at: account.created_at,
            version: account.version,
            roles,
        }
    }
}

async fn with_roles(ctx: &AppContext, account: Account) -> ServiceResult<AccountResponse> {
    let roles = ctx
        .account_store
        .roles(&account.id)
        .await?
        .into_iter()
        .map(|level| level.role)
        .collect();

    Ok(AccountResponse::new(account, roles))
}

/// Client self-registration
async fn register_client(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> ServiceResult<Json<AccountResponse>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let account = ctx.lifecycle.register_client(req.into()).await?;
    with_roles(&ctx, account).await.map(Json)
}

/// Administrative staff-account creation
async fn register_staff(
    State(ctx): State<AppContext>,
    _admin: AdminAuthContext,
    Json(req): Json<RegisterRequest>,
) -> ServiceResult<Json<AccountResponse>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let account = ctx.lifecycle.register_staff(req.into()).await?;
    with_roles(&ctx, account).await.map(Json)
}

/// Administrative admin-account creation
async fn register_admin(
    State(ctx): State<AppContext>,
    _admin: AdminAuthContext,
    Json(req): Json<RegisterRequest>,
) -> ServiceResult<Json<AccountResponse>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let account = ctx.lifecycle.register_admin(req.into()).await?;
    with_roles(&ctx, account).await.map(Json)
}

/// Token carried in a link
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub activated: bool,
}

/// Complete a registration from the emailed link. An expired or mangled
/// link is a routine outcome, reported as activated=false rather than
/// an error.
async fn activate(
    State(ctx): State<AppContext>,
    Query(query): Query<TokenQuery>,
) -> ServiceResult<Json<ActivateResponse>> {
    let activated = match decode_from_url(&query.token) {
        Ok(value) => ctx.lifecycle.activate_account(&value).await?,
        Err(_) => false,
    };

    Ok(Json(ActivateResponse { activated }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

/// Start a password reset
async fn forgot_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    ctx.lifecycle.forget_password(&req.email).await?;

    Ok(Json(serde_json::json!({ "sent": true })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

/// Complete a password reset from the emailed link
async fn reset_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ResetPasswordRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let value = decode_from_url(&req.token)?;
    ctx.lifecycle.reset_password(&value, &req.new_password).await?;

    Ok(Json(serde_json::json!({ "reset": true })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmEmailResponse {
    pub confirmed: bool,
}

/// Apply a pending email change from the emailed link
async fn confirm_email(
    State(ctx): State<AppContext>,
    Query(query): Query<TokenQuery>,
) -> ServiceResult<Json<ConfirmEmailResponse>> {
    let confirmed = match decode_from_url(&query.token) {
        Ok(value) => ctx.lifecycle.confirm_email(&value).await?,
        Err(_) => false,
    };

    Ok(Json(ConfirmEmailResponse { confirmed }))
}

/// Own profile
async fn own_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ServiceResult<Json<AccountResponse>> {
    with_roles(&ctx, auth.account).await.map(Json)
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 64))]
    pub first_name: String,
    #[validate(length(min = 1, max = 64))]
    pub last_name: String,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(length(min = 2, max = 8))]
    pub language: String,
    /// Version the caller last saw; a stale one is rejected
    pub version: i64,
}

impl From<&UpdateProfileRequest> for ProfilePatch {
    fn from(req: &UpdateProfileRequest) -> Self {
        ProfilePatch {
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            phone: req.phone.clone(),
            language: req.language.clone(),
        }
    }
}

/// Edit own profile under optimistic concurrency
async fn update_own_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> ServiceResult<Json<AccountResponse>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let account = ctx
        .lifecycle
        .modify_profile(&auth.account.login, (&req).into(), req.version)
        .await?;
    with_roles(&ctx, account).await.map(Json)
}

/// Administrative profile edit
async fn update_profile(
    State(ctx): State<AppContext>,
    _admin: AdminAuthContext,
    Path(id): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> ServiceResult<Json<AccountResponse>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let target = ctx.account_store.find_by_id(&id).await?;
    let account = ctx
        .lifecycle
        .modify_profile(&target.login, (&req).into(), req.version)
        .await?;
    with_roles(&ctx, account).await.map(Json)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeOwnPasswordRequest {
    #[validate(length(min = 1, max = 128))]
    pub current_password: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

/// Authenticated password change
async fn change_own_password(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<ChangeOwnPasswordRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    ctx.lifecycle
        .change_own_password(&auth.account.id, &req.current_password, &req.new_password)
        .await?;

    Ok(Json(serde_json::json!({ "changed": true })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeEmailRequest {
    #[validate(email)]
    pub new_email: String,
}

/// Start an email change; applied only after the new address confirms
async fn change_email(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<ChangeEmailRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    ctx.lifecycle
        .change_email(&auth.account.id, &req.new_email)
        .await?;

    Ok(Json(serde_json::json!({ "confirmation_sent": true })))
}

/// Re-send the pending email-change confirmation
async fn resend_email_confirmation(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ServiceResult<Json<serde_json::Value>> {
    ctx.lifecycle
        .resend_email_confirmation(&auth.account.id)
        .await?;

    Ok(Json(serde_json::json!({ "confirmation_sent": true })))
}

/// Administrative block
async fn block_account(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    Path(id): Path<String>,
) -> ServiceResult<Json<serde_json::Value>> {
    ctx.lifecycle.block_account(&admin.account.id, &id).await?;

    Ok(Json(serde_json::json!({ "blocked": true })))
}

/// Remove a block of either kind
async fn unblock_account(
    State(ctx): State<AppContext>,
    _admin: AdminAuthContext,
    Path(id): Path<String>,
) -> ServiceResult<Json<serde_json::Value>> {
    ctx.lifecycle.unblock_account(&id).await?;

    Ok(Json(serde_json::json!({ "blocked": false })))
}

/// Administrative password overwrite
async fn overwrite_password(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    Path(id): Path<String>,
) -> ServiceResult<Json<serde_json::Value>> {
    ctx.lifecycle
        .force_password_change(&admin.account.id, &id)
        .await?;

    Ok(Json(serde_json::json!({ "overwritten": true })))
}

#[derive(Debug, Deserialize)]
pub struct AddRoleRequest {
    pub role: RoleKind,
}

/// Grant a role
async fn add_role(
    State(ctx): State<AppContext>,
    _admin: AdminAuthContext,
    Path(id): Path<String>,
    Json(req): Json<AddRoleRequest>,
) -> ServiceResult<Json<serde_json::Value>> {
    let level = ctx.lifecycle.add_role(&id, req.role).await?;

    Ok(Json(serde_json::json!({ "role": level.role })))
}

/// Revoke a role
async fn remove_role(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    Path((id, role)): Path<(String, RoleKind)>,
) -> ServiceResult<Json<serde_json::Value>> {
    ctx.lifecycle
        .remove_role(&admin.account.id, &id, role)
        .await?;

    Ok(Json(serde_json::json!({ "removed": true })))
}

/// Listing query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub active: Option<bool>,
    pub role: Option<RoleKind>,
    pub auto_blocked: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PagedAccounts {
    pub items: Vec<AccountResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Filtered, paginated account listing
async fn list_accounts(
    State(ctx): State<AppContext>,
    _admin: AdminAuthContext,
    Query(query): Query<ListQuery>,
) -> ServiceResult<Json<PagedAccounts>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(25).clamp(1, 100);

    let filter = AccountFilter {
        active: query.active,
        role: query.role,
        auto_blocked: query.auto_blocked,
    };

    let total = ctx.account_store.count(&filter).await?;
    let accounts = ctx
        .account_store
        .list(&filter, per_page, (page - 1) * per_page)
        .await?;

    let mut items = Vec::with_capacity(accounts.len());
    for account in accounts {
        items.push(with_roles(&ctx, account).await?);
    }

    Ok(Json(PagedAccounts {
        items,
        total,
        page,
        per_page,
    }))
}

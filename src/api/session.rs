/// Login endpoint
use crate::{
    api::middleware::client_ip,
    context::AppContext,
    error::ServiceResult,
};
use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Build session routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/session", post(create_session))
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 64))]
    pub login: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// Session response
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: String,
    pub login: String,
    pub session_token: String,
}

/// Login handler
async fn create_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> ServiceResult<Json<SessionResponse>> {
    req.validate()
        .map_err(|e| crate::error::ServiceError::Validation(e.to_string()))?;

    let ip = client_ip(&headers);
    let success = ctx
        .login_gate
        .attempt_login(&req.login, &req.password, &ip)
        .await?;

    Ok(Json(SessionResponse {
        id: success.account.id,
        login: success.account.login,
        session_token: success.session_token,
    }))
}

//! Registration and login handlers, plus the token-to-tenant resolution
//! helper every authenticated handler calls first.

use crate::{errors::AppError, models::tenant::Tenant, state::AppState};
use axum::{Json, extract::State, http::HeaderMap};
use serde::Deserialize;

/// Header carrying the tenant credential on every authenticated call.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

#[derive(Debug, Deserialize)]
pub struct RegisterReq {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

/// Resolve the `X-Auth-Token` header to a tenant, or 401.
pub async fn require_tenant(state: &AppState, headers: &HeaderMap) -> Result<Tenant, AppError> {
    let token = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    Ok(state.auth.resolve(token).await?)
}

/// POST `/api/auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> Result<Json<Tenant>, AppError> {
    if req.name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("name, email, and password are required"));
    }
    let tenant = state
        .auth
        .register(&req.name, &req.email, &req.password)
        .await?;
    Ok(Json(tenant))
}

/// POST `/api/auth/login` — verifies credentials and returns the tenant
/// with a freshly rotated token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<Json<Tenant>, AppError> {
    let tenant = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(tenant))
}

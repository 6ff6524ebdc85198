use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::{AppError, AppResult},
    models::{Tenant, User},
    state::AppState,
};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub organization: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub organization: String,
    pub active: bool,
}

impl AccountResponse {
    fn new(user: &User, tenant: &Tenant) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            organization: tenant.name.clone(),
            active: user.active,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AccountResponse>)> {
    let (user, tenant) =
        state
            .identity
            .register(&payload.email, &payload.password, &payload.organization)?;
    Ok((StatusCode::CREATED, Json(AccountResponse::new(&user, &tenant))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let principal = state
        .identity
        .authenticate(&payload.email, &payload.password)?;

    let access_token = state
        .jwt
        .generate_token(principal.user_id, principal.tenant_id)
        .map_err(AppError::from)?;

    info!(user_id = %principal.user_id, "user logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<AccountResponse>> {
    let user = state
        .identity
        .find_user(principal.user_id)?
        .ok_or_else(AppError::unauthorized)?;
    let tenant = state
        .identity
        .find_tenant(principal.tenant_id)?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(AccountResponse::new(&user, &tenant)))
}

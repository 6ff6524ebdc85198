pub mod identity;
pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{AppError, ServiceError, ServiceResult},
    models::User,
    state::AppState,
};

pub use identity::IdentityService;

/// A user verified for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub active: bool,
}

impl Principal {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            active: user.active,
        }
    }

    pub fn require_active(&self) -> ServiceResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(ServiceError::authentication("account is inactive"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        state
            .identity
            .principal_for(claims.sub, claims.tid)
            .map_err(|err| match err {
                ServiceError::Authentication(reason) => {
                    debug!(user_id = %claims.sub, reason = %reason, "rejected bearer token");
                    AppError::unauthorized()
                }
                other => other.into(),
            })
    }
}

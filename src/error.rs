use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

use crate::storage::StorageError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Why a background job claim was rejected. Every variant is fatal for the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizationFailure {
    #[error("tenant mismatch")]
    TenantMismatch,
    #[error("principal no longer exists")]
    PrincipalMissing,
    #[error("principal moved tenants")]
    PrincipalMovedTenants,
    #[error("principal deactivated")]
    PrincipalDeactivated,
    #[error("resource deleted")]
    ResourceDeleted,
    #[error("owner mismatch")]
    OwnerMismatch,
}

impl AuthorizationFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthorizationFailure::TenantMismatch => "tenant_mismatch",
            AuthorizationFailure::PrincipalMissing => "principal_missing",
            AuthorizationFailure::PrincipalMovedTenants => "principal_moved_tenants",
            AuthorizationFailure::PrincipalDeactivated => "principal_deactivated",
            AuthorizationFailure::ResourceDeleted => "resource_deleted",
            AuthorizationFailure::OwnerMismatch => "owner_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("authorization error: {0}")]
    Authorization(AuthorizationFailure),
    #[error("resource not found")]
    NotFound,
    #[error("storage quota exceeded: {used} of {limit} bytes in use, {requested} requested")]
    QuotaExceeded { limit: u64, used: u64, requested: u64 },
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    #[error("processing failed: {0}")]
    FatalProcessing(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Only transient I/O is worth another attempt; everything else is a logical outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::TransientIo(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(message) => ServiceError::Validation(message),
            other => ServiceError::TransientIo(other.to_string()),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Io(err) => ServiceError::TransientIo(err.to_string()),
            StorageError::NotFound => ServiceError::FatalProcessing("stored bytes missing".into()),
            other => ServiceError::FatalProcessing(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Validation(message) => AppError::bad_request(message),
            ServiceError::Authentication(message) => {
                AppError::new(StatusCode::UNAUTHORIZED, message)
            }
            ServiceError::Authorization(_) => AppError::forbidden(),
            // absent and cross-tenant must produce byte-identical responses
            ServiceError::NotFound => AppError::not_found(),
            err @ ServiceError::QuotaExceeded { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            ServiceError::TransientIo(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "service temporarily unavailable",
            ),
            ServiceError::FatalProcessing(message) => AppError::internal(message),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

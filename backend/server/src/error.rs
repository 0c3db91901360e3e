use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{
    auth::AuthError, database::StoreError, scheduler::SchedulerError, token::TokenError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload(String),

    #[error("{0}")]
    Validation(String),

    #[error("Tenant context required")]
    TenantRequired,

    #[error("Tenant not found")]
    TenantNotFound,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Auth provider error: {0}")]
    Auth(#[from] AuthError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] SchedulerError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn unauthenticated() -> Self {
        AppError::Unauthenticated("Authentication required".to_string())
    }

    pub fn forbidden() -> Self {
        AppError::Forbidden("Insufficient permissions".to_string())
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload(_) | AppError::Validation(_) | AppError::TenantRequired => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TenantNotFound | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            AppError::Auth(AuthError::InvalidCredentials | AuthError::InvalidSession) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Auth(AuthError::AlreadyRegistered) => StatusCode::CONFLICT,
            AppError::Token(TokenError::Encode(_) | TokenError::InvalidKey) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(_)
            | AppError::Auth(_)
            | AppError::Schedule(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the caller sees. Upstream detail stays in the logs.
    fn public_message(&self) -> (String, Option<String>) {
        match self {
            AppError::MalformedPayload(details) => {
                (self.to_string(), Some(details.clone()))
            }
            AppError::Store(StoreError::Conflict { .. }) => {
                ("Resource already exists".to_string(), None)
            }
            AppError::Auth(
                e @ (AuthError::InvalidCredentials
                | AuthError::InvalidSession
                | AuthError::AlreadyRegistered),
            ) => (e.to_string(), None),
            AppError::Token(TokenError::Expired) => ("Token has expired".to_string(), None),
            AppError::Token(TokenError::Malformed | TokenError::BadSignature) => {
                ("Invalid token".to_string(), None)
            }
            AppError::Schedule(SchedulerError::Save(_)) => {
                ("Failed to save vaccination schedule".to_string(), None)
            }
            AppError::Schedule(_) => {
                ("Failed to generate vaccination schedule".to_string(), None)
            }
            _ if self.status().is_server_error() => ("Internal server error".to_string(), None),
            _ => (self.to_string(), None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("{self}");
        }

        let (message, details) = self.public_message();
        let body = match details {
            Some(details) => json!({ "success": false, "error": message, "details": details }),
            None => json!({ "success": false, "error": message }),
        };

        (status, Json(body)).into_response()
    }
}

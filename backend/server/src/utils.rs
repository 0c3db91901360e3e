use std::sync::LazyLock;

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use regex::Regex;
pub use schedule::utils::today;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const RESERVED_SUBDOMAINS: [&str; 3] = ["www", "api", "admin"];

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

static SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("subdomain pattern compiles")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

/// JSON body whose rejections use the failure envelope.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Payload(value)),
            Err(rejection) => Err(AppError::MalformedPayload(rejection.body_text())),
        }
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    respond(StatusCode::OK, None, data)
}

pub fn created<T: Serialize>(data: T) -> Response {
    respond(StatusCode::CREATED, None, data)
}

pub fn with_message<T: Serialize>(status: StatusCode, message: &'static str, data: T) -> Response {
    respond(status, Some(message), data)
}

fn respond<T: Serialize>(status: StatusCode, message: Option<&'static str>, data: T) -> Response {
    (
        status,
        Json(Envelope {
            success: true,
            message,
            data,
        }),
    )
        .into_response()
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Fails with every missing field named, in the order given.
pub fn require_fields(fields: &[(&str, bool)]) -> Result<(), AppError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

pub fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();

    if EMAIL.is_match(&email) {
        Ok(email)
    } else {
        Err(AppError::Validation("Invalid email address".to_string()))
    }
}

pub fn validate_subdomain(subdomain: &str) -> Result<String, AppError> {
    let subdomain = subdomain.trim().to_lowercase();

    if !SUBDOMAIN.is_match(&subdomain) {
        return Err(AppError::Validation(
            "Subdomain must be 1-63 lowercase letters, digits or inner hyphens".to_string(),
        ));
    }
    if RESERVED_SUBDOMAINS.contains(&subdomain.as_str()) {
        return Err(AppError::Validation(format!(
            "Subdomain {subdomain} is reserved"
        )));
    }

    Ok(subdomain)
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Pagination {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

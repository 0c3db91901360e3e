//! Parent portal accounts. Parents sign up with the auth provider like
//! staff do, but their requests carry a portal token signed by
//! [`crate::token::TokenSigner`] instead of the provider's session.
use axum::{
    Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    database::{Filter, Query, fetch_one, insert_as, to_row},
    error::AppError,
    models::{CHILDREN, PARENTS, Parent, Role},
    state::SharedState,
    token::UserType,
    utils::{
        Payload, bearer_token, is_present, ok, require_fields, validate_email, with_message,
    },
};

use super::{children, schedules};

const MIN_PASSWORD_LENGTH: usize = 8;

/// The parent a valid portal token belongs to.
pub struct ParentSession(pub Parent);

impl FromRequestParts<SharedState> for ParentSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(AppError::unauthenticated)?;
        let claims = state.tokens.verify(token)?;

        let parent = fetch_one(
            state.store.as_ref(),
            PARENTS,
            Query::new().eq("id", claims.user_id.as_str()),
        )
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Parent account not found".to_string()))?;

        Ok(ParentSession(parent))
    }
}

#[derive(Deserialize)]
pub struct Registration {
    email: Option<String>,
    password: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Deserialize)]
pub struct Credentials {
    email: Option<String>,
    password: Option<String>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/me", get(me_handler))
        .merge(children::router())
        .merge(schedules::router())
}

fn issue_token(state: &SharedState, parent: &Parent) -> Result<String, AppError> {
    Ok(state.tokens.sign(
        &parent.id,
        &parent.email,
        UserType::Parent,
        Role::Patient.as_str(),
    )?)
}

pub async fn register_handler(
    State(state): State<SharedState>,
    Payload(body): Payload<Registration>,
) -> Result<Response, AppError> {
    require_fields(&[
        ("email", is_present(&body.email)),
        ("password", is_present(&body.password)),
        ("first_name", is_present(&body.first_name)),
    ])?;
    let email = validate_email(body.email.as_deref().unwrap_or_default())?;
    let password = body.password.unwrap_or_default();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let identity = state.auth.sign_up(&email, &password).await?;

    let row = to_row(
        PARENTS,
        &json!({
            "user_id": identity.id,
            "email": email,
            "first_name": body.first_name.unwrap_or_default().trim(),
            "last_name": body.last_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        }),
    )?;

    let parent: Parent = match insert_as(state.store.as_ref(), PARENTS, row).await {
        Ok(parent) => parent,
        Err(e) => {
            if let Err(cleanup) = state.auth.delete_user(&identity.id).await {
                warn!(
                    "Failed to remove auth user {} after failed registration: {cleanup}",
                    identity.id
                );
            }
            return Err(e.into());
        }
    };
    info!("Registered parent {}", parent.id);

    let token = issue_token(&state, &parent)?;

    Ok(with_message(
        StatusCode::CREATED,
        "Registration successful",
        json!({ "token": token, "parent": parent }),
    ))
}

pub async fn login_handler(
    State(state): State<SharedState>,
    Payload(body): Payload<Credentials>,
) -> Result<Response, AppError> {
    require_fields(&[
        ("email", is_present(&body.email)),
        ("password", is_present(&body.password)),
    ])?;
    let email = body.email.unwrap_or_default().trim().to_lowercase();

    let session = state
        .auth
        .sign_in(&email, &body.password.unwrap_or_default())
        .await?;

    let parent: Parent = fetch_one(
        state.store.as_ref(),
        PARENTS,
        Query::new().eq("user_id", session.user.id.as_str()),
    )
    .await?
    .ok_or_else(|| AppError::Unauthenticated("Invalid email or password".to_string()))?;

    let token = issue_token(&state, &parent)?;

    Ok(with_message(
        StatusCode::OK,
        "Login successful",
        json!({ "token": token, "parent": parent }),
    ))
}

pub async fn me_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
) -> Result<Response, AppError> {
    let children = state
        .store
        .count(CHILDREN, &[Filter::eq("parent_id", parent.id.as_str())])
        .await?;

    Ok(ok(json!({ "parent": parent, "children": children })))
}

use axum::{
    Router,
    extract::State,
    http::HeaderMap,
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    database::{Query, fetch_all, fetch_one},
    error::AppError,
    models::{Membership, Role, TENANT_USERS, TENANTS, Tenant},
    state::SharedState,
    tenancy::RequestContext,
    utils::{Payload, bearer_token, is_present, ok, require_fields},
};

#[derive(Deserialize)]
pub struct Credentials {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    refresh_token: Option<String>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/me", get(me_handler))
}

pub async fn login_handler(
    State(state): State<SharedState>,
    context: RequestContext,
    Payload(body): Payload<Credentials>,
) -> Result<Response, AppError> {
    require_fields(&[
        ("email", is_present(&body.email)),
        ("password", is_present(&body.password)),
    ])?;
    let email = body.email.unwrap_or_default().trim().to_lowercase();
    let password = body.password.unwrap_or_default();

    let session = state.auth.sign_in(&email, &password).await?;

    let memberships: Vec<Membership> = fetch_all(
        state.store.as_ref(),
        TENANT_USERS,
        &Query::new().eq("user_id", session.user.id.as_str()),
    )
    .await?;

    let membership = match &context.tenant {
        Some(host) => memberships
            .into_iter()
            .find(|m| {
                m.tenant_id.as_deref() == Some(host.id.as_str()) || m.role == Role::SuperAdmin
            })
            .ok_or_else(|| AppError::Forbidden("User does not belong to this clinic".to_string()))?,
        None => memberships
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Forbidden("User is not a member of any clinic".to_string()))?,
    };

    let tenant: Option<Tenant> = match &membership.tenant_id {
        Some(tenant_id) => {
            fetch_one(
                state.store.as_ref(),
                TENANTS,
                Query::new().eq("id", tenant_id.as_str()),
            )
            .await?
        }
        None => None,
    };
    info!("{} signed in as {}", membership.email, membership.role);

    Ok(ok(json!({
        "session": session,
        "user": {
            "id": membership.user_id,
            "email": membership.email,
            "role": membership.role,
        },
        "tenant": tenant,
    })))
}

pub async fn logout_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers).ok_or_else(AppError::unauthenticated)?;
    state.auth.sign_out(token).await?;

    Ok(ok(json!({ "message": "Logged out" })))
}

pub async fn refresh_handler(
    State(state): State<SharedState>,
    Payload(body): Payload<RefreshRequest>,
) -> Result<Response, AppError> {
    require_fields(&[("refresh_token", is_present(&body.refresh_token))])?;
    let session = state
        .auth
        .refresh(body.refresh_token.unwrap_or_default().trim())
        .await?;

    Ok(ok(json!({ "session": session })))
}

pub async fn me_handler(context: RequestContext) -> Result<Response, AppError> {
    if let Some(user) = context.user.as_ref().filter(|u| u.role == Role::SuperAdmin) {
        return Ok(ok(json!({ "user": user, "tenant": context.tenant })));
    }

    let (tenant, user) = context.require_auth()?;

    Ok(ok(json!({ "user": user, "tenant": tenant })))
}

use axum::{Router, extract::State, response::Response, routing::get};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    database::{Filter, Query, fetch_all, insert_as, to_row},
    error::AppError,
    models::{ADMIN_ROLES, Membership, Role, TENANT_USERS},
    state::SharedState,
    tenancy::RequestContext,
    utils::{Payload, created, is_present, ok, require_fields, validate_email},
};

#[derive(Deserialize)]
pub struct NewStaff {
    email: Option<String>,
    password: Option<String>,
    role: Option<String>,
}

pub fn router() -> Router<SharedState> {
    Router::new().route("/users", get(list_users_handler).post(invite_user_handler))
}

pub async fn list_users_handler(
    State(state): State<SharedState>,
    context: RequestContext,
) -> Result<Response, AppError> {
    context.require_tenant()?;
    let (tenant, _) = context.require_role(ADMIN_ROLES)?;

    let members: Vec<Membership> = fetch_all(
        state.store.as_ref(),
        TENANT_USERS,
        &Query::new()
            .eq("tenant_id", tenant.id.as_str())
            .order_by("email", true),
    )
    .await?;

    Ok(ok(members))
}

/// Creates the auth account and the membership. The account is removed
/// again when the membership cannot be written.
pub async fn invite_user_handler(
    State(state): State<SharedState>,
    context: RequestContext,
    Payload(body): Payload<NewStaff>,
) -> Result<Response, AppError> {
    context.require_tenant()?;
    let (tenant, admin) = context.require_role(ADMIN_ROLES)?;

    require_fields(&[
        ("email", is_present(&body.email)),
        ("password", is_present(&body.password)),
        ("role", is_present(&body.role)),
    ])?;
    let email = validate_email(body.email.as_deref().unwrap_or_default())?;
    let role: Role = body
        .role
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(AppError::Validation)?;

    if role == Role::SuperAdmin {
        return Err(AppError::Validation(
            "The super_admin role cannot be granted".to_string(),
        ));
    }

    let existing = state
        .store
        .count(
            TENANT_USERS,
            &[
                Filter::eq("tenant_id", tenant.id.as_str()),
                Filter::eq("email", email.as_str()),
            ],
        )
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict(
            "User already belongs to this clinic".to_string(),
        ));
    }

    let identity = state
        .auth
        .sign_up(&email, body.password.as_deref().unwrap_or_default())
        .await?;

    let row = to_row(
        TENANT_USERS,
        &json!({
            "tenant_id": tenant.id,
            "user_id": identity.id,
            "email": email,
            "role": role,
        }),
    )?;

    let membership: Membership = match insert_as(state.store.as_ref(), TENANT_USERS, row).await {
        Ok(membership) => membership,
        Err(e) => {
            if let Err(cleanup) = state.auth.delete_user(&identity.id).await {
                warn!("Failed to remove auth user {} after failed invite: {cleanup}", identity.id);
            }
            return Err(e.into());
        }
    };
    info!("{} invited {email} as {role}", admin.email);

    Ok(created(membership))
}

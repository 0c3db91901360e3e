use axum::{
    Router,
    extract::{Path, Query as QueryParams, State},
    response::Response,
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    database::{Filter, Query, fetch_all, from_row, to_row},
    error::AppError,
    models::{TENANTS, Tenant, TenantStatus},
    provisioning::{NewTenant, provision_tenant},
    state::SharedState,
    tenancy::RequestContext,
    utils::{Payload, created, is_present, ok, require_fields, validate_email, validate_subdomain},
};

#[derive(Deserialize)]
pub struct TenantFilter {
    status: Option<String>,
}

#[derive(Deserialize)]
pub struct TenantRequest {
    name: Option<String>,
    subdomain: Option<String>,
    admin_email: Option<String>,
    admin_password: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusChange {
    status: Option<String>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/admin/tenants",
            get(list_tenants_handler).post(create_tenant_handler),
        )
        .route("/admin/tenants/{id}/status", patch(update_status_handler))
}

pub async fn list_tenants_handler(
    State(state): State<SharedState>,
    context: RequestContext,
    QueryParams(filter): QueryParams<TenantFilter>,
) -> Result<Response, AppError> {
    context.require_super_admin()?;

    let mut query = Query::new().order_by("created_at", true);
    if let Some(status) = filter.status.as_deref() {
        let status: TenantStatus = status.parse().map_err(AppError::Validation)?;
        query = query.eq("status", status.as_str());
    }

    let tenants: Vec<Tenant> = fetch_all(state.store.as_ref(), TENANTS, &query).await?;

    Ok(ok(tenants))
}

pub async fn create_tenant_handler(
    State(state): State<SharedState>,
    context: RequestContext,
    Payload(body): Payload<TenantRequest>,
) -> Result<Response, AppError> {
    let caller = context.require_super_admin()?;

    require_fields(&[
        ("name", is_present(&body.name)),
        ("subdomain", is_present(&body.subdomain)),
        ("admin_email", is_present(&body.admin_email)),
        ("admin_password", is_present(&body.admin_password)),
    ])?;

    let request = NewTenant {
        name: body.name.unwrap_or_default().trim().to_string(),
        subdomain: validate_subdomain(body.subdomain.as_deref().unwrap_or_default())?,
        admin_email: validate_email(body.admin_email.as_deref().unwrap_or_default())?,
        admin_password: body.admin_password.unwrap_or_default(),
    };
    info!("{} provisioning tenant {}", caller.email, request.subdomain);

    let provisioned = provision_tenant(state.store.as_ref(), state.auth.as_ref(), request).await?;

    Ok(created(provisioned))
}

pub async fn update_status_handler(
    State(state): State<SharedState>,
    context: RequestContext,
    Path(id): Path<String>,
    Payload(body): Payload<StatusChange>,
) -> Result<Response, AppError> {
    let caller = context.require_super_admin()?;

    require_fields(&[("status", is_present(&body.status))])?;
    let status: TenantStatus = body
        .status
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(AppError::Validation)?;

    let updated = state
        .store
        .update(
            TENANTS,
            &[Filter::eq("id", id.as_str())],
            to_row(TENANTS, &json!({ "status": status }))?,
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found("Tenant"))?;
    let tenant: Tenant = from_row(TENANTS, updated)?;
    info!("{} set tenant {} to {}", caller.email, tenant.subdomain, status.as_str());

    Ok(ok(tenant))
}

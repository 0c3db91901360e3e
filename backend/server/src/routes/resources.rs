use axum::{
    Extension, Router,
    extract::{Path, Query as QueryParams, State},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
};
use serde_json::{Value, json};

use crate::{
    database::{Filter, Query, Row},
    error::AppError,
    models::{ADMIN_ROLES, CLINICAL_ROLES, STAFF_ROLES},
    state::SharedState,
    tenancy::{RequestContext, ScopedResource, TenantRow, guard_tenant_resource},
    utils::{Pagination, Payload, created, ok},
};

const PROTECTED_COLUMNS: [&str; 3] = ["id", "tenant_id", "created_at"];

/// Tenant-owned tables served by this module.
pub fn scoped_resources() -> Vec<ScopedResource> {
    vec![
        ScopedResource {
            prefix: "/patients",
            table: "patients",
            read: STAFF_ROLES,
            write: STAFF_ROLES,
            delete: ADMIN_ROLES,
        },
        ScopedResource {
            prefix: "/vaccinations",
            table: "vaccinations",
            read: STAFF_ROLES,
            write: CLINICAL_ROLES,
            delete: ADMIN_ROLES,
        },
        ScopedResource {
            prefix: "/appointments",
            table: "appointments",
            read: STAFF_ROLES,
            write: STAFF_ROLES,
            delete: STAFF_ROLES,
        },
        ScopedResource {
            prefix: "/inventory",
            table: "inventory",
            read: STAFF_ROLES,
            write: CLINICAL_ROLES,
            delete: ADMIN_ROLES,
        },
        ScopedResource {
            prefix: "/clinics",
            table: "clinics",
            read: STAFF_ROLES,
            write: ADMIN_ROLES,
            delete: ADMIN_ROLES,
        },
    ]
}

pub fn router(state: SharedState) -> Router<SharedState> {
    scoped_resources()
        .into_iter()
        .fold(Router::new(), |router, resource| {
            let collection = Router::new().route(
                resource.prefix,
                get(list_handler).post(create_handler),
            );
            let item = Router::new()
                .route(
                    &format!("{}/{{id}}", resource.prefix),
                    get(fetch_handler)
                        .patch(update_handler)
                        .delete(delete_handler),
                )
                .route_layer(from_fn_with_state(state.clone(), guard_tenant_resource));

            router.merge(collection.merge(item).layer(Extension(resource)))
        })
}

fn writable(mut row: Row) -> Row {
    for column in PROTECTED_COLUMNS {
        row.remove(column);
    }

    row
}

pub async fn list_handler(
    State(state): State<SharedState>,
    Extension(resource): Extension<ScopedResource>,
    context: RequestContext,
    QueryParams(page): QueryParams<Pagination>,
) -> Result<Response, AppError> {
    context.require_tenant()?;
    let (tenant, _) = context.require_role(resource.read)?;
    let scope = Filter::eq("tenant_id", tenant.id.as_str());

    let items = state
        .store
        .select(
            resource.table,
            &Query::new()
                .filter(scope.clone())
                .order_by("created_at", false)
                .limit(page.limit())
                .offset(page.offset()),
        )
        .await?;
    let total = state.store.count(resource.table, &[scope]).await?;

    Ok(ok(json!({
        "items": items,
        "total": total,
        "limit": page.limit(),
        "offset": page.offset(),
    })))
}

pub async fn create_handler(
    State(state): State<SharedState>,
    Extension(resource): Extension<ScopedResource>,
    context: RequestContext,
    Payload(body): Payload<Row>,
) -> Result<Response, AppError> {
    context.require_tenant()?;
    let (tenant, _) = context.require_role(resource.write)?;

    let mut row = writable(body);
    if row.is_empty() {
        return Err(AppError::Validation("Request body is empty".to_string()));
    }
    row.insert("tenant_id".to_string(), Value::String(tenant.id.clone()));

    let inserted = state.store.insert(resource.table, row).await?;

    Ok(created(inserted))
}

pub async fn fetch_handler(
    Extension(resource): Extension<ScopedResource>,
    Extension(TenantRow(row)): Extension<TenantRow>,
    context: RequestContext,
) -> Result<Response, AppError> {
    context.require_role(resource.read)?;

    Ok(ok(row))
}

pub async fn update_handler(
    State(state): State<SharedState>,
    Extension(resource): Extension<ScopedResource>,
    context: RequestContext,
    Path(id): Path<String>,
    Payload(body): Payload<Row>,
) -> Result<Response, AppError> {
    let (tenant, _) = context.require_role(resource.write)?;

    let patch = writable(body);
    if patch.is_empty() {
        return Err(AppError::Validation("No updatable fields provided".to_string()));
    }

    let updated = state
        .store
        .update(
            resource.table,
            &[
                Filter::eq("id", id.as_str()),
                Filter::eq("tenant_id", tenant.id.as_str()),
            ],
            patch,
        )
        .await?;

    updated
        .into_iter()
        .next()
        .map(ok)
        .ok_or_else(|| AppError::not_found("Resource"))
}

pub async fn delete_handler(
    State(state): State<SharedState>,
    Extension(resource): Extension<ScopedResource>,
    context: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (tenant, _) = context.require_role(resource.delete)?;

    state
        .store
        .delete(
            resource.table,
            &[
                Filter::eq("id", id.as_str()),
                Filter::eq("tenant_id", tenant.id.as_str()),
            ],
        )
        .await?;

    Ok(ok(json!({ "id": id, "deleted": true })))
}

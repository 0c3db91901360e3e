//! # Tenant & Role Resolution
//!
//! Every clinic-side request passes through [`resolve_request_context`]
//! before reaching a handler. It settles which tenant the request targets
//! and who is calling, then hands handlers an explicit [`RequestContext`].
//!
//! ## Tenant
//!
//! The tenant comes from the host's first label under `BASE_DOMAIN`
//! (`sunrise.vaxtrack.app` → `sunrise`). No label, `www` or `api` means no
//! host tenant. A label naming no active tenant ends the request with 404.
//!
//! ## User
//!
//! A bearer token is checked with the auth provider and the caller's
//! membership decides their role. A token that does not verify leaves the
//! request unauthenticated instead of failing it. A verified member of
//! another tenant is refused with 403. Handlers decide with the
//! `require_*` guards.
//!
//! ## Resources
//!
//! Tenant-owned tables are declared once as [`ScopedResource`]s by the route
//! module that serves them. [`guard_tenant_resource`] checks that the row
//! addressed by `/{id}` belongs to the caller's tenant.
use axum::{
    extract::{FromRequestParts, OriginalUri, Path, Request, State},
    http::{HeaderMap, header::HOST, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    database::{Query, Row, Store, fetch_all, fetch_one},
    error::AppError,
    models::{Membership, Role, TENANT_USERS, TENANTS, Tenant, TenantStatus},
    state::SharedState,
    utils::bearer_token,
};

const HOST_RESERVED: [&str; 2] = ["www", "api"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: Role,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    pub tenant: Option<Tenant>,
    pub user: Option<AuthUser>,
}

impl RequestContext {
    pub fn require_tenant(&self) -> Result<&Tenant, AppError> {
        self.tenant.as_ref().ok_or(AppError::TenantRequired)
    }

    pub fn require_auth(&self) -> Result<(&Tenant, &AuthUser), AppError> {
        match (&self.tenant, &self.user) {
            (Some(tenant), Some(user)) => Ok((tenant, user)),
            _ => Err(AppError::unauthenticated()),
        }
    }

    pub fn require_role(&self, allowed: &[Role]) -> Result<(&Tenant, &AuthUser), AppError> {
        let (tenant, user) = self.require_auth()?;

        if allowed.contains(&user.role) {
            Ok((tenant, user))
        } else {
            Err(AppError::forbidden())
        }
    }

    pub fn require_super_admin(&self) -> Result<&AuthUser, AppError> {
        match &self.user {
            Some(user) if user.role == Role::SuperAdmin => Ok(user),
            _ => Err(AppError::Forbidden("Super admin access required".to_string())),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Tenant label of `host` under `base_domain`, if any.
pub fn subdomain_from_host(host: &str, base_domain: &str) -> Option<String> {
    let host = host.trim().to_lowercase();
    let host = host.split(':').next().unwrap_or_default();
    let base = base_domain.trim().to_lowercase();

    let prefix = host.strip_suffix(base.as_str())?.strip_suffix('.')?;
    let label = prefix.rsplit('.').next()?;

    if label.is_empty() || HOST_RESERVED.contains(&label) {
        None
    } else {
        Some(label.to_string())
    }
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(HOST))
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
}

async fn active_tenant(store: &dyn Store, column: &str, value: &str) -> Result<Option<Tenant>, AppError> {
    Ok(fetch_one(
        store,
        TENANTS,
        Query::new()
            .eq(column, value)
            .eq("status", TenantStatus::Active.as_str()),
    )
    .await?)
}

pub async fn resolve_context(
    state: &SharedState,
    host: &str,
    token: Option<&str>,
) -> Result<RequestContext, AppError> {
    let store = state.store.as_ref();
    let mut context = RequestContext::default();

    if let Some(subdomain) = subdomain_from_host(host, &state.config.base_domain) {
        let tenant = active_tenant(store, "subdomain", &subdomain)
            .await?
            .ok_or(AppError::TenantNotFound)?;
        context.tenant = Some(tenant);
    }

    let Some(token) = token else {
        return Ok(context);
    };

    let identity = match state.auth.verify(token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return Ok(context),
        Err(e) => {
            warn!("Token verification failed: {e}");
            return Ok(context);
        }
    };

    let mut memberships: Vec<Membership> = fetch_all(
        store,
        TENANT_USERS,
        &Query::new().eq("user_id", identity.id.as_str()),
    )
    .await?;

    let membership = match &context.tenant {
        Some(host_tenant) => {
            let position = memberships.iter().position(|m| {
                m.tenant_id.as_deref() == Some(host_tenant.id.as_str())
                    || m.role == Role::SuperAdmin
            });

            match position {
                Some(index) => Some(memberships.swap_remove(index)),
                None if memberships.is_empty() => None,
                None => {
                    warn!(
                        "User {} presented a session on tenant {} without membership",
                        identity.id, host_tenant.subdomain
                    );
                    return Err(AppError::Forbidden(
                        "Access denied: user does not belong to this tenant".to_string(),
                    ));
                }
            }
        }
        None => memberships.into_iter().next(),
    };

    let Some(membership) = membership else {
        debug!("User {} has no membership for this request", identity.id);
        return Ok(context);
    };

    if let Some(tenant_id) = &membership.tenant_id {
        if context.tenant.is_none() {
            match active_tenant(store, "id", tenant_id).await? {
                Some(tenant) => context.tenant = Some(tenant),
                None => return Ok(context),
            }
        }
    }

    context.user = Some(AuthUser {
        id: identity.id,
        email: membership.email,
        role: membership.role,
    });

    Ok(context)
}

pub async fn resolve_request_context(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let host = request_host(request.headers()).to_string();
    let token = bearer_token(request.headers()).map(str::to_string);

    let context = resolve_context(&state, &host, token.as_deref()).await?;
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

/// A tenant-owned table served under `prefix`, with the roles allowed to
/// read, write and delete its rows.
#[derive(Clone, Debug)]
pub struct ScopedResource {
    pub prefix: &'static str,
    pub table: &'static str,
    pub read: &'static [Role],
    pub write: &'static [Role],
    pub delete: &'static [Role],
}

#[derive(Clone, Debug, Default)]
pub struct ResourceRegistry {
    resources: Vec<ScopedResource>,
}

impl ResourceRegistry {
    pub fn new(resources: Vec<ScopedResource>) -> Self {
        Self { resources }
    }

    /// The resource whose prefix owns `path`, preferring the longest prefix.
    pub fn resolve(&self, path: &str) -> Option<&ScopedResource> {
        self.resources
            .iter()
            .filter(|r| {
                path == r.prefix
                    || path
                        .strip_prefix(r.prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|r| r.prefix.len())
    }
}

/// The row a guarded `/{id}` route addresses, already checked against the
/// caller's tenant.
#[derive(Clone, Debug)]
pub struct TenantRow(pub Row);

pub async fn validate_tenant_resource(
    store: &dyn Store,
    table: &str,
    id: &str,
    tenant: &Tenant,
) -> Result<Row, AppError> {
    let row = store
        .select(table, &Query::new().eq("id", id).limit(1))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found("Resource"))?;

    match row.get("tenant_id") {
        Some(Value::String(owner)) if *owner == tenant.id => Ok(row),
        _ => {
            warn!("Tenant {} denied access to {table} row {id}", tenant.id);
            Err(AppError::Forbidden(
                "Access denied to resource from another tenant".to_string(),
            ))
        }
    }
}

pub async fn guard_tenant_resource(
    State(state): State<SharedState>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    context: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(resource) = state.resources.resolve(uri.path()) else {
        return Ok(next.run(request).await);
    };

    context.require_tenant()?;
    let (tenant, _) = context.require_auth()?;
    let row = validate_tenant_resource(state.store.as_ref(), resource.table, &id, tenant).await?;
    request.extensions_mut().insert(TenantRow(row));

    Ok(next.run(request).await)
}

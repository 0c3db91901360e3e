mod support;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::json;
use server::{
    auth::{AuthError, AuthProvider, Identity, Session, memory::MemoryAuthProvider},
    database::{Query, Store},
    models::{PROVISIONING_INTENTS, TENANT_USERS, TENANTS},
};

/// Refuses to create accounts for one address and delegates the rest.
struct RefusingAuth {
    inner: MemoryAuthProvider,
    refused: &'static str,
}

#[async_trait]
impl AuthProvider for RefusingAuth {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        self.inner.verify(token).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        if email == self.refused {
            return Err(AuthError::Rejected {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        self.inner.sign_up(email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.inner.sign_out(token).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.inner.refresh(refresh_token).await
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), AuthError> {
        self.inner.delete_user(user_id).await
    }
}

fn tenant_body(subdomain: &str, admin_email: &str) -> serde_json::Value {
    json!({
        "name": "Test Clinic",
        "subdomain": subdomain,
        "admin_email": admin_email,
        "admin_password": "admin-password",
    })
}

#[tokio::test]
async fn test_tenant_admin_cannot_use_platform_routes() {
    let app = support::spawn().await;
    let (_, admin) = app.clinic("sunrise").await;

    let (status, body) = app
        .send(Method::GET, "/admin/tenants", Some("sunrise"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Super admin access required");

    let (status, _) = app.send(Method::GET, "/admin/tenants", None, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_provisioning_creates_tenant_and_admin() {
    let app = support::spawn().await;
    let root = app.super_admin_token().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/admin/tenants",
            None,
            Some(&root),
            Some(tenant_body("Harbor", "Owner@Harbor.test")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["tenant"]["subdomain"], "harbor");
    assert_eq!(body["data"]["tenant"]["status"], "active");
    assert_eq!(body["data"]["admin"]["role"], "admin");
    assert_eq!(body["data"]["admin"]["email"], "owner@harbor.test");

    let token = app
        .login(Some("harbor"), "owner@harbor.test", "admin-password")
        .await;
    let (status, body) = app
        .send(Method::GET, "/users", Some("harbor"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .send(Method::GET, "/admin/tenants", None, Some(&root), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let intents = app
        .store
        .select(PROVISIONING_INTENTS, &Query::new())
        .await
        .unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0]["status"], "completed");
}

#[tokio::test]
async fn test_provisioning_rejects_bad_requests() {
    let app = support::spawn().await;
    let root = app.super_admin_token().await;
    app.clinic("sunrise").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/admin/tenants",
            None,
            Some(&root),
            Some(tenant_body("sunrise", "second@sunrise.test")),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Subdomain already taken");

    let (status, body) = app
        .send(
            Method::POST,
            "/admin/tenants",
            None,
            Some(&root),
            Some(tenant_body("admin", "owner@admin.test")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Subdomain admin is reserved");

    let (status, _) = app
        .send(
            Method::POST,
            "/admin/tenants",
            None,
            Some(&root),
            Some(tenant_body("-edge-", "owner@edge.test")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(
            Method::POST,
            "/admin/tenants",
            None,
            Some(&root),
            Some(json!({ "name": "No Admin", "subdomain": "lonely" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Missing required fields: admin_email, admin_password"
    );

    assert_eq!(app.store.row_count(TENANTS).await, 1);
}

#[tokio::test]
async fn test_failed_provisioning_is_compensated() {
    let auth = Arc::new(RefusingAuth {
        inner: MemoryAuthProvider::new(),
        refused: "owner@broken.test",
    });
    let app = support::spawn_with_auth(auth).await;
    let root = app.super_admin_token().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/admin/tenants",
            None,
            Some(&root),
            Some(tenant_body("broken", "owner@broken.test")),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");

    assert_eq!(app.store.row_count(TENANTS).await, 0);
    // Only the super admin's membership remains.
    assert_eq!(app.store.row_count(TENANT_USERS).await, 1);

    let intents = app
        .store
        .select(PROVISIONING_INTENTS, &Query::new())
        .await
        .unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0]["status"], "compensated");
    assert_eq!(intents[0]["compensations"][0]["action"], "delete_tenant");

    let (status, _) = app
        .send(Method::GET, "/auth/me", Some("broken"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_suspended_tenant_stops_resolving() {
    let app = support::spawn().await;
    let root = app.super_admin_token().await;
    let (tenant_id, admin) = app.clinic("sunrise").await;

    let (status, _) = app
        .send(Method::GET, "/patients", Some("sunrise"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/admin/tenants/{tenant_id}/status"),
            None,
            Some(&root),
            Some(json!({ "status": "suspended" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "suspended");

    let (status, body) = app
        .send(Method::GET, "/patients", Some("sunrise"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Tenant not found");

    let (status, body) = app
        .send(
            Method::GET,
            "/admin/tenants?status=suspended",
            None,
            Some(&root),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/admin/tenants/{tenant_id}/status"),
            None,
            Some(&root),
            Some(json!({ "status": "paused" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::PATCH,
            "/admin/tenants/missing/status",
            None,
            Some(&root),
            Some(json!({ "status": "active" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

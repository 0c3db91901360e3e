mod support;

use reqwest::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn test_unknown_subdomain_is_not_found() {
    let app = support::spawn().await;

    let (status, body) = app
        .send(Method::GET, "/patients", Some("nowhere"), None, None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Tenant not found");
}

#[tokio::test]
async fn test_reserved_host_labels_resolve_no_tenant() {
    let app = support::spawn().await;

    let (status, body) = app
        .send(Method::GET, "/patients", Some("www"), None, None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Tenant context required");
}

#[tokio::test]
async fn test_tenant_without_credentials_is_unauthenticated() {
    let app = support::spawn().await;
    app.clinic("sunrise").await;

    let (status, _) = app
        .send(Method::GET, "/patients", Some("sunrise"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            Method::GET,
            "/patients",
            Some("sunrise"),
            Some("not-a-session"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_created_resources_are_scoped_to_the_caller_tenant() {
    let app = support::spawn().await;
    let (sunrise_id, sunrise) = app.clinic("sunrise").await;
    let (_, harbor) = app.clinic("harbor").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/patients",
            Some("sunrise"),
            Some(&sunrise),
            Some(json!({ "first_name": "Ada", "tenant_id": "someone-else" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["tenant_id"], sunrise_id.as_str());
    let patient_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(Method::GET, "/patients", Some("sunrise"), Some(&sunrise), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let (status, body) = app
        .send(Method::GET, "/patients", Some("harbor"), Some(&harbor), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let path = format!("/patients/{patient_id}");
    let (status, body) = app
        .send(Method::GET, &path, Some("harbor"), Some(&harbor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["data"].is_null());

    let (status, _) = app
        .send(
            Method::PATCH,
            &path,
            Some("harbor"),
            Some(&harbor),
            Some(json!({ "first_name": "Eve" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::DELETE, &path, Some("harbor"), Some(&harbor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(Method::GET, &path, Some("sunrise"), Some(&sunrise), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["first_name"], "Ada");
}

#[tokio::test]
async fn test_token_for_another_tenant_is_forbidden() {
    let app = support::spawn().await;
    app.clinic("sunrise").await;
    let (_, harbor) = app.clinic("harbor").await;

    let (status, body) = app
        .send(Method::GET, "/patients", Some("sunrise"), Some(&harbor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"],
        "Access denied: user does not belong to this tenant"
    );

    let (status, _) = app
        .send(Method::GET, "/auth/me", Some("sunrise"), Some(&harbor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The super admin belongs to every tenant.
    let root = app.super_admin_token().await;
    let (status, _) = app
        .send(Method::GET, "/auth/me", Some("sunrise"), Some(&root), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_resource_is_not_found() {
    let app = support::spawn().await;
    let (_, sunrise) = app.clinic("sunrise").await;

    let (status, _) = app
        .send(
            Method::GET,
            "/inventory/does-not-exist",
            Some("sunrise"),
            Some(&sunrise),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_roles_gate_resource_operations() {
    let app = support::spawn().await;
    let (_, admin) = app.clinic("sunrise").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/users",
            Some("sunrise"),
            Some(&admin),
            Some(json!({
                "email": "nurse@sunrise.test",
                "password": "nurse-password",
                "role": "nurse",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = app
        .send(
            Method::POST,
            "/users",
            Some("sunrise"),
            Some(&admin),
            Some(json!({
                "email": "nurse@sunrise.test",
                "password": "nurse-password",
                "role": "nurse",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .send(
            Method::POST,
            "/users",
            Some("sunrise"),
            Some(&admin),
            Some(json!({ "email": "x@sunrise.test", "password": "pw", "role": "super_admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "The super_admin role cannot be granted");

    let nurse = app
        .login(Some("sunrise"), "nurse@sunrise.test", "nurse-password")
        .await;

    let (status, body) = app
        .send(
            Method::POST,
            "/inventory",
            Some("sunrise"),
            Some(&nurse),
            Some(json!({ "vaccine_code": "MMR", "quantity": 20 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let path = format!("/inventory/{}", body["data"]["id"].as_str().unwrap());

    let (status, body) = app
        .send(Method::DELETE, &path, Some("sunrise"), Some(&nurse), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");

    let (status, _) = app
        .send(Method::GET, "/users", Some("sunrise"), Some(&nurse), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::DELETE, &path, Some("sunrise"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(Method::GET, "/users", Some("sunrise"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_login_requires_membership_of_host_tenant() {
    let app = support::spawn().await;
    app.clinic("sunrise").await;
    app.clinic("harbor").await;

    let (status, _) = app
        .send(
            Method::POST,
            "/auth/login",
            Some("harbor"),
            None,
            Some(json!({ "email": "admin@sunrise.test", "password": "admin-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/login",
            Some("sunrise"),
            None,
            Some(json!({ "email": "admin@sunrise.test" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields: password");

    let (status, _) = app
        .send(
            Method::POST,
            "/auth/login",
            Some("sunrise"),
            None,
            Some(json!({ "email": "admin@sunrise.test", "password": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let app = support::spawn().await;
    let (tenant_id, _) = app.clinic("sunrise").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/login",
            Some("sunrise"),
            None,
            Some(json!({ "email": "admin@sunrise.test", "password": "admin-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["data"]["session"]["access_token"].as_str().unwrap().to_string();
    let refresh = body["data"]["session"]["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(Method::GET, "/auth/me", Some("sunrise"), Some(&access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["role"], "admin");
    assert_eq!(body["data"]["tenant"]["id"], tenant_id.as_str());

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/refresh",
            Some("sunrise"),
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let renewed = body["data"]["session"]["access_token"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(Method::POST, "/auth/logout", Some("sunrise"), Some(&renewed), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(Method::GET, "/auth/me", Some("sunrise"), Some(&renewed), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_route_and_malformed_body_use_the_envelope() {
    let app = support::spawn().await;

    let (status, body) = app.send(Method::GET, "/nope", None, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let response = app
        .request(Method::POST, "/auth/login", None)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Malformed payload");
    assert!(body["details"].is_string());
}

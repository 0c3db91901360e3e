#![allow(dead_code)]

use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use server::{
    auth::{AuthProvider, memory::MemoryAuthProvider},
    build_router,
    config::Config,
    database::{Store, memory::MemoryStore, to_row},
    models::{GUIDELINES, TENANT_USERS},
    state::{SharedState, State},
};
use tokio::net::TcpListener;

pub const SUPER_ADMIN_EMAIL: &str = "root@vaxtrack.test";
pub const SUPER_ADMIN_PASSWORD: &str = "root-password";
const GUIDELINES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../data/guidelines.json");

pub struct TestApp {
    pub base: String,
    pub client: Client,
    pub state: SharedState,
    pub store: Arc<MemoryStore>,
}

pub async fn spawn() -> TestApp {
    spawn_with_auth(Arc::new(MemoryAuthProvider::new())).await
}

pub async fn spawn_with_auth(auth: Arc<dyn AuthProvider>) -> TestApp {
    let store = Arc::new(MemoryStore::with_schema_constraints());

    let guidelines = schedule::load_guidelines(GUIDELINES_PATH).unwrap();
    let rows = guidelines
        .iter()
        .map(|g| to_row(GUIDELINES, g).unwrap())
        .collect();
    store.seed(GUIDELINES, rows).await.unwrap();

    let identity = auth
        .sign_up(SUPER_ADMIN_EMAIL, SUPER_ADMIN_PASSWORD)
        .await
        .unwrap();
    store
        .insert(
            TENANT_USERS,
            to_row(
                TENANT_USERS,
                &json!({
                    "tenant_id": null,
                    "user_id": identity.id,
                    "email": SUPER_ADMIN_EMAIL,
                    "role": "super_admin",
                }),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let config = Config {
        base_domain: "vaxtrack.test".to_string(),
        ..Config::default()
    };
    let state = State::with_backends(config, store.clone(), auth);
    let app = build_router(state.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base: format!("http://{address}"),
        client: Client::new(),
        state,
        store,
    }
}

impl TestApp {
    /// A request addressed to `subdomain` when given.
    pub fn request(&self, method: Method, path: &str, subdomain: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base));

        match subdomain {
            Some(subdomain) => builder.header("x-forwarded-host", format!("{subdomain}.vaxtrack.test")),
            None => builder.header("x-forwarded-host", "vaxtrack.test"),
        }
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        subdomain: Option<&str>,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = self.request(method, path, subdomain);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.unwrap();
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);

        (status, body)
    }

    pub async fn login(&self, subdomain: Option<&str>, email: &str, password: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/login",
                subdomain,
                None,
                Some(json!({ "email": email, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");

        body["data"]["session"]["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn super_admin_token(&self) -> String {
        self.login(None, SUPER_ADMIN_EMAIL, SUPER_ADMIN_PASSWORD).await
    }

    /// Provisions a tenant and returns its id and its admin's token.
    pub async fn clinic(&self, subdomain: &str) -> (String, String) {
        let root = self.super_admin_token().await;
        let admin_email = format!("admin@{subdomain}.test");

        let (status, body) = self
            .send(
                Method::POST,
                "/admin/tenants",
                None,
                Some(&root),
                Some(json!({
                    "name": format!("{subdomain} clinic"),
                    "subdomain": subdomain,
                    "admin_email": admin_email,
                    "admin_password": "admin-password",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "provisioning failed: {body}");

        let tenant_id = body["data"]["tenant"]["id"].as_str().unwrap().to_string();
        let token = self
            .login(Some(subdomain), &admin_email, "admin-password")
            .await;

        (tenant_id, token)
    }

    /// Registers a parent and returns their portal token.
    pub async fn parent(&self, email: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/portal/register",
                None,
                None,
                Some(json!({
                    "email": email,
                    "password": "parent-password",
                    "first_name": "Pat",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "registration failed: {body}");

        body["data"]["token"].as_str().unwrap().to_string()
    }
}

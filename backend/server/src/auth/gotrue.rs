use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::json;

use super::{AuthError, AuthProvider, Identity, Session};

/// The hosted auth service's REST API under `/auth/v1`.
pub struct GoTrueProvider {
    client: Client,
    base_url: String,
    service_key: String,
}

impl GoTrueProvider {
    pub fn new(project_url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            service_key: service_key.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(bearer)
    }

    async fn session(&self, grant_type: &str, body: serde_json::Value) -> Result<Response, AuthError> {
        Ok(self
            .request(Method::POST, "/token", &self.service_key)
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await?)
    }
}

async fn rejected(response: Response) -> AuthError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();

    AuthError::Rejected { status, message }
}

#[async_trait]
impl AuthProvider for GoTrueProvider {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let response = self.request(Method::GET, "/user", token).send().await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            _ => Err(rejected(response).await),
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let response = self
            .request(Method::POST, "/admin/users", &self.service_key)
            .json(&json!({ "email": email, "password": password, "email_confirm": true }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(AuthError::AlreadyRegistered)
            }
            _ => Err(rejected(response).await),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .session("password", json!({ "email": email, "password": password }))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(AuthError::InvalidCredentials)
            }
            _ => Err(rejected(response).await),
        }
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let response = self.request(Method::POST, "/logout", token).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidSession),
            _ => Err(rejected(response).await),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let response = self
            .session("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(AuthError::InvalidSession),
            _ => Err(rejected(response).await),
        }
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), AuthError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/admin/users/{user_id}"),
                &self.service_key,
            )
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(rejected(response).await),
        }
    }
}

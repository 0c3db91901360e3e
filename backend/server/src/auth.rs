//! # Auth Provider
//!
//! Opaque bearer sessions issued by the hosted auth service. Clinic staff
//! and parents both sign up and sign in here. Parents then receive a portal
//! token from [`crate::token`].
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod gotrue;
pub mod memory;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: Identity,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Auth provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Auth provider rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// `None` when the token is unknown, expired or revoked.
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;

    /// Succeeds when the user is already gone.
    async fn delete_user(&self, user_id: &str) -> Result<(), AuthError>;
}

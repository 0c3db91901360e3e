use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuthError, AuthProvider, Identity, Session};

const SESSION_SECONDS: u64 = 3600;

struct StoredUser {
    identity: Identity,
    salt: String,
    password_digest: String,
}

#[derive(Default)]
struct Inner {
    // keyed by lowercased email
    users: HashMap<String, StoredUser>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
}

/// In-process accounts and opaque session tokens.
#[derive(Default)]
pub struct MemoryAuthProvider {
    inner: Mutex<Inner>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());

    STANDARD.encode(hasher.finalize())
}

impl Inner {
    fn issue(&mut self, identity: Identity) -> Session {
        let access_token = Uuid::new_v4().simple().to_string();
        let refresh_token = Uuid::new_v4().simple().to_string();

        self.access_tokens
            .insert(access_token.clone(), identity.id.clone());
        self.refresh_tokens
            .insert(refresh_token.clone(), identity.id.clone());

        Session {
            access_token,
            refresh_token,
            expires_in: SESSION_SECONDS,
            user: identity,
        }
    }

    fn identity(&self, user_id: &str) -> Option<Identity> {
        self.users
            .values()
            .find(|u| u.identity.id == user_id)
            .map(|u| u.identity.clone())
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let inner = self.inner.lock().await;

        Ok(inner
            .access_tokens
            .get(token)
            .and_then(|user_id| inner.identity(user_id)))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let mut inner = self.inner.lock().await;
        let key = email.trim().to_lowercase();

        if inner.users.contains_key(&key) {
            return Err(AuthError::AlreadyRegistered);
        }

        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email: key.clone(),
        };
        let salt = Uuid::new_v4().simple().to_string();
        let password_digest = digest(&salt, password);

        inner.users.insert(
            key,
            StoredUser {
                identity: identity.clone(),
                salt,
                password_digest,
            },
        );

        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let mut inner = self.inner.lock().await;

        let identity = match inner.users.get(&email.trim().to_lowercase()) {
            Some(user) if user.password_digest == digest(&user.salt, password) => {
                user.identity.clone()
            }
            _ => return Err(AuthError::InvalidCredentials),
        };

        Ok(inner.issue(identity))
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;

        let user_id = inner
            .access_tokens
            .remove(token)
            .ok_or(AuthError::InvalidSession)?;
        inner.refresh_tokens.retain(|_, owner| *owner != user_id);

        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let mut inner = self.inner.lock().await;

        let identity = inner
            .refresh_tokens
            .remove(refresh_token)
            .and_then(|user_id| inner.identity(&user_id))
            .ok_or(AuthError::InvalidSession)?;

        Ok(inner.issue(identity))
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;

        inner.users.retain(|_, u| u.identity.id != user_id);
        inner.access_tokens.retain(|_, owner| owner.as_str() != user_id);
        inner.refresh_tokens.retain(|_, owner| owner.as_str() != user_id);

        Ok(())
    }
}

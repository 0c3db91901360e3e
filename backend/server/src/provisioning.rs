//! # Tenant Provisioning
//!
//! Creating a clinic takes three writes against two services: the tenant
//! row, the admin's auth account and the admin's membership. Neither
//! service offers a transaction spanning them, so provisioning runs as a
//! saga.
//!
//! - An intent row in `provisioning_intents` is written first with status
//!   `pending`.
//! - Each completed step appends its compensating action to the intent. If
//!   that write fails the saga stops and unwinds.
//! - On failure the compensations run newest first. The intent ends as
//!   `compensated`, or `compensation_failed` when an undo step errors, which
//!   leaves the recorded actions for an operator to replay.
//! - Compensations are idempotent: deleting something already gone
//!   succeeds.
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::{
    auth::{AuthError, AuthProvider},
    database::{Filter, Store, StoreError, insert_as, to_row},
    error::AppError,
    models::{Membership, PROVISIONING_INTENTS, Role, TENANT_USERS, TENANTS, Tenant, TenantStatus},
};

#[derive(Clone, Debug, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub subdomain: String,
    pub admin_email: String,
    pub admin_password: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProvisionedTenant {
    pub tenant: Tenant,
    pub admin: Membership,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Completed,
    Compensated,
    CompensationFailed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    DeleteTenant { tenant_id: String },
    DeleteAuthUser { user_id: String },
    DeleteMembership { membership_id: String },
}

impl Compensation {
    async fn run(&self, store: &dyn Store, auth: &dyn AuthProvider) -> Result<(), String> {
        match self {
            Compensation::DeleteTenant { tenant_id } => store
                .delete(TENANTS, &[Filter::eq("id", tenant_id.as_str())])
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Compensation::DeleteAuthUser { user_id } => {
                auth.delete_user(user_id).await.map_err(|e| e.to_string())
            }
            Compensation::DeleteMembership { membership_id } => store
                .delete(TENANT_USERS, &[Filter::eq("id", membership_id.as_str())])
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }
}

struct Saga<'a> {
    store: &'a dyn Store,
    auth: &'a dyn AuthProvider,
    intent_id: String,
    done: Vec<Compensation>,
}

impl<'a> Saga<'a> {
    async fn begin(
        store: &'a dyn Store,
        auth: &'a dyn AuthProvider,
        request: &NewTenant,
    ) -> Result<Saga<'a>, StoreError> {
        let intent = store
            .insert(
                PROVISIONING_INTENTS,
                to_row(
                    PROVISIONING_INTENTS,
                    &json!({
                        "subdomain": request.subdomain,
                        "admin_email": request.admin_email,
                        "status": IntentStatus::Pending,
                        "compensations": [],
                    }),
                )?,
            )
            .await?;

        let intent_id = intent
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Saga {
            store,
            auth,
            intent_id,
            done: Vec::new(),
        })
    }

    /// Persists the compensation for a finished step. An intent that cannot
    /// be written stops the saga, so every applied step stays replayable.
    async fn record(&mut self, compensation: Compensation) -> Result<(), AppError> {
        self.done.push(compensation);

        let patch = json!({ "compensations": self.done });
        self.update_intent(patch).await.map_err(|e| {
            error!("Failed to record provisioning step for {}: {e}", self.intent_id);
            AppError::from(e)
        })
    }

    async fn update_intent(&self, patch: Value) -> Result<(), StoreError> {
        self.store
            .update(
                PROVISIONING_INTENTS,
                &[Filter::eq("id", self.intent_id.as_str())],
                to_row(PROVISIONING_INTENTS, &patch)?,
            )
            .await?;

        Ok(())
    }

    async fn complete(&self) {
        if let Err(e) = self
            .update_intent(json!({ "status": IntentStatus::Completed }))
            .await
        {
            warn!("Failed to close provisioning intent {}: {e}", self.intent_id);
        }
    }

    async fn abort(&self, cause: &AppError) {
        let mut failures = Vec::new();

        for compensation in self.done.iter().rev() {
            if let Err(e) = compensation.run(self.store, self.auth).await {
                error!("Compensation {compensation:?} failed: {e}");
                failures.push(e);
            }
        }

        let status = if failures.is_empty() {
            IntentStatus::Compensated
        } else {
            IntentStatus::CompensationFailed
        };
        info!("Provisioning intent {} ended as {status:?}", self.intent_id);

        let patch = json!({
            "status": status,
            "error": cause.to_string(),
            "compensation_errors": failures,
        });
        if let Err(e) = self.update_intent(patch).await {
            error!("Failed to close provisioning intent {}: {e}", self.intent_id);
        }
    }
}

pub async fn provision_tenant(
    store: &dyn Store,
    auth: &dyn AuthProvider,
    request: NewTenant,
) -> Result<ProvisionedTenant, AppError> {
    let mut saga = Saga::begin(store, auth, &request).await?;

    match run_steps(&mut saga, &request).await {
        Ok(provisioned) => {
            saga.complete().await;
            info!("Provisioned tenant {}", provisioned.tenant.subdomain);
            Ok(provisioned)
        }
        Err(e) => {
            warn!("Provisioning {} failed: {e}", request.subdomain);
            saga.abort(&e).await;
            Err(e)
        }
    }
}

async fn run_steps(saga: &mut Saga<'_>, request: &NewTenant) -> Result<ProvisionedTenant, AppError> {
    let tenant: Tenant = insert_as(
        saga.store,
        TENANTS,
        to_row(
            TENANTS,
            &json!({
                "name": request.name,
                "subdomain": request.subdomain,
                "status": TenantStatus::Active,
            }),
        )?,
    )
    .await
    .map_err(|e| match e {
        StoreError::Conflict { .. } => AppError::Conflict("Subdomain already taken".to_string()),
        e => e.into(),
    })?;
    saga.record(Compensation::DeleteTenant {
        tenant_id: tenant.id.clone(),
    })
    .await?;

    let identity = saga
        .auth
        .sign_up(&request.admin_email, &request.admin_password)
        .await
        .map_err(|e| match e {
            AuthError::AlreadyRegistered => {
                AppError::Conflict("Admin email already registered".to_string())
            }
            e => e.into(),
        })?;
    saga.record(Compensation::DeleteAuthUser {
        user_id: identity.id.clone(),
    })
    .await?;

    let admin: Membership = insert_as(
        saga.store,
        TENANT_USERS,
        to_row(
            TENANT_USERS,
            &json!({
                "tenant_id": tenant.id,
                "user_id": identity.id,
                "email": request.admin_email,
                "role": Role::Admin,
            }),
        )?,
    )
    .await?;
    saga.record(Compensation::DeleteMembership {
        membership_id: admin.id.clone(),
    })
    .await?;

    Ok(ProvisionedTenant { tenant, admin })
}

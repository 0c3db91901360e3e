use std::sync::Arc;

use schedule::load_guidelines;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    ServerError,
    auth::{AuthError, AuthProvider, gotrue::GoTrueProvider, memory::MemoryAuthProvider},
    config::{Config, ConfigError, StoreBackend},
    database::{Store, memory::MemoryStore, postgrest::PostgrestStore, to_row},
    models::{GUIDELINES, Role, TENANT_USERS},
    routes::resources::scoped_resources,
    scheduler::ScheduleService,
    tenancy::ResourceRegistry,
    token::TokenSigner,
};

pub type SharedState = Arc<State>;

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn AuthProvider>,
    pub tokens: TokenSigner,
    pub schedules: ScheduleService,
    pub resources: ResourceRegistry,
}

impl State {
    pub async fn new(config: Config) -> Result<SharedState, ServerError> {
        let (store, auth): (Arc<dyn Store>, Arc<dyn AuthProvider>) = match config.store_backend {
            StoreBackend::Postgrest => {
                let url = config
                    .supabase_url
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing("SUPABASE_URL".to_string()))?;
                let key = config
                    .supabase_service_key
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing("SUPABASE_SERVICE_KEY".to_string()))?;

                info!("Using hosted store at {url}");
                (
                    Arc::new(PostgrestStore::new(url, key)),
                    Arc::new(GoTrueProvider::new(url, key)),
                )
            }
            StoreBackend::Memory => {
                info!("Using in-memory store");
                let store = MemoryStore::with_schema_constraints();
                seed_guidelines(&store, &config.guidelines_path).await?;

                (Arc::new(store), Arc::new(MemoryAuthProvider::new()))
            }
        };

        let state = Self::with_backends(config, store, auth);

        if state.config.store_backend == StoreBackend::Memory {
            bootstrap_super_admin(&state).await?;
        }

        Ok(state)
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn Store>,
        auth: Arc<dyn AuthProvider>,
    ) -> SharedState {
        Arc::new(Self {
            tokens: TokenSigner::new(&config.jwt_secret, config.token_ttl_days),
            schedules: ScheduleService::new(config.grace_days, &config.default_country_code),
            resources: ResourceRegistry::new(scoped_resources()),
            config,
            store,
            auth,
        })
    }
}

async fn seed_guidelines(store: &MemoryStore, path: &str) -> Result<(), ServerError> {
    let guidelines = load_guidelines(path)?;
    let rows = guidelines
        .iter()
        .map(|g| to_row(GUIDELINES, g))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Seeding {} guidelines from {path}", rows.len());
    store.seed(GUIDELINES, rows).await?;

    Ok(())
}

async fn bootstrap_super_admin(state: &State) -> Result<(), ServerError> {
    let (Some(email), Some(password)) = (
        state.config.super_admin_email.as_deref(),
        state.config.super_admin_password.as_deref(),
    ) else {
        return Ok(());
    };

    let identity = match state.auth.sign_up(email, password).await {
        Ok(identity) => identity,
        Err(AuthError::AlreadyRegistered) => {
            warn!("Super admin {email} already registered");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    state
        .store
        .insert(
            TENANT_USERS,
            to_row(
                TENANT_USERS,
                &json!({
                    "tenant_id": null,
                    "user_id": identity.id,
                    "email": identity.email,
                    "role": Role::SuperAdmin,
                }),
            )?,
        )
        .await?;
    info!("Super admin {email} ready");

    Ok(())
}

//! Backend of a multi-tenant vaccination tracking service.
//!
//! Clinics (tenants) manage patients, vaccinations, appointments and
//! inventory under their own subdomain. Parents use a separate portal to
//! keep their children's vaccination schedules.
//!
//!
//!
//! # General Infrastructure
//! - One axum server, state shared through `Arc<State>`
//! - Data lives in the hosted relational database, reached over its REST API
//! - Accounts live in the hosted auth service
//! - `STORE_BACKEND=memory` swaps both for in-process versions, seeded from
//!   `data/guidelines.json`
//!
//!
//!
//! # Requests
//!
//! ## Clinic side
//! - [`tenancy::resolve_request_context`] runs first on every clinic route
//! - Handlers take a [`tenancy::RequestContext`] and call the guard they need
//! - `/{id}` routes of tenant-owned tables are checked by
//!   [`tenancy::guard_tenant_resource`] before the handler runs
//!
//! ## Portal
//! - Routes under `/portal` authenticate with portal tokens from [`token`]
//! - A parent only ever sees their own children
//!
//!
//!
//! # Responses
//!
//! Success is `{ "success": true, "data": ... }`, failure is
//! `{ "success": false, "error": "...", "details": "..." }`.
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 400 | invalid input, missing tenant |
//! | 401 | missing or invalid credentials |
//! | 403 | wrong role or wrong tenant |
//! | 404 | unknown tenant, resource or route |
//! | 409 | duplicate key |
//! | 500 | upstream failure, details only in logs |
//!
//!
//!
//! # Setup
//!
//! Run locally with the in-memory backend.
//! ```sh
//! JWT_SECRET=dev RUST_LOG=info cargo run -p vaxtrack
//! ```
//!
//! Run against the hosted services.
//! ```sh
//! STORE_BACKEND=postgrest SUPABASE_URL=https://project.supabase.co cargo run -p vaxtrack
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::{any::Any, time::Duration};

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use thiserror::Error;
use tokio::{net::TcpListener, signal};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod provisioning;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod tenancy;
pub mod token;
pub mod utils;

use auth::AuthError;
use config::{Config, ConfigError};
use database::StoreError;
use error::AppError;
use routes::{guidelines::guidelines_handler, health_handler, not_found_handler};
use state::{SharedState, State};
use tenancy::resolve_request_context;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to load guidelines: {0}")]
    Guidelines(#[from] schedule::ScheduleError),

    #[error("Store error during startup: {0}")]
    Store(#[from] StoreError),

    #[error("Auth provider error during startup: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid CORS origin: {0}")]
    Cors(String),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_router(state: SharedState) -> Result<Router, ServerError> {
    let clinic = Router::new()
        .merge(routes::auth::router())
        .merge(routes::users::router())
        .merge(routes::resources::router(state.clone()))
        .merge(routes::admin::router())
        .layer(from_fn_with_state(state.clone(), resolve_request_context));

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/guidelines", get(guidelines_handler))
        .merge(clinic)
        .nest("/portal", routes::portal::router())
        .fallback(not_found_handler)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config)?)
        .with_state(state))
}

fn cors_layer(config: &Config) -> Result<CorsLayer, ServerError> {
    let origin = match config.cors_origin.as_deref() {
        Some(origin) => AllowOrigin::exact(
            HeaderValue::from_str(origin).map_err(|_| ServerError::Cors(origin.to_string()))?,
        ),
        None => AllowOrigin::from(AnyOrigin),
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60)))
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    error!("Handler panicked");

    AppError::InternalError("handler panicked".into()).into_response()
}

pub async fn start_server() -> Result<(), ServerError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");
    let app = build_router(state.clone())?;

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

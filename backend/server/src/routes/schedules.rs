use axum::{
    Router,
    extract::{Path, State},
    response::Response,
    routing::{get, post},
};
use chrono::NaiveDate;
use schedule::CompletedDose;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    database::{Filter, Query, StoreError, fetch_all, insert_as, to_row},
    error::AppError,
    models::{VACCINATION_RECORDS, VaccinationRecord},
    routes::{children::owned_child, portal::ParentSession},
    state::SharedState,
    utils::{Payload, created, is_present, ok, require_fields, today},
};

#[derive(Deserialize)]
pub struct GenerateRequest {
    country_code: Option<String>,
    region_code: Option<String>,
    #[serde(default)]
    include_optional: bool,
    #[serde(default)]
    exclude_vaccines: Vec<String>,
}

#[derive(Deserialize)]
pub struct CatchUpRequest {
    #[serde(default)]
    missed_vaccines: Vec<String>,
    country_code: Option<String>,
    region_code: Option<String>,
    #[serde(default)]
    include_optional: bool,
}

#[derive(Deserialize)]
pub struct NewRecord {
    vaccine_code: Option<String>,
    dose_number: Option<u32>,
    vaccination_date: Option<String>,
    administered_by: Option<String>,
    notes: Option<String>,
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/children/{id}/schedule",
            get(get_schedule_handler).post(generate_schedule_handler),
        )
        .route(
            "/children/{id}/schedule/catch-up",
            post(catch_up_schedule_handler),
        )
        .route("/children/{id}/schedule/summary", get(summary_handler))
        .route(
            "/children/{id}/vaccinations",
            get(list_records_handler).post(record_vaccination_handler),
        )
}

pub async fn get_schedule_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let child = owned_child(&state, &parent, &id).await?;
    let entries = state
        .schedules
        .persisted_schedule(state.store.as_ref(), &child.id)
        .await?;

    Ok(ok(entries))
}

pub async fn generate_schedule_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
    Payload(body): Payload<GenerateRequest>,
) -> Result<Response, AppError> {
    let child = owned_child(&state, &parent, &id).await?;
    let store = state.store.as_ref();

    let options = state.schedules.options_for(
        &child,
        body.country_code.as_deref(),
        body.region_code.as_deref(),
        body.include_optional,
        body.exclude_vaccines,
    );
    let entries = state
        .schedules
        .generate_schedule(store, &child, &options, today())
        .await?;
    let saved = state
        .schedules
        .save_schedule(store, &child.id, &entries)
        .await?;
    info!("Generated {} schedule entries for child {}", saved.len(), child.id);

    Ok(ok(json!({ "schedule": entries, "saved": saved.len() })))
}

pub async fn catch_up_schedule_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
    Payload(body): Payload<CatchUpRequest>,
) -> Result<Response, AppError> {
    let missed: Vec<String> = body
        .missed_vaccines
        .iter()
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .collect();
    require_fields(&[("missed_vaccines", !missed.is_empty())])?;

    let child = owned_child(&state, &parent, &id).await?;
    let store = state.store.as_ref();

    let options = state.schedules.options_for(
        &child,
        body.country_code.as_deref(),
        body.region_code.as_deref(),
        body.include_optional,
        Vec::new(),
    );
    let entries = state
        .schedules
        .generate_catch_up_schedule(store, &child, &missed, &options, today())
        .await?;
    let saved = state
        .schedules
        .save_schedule(store, &child.id, &entries)
        .await?;

    Ok(ok(json!({ "schedule": entries, "saved": saved.len() })))
}

pub async fn summary_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let child = owned_child(&state, &parent, &id).await?;
    let summary = state
        .schedules
        .summary(state.store.as_ref(), &child.id)
        .await?;

    Ok(ok(summary))
}

pub async fn list_records_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let child = owned_child(&state, &parent, &id).await?;
    let records: Vec<VaccinationRecord> = fetch_all(
        state.store.as_ref(),
        VACCINATION_RECORDS,
        &Query::new()
            .eq("child_id", child.id.as_str())
            .order_by("vaccination_date", true)
            .order_by("vaccine_code", true),
    )
    .await?;

    Ok(ok(records))
}

/// Records a dose and marks its schedule entry completed.
pub async fn record_vaccination_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
    Payload(body): Payload<NewRecord>,
) -> Result<Response, AppError> {
    require_fields(&[
        ("vaccine_code", is_present(&body.vaccine_code)),
        ("dose_number", body.dose_number.is_some()),
    ])?;
    let dose = CompletedDose {
        vaccine_code: body.vaccine_code.unwrap_or_default().trim().to_uppercase(),
        dose_number: body.dose_number.unwrap_or_default(),
    };
    if dose.dose_number == 0 {
        return Err(AppError::Validation("dose_number must be at least 1".to_string()));
    }

    let child = owned_child(&state, &parent, &id).await?;
    let store = state.store.as_ref();

    let vaccination_date = match body.vaccination_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::Validation("Invalid vaccination_date, expected YYYY-MM-DD".to_string())
        })?,
        _ => today(),
    };
    if vaccination_date < child.date_of_birth {
        return Err(AppError::Validation(
            "vaccination_date cannot be before date_of_birth".to_string(),
        ));
    }

    let dose_filters = [
        Filter::eq("child_id", child.id.as_str()),
        Filter::eq("vaccine_code", dose.vaccine_code.as_str()),
        Filter::eq("dose_number", dose.dose_number),
    ];
    if store.count(VACCINATION_RECORDS, &dose_filters).await? > 0 {
        return Err(AppError::Conflict("Dose already recorded".to_string()));
    }

    let row = to_row(
        VACCINATION_RECORDS,
        &json!({
            "child_id": child.id,
            "vaccine_code": dose.vaccine_code,
            "dose_number": dose.dose_number,
            "vaccination_date": vaccination_date,
            "administered_by": body.administered_by,
            "notes": body.notes,
        }),
    )?;
    let record: VaccinationRecord = insert_as(store, VACCINATION_RECORDS, row)
        .await
        .map_err(|e| match e {
            StoreError::Conflict { .. } => AppError::Conflict("Dose already recorded".to_string()),
            e => e.into(),
        })?;

    let schedule_updated = state
        .schedules
        .mark_completed(store, &child.id, &dose)
        .await?;

    Ok(created(json!({
        "record": record,
        "schedule_updated": schedule_updated,
    })))
}

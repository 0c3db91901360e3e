use axum::{
    Router,
    extract::{Path, State},
    response::Response,
    routing::get,
};
use chrono::NaiveDate;
use schedule::ScheduleEntry;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::{
    database::{Filter, Query, Row, fetch_all, fetch_one, from_row, insert_as, to_row},
    error::AppError,
    models::{CHILDREN, Child, Parent, SCHEDULES, VACCINATION_RECORDS},
    routes::portal::ParentSession,
    scheduler::SchedulerError,
    state::SharedState,
    utils::{Payload, created, is_present, ok, require_fields, today},
};

#[derive(Deserialize)]
pub struct NewChild {
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    gender: Option<String>,
    #[serde(default)]
    allergies: Vec<String>,
    #[serde(default)]
    medical_conditions: Vec<String>,
    country_code: Option<String>,
    region_code: Option<String>,
}

#[derive(Deserialize)]
pub struct ChildPatch {
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    gender: Option<String>,
    allergies: Option<Vec<String>>,
    medical_conditions: Option<Vec<String>>,
    country_code: Option<String>,
    region_code: Option<String>,
}

impl ChildPatch {
    /// Whether the patch touches anything the schedule depends on.
    fn affects_schedule(&self) -> bool {
        self.date_of_birth.is_some()
            || self.allergies.is_some()
            || self.medical_conditions.is_some()
            || self.country_code.is_some()
            || self.region_code.is_some()
    }
}

pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/children",
            get(list_children_handler).post(create_child_handler),
        )
        .route(
            "/children/{id}",
            get(get_child_handler)
                .patch(update_child_handler)
                .delete(delete_child_handler),
        )
}

/// The child `id` if `parent` owns it. Foreign and missing children look
/// the same to the caller.
pub async fn owned_child(state: &SharedState, parent: &Parent, id: &str) -> Result<Child, AppError> {
    fetch_one(
        state.store.as_ref(),
        CHILDREN,
        Query::new().eq("id", id).eq("parent_id", parent.id.as_str()),
    )
    .await?
    .ok_or_else(|| AppError::not_found("Child"))
}

fn parse_birth_date(raw: &str) -> Result<NaiveDate, AppError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::Validation("Invalid date_of_birth, expected YYYY-MM-DD".to_string())
    })?;

    if date > today() {
        return Err(AppError::Validation(
            "date_of_birth cannot be in the future".to_string(),
        ));
    }

    Ok(date)
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn clean_code(code: Option<String>) -> Option<String> {
    code.map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty())
}

/// Replaces the child's open schedule entries with a fresh plan. Completed
/// entries are kept.
pub async fn regenerate_schedule(
    state: &SharedState,
    child: &Child,
) -> Result<Vec<ScheduleEntry>, SchedulerError> {
    let store = state.store.as_ref();
    let options = state
        .schedules
        .options_for(child, None, None, false, Vec::new());
    let entries = state
        .schedules
        .generate_schedule(store, child, &options, today())
        .await?;

    store
        .delete(
            SCHEDULES,
            &[
                Filter::eq("child_id", child.id.as_str()),
                Filter::not_in("status", ["completed"]),
            ],
        )
        .await
        .map_err(SchedulerError::Save)?;
    state
        .schedules
        .save_schedule(store, &child.id, &entries)
        .await?;

    Ok(entries)
}

pub async fn list_children_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
) -> Result<Response, AppError> {
    let children: Vec<Child> = fetch_all(
        state.store.as_ref(),
        CHILDREN,
        &Query::new()
            .eq("parent_id", parent.id.as_str())
            .order_by("date_of_birth", true),
    )
    .await?;

    Ok(ok(children))
}

pub async fn create_child_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Payload(body): Payload<NewChild>,
) -> Result<Response, AppError> {
    require_fields(&[
        ("first_name", is_present(&body.first_name)),
        ("date_of_birth", is_present(&body.date_of_birth)),
    ])?;
    let date_of_birth = parse_birth_date(body.date_of_birth.as_deref().unwrap_or_default())?;

    let row = to_row(
        CHILDREN,
        &json!({
            "parent_id": parent.id,
            "first_name": body.first_name.unwrap_or_default().trim(),
            "last_name": body.last_name,
            "date_of_birth": date_of_birth,
            "gender": body.gender,
            "allergies": clean_list(body.allergies),
            "medical_conditions": clean_list(body.medical_conditions),
            "country_code": clean_code(body.country_code),
            "region_code": clean_code(body.region_code),
        }),
    )?;
    let child: Child = insert_as(state.store.as_ref(), CHILDREN, row).await?;
    info!("Parent {} added child {}", parent.id, child.id);

    let schedule = match regenerate_schedule(&state, &child).await {
        Ok(entries) => Some(entries),
        Err(e) => {
            warn!("Schedule generation failed for child {}: {e}", child.id);
            None
        }
    };

    Ok(created(json!({ "child": child, "schedule": schedule })))
}

pub async fn get_child_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let child = owned_child(&state, &parent, &id).await?;

    Ok(ok(child))
}

pub async fn update_child_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
    Payload(body): Payload<ChildPatch>,
) -> Result<Response, AppError> {
    owned_child(&state, &parent, &id).await?;

    let regenerate = body.affects_schedule();
    let mut patch = Map::new();

    if let Some(first_name) = body.first_name.map(|n| n.trim().to_string()) {
        if first_name.is_empty() {
            return Err(AppError::Validation("first_name cannot be empty".to_string()));
        }
        patch.insert("first_name".into(), Value::String(first_name));
    }
    if let Some(raw) = &body.date_of_birth {
        patch.insert(
            "date_of_birth".into(),
            Value::String(parse_birth_date(raw)?.to_string()),
        );
    }
    if let Some(last_name) = body.last_name {
        patch.insert("last_name".into(), Value::String(last_name));
    }
    if let Some(gender) = body.gender {
        patch.insert("gender".into(), Value::String(gender));
    }
    if let Some(allergies) = body.allergies {
        patch.insert("allergies".into(), json!(clean_list(allergies)));
    }
    if let Some(conditions) = body.medical_conditions {
        patch.insert("medical_conditions".into(), json!(clean_list(conditions)));
    }
    if body.country_code.is_some() {
        patch.insert("country_code".into(), json!(clean_code(body.country_code)));
    }
    if body.region_code.is_some() {
        patch.insert("region_code".into(), json!(clean_code(body.region_code)));
    }

    if patch.is_empty() {
        return Err(AppError::Validation("No updatable fields provided".to_string()));
    }

    let updated: Row = state
        .store
        .update(
            CHILDREN,
            &[
                Filter::eq("id", id.as_str()),
                Filter::eq("parent_id", parent.id.as_str()),
            ],
            patch,
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found("Child"))?;
    let child: Child = from_row(CHILDREN, updated)?;

    let schedule = if regenerate {
        match regenerate_schedule(&state, &child).await {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Schedule regeneration failed for child {}: {e}", child.id);
                None
            }
        }
    } else {
        None
    };

    Ok(ok(json!({ "child": child, "schedule": schedule })))
}

pub async fn delete_child_handler(
    State(state): State<SharedState>,
    ParentSession(parent): ParentSession,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let child = owned_child(&state, &parent, &id).await?;
    let store = state.store.as_ref();
    let by_child = [Filter::eq("child_id", child.id.as_str())];

    store.delete(SCHEDULES, &by_child).await?;
    store.delete(VACCINATION_RECORDS, &by_child).await?;
    store
        .delete(CHILDREN, &[Filter::eq("id", child.id.as_str())])
        .await?;
    info!("Parent {} removed child {}", parent.id, child.id);

    Ok(ok(json!({ "id": child.id, "deleted": true })))
}

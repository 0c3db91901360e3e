use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::{error::AppError, state::SharedState, utils::ok};

#[derive(Deserialize)]
pub struct GuidelineParams {
    country_code: Option<String>,
    region_code: Option<String>,
    #[serde(default)]
    include_optional: bool,
}

/// The rows schedule generation would use for a jurisdiction.
pub async fn guidelines_handler(
    State(state): State<SharedState>,
    Query(params): Query<GuidelineParams>,
) -> Result<Response, AppError> {
    let options = state.schedules.options(
        params.country_code.as_deref(),
        params.region_code.as_deref(),
        params.include_optional,
        Vec::new(),
    );
    let guidelines = state
        .schedules
        .fetch_guidelines(state.store.as_ref(), &options)
        .await?;

    Ok(ok(guidelines))
}

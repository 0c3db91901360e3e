//! # Schedule Service
//!
//! Feeds the [`schedule`] planner from the store and writes its output back.
//! Holds no mutable state, so one instance lives in [`crate::state::State`]
//! for the whole process.
use std::collections::BTreeMap;

use chrono::NaiveDate;
use schedule::{
    CompletedDose, Guideline, ScheduleEntry, ScheduleOptions, ScheduleStatus, normalize_guidelines,
    plan_catch_up, plan_schedule,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    database::{Filter, Query, Store, StoreError, fetch_all, from_row, to_row},
    models::{Child, DOSE_KEY, GUIDELINES, SCHEDULES, ScheduleRow, VACCINATION_RECORDS},
};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to load schedule inputs: {0}")]
    Inputs(#[source] StoreError),

    #[error(transparent)]
    Compute(#[from] schedule::ScheduleError),

    #[error("Failed to save schedule: {0}")]
    Save(#[source] StoreError),
}

#[derive(Clone, Debug)]
pub struct ScheduleService {
    grace_days: u32,
    default_country_code: String,
}

impl ScheduleService {
    pub fn new(grace_days: u32, default_country_code: &str) -> Self {
        Self {
            grace_days,
            default_country_code: default_country_code.to_uppercase(),
        }
    }

    pub fn options(
        &self,
        country_code: Option<&str>,
        region_code: Option<&str>,
        include_optional: bool,
        exclude_vaccines: Vec<String>,
    ) -> ScheduleOptions {
        let country_code = country_code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| self.default_country_code.clone());
        let region_code = region_code
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_uppercase);

        ScheduleOptions {
            country_code,
            region_code,
            include_optional,
            exclude_vaccines,
            grace_days: self.grace_days,
        }
    }

    /// Options for `child`, with explicit values taking precedence over the
    /// child's stored jurisdiction.
    pub fn options_for(
        &self,
        child: &Child,
        country_code: Option<&str>,
        region_code: Option<&str>,
        include_optional: bool,
        exclude_vaccines: Vec<String>,
    ) -> ScheduleOptions {
        self.options(
            country_code.or(child.country_code.as_deref()),
            region_code.or(child.region_code.as_deref()),
            include_optional,
            exclude_vaccines,
        )
    }

    pub async fn fetch_guidelines(
        &self,
        store: &dyn Store,
        options: &ScheduleOptions,
    ) -> Result<Vec<Guideline>, StoreError> {
        let mut query = Query::new()
            .eq("country_code", options.country_code.as_str())
            .order_by("recommended_age_months", true);

        if let Some(region) = &options.region_code {
            query = query.filter(Filter::Or(vec![
                Filter::is_null("region_code"),
                Filter::eq("region_code", region.as_str()),
            ]));
        }

        if !options.include_optional {
            query = query.eq("is_mandatory", true);
        }

        if !options.exclude_vaccines.is_empty() {
            query = query.filter(Filter::not_in(
                "vaccine_code",
                options.exclude_vaccines.iter().map(|code| code.trim().to_uppercase()),
            ));
        }

        let guidelines = fetch_all(store, GUIDELINES, &query).await?;
        debug!(
            "Fetched {} guidelines for {}",
            guidelines.len(),
            options.country_code
        );

        Ok(normalize_guidelines(guidelines))
    }

    pub async fn completed_doses(
        &self,
        store: &dyn Store,
        child_id: &str,
    ) -> Result<Vec<CompletedDose>, StoreError> {
        fetch_all(
            store,
            VACCINATION_RECORDS,
            &Query::new().eq("child_id", child_id),
        )
        .await
    }

    pub async fn generate_schedule(
        &self,
        store: &dyn Store,
        child: &Child,
        options: &ScheduleOptions,
        today: NaiveDate,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        let guidelines = self
            .fetch_guidelines(store, options)
            .await
            .map_err(SchedulerError::Inputs)?;
        let completed = self
            .completed_doses(store, &child.id)
            .await
            .map_err(SchedulerError::Inputs)?;

        Ok(plan_schedule(
            &child.profile(),
            &guidelines,
            &completed,
            options,
            today,
        )?)
    }

    pub async fn generate_catch_up_schedule(
        &self,
        store: &dyn Store,
        child: &Child,
        missed_vaccines: &[String],
        options: &ScheduleOptions,
        today: NaiveDate,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        let guidelines = self
            .fetch_guidelines(store, options)
            .await
            .map_err(SchedulerError::Inputs)?;
        let completed = self
            .completed_doses(store, &child.id)
            .await
            .map_err(SchedulerError::Inputs)?;

        Ok(plan_catch_up(
            &child.profile(),
            &guidelines,
            &completed,
            missed_vaccines,
            options,
            today,
        )?)
    }

    /// Upserts on (child_id, vaccine_code, dose_number), so saving the same
    /// plan twice leaves one row per dose.
    pub async fn save_schedule(
        &self,
        store: &dyn Store,
        child_id: &str,
        entries: &[ScheduleEntry],
    ) -> Result<Vec<ScheduleRow>, SchedulerError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let rows = entries
            .iter()
            .map(|entry| {
                to_row(
                    SCHEDULES,
                    &ScheduleRow {
                        child_id: child_id.to_string(),
                        entry: entry.clone(),
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(SchedulerError::Save)?;

        let saved = store
            .upsert(SCHEDULES, rows, &DOSE_KEY)
            .await
            .map_err(SchedulerError::Save)?;
        info!("Saved {} schedule entries for child {child_id}", saved.len());

        saved
            .into_iter()
            .map(|row| from_row(SCHEDULES, row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SchedulerError::Save)
    }

    pub async fn persisted_schedule(
        &self,
        store: &dyn Store,
        child_id: &str,
    ) -> Result<Vec<ScheduleRow>, StoreError> {
        fetch_all(
            store,
            SCHEDULES,
            &Query::new()
                .eq("child_id", child_id)
                .order_by("due_date", true)
                .order_by("vaccine_code", true),
        )
        .await
    }

    /// Entry counts per status plus a `total`.
    pub async fn summary(
        &self,
        store: &dyn Store,
        child_id: &str,
    ) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        let mut total = 0;

        for status in ScheduleStatus::ALL {
            let count = store
                .count(
                    SCHEDULES,
                    &[
                        Filter::eq("child_id", child_id),
                        Filter::eq("status", status.as_str()),
                    ],
                )
                .await?;
            total += count;
            counts.insert(status.to_string(), count);
        }
        counts.insert("total".to_string(), total);

        Ok(counts)
    }

    /// Marks the schedule entry for a recorded dose as completed. Returns
    /// whether an entry existed.
    pub async fn mark_completed(
        &self,
        store: &dyn Store,
        child_id: &str,
        dose: &CompletedDose,
    ) -> Result<bool, StoreError> {
        let patch = to_row(
            SCHEDULES,
            &json!({ "status": ScheduleStatus::Completed.as_str() }),
        )?;
        let updated = store
            .update(
                SCHEDULES,
                &[
                    Filter::eq("child_id", child_id),
                    Filter::eq("vaccine_code", dose.vaccine_code.as_str()),
                    Filter::eq("dose_number", dose.dose_number),
                ],
                patch,
            )
            .await?;

        Ok(!updated.is_empty())
    }
}

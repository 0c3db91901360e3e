//! # Vaccination Schedule
//!
//! Turns a child's birth date and profile plus a jurisdiction's guideline
//! table into the doses still to be given, each with a due date and status.
//!
//! ## Pipeline
//!
//! 1. Guidelines are selected by country, region when one is given (rows
//!    without a region apply to every region), mandatory flag and
//!    exclusions, then sorted by
//!    recommended age. A region-specific row replaces the all-regions row
//!    for the same vaccine dose.
//! 2. The child's age is counted in whole months.
//! 3. Each guideline dose is due at birth + recommended months. Doses past
//!    the guideline's maximum age, or contraindicated by an allergy or
//!    medical condition, are dropped.
//! 4. Doses already in the vaccination records are dropped.
//! 5. The result is sorted by due date.
//!
//! ## Status
//!
//! - `upcoming`: today is on or before the due date
//! - `due`: at most `grace_days` (30 by default) past the due date
//! - `overdue`: more than `grace_days` past the due date
//! - `completed`: never produced here, read from the vaccination records
//!
//! ## Catch-up
//!
//! Restricted to a list of missed vaccines. The first outstanding dose of
//! each vaccine is due today and every further dose of the same vaccine
//! follows 28 days after the previous one. All catch-up entries are `due`.
use std::{
    collections::{HashMap, HashSet},
    fs::read_to_string,
    path::Path,
};

use chrono::NaiveDate;
use thiserror::Error;

pub mod models;
pub mod utils;

pub use models::{
    CATCH_UP_INTERVAL_DAYS, ChildProfile, CompletedDose, DEFAULT_COUNTRY_CODE, DEFAULT_GRACE_DAYS,
    Guideline, ScheduleEntry, ScheduleOptions, ScheduleStatus,
};
use utils::{add_days, add_months, age_in_months, classify, is_contraindicated};

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to read guidelines from {path}: {source}")]
    GuidelineFile {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed guidelines: {0}")]
    MalformedGuidelines(#[from] serde_json::Error),

    #[error("Due date for {vaccine_code} dose {dose_number} is out of range")]
    DateOutOfRange {
        vaccine_code: String,
        dose_number: u32,
    },
}

pub fn load_guidelines(path: impl AsRef<Path>) -> Result<Vec<Guideline>, ScheduleError> {
    let path = path.as_ref();
    let data = read_to_string(path).map_err(|source| ScheduleError::GuidelineFile {
        path: path.display().to_string(),
        source,
    })?;

    Ok(serde_json::from_str(&data)?)
}

/// In-memory version of the guideline query the server sends to the store.
pub fn select_guidelines(guidelines: &[Guideline], options: &ScheduleOptions) -> Vec<Guideline> {
    let selected: Vec<Guideline> = guidelines
        .iter()
        .filter(|g| g.country_code.eq_ignore_ascii_case(&options.country_code))
        .filter(|g| match (&g.region_code, &options.region_code) {
            (Some(region), Some(wanted)) => region.eq_ignore_ascii_case(wanted),
            _ => true,
        })
        .filter(|g| options.include_optional || g.is_mandatory)
        .filter(|g| !is_excluded(&g.vaccine_code, &options.exclude_vaccines))
        .cloned()
        .collect();

    normalize_guidelines(selected)
}

/// Sorts by recommended age and keeps one row per vaccine dose, preferring
/// the region-specific row.
pub fn normalize_guidelines(mut guidelines: Vec<Guideline>) -> Vec<Guideline> {
    guidelines.sort_by_key(|g| g.recommended_age_months);

    let mut kept: Vec<Guideline> = Vec::with_capacity(guidelines.len());
    let mut positions: HashMap<(String, u32), usize> = HashMap::new();

    for guideline in guidelines {
        let key = (guideline.vaccine_code.clone(), guideline.dose_number);

        match positions.get(&key) {
            Some(&index) => {
                if kept[index].region_code.is_none() && guideline.region_code.is_some() {
                    kept[index] = guideline;
                }
            }
            None => {
                positions.insert(key, kept.len());
                kept.push(guideline);
            }
        }
    }

    kept.sort_by_key(|g| g.recommended_age_months);
    kept
}

pub fn plan_schedule(
    child: &ChildProfile,
    guidelines: &[Guideline],
    completed: &[CompletedDose],
    options: &ScheduleOptions,
    today: NaiveDate,
) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let age_months = age_in_months(child.date_of_birth, today);
    let completed: HashSet<(&str, u32)> = completed
        .iter()
        .map(|dose| (dose.vaccine_code.as_str(), dose.dose_number))
        .collect();

    let mut entries = Vec::new();

    for guideline in normalize_guidelines(guidelines.to_vec()) {
        let due_date = add_months(child.date_of_birth, guideline.recommended_age_months).ok_or_else(
            || ScheduleError::DateOutOfRange {
                vaccine_code: guideline.vaccine_code.clone(),
                dose_number: guideline.dose_number,
            },
        )?;

        if guideline.max_age_months.is_some_and(|max| age_months > max) {
            continue;
        }

        if is_contraindicated(
            &guideline.contraindications,
            &child.allergies,
            &child.medical_conditions,
        ) {
            continue;
        }

        if completed.contains(&guideline.dose_key()) {
            continue;
        }

        entries.push(ScheduleEntry {
            status: classify(due_date, today, options.grace_days),
            vaccine_code: guideline.vaccine_code,
            vaccine_name: guideline.vaccine_name,
            dose_number: guideline.dose_number,
            total_doses: guideline.total_doses,
            due_date,
            is_mandatory: guideline.is_mandatory,
            notes: guideline.notes,
        });
    }

    entries.sort_by_key(|entry| entry.due_date);
    Ok(entries)
}

pub fn plan_catch_up(
    child: &ChildProfile,
    guidelines: &[Guideline],
    completed: &[CompletedDose],
    missed_vaccines: &[String],
    options: &ScheduleOptions,
    today: NaiveDate,
) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let missed: Vec<Guideline> = guidelines
        .iter()
        .filter(|g| is_excluded(&g.vaccine_code, missed_vaccines))
        .cloned()
        .collect();

    let mut entries = plan_schedule(child, &missed, completed, options, today)?;
    entries.sort_by(|a, b| {
        (a.vaccine_code.as_str(), a.dose_number).cmp(&(b.vaccine_code.as_str(), b.dose_number))
    });

    let mut doses_seen: HashMap<String, u64> = HashMap::new();

    for entry in entries.iter_mut() {
        let position = doses_seen.entry(entry.vaccine_code.clone()).or_insert(0);

        entry.due_date = add_days(today, *position * CATCH_UP_INTERVAL_DAYS).ok_or_else(|| {
            ScheduleError::DateOutOfRange {
                vaccine_code: entry.vaccine_code.clone(),
                dose_number: entry.dose_number,
            }
        })?;
        entry.status = ScheduleStatus::Due;

        *position += 1;
    }

    entries.sort_by_key(|entry| entry.due_date);
    Ok(entries)
}

fn is_excluded(vaccine_code: &str, codes: &[String]) -> bool {
    codes
        .iter()
        .any(|code| code.trim().eq_ignore_ascii_case(vaccine_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn guideline(code: &str, dose: u32, months: u32) -> Guideline {
        Guideline {
            vaccine_code: code.to_string(),
            vaccine_name: format!("{code} vaccine"),
            recommended_age_months: months,
            min_age_months: months,
            max_age_months: None,
            dose_number: dose,
            total_doses: 3,
            is_mandatory: true,
            contraindications: Vec::new(),
            country_code: "US".to_string(),
            region_code: None,
            notes: None,
        }
    }

    fn child(birth: NaiveDate) -> ChildProfile {
        ChildProfile {
            date_of_birth: birth,
            allergies: Vec::new(),
            medical_conditions: Vec::new(),
        }
    }

    fn done(code: &str, dose: u32) -> CompletedDose {
        CompletedDose {
            vaccine_code: code.to_string(),
            dose_number: dose,
        }
    }

    #[test]
    fn test_newborn_dose_is_upcoming_on_birth_day() {
        let birth = date(2022, 3, 15);
        let rows = vec![guideline("HEPB1", 1, 0)];

        let entries = plan_schedule(
            &child(birth),
            &rows,
            &[],
            &ScheduleOptions::default(),
            birth,
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].due_date, birth);
        assert_eq!(entries[0].status, ScheduleStatus::Upcoming);
    }

    #[test]
    fn test_newborn_dose_is_overdue_after_grace() {
        let birth = date(2022, 3, 15);
        let rows = vec![guideline("HEPB1", 1, 0)];

        let entries = plan_schedule(
            &child(birth),
            &rows,
            &[],
            &ScheduleOptions::default(),
            date(2022, 5, 1),
        )
        .unwrap();

        assert_eq!(entries[0].status, ScheduleStatus::Overdue);
    }

    #[test]
    fn test_contraindicated_row_is_excluded_regardless_of_age() {
        let birth = date(2022, 3, 15);
        let mut penicillin = guideline("DTAP", 1, 2);
        penicillin.contraindications = vec!["Penicillin allergy".to_string()];
        let rows = vec![penicillin, guideline("IPV", 1, 2)];

        let mut profile = child(birth);
        profile.allergies = vec!["Penicillin".to_string()];

        for today in [birth, date(2022, 6, 1), date(2030, 1, 1)] {
            let entries =
                plan_schedule(&profile, &rows, &[], &ScheduleOptions::default(), today).unwrap();

            assert!(entries.iter().all(|e| e.vaccine_code != "DTAP"));
            assert!(entries.iter().any(|e| e.vaccine_code == "IPV"));
        }
    }

    #[test]
    fn test_completed_doses_are_not_emitted() {
        let birth = date(2022, 3, 15);
        let rows = vec![
            guideline("HEPB", 1, 0),
            guideline("HEPB", 2, 1),
            guideline("HEPB", 3, 6),
        ];

        let entries = plan_schedule(
            &child(birth),
            &rows,
            &[done("HEPB", 1), done("HEPB", 3)],
            &ScheduleOptions::default(),
            date(2022, 4, 1),
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dose_number, 2);
        assert_eq!(entries[0].due_date, date(2022, 4, 15));
    }

    #[test]
    fn test_rows_past_max_age_are_skipped() {
        let birth = date(2020, 1, 10);
        let mut rota = guideline("ROTA", 1, 2);
        rota.max_age_months = Some(8);
        let rows = vec![rota, guideline("MMR", 1, 12)];

        let entries = plan_schedule(
            &child(birth),
            &rows,
            &[],
            &ScheduleOptions::default(),
            date(2021, 1, 10),
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].vaccine_code, "MMR");
    }

    #[test]
    fn test_output_is_sorted_and_unique_per_dose() {
        let birth = date(2022, 1, 31);
        let mut regional = guideline("DTAP", 1, 2);
        regional.region_code = Some("CA".to_string());
        regional.notes = Some("regional".to_string());
        let rows = vec![
            guideline("MMR", 1, 12),
            guideline("DTAP", 1, 2),
            regional,
            guideline("HEPB", 1, 0),
            guideline("DTAP", 2, 4),
        ];

        let entries = plan_schedule(
            &child(birth),
            &rows,
            &[],
            &ScheduleOptions::default(),
            date(2022, 2, 1),
        )
        .unwrap();

        let keys: Vec<(&str, u32)> = entries
            .iter()
            .map(|e| (e.vaccine_code.as_str(), e.dose_number))
            .collect();
        assert_eq!(
            keys,
            vec![("HEPB", 1), ("DTAP", 1), ("DTAP", 2), ("MMR", 1)]
        );
        assert_eq!(entries[1].notes.as_deref(), Some("regional"));
        assert_eq!(entries[1].due_date, date(2022, 3, 31));
        assert_eq!(entries[2].due_date, date(2022, 5, 31));
        assert!(entries.windows(2).all(|w| w[0].due_date <= w[1].due_date));
    }

    #[test]
    fn test_select_guidelines_filters_by_jurisdiction() {
        let mut optional = guideline("FLU", 1, 6);
        optional.is_mandatory = false;
        let mut ontario = guideline("MENC", 1, 12);
        ontario.region_code = Some("ON".to_string());
        let mut canada = guideline("BCG", 1, 0);
        canada.country_code = "CA".to_string();
        let rows = vec![
            optional,
            ontario,
            canada,
            guideline("HEPB", 1, 0),
            guideline("MMR", 1, 12),
        ];

        let codes = |options: &ScheduleOptions| -> Vec<String> {
            select_guidelines(&rows, options)
                .into_iter()
                .map(|g| g.vaccine_code)
                .collect()
        };

        assert_eq!(codes(&ScheduleOptions::default()), vec!["HEPB", "MENC", "MMR"]);
        assert_eq!(
            codes(&ScheduleOptions {
                region_code: Some("QC".to_string()),
                ..ScheduleOptions::default()
            }),
            vec!["HEPB", "MMR"]
        );
        assert_eq!(
            codes(&ScheduleOptions {
                include_optional: true,
                region_code: Some("ON".to_string()),
                exclude_vaccines: vec!["mmr".to_string()],
                ..ScheduleOptions::default()
            }),
            vec!["HEPB", "FLU", "MENC"]
        );
    }

    #[test]
    fn test_catch_up_compresses_missed_doses() {
        let birth = date(2020, 1, 1);
        let today = date(2023, 6, 1);
        let rows = vec![
            guideline("HEPB", 1, 0),
            guideline("HEPB", 2, 1),
            guideline("HEPB", 3, 6),
            guideline("MMR", 1, 12),
            guideline("IPV", 1, 2),
        ];

        let entries = plan_catch_up(
            &child(birth),
            &rows,
            &[done("HEPB", 1)],
            &["HEPB".to_string(), "MMR".to_string()],
            &ScheduleOptions::default(),
            today,
        )
        .unwrap();

        let plan: Vec<(&str, u32, NaiveDate)> = entries
            .iter()
            .map(|e| (e.vaccine_code.as_str(), e.dose_number, e.due_date))
            .collect();
        assert_eq!(
            plan,
            vec![
                ("HEPB", 2, today),
                ("MMR", 1, today),
                ("HEPB", 3, date(2023, 6, 29)),
            ]
        );
        assert!(entries.iter().all(|e| e.status == ScheduleStatus::Due));
    }

    #[test]
    fn test_catch_up_without_matches_is_empty() {
        let entries = plan_catch_up(
            &child(date(2020, 1, 1)),
            &[guideline("HEPB", 1, 0)],
            &[],
            &["POLIO".to_string()],
            &ScheduleOptions::default(),
            date(2023, 1, 1),
        )
        .unwrap();

        assert!(entries.is_empty());
    }
}

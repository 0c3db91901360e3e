use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GRACE_DAYS: u32 = 30;
pub const DEFAULT_COUNTRY_CODE: &str = "US";

/// Minimum spacing between two doses of the same vaccine in a catch-up plan.
pub const CATCH_UP_INTERVAL_DAYS: u64 = 28;

/// One row of a jurisdiction's vaccination guideline table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub vaccine_code: String,
    pub vaccine_name: String,
    pub recommended_age_months: u32,
    #[serde(default)]
    pub min_age_months: u32,
    #[serde(default)]
    pub max_age_months: Option<u32>,
    pub dose_number: u32,
    pub total_doses: u32,
    pub is_mandatory: bool,
    #[serde(default)]
    pub contraindications: Vec<String>,
    pub country_code: String,
    #[serde(default)]
    pub region_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Guideline {
    pub fn dose_key(&self) -> (&str, u32) {
        (&self.vaccine_code, self.dose_number)
    }
}

/// The parts of a child's record the generator reads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medical_conditions: Vec<String>,
}

/// A dose already administered, taken from the vaccination records.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletedDose {
    pub vaccine_code: String,
    pub dose_number: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Upcoming,
    Due,
    Overdue,
    Completed,
}

impl ScheduleStatus {
    pub const ALL: [ScheduleStatus; 4] = [
        ScheduleStatus::Upcoming,
        ScheduleStatus::Due,
        ScheduleStatus::Overdue,
        ScheduleStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Upcoming => "upcoming",
            ScheduleStatus::Due => "due",
            ScheduleStatus::Overdue => "overdue",
            ScheduleStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub vaccine_code: String,
    pub vaccine_name: String,
    pub dose_number: u32,
    pub total_doses: u32,
    pub due_date: NaiveDate,
    pub status: ScheduleStatus,
    pub is_mandatory: bool,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleOptions {
    pub country_code: String,
    pub region_code: Option<String>,
    pub include_optional: bool,
    pub exclude_vaccines: Vec<String>,
    /// Days past the due date before a dose counts as overdue.
    pub grace_days: u32,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            region_code: None,
            include_optional: false,
            exclude_vaccines: Vec::new(),
            grace_days: DEFAULT_GRACE_DAYS,
        }
    }
}

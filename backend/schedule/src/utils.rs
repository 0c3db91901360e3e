use chrono::{Datelike, Days, Local, Months, NaiveDate};

use crate::models::ScheduleStatus;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Whole months between birth and today. A partial final month does not count.
pub fn age_in_months(birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut months = (today.year() - birth.year()) * 12 + today.month() as i32 - birth.month() as i32;

    if today.day() < birth.day() {
        months -= 1;
    }

    months.max(0) as u32
}

/// Calendar month addition, clamping to the last day of shorter months.
pub fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

pub fn add_days(date: NaiveDate, days: u64) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(days))
}

pub fn classify(due_date: NaiveDate, today: NaiveDate, grace_days: u32) -> ScheduleStatus {
    let days_past_due = (today - due_date).num_days();

    if days_past_due <= 0 {
        ScheduleStatus::Upcoming
    } else if days_past_due <= i64::from(grace_days) {
        ScheduleStatus::Due
    } else {
        ScheduleStatus::Overdue
    }
}

/// Case-insensitive substring match in either direction between the child's
/// allergies/conditions and the guideline's contraindication texts.
pub fn is_contraindicated(
    contraindications: &[String],
    allergies: &[String],
    medical_conditions: &[String],
) -> bool {
    let contraindications: Vec<String> = contraindications
        .iter()
        .map(|c| normalize(c))
        .filter(|c| !c.is_empty())
        .collect();

    allergies
        .iter()
        .chain(medical_conditions)
        .map(|token| normalize(token))
        .filter(|token| !token.is_empty())
        .any(|token| {
            contraindications
                .iter()
                .any(|c| c.contains(&token) || token.contains(c.as_str()))
        })
}

pub fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use schedule::{
    ChildProfile, DEFAULT_COUNTRY_CODE, DEFAULT_GRACE_DAYS, ScheduleOptions, load_guidelines,
    plan_catch_up, plan_schedule, select_guidelines, utils::today,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Child's date of birth (YYYY-MM-DD)
    birth_date: NaiveDate,

    #[arg(long, default_value = "data/guidelines.json")]
    guidelines: PathBuf,

    /// Defaults to the local date
    #[arg(long)]
    today: Option<NaiveDate>,

    #[arg(long, default_value = DEFAULT_COUNTRY_CODE)]
    country: String,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    include_optional: bool,

    #[arg(long = "exclude")]
    exclude_vaccines: Vec<String>,

    #[arg(long = "allergy")]
    allergies: Vec<String>,

    #[arg(long = "condition")]
    medical_conditions: Vec<String>,

    /// Plan an accelerated catch-up for these vaccine codes instead
    #[arg(long = "catch-up")]
    catch_up: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_GRACE_DAYS)]
    grace_days: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let options = ScheduleOptions {
        country_code: args.country,
        region_code: args.region,
        include_optional: args.include_optional,
        exclude_vaccines: args.exclude_vaccines,
        grace_days: args.grace_days,
    };
    let child = ChildProfile {
        date_of_birth: args.birth_date,
        allergies: args.allergies,
        medical_conditions: args.medical_conditions,
    };
    let today = args.today.unwrap_or_else(today);

    let guidelines = load_guidelines(&args.guidelines)?;
    let guidelines = select_guidelines(&guidelines, &options);

    let entries = if args.catch_up.is_empty() {
        plan_schedule(&child, &guidelines, &[], &options, today)?
    } else {
        plan_catch_up(&child, &guidelines, &[], &args.catch_up, &options, today)?
    };

    let output = serde_json::to_string_pretty(&entries).context("Failed to encode schedule")?;
    println!("{output}");

    Ok(())
}

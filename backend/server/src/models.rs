use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use schedule::{ChildProfile, ScheduleEntry};
use serde::{Deserialize, Serialize};

pub const TENANTS: &str = "tenants";
pub const TENANT_USERS: &str = "tenant_users";
pub const PARENTS: &str = "parents";
pub const CHILDREN: &str = "children";
pub const GUIDELINES: &str = "vaccination_guidelines";
pub const SCHEDULES: &str = "vaccination_schedules";
pub const VACCINATION_RECORDS: &str = "vaccination_records";
pub const PROVISIONING_INTENTS: &str = "provisioning_intents";

/// Natural key of a schedule entry and of a vaccination record.
pub const DOSE_KEY: [&str; 3] = ["child_id", "vaccine_code", "dose_number"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Cancelled,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "cancelled" => Ok(TenantStatus::Cancelled),
            other => Err(format!("Unknown tenant status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub subdomain: String,
    pub status: TenantStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Receptionist,
    Patient,
    SuperAdmin,
}

pub const STAFF_ROLES: &[Role] = &[Role::Admin, Role::Doctor, Role::Nurse, Role::Receptionist];
pub const CLINICAL_ROLES: &[Role] = &[Role::Admin, Role::Doctor, Role::Nurse];
pub const ADMIN_ROLES: &[Role] = &[Role::Admin];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::Receptionist => "receptionist",
            Role::Patient => "patient",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "doctor" => Ok(Role::Doctor),
            "nurse" => Ok(Role::Nurse),
            "receptionist" => Ok(Role::Receptionist),
            "patient" => Ok(Role::Patient),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// A user's place in a tenant. Super admins carry no tenant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub tenant_id: Option<String>,
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parent {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medical_conditions: Vec<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub region_code: Option<String>,
}

impl Child {
    pub fn profile(&self) -> ChildProfile {
        ChildProfile {
            date_of_birth: self.date_of_birth,
            allergies: self.allergies.clone(),
            medical_conditions: self.medical_conditions.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub id: String,
    pub child_id: String,
    pub vaccine_code: String,
    pub dose_number: u32,
    pub vaccination_date: NaiveDate,
    #[serde(default)]
    pub administered_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A persisted schedule entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub child_id: String,
    #[serde(flatten)]
    pub entry: ScheduleEntry,
}

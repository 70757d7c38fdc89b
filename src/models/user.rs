use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Membership grade; the classification used to partition the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    Vip,
    Gold,
    Silver,
}

impl Grade {
    pub const ALL: [Grade; 3] = [Grade::Vip, Grade::Gold, Grade::Silver];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vip => "VIP",
            Self::Gold => "GOLD",
            Self::Silver => "SILVER",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIP" => Ok(Self::Vip),
            "GOLD" => Ok(Self::Gold),
            "SILVER" => Ok(Self::Silver),
            _ => Err(format!("Invalid grade: {s}")),
        }
    }
}

/// Account status; both the selection predicate and the write target of the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            _ => Err(format!("Invalid user status: {s}")),
        }
    }
}

/// User account. `id` is the stable identity; `status` is the only field the
/// inactive-user processor changes (plus the audit timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub grade: Grade,
    pub status: UserStatus,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl User {
    pub fn new(
        id: i64,
        email: impl Into<String>,
        grade: Grade,
        updated_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            grade,
            status: UserStatus::Active,
            created_date: updated_date,
            updated_date,
        }
    }

    /// Mark the account inactive as of `now`
    pub fn set_inactive(mut self, now: DateTime<Utc>) -> Self {
        self.status = UserStatus::Inactive;
        self.updated_date = now;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Selection predicate for the inactive-user job: stale, still-active accounts,
/// optionally restricted to one grade (the partition key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuery {
    pub updated_before: DateTime<Utc>,
    pub status: UserStatus,
    pub grade: Option<Grade>,
}

impl UserQuery {
    pub fn stale_active(updated_before: DateTime<Utc>) -> Self {
        Self {
            updated_before,
            status: UserStatus::Active,
            grade: None,
        }
    }

    pub fn with_grade(mut self, grade: Grade) -> Self {
        self.grade = Some(grade);
        self
    }

    pub fn matches(&self, user: &User) -> bool {
        user.updated_date < self.updated_before
            && user.status == self.status
            && self.grade.map_or(true, |grade| user.grade == grade)
    }
}

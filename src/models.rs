use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::WallTime;

pub type UserId = i64;
pub type StudentId = i64;
pub type RecordId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Teacher
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} `{}`", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            role: self.role,
        }
    }
}

/// The part of an account that is safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "HUMSS")]
    Humss,
    #[serde(rename = "ABM")]
    Abm,
    #[serde(rename = "CSS")]
    Css,
    #[serde(rename = "SMAW")]
    Smaw,
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "EIM")]
    Eim,
}

impl Strand {
    pub const ALL: [Strand; 6] = [
        Strand::Humss,
        Strand::Abm,
        Strand::Css,
        Strand::Smaw,
        Strand::Auto,
        Strand::Eim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strand::Humss => "HUMSS",
            Strand::Abm => "ABM",
            Strand::Css => "CSS",
            Strand::Smaw => "SMAW",
            Strand::Auto => "AUTO",
            Strand::Eim => "EIM",
        }
    }
}

impl FromStr for Strand {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HUMSS" => Ok(Strand::Humss),
            "ABM" => Ok(Strand::Abm),
            "CSS" => Ok(Strand::Css),
            "SMAW" => Ok(Strand::Smaw),
            "AUTO" => Ok(Strand::Auto),
            "EIM" => Ok(Strand::Eim),
            other => Err(UnknownVariant {
                kind: "strand",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub strand: Strand,
    pub qr_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub strand: Strand,
    pub qr_code: String,
    pub created_at: DateTime<Utc>,
}

/// QR identifiers look like `STU-1A2B3C4D`.
pub fn new_qr_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("STU-{}", id[..8].to_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Remarks {
    Present,
    Late,
    Absent,
}

impl Remarks {
    pub fn as_str(&self) -> &'static str {
        match self {
            Remarks::Present => "present",
            Remarks::Late => "late",
            Remarks::Absent => "absent",
        }
    }
}

impl fmt::Display for Remarks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Remarks {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Remarks::Present),
            "late" => Ok(Remarks::Late),
            "absent" => Ok(Remarks::Absent),
            other => Err(UnknownVariant {
                kind: "remarks",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMethod {
    Qr,
    Face,
    Manual,
}

impl ScanMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMethod::Qr => "qr",
            ScanMethod::Face => "face",
            ScanMethod::Manual => "manual",
        }
    }
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row. At most one exists per `(student_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub time_in: Option<WallTime>,
    pub time_out: Option<WallTime>,
    pub remarks: Remarks,
}

/// Administrative write that replaces the whole day row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualEntry {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub time_in: Option<WallTime>,
    pub time_out: Option<WallTime>,
    pub remarks: Remarks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualOutcome {
    Inserted(RecordId),
    Updated(RecordId),
}

/// Ledger row joined with the student it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceView {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub student_name: String,
    pub strand: Strand,
}

/// A student absent on several recent days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Absentee {
    pub student_id: StudentId,
    pub name: String,
    pub absent_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_codes_have_fixed_shape() {
        let code = new_qr_code();
        assert_eq!(code.len(), 12);
        assert!(code.starts_with("STU-"));
        assert!(code[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(code, new_qr_code());
    }

    #[test]
    fn enums_round_trip_through_storage_names() {
        for role in [Role::Admin, Role::Teacher] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        for strand in Strand::ALL {
            assert_eq!(strand.as_str().parse::<Strand>().unwrap(), strand);
        }
        assert!("principal".parse::<Role>().is_err());
        assert_eq!(
            serde_json::to_string(&Remarks::Late).unwrap(),
            "\"late\""
        );
    }
}

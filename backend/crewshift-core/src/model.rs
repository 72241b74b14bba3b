// src/model.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type TeamId = i64;
pub type ElectricianId = i64;
pub type OpeningId = i64;

// --- Scheduling (read-only to the reconciliation core) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterStatus {
    Draft,
    Publishing,
    Published,
    Archived,
}

/// A team's assignment to a rotation pattern over `[period_start, period_end]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPeriod {
    pub id: i64,
    pub team_id: TeamId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: RosterStatus,
}

impl RosterPeriod {
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.period_start <= end && self.period_end >= start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Work,
    Rest,
    Exception,
    Absence,
}

/// One (electrician, day) cell of a roster period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSlot {
    pub id: i64,
    pub roster_period_id: i64,
    pub team_id: TeamId,
    pub electrician_id: ElectricianId,
    pub day: NaiveDate,
    pub state: SlotState,
    #[serde(default)]
    pub expected_start: Option<NaiveTime>,
    #[serde(default)]
    pub expected_end: Option<NaiveTime>,
}

// --- Field events (read-only to the reconciliation core) ---

/// One electrician's participation in a team's shift.
/// `team_id` is the team the shift was actually opened under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftOpening {
    pub id: OpeningId,
    pub electrician_id: ElectricianId,
    pub team_id: TeamId,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectricianStatus {
    Active,
    OnLeave,
    MedicalLeave,
    Suspended,
    Training,
    Notice,
    Terminated,
    Retired,
}

impl ElectricianStatus {
    /// Statuses that excuse a missed shift without an absence record.
    pub fn justifies_absence(self) -> bool {
        matches!(
            self,
            ElectricianStatus::OnLeave
                | ElectricianStatus::MedicalLeave
                | ElectricianStatus::Suspended
                | ElectricianStatus::Training
                | ElectricianStatus::Terminated
                | ElectricianStatus::Retired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JustificationStatus {
    Pending,
    Approved,
    Rejected,
}

/// Declaration that a team did not operate on a day for an administrative reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamJustification {
    pub id: i64,
    pub team_id: TeamId,
    pub day: NaiveDate,
    pub status: JustificationStatus,
    pub reason: String,
    pub generates_absence: bool,
}

impl TeamJustification {
    pub fn suppresses_absences(&self) -> bool {
        self.status == JustificationStatus::Approved && !self.generates_absence
    }
}

// --- Derived facts ---

pub const REASON_NO_OPENING: &str = "no_opening";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    Pending,
    Justified,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceKey {
    pub day: NaiveDate,
    pub team_id: TeamId,
    pub electrician_id: ElectricianId,
    pub system_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Absence {
    #[serde(flatten)]
    pub key: AbsenceKey,
    pub status: FactStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceKey {
    pub day: NaiveDate,
    pub expected_team_id: TeamId,
    pub actual_team_id: TeamId,
    pub electrician_id: ElectricianId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    #[serde(flatten)]
    pub key: DivergenceKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OvertimeType {
    RestWorked,
    UnscheduledWork,
    DelayCompensated,
    Swap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OvertimeKey {
    pub shift_opening_id: OpeningId,
    #[serde(rename = "type")]
    pub overtime_type: OvertimeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overtime {
    #[serde(flatten)]
    pub key: OvertimeKey,
    pub day: NaiveDate,
    pub team_id: TeamId,
    pub electrician_id: ElectricianId,
    pub hours_expected: Decimal,
    pub hours_actual: Decimal,
    pub hours_delta: Decimal,
    pub status: FactStatus,
}

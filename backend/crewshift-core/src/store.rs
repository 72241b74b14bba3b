// src/store.rs
//! Persistence collaborator surface consumed by the reconciliation core.
//!
//! The relational layer lives outside this crate. Everything the core needs
//! from it is expressed here as small async traits, so the engine can run
//! against the in-memory store in tests and against a real database in
//! production without changes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::day_window::DayRange;
use crate::model::{
    Absence, AbsenceKey, Divergence, DivergenceKey, ElectricianId, ElectricianStatus, Overtime,
    OvertimeKey, PlannedSlot, ShiftOpening, TeamId, TeamJustification,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

/// Result of an insert keyed by a unique tuple.
///
/// Together with `Err(StoreError)` this is the tri-state
/// `created | already-existed | error`: a unique-key collision is a typed
/// outcome, never an error code to be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    AlreadyExisted,
}

/// Row backing one named cluster-wide lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRow {
    pub job_name: String,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockRow {
    /// A row is free when nobody holds it or its expiry has passed.
    pub fn is_free_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.locked_by, self.expires_at) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(_), Some(expires_at)) => expires_at <= now,
        }
    }
}

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn find_lock(&self, job_name: &str) -> Result<Option<LockRow>, StoreError>;

    /// Inserts the row; `AlreadyExisted` when a row for the job is already there.
    async fn create_lock(&self, row: LockRow) -> Result<UpsertOutcome, StoreError>;

    /// Reassigns the row to `owner` only if it is free at `now`
    /// (conditional update). Returns whether the claim won.
    async fn claim_free_lock(
        &self,
        job_name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clears holder fields where `locked_by == owner`. Returns rows affected.
    async fn clear_lock(&self, job_name: &str, owner: &str) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Planned slots of one team for the day of `range`.
    async fn find_slots(&self, team_id: TeamId, range: &DayRange)
        -> Result<Vec<PlannedSlot>, StoreError>;

    /// Planned slots of every team for the day of `range`.
    async fn find_slots_for_day(&self, range: &DayRange) -> Result<Vec<PlannedSlot>, StoreError>;

    /// Teams with a published roster period intersecting `[start, end]`.
    async fn find_published_teams(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TeamId>, StoreError>;

    async fn find_electrician_status(
        &self,
        electrician_id: ElectricianId,
    ) -> Result<Option<ElectricianStatus>, StoreError>;

    /// Every approved justification of the team for `day`, by id.
    async fn find_approved_team_justifications(
        &self,
        team_id: TeamId,
        day: NaiveDate,
    ) -> Result<Vec<TeamJustification>, StoreError>;
}

#[async_trait]
pub trait ShiftEventStore: Send + Sync {
    /// Openings whose `opened_at` falls in `range`, across every team.
    async fn find_openings(&self, range: &DayRange) -> Result<Vec<ShiftOpening>, StoreError>;
}

#[async_trait]
pub trait FactStore: Send + Sync {
    async fn upsert_absence(&self, absence: &Absence) -> Result<UpsertOutcome, StoreError>;
    async fn upsert_divergence(&self, divergence: &Divergence)
        -> Result<UpsertOutcome, StoreError>;
    async fn upsert_overtime(&self, overtime: &Overtime) -> Result<UpsertOutcome, StoreError>;

    // Read-only key probes used by dry runs.
    async fn absence_exists(&self, key: &AbsenceKey) -> Result<bool, StoreError>;
    async fn divergence_exists(&self, key: &DivergenceKey) -> Result<bool, StoreError>;
    async fn overtime_exists(&self, key: &OvertimeKey) -> Result<bool, StoreError>;
}

/// Everything a reconciliation run touches.
pub trait ReconciliationStore: LockStore + ScheduleStore + ShiftEventStore + FactStore {}

impl<T> ReconciliationStore for T where T: LockStore + ScheduleStore + ShiftEventStore + FactStore {}

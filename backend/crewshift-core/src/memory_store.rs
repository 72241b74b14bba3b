// src/memory_store.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info};

use crate::day_window::DayRange;
use crate::model::*;
use crate::store::{
    FactStore, LockRow, LockStore, ScheduleStore, ShiftEventStore, StoreError, UpsertOutcome,
};

/// Fixture file layout for seeding the in-memory store.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedData {
    pub roster_periods: Vec<RosterPeriod>,
    pub planned_slots: Vec<PlannedSlot>,
    pub shift_openings: Vec<ShiftOpening>,
    pub electricians: Vec<ElectricianSeed>,
    pub team_justifications: Vec<TeamJustification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectricianSeed {
    pub id: ElectricianId,
    pub status: ElectricianStatus,
}

#[derive(Debug, Default)]
struct StoreState {
    roster_periods: Vec<RosterPeriod>,
    slots: Vec<PlannedSlot>,
    openings: Vec<ShiftOpening>,
    statuses: HashMap<ElectricianId, ElectricianStatus>,
    justifications: Vec<TeamJustification>,
    locks: HashMap<String, LockRow>,
    absences: BTreeMap<AbsenceKey, Absence>,
    divergences: BTreeMap<DivergenceKey, Divergence>,
    overtimes: BTreeMap<OvertimeKey, Overtime>,
}

/// Process-local store used by the binary and by the test suites.
///
/// Clones share state, so several "instances" can contend for the same lock row.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap_or_else(|p| p.into_inner());
            state.roster_periods = seed.roster_periods;
            state.slots = seed.planned_slots;
            state.openings = seed.shift_openings;
            state.statuses = seed
                .electricians
                .into_iter()
                .map(|e| (e.id, e.status))
                .collect();
            state.justifications = seed.team_justifications;
        }
        store
    }

    pub fn from_seed_file(path: &Path) -> Result<Self, StoreError> {
        let json = fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let seed: SeedData = serde_json::from_str(&json)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
        info!(
            "Seed loaded from {}: {} periods, {} slots, {} openings",
            path.display(),
            seed.roster_periods.len(),
            seed.planned_slots.len(),
            seed.shift_openings.len()
        );
        Ok(Self::from_seed(seed))
    }

    // --- Fixture helpers ---

    pub fn add_roster_period(&self, period: RosterPeriod) {
        self.write().roster_periods.push(period);
    }

    pub fn add_slot(&self, slot: PlannedSlot) {
        self.write().slots.push(slot);
    }

    pub fn add_opening(&self, opening: ShiftOpening) {
        self.write().openings.push(opening);
    }

    pub fn set_status(&self, electrician_id: ElectricianId, status: ElectricianStatus) {
        self.write().statuses.insert(electrician_id, status);
    }

    pub fn add_justification(&self, justification: TeamJustification) {
        self.write().justifications.push(justification);
    }

    // --- Snapshots ---

    pub fn absences(&self) -> Vec<Absence> {
        self.write().absences.values().cloned().collect()
    }

    pub fn divergences(&self) -> Vec<Divergence> {
        self.write().divergences.values().cloned().collect()
    }

    pub fn overtimes(&self) -> Vec<Overtime> {
        self.write().overtimes.values().cloned().collect()
    }

    pub fn lock_row(&self, job_name: &str) -> Option<LockRow> {
        self.write().locks.get(job_name).cloned()
    }

    fn write(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn guard(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store mutex poisoned".to_string()))
    }
}

fn insert_unique<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> UpsertOutcome {
    match map.entry(key) {
        std::collections::btree_map::Entry::Occupied(_) => UpsertOutcome::AlreadyExisted,
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(value);
            UpsertOutcome::Created
        }
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn find_lock(&self, job_name: &str) -> Result<Option<LockRow>, StoreError> {
        Ok(self.guard()?.locks.get(job_name).cloned())
    }

    async fn create_lock(&self, row: LockRow) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.guard()?;
        if state.locks.contains_key(&row.job_name) {
            return Ok(UpsertOutcome::AlreadyExisted);
        }
        state.locks.insert(row.job_name.clone(), row);
        Ok(UpsertOutcome::Created)
    }

    async fn claim_free_lock(
        &self,
        job_name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.guard()?;
        match state.locks.get_mut(job_name) {
            Some(row) if row.is_free_at(now) => {
                row.locked_by = Some(owner.to_string());
                row.locked_at = Some(now);
                row.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_lock(&self, job_name: &str, owner: &str) -> Result<u64, StoreError> {
        let mut state = self.guard()?;
        match state.locks.get_mut(job_name) {
            Some(row) if row.locked_by.as_deref() == Some(owner) => {
                row.locked_by = None;
                row.locked_at = None;
                row.expires_at = None;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn find_slots(
        &self,
        team_id: TeamId,
        range: &DayRange,
    ) -> Result<Vec<PlannedSlot>, StoreError> {
        let state = self.guard()?;
        let mut slots: Vec<PlannedSlot> = state
            .slots
            .iter()
            .filter(|s| s.team_id == team_id && s.day == range.day)
            .filter(|s| is_published_period(&state, s.roster_period_id))
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.id);
        Ok(slots)
    }

    async fn find_slots_for_day(&self, range: &DayRange) -> Result<Vec<PlannedSlot>, StoreError> {
        let state = self.guard()?;
        let mut slots: Vec<PlannedSlot> = state
            .slots
            .iter()
            .filter(|s| s.day == range.day)
            .filter(|s| is_published_period(&state, s.roster_period_id))
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.id);
        Ok(slots)
    }

    async fn find_published_teams(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TeamId>, StoreError> {
        let state = self.guard()?;
        let mut teams: Vec<TeamId> = state
            .roster_periods
            .iter()
            .filter(|p| p.status == RosterStatus::Published && p.overlaps(start, end))
            .map(|p| p.team_id)
            .collect();
        teams.sort_unstable();
        teams.dedup();
        Ok(teams)
    }

    async fn find_electrician_status(
        &self,
        electrician_id: ElectricianId,
    ) -> Result<Option<ElectricianStatus>, StoreError> {
        Ok(self.guard()?.statuses.get(&electrician_id).copied())
    }

    async fn find_approved_team_justifications(
        &self,
        team_id: TeamId,
        day: NaiveDate,
    ) -> Result<Vec<TeamJustification>, StoreError> {
        let state = self.guard()?;
        let mut found: Vec<TeamJustification> = state
            .justifications
            .iter()
            .filter(|j| {
                j.team_id == team_id && j.day == day && j.status == JustificationStatus::Approved
            })
            .cloned()
            .collect();
        found.sort_by_key(|j| j.id);
        Ok(found)
    }
}

fn is_published_period(state: &StoreState, roster_period_id: i64) -> bool {
    state
        .roster_periods
        .iter()
        .any(|p| p.id == roster_period_id && p.status == RosterStatus::Published)
}

#[async_trait]
impl ShiftEventStore for InMemoryStore {
    async fn find_openings(&self, range: &DayRange) -> Result<Vec<ShiftOpening>, StoreError> {
        let state = self.guard()?;
        let mut openings: Vec<ShiftOpening> = state
            .openings
            .iter()
            .filter(|o| range.contains(o.opened_at))
            .cloned()
            .collect();
        openings.sort_by_key(|o| o.id);
        Ok(openings)
    }
}

#[async_trait]
impl FactStore for InMemoryStore {
    async fn upsert_absence(&self, absence: &Absence) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.guard()?;
        let outcome = insert_unique(&mut state.absences, absence.key.clone(), absence.clone());
        debug!("upsert absence {:?}: {:?}", absence.key, outcome);
        Ok(outcome)
    }

    async fn upsert_divergence(
        &self,
        divergence: &Divergence,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.guard()?;
        let outcome = insert_unique(&mut state.divergences, divergence.key, divergence.clone());
        debug!("upsert divergence {:?}: {:?}", divergence.key, outcome);
        Ok(outcome)
    }

    async fn upsert_overtime(&self, overtime: &Overtime) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.guard()?;
        let outcome = insert_unique(&mut state.overtimes, overtime.key, overtime.clone());
        debug!("upsert overtime {:?}: {:?}", overtime.key, outcome);
        Ok(outcome)
    }

    async fn absence_exists(&self, key: &AbsenceKey) -> Result<bool, StoreError> {
        Ok(self.guard()?.absences.contains_key(key))
    }

    async fn divergence_exists(&self, key: &DivergenceKey) -> Result<bool, StoreError> {
        Ok(self.guard()?.divergences.contains_key(key))
    }

    async fn overtime_exists(&self, key: &OvertimeKey) -> Result<bool, StoreError> {
        Ok(self.guard()?.overtimes.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day_window::{parse_offset, DayWindow};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn seed_json_round_trips_into_queries() {
        let json = r#"{
            "rosterPeriods": [
                {"id": 1, "teamId": 10, "periodStart": "2024-03-01", "periodEnd": "2024-03-31", "status": "published"},
                {"id": 2, "teamId": 20, "periodStart": "2024-03-01", "periodEnd": "2024-03-31", "status": "draft"}
            ],
            "plannedSlots": [
                {"id": 5, "rosterPeriodId": 1, "teamId": 10, "electricianId": 100, "day": "2024-03-05",
                 "state": "WORK", "expectedStart": "08:00:00", "expectedEnd": "16:00:00"},
                {"id": 6, "rosterPeriodId": 2, "teamId": 20, "electricianId": 200, "day": "2024-03-05", "state": "WORK"}
            ],
            "shiftOpenings": [
                {"id": 9, "electricianId": 100, "teamId": 10, "openedAt": "2024-03-05T11:00:00Z"}
            ],
            "electricians": [{"id": 100, "status": "ACTIVE"}]
        }"#;
        let store = InMemoryStore::from_seed(serde_json::from_str(json).unwrap());
        let window = DayWindow::new(parse_offset("-03:00").unwrap());
        let range = window.range_for_date(d("2024-03-05"));

        assert_eq!(
            store.find_published_teams(d("2024-03-05"), d("2024-03-05")).await.unwrap(),
            vec![10]
        );
        let slots = store.find_slots_for_day(&range).await.unwrap();
        assert_eq!(slots.len(), 1, "draft period slots are not visible");
        assert_eq!(store.find_openings(&range).await.unwrap().len(), 1);
        assert_eq!(
            store.find_electrician_status(100).await.unwrap(),
            Some(ElectricianStatus::Active)
        );
    }

    #[tokio::test]
    async fn duplicate_fact_is_reported_not_overwritten() {
        let store = InMemoryStore::new();
        let key = AbsenceKey {
            day: d("2024-03-05"),
            team_id: 1,
            electrician_id: 2,
            system_reason: REASON_NO_OPENING.into(),
        };
        let first = Absence {
            key: key.clone(),
            status: FactStatus::Pending,
        };
        let second = Absence {
            key,
            status: FactStatus::Denied,
        };
        assert_eq!(store.upsert_absence(&first).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(
            store.upsert_absence(&second).await.unwrap(),
            UpsertOutcome::AlreadyExisted
        );
        assert_eq!(store.absences()[0].status, FactStatus::Pending);
    }
}

// src/test_support.rs
//! Shared fixtures for the scenario suites.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use std::sync::Arc;

use crate::clock::TestClock;
use crate::day_window::{parse_offset, DayRange, DayWindow};
use crate::engine::ReconciliationEngine;
use crate::lock::DistributedLock;
use crate::memory_store::InMemoryStore;
use crate::model::*;
use crate::readers::{ScheduleReader, ShiftEventReader};
use crate::run::ReconciliationRun;
use crate::store::{
    FactStore, LockRow, LockStore, ReconciliationStore, ScheduleStore, ShiftEventStore,
    StoreError, UpsertOutcome,
};

pub const TEAM_A: TeamId = 10;
pub const TEAM_B: TeamId = 20;
pub const TEAM_C: TeamId = 30;

pub fn d(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").expect("bad test date")
}

pub fn window() -> DayWindow {
    DayWindow::new(parse_offset("-03:00").expect("bad test offset"))
}

/// Local (-03:00) wall-clock time on `day` as a UTC instant.
pub fn local(day: &str, hm: &str) -> DateTime<Utc> {
    let time = NaiveTime::parse_from_str(hm, "%H:%M").expect("bad test time");
    window().range_for_date(d(day)).start
        + Duration::minutes(i64::from(time.hour() * 60 + time.minute()))
}

pub fn build_engine<S>(store: Arc<S>, clock: TestClock, grace_minutes: i64) -> ReconciliationEngine
where
    S: ReconciliationStore + 'static,
{
    ReconciliationEngine::new(
        ScheduleReader::new(store.clone(), window()),
        ShiftEventReader::new(store.clone(), window()),
        store,
        window(),
        Arc::new(clock),
        Duration::minutes(grace_minutes),
    )
}

pub fn build_run<S>(store: Arc<S>, clock: TestClock, lock_ttl: std::time::Duration) -> ReconciliationRun
where
    S: ReconciliationStore + 'static,
{
    let engine = build_engine(store.clone(), clock.clone(), 30);
    let lock = DistributedLock::new(store, Arc::new(clock.clone()));
    ReconciliationRun::new(Arc::new(engine), lock, window(), Arc::new(clock), lock_ttl)
}

/// In-memory store plus a clock parked after the March 2024 test days.
pub struct Fixture {
    pub store: InMemoryStore,
    pub clock: TestClock,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(),
            clock: TestClock::new("2024-03-10 12:00:00"),
        }
    }

    pub fn engine(&self) -> ReconciliationEngine {
        build_engine(Arc::new(self.store.clone()), self.clock.clone(), 30)
    }

    pub fn run(&self) -> ReconciliationRun {
        build_run(
            Arc::new(self.store.clone()),
            self.clock.clone(),
            std::time::Duration::from_secs(30 * 60),
        )
    }

    /// Publishes a March 2024 roster period for `team_id` (period id == team id).
    pub fn publish(&self, team_id: TeamId) -> &Self {
        self.store.add_roster_period(RosterPeriod {
            id: team_id,
            team_id,
            period_start: d("2024-03-01"),
            period_end: d("2024-03-31"),
            status: RosterStatus::Published,
        });
        self
    }

    pub fn slot(
        &self,
        id: i64,
        team_id: TeamId,
        electrician_id: ElectricianId,
        day: &str,
        state: SlotState,
        hours: Option<(&str, &str)>,
    ) -> &Self {
        let time = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").expect("bad slot time");
        self.store.add_slot(PlannedSlot {
            id,
            roster_period_id: team_id,
            team_id,
            electrician_id,
            day: d(day),
            state,
            expected_start: hours.map(|(start, _)| time(start)),
            expected_end: hours.map(|(_, end)| time(end)),
        });
        self
    }

    pub fn opening(
        &self,
        id: OpeningId,
        electrician_id: ElectricianId,
        team_id: TeamId,
        day: &str,
        open: &str,
        close: Option<&str>,
    ) -> &Self {
        self.store.add_opening(ShiftOpening {
            id,
            electrician_id,
            team_id,
            opened_at: local(day, open),
            closed_at: close.map(|c| local(day, c)),
        });
        self
    }

    pub fn status(&self, electrician_id: ElectricianId, status: ElectricianStatus) -> &Self {
        self.store.set_status(electrician_id, status);
        self
    }

    pub fn justification(
        &self,
        team_id: TeamId,
        day: &str,
        status: JustificationStatus,
        generates_absence: bool,
    ) -> &Self {
        self.store.add_justification(TeamJustification {
            id: team_id * 1000,
            team_id,
            day: d(day),
            status,
            reason: "vehicle breakdown".to_string(),
            generates_absence,
        });
        self
    }
}

/// Delegates to an [`InMemoryStore`] but fails selected calls.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_slots_for_team: Option<TeamId>,
    pub fail_overtime_upserts: bool,
    pub fail_status_reads: bool,
    /// Yields once per slot read so concurrent runs interleave.
    pub yield_on_slot_reads: bool,
    pub panic_on_slot_reads: bool,
}

fn injected() -> StoreError {
    StoreError::Unavailable("injected failure".to_string())
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn find_lock(&self, job_name: &str) -> Result<Option<LockRow>, StoreError> {
        self.inner.find_lock(job_name).await
    }
    async fn create_lock(&self, row: LockRow) -> Result<UpsertOutcome, StoreError> {
        self.inner.create_lock(row).await
    }
    async fn claim_free_lock(
        &self,
        job_name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.claim_free_lock(job_name, owner, now, expires_at).await
    }
    async fn clear_lock(&self, job_name: &str, owner: &str) -> Result<u64, StoreError> {
        self.inner.clear_lock(job_name, owner).await
    }
}

#[async_trait]
impl ScheduleStore for FlakyStore {
    async fn find_slots(
        &self,
        team_id: TeamId,
        range: &DayRange,
    ) -> Result<Vec<PlannedSlot>, StoreError> {
        if self.yield_on_slot_reads {
            tokio::task::yield_now().await;
        }
        if self.panic_on_slot_reads {
            panic!("slot read blew up for team {}", team_id);
        }
        if self.fail_slots_for_team == Some(team_id) {
            return Err(injected());
        }
        self.inner.find_slots(team_id, range).await
    }
    async fn find_slots_for_day(&self, range: &DayRange) -> Result<Vec<PlannedSlot>, StoreError> {
        self.inner.find_slots_for_day(range).await
    }
    async fn find_published_teams(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TeamId>, StoreError> {
        self.inner.find_published_teams(start, end).await
    }
    async fn find_electrician_status(
        &self,
        electrician_id: ElectricianId,
    ) -> Result<Option<ElectricianStatus>, StoreError> {
        if self.fail_status_reads {
            return Err(injected());
        }
        self.inner.find_electrician_status(electrician_id).await
    }
    async fn find_approved_team_justifications(
        &self,
        team_id: TeamId,
        day: NaiveDate,
    ) -> Result<Vec<TeamJustification>, StoreError> {
        self.inner.find_approved_team_justifications(team_id, day).await
    }
}

#[async_trait]
impl ShiftEventStore for FlakyStore {
    async fn find_openings(&self, range: &DayRange) -> Result<Vec<ShiftOpening>, StoreError> {
        self.inner.find_openings(range).await
    }
}

#[async_trait]
impl FactStore for FlakyStore {
    async fn upsert_absence(&self, absence: &Absence) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert_absence(absence).await
    }
    async fn upsert_divergence(
        &self,
        divergence: &Divergence,
    ) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert_divergence(divergence).await
    }
    async fn upsert_overtime(&self, overtime: &Overtime) -> Result<UpsertOutcome, StoreError> {
        if self.fail_overtime_upserts {
            return Err(injected());
        }
        self.inner.upsert_overtime(overtime).await
    }
    async fn absence_exists(&self, key: &AbsenceKey) -> Result<bool, StoreError> {
        self.inner.absence_exists(key).await
    }
    async fn divergence_exists(&self, key: &DivergenceKey) -> Result<bool, StoreError> {
        self.inner.divergence_exists(key).await
    }
    async fn overtime_exists(&self, key: &OvertimeKey) -> Result<bool, StoreError> {
        if self.fail_overtime_upserts {
            return Err(injected());
        }
        self.inner.overtime_exists(key).await
    }
}

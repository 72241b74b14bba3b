// src/engine.rs
//! Classifies one team's planned day against what the field devices reported.
//!
//! For every planned slot of the team the engine decides whether the day was
//! worked as planned, worked under another team (divergence), not worked at
//! all (absence), or worked when it should not have been (overtime). Openings
//! by electricians with no plan anywhere that day become unscheduled overtime.
//! All derived facts are written through unique-key inserts, so running the
//! same day twice records nothing new.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::day_window::DayWindow;
use crate::hours::{assess_delay, worked_hours, DelayAssessment};
use crate::model::*;
use crate::readers::{DayOpenings, ScheduleReader, ShiftEventReader};
use crate::store::{FactStore, StoreError, UpsertOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub created: u64,
    /// Part of the report shape; reconciliation never mutates existing facts.
    pub updated: u64,
    /// Part of the report shape; reconciliation never mutates existing facts.
    pub closed: u64,
    pub skipped: u64,
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.closed += other.closed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayOutcome {
    pub stats: ReconcileStats,
    pub warnings: Vec<String>,
}

/// A derived fact about to be recorded.
#[derive(Debug, Clone)]
enum Fact {
    Absence(Absence),
    Divergence(Divergence),
    Overtime(Overtime),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FactKey {
    Absence(AbsenceKey),
    Divergence(DivergenceKey),
    Overtime(OvertimeKey),
}

impl Fact {
    fn key(&self) -> FactKey {
        match self {
            Fact::Absence(a) => FactKey::Absence(a.key.clone()),
            Fact::Divergence(d) => FactKey::Divergence(d.key),
            Fact::Overtime(o) => FactKey::Overtime(o.key),
        }
    }
}

/// Keys a dry run has already counted as `created`. Shared by every
/// (team, day) of one run so a key met twice counts once, like the unique
/// insert it stands in for.
#[derive(Debug, Default)]
pub struct DryRunLedger {
    counted: Mutex<HashSet<FactKey>>,
}

impl DryRunLedger {
    /// True the first time `key` is seen.
    fn claim(&self, key: FactKey) -> bool {
        self.counted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key)
    }
}

/// How derived facts are recorded.
#[derive(Debug)]
pub enum RecordMode {
    Write,
    /// Reads everything, writes nothing.
    DryRun(DryRunLedger),
}

impl RecordMode {
    pub fn dry_run() -> Self {
        RecordMode::DryRun(DryRunLedger::default())
    }

    pub fn from_flag(dry_run: bool) -> Self {
        if dry_run {
            Self::dry_run()
        } else {
            RecordMode::Write
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RecordMode::DryRun(_))
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Absence(a) => write!(
                f,
                "absence(day={}, team={}, electrician={}, reason={})",
                a.key.day, a.key.team_id, a.key.electrician_id, a.key.system_reason
            ),
            Fact::Divergence(d) => write!(
                f,
                "divergence(day={}, expected_team={}, actual_team={}, electrician={})",
                d.key.day, d.key.expected_team_id, d.key.actual_team_id, d.key.electrician_id
            ),
            Fact::Overtime(o) => write!(
                f,
                "overtime(opening={}, type={:?}, delta={}h)",
                o.key.shift_opening_id, o.key.overtime_type, o.hours_delta
            ),
        }
    }
}

/// Lazily-read approved justifications for the (team, day) being classified.
enum JustificationLookup {
    NotRead,
    Read(Vec<TeamJustification>),
}

pub struct ReconciliationEngine {
    schedule: ScheduleReader,
    events: ShiftEventReader,
    facts: Arc<dyn FactStore>,
    window: DayWindow,
    clock: Arc<dyn Clock>,
    delay_grace: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        schedule: ScheduleReader,
        events: ShiftEventReader,
        facts: Arc<dyn FactStore>,
        window: DayWindow,
        clock: Arc<dyn Clock>,
        delay_grace: Duration,
    ) -> Self {
        Self {
            schedule,
            events,
            facts,
            window,
            clock,
            delay_grace,
        }
    }

    pub fn schedule(&self) -> &ScheduleReader {
        &self.schedule
    }

    /// Reconciles one team on one day. Read failures of the day's slots or
    /// openings abort this (team, day) only; per-slot failures become warnings.
    /// In a dry run every read happens and nothing is written; a would-be
    /// record counts as `skipped` when its key already exists in the store or
    /// was already counted by the same ledger, else as `created`.
    pub async fn classify_day(
        &self,
        team_id: TeamId,
        day: NaiveDate,
        mode: &RecordMode,
    ) -> Result<DayOutcome, StoreError> {
        info!(team_id, day = %day, dry_run = mode.is_dry_run(), "Classifying day");
        let mut outcome = DayOutcome::default();

        let slots = self.schedule.slots_for(team_id, day).await?;
        let openings = self.events.openings_for(day).await?;
        let mut justification = JustificationLookup::NotRead;

        for slot in &slots {
            match slot.state {
                SlotState::Work => {
                    self.classify_work_slot(slot, &openings, &mut justification, mode, &mut outcome)
                        .await
                }
                SlotState::Rest => {
                    self.classify_rest_slot(slot, &openings, mode, &mut outcome)
                        .await
                }
                SlotState::Exception | SlotState::Absence => {
                    if openings.get(slot.electrician_id).is_none() {
                        self.handle_missing_opening(slot, &mut justification, mode, &mut outcome)
                            .await;
                    }
                }
            }
        }

        if !openings.is_empty() {
            self.record_unscheduled_work(team_id, day, &openings, mode, &mut outcome)
                .await?;
        }

        info!(
            team_id,
            day = %day,
            created = outcome.stats.created,
            skipped = outcome.stats.skipped,
            warnings = outcome.warnings.len(),
            "Day classified"
        );
        Ok(outcome)
    }

    async fn classify_work_slot(
        &self,
        slot: &PlannedSlot,
        openings: &DayOpenings,
        justification: &mut JustificationLookup,
        mode: &RecordMode,
        outcome: &mut DayOutcome,
    ) {
        let Some(opened) = openings.get(slot.electrician_id) else {
            self.handle_missing_opening(slot, justification, mode, outcome)
                .await;
            return;
        };

        if opened.opened_under(slot.team_id) {
            if let Some(opening) = opened.openings.iter().find(|o| o.team_id == slot.team_id) {
                self.check_delay(slot, opening, mode, outcome).await;
            }
            return;
        }

        if let Some(actual_team_id) = opened.first_other_team(slot.team_id) {
            let divergence = Divergence {
                key: DivergenceKey {
                    day: slot.day,
                    expected_team_id: slot.team_id,
                    actual_team_id,
                    electrician_id: slot.electrician_id,
                },
            };
            self.record(Fact::Divergence(divergence), slot.team_id, slot.day, mode, outcome)
                .await;
        }
    }

    async fn classify_rest_slot(
        &self,
        slot: &PlannedSlot,
        openings: &DayOpenings,
        mode: &RecordMode,
        outcome: &mut DayOutcome,
    ) {
        let Some(opening) = openings
            .get(slot.electrician_id)
            .and_then(|opened| opened.preferred_opening(slot.team_id))
        else {
            return;
        };
        let actual = worked_hours(opening, self.clock.now());
        let overtime = Overtime {
            key: OvertimeKey {
                shift_opening_id: opening.id,
                overtime_type: OvertimeType::RestWorked,
            },
            day: slot.day,
            team_id: opening.team_id,
            electrician_id: slot.electrician_id,
            hours_expected: Decimal::ZERO,
            hours_actual: actual,
            hours_delta: actual,
            status: FactStatus::Pending,
        };
        self.record(Fact::Overtime(overtime), slot.team_id, slot.day, mode, outcome)
            .await;
    }

    /// No opening anywhere: absence unless the team or the electrician is excused.
    async fn handle_missing_opening(
        &self,
        slot: &PlannedSlot,
        justification: &mut JustificationLookup,
        mode: &RecordMode,
        outcome: &mut DayOutcome,
    ) {
        if matches!(justification, JustificationLookup::NotRead) {
            match self
                .schedule
                .approved_justifications(slot.team_id, slot.day)
                .await
            {
                Ok(found) => *justification = JustificationLookup::Read(found),
                Err(e) => {
                    self.warn(
                        outcome,
                        slot.team_id,
                        slot.day,
                        format!(
                            "could not read team justification for electrician {}: {}",
                            slot.electrician_id, e
                        ),
                    );
                    return;
                }
            }
        }
        // Any approved non-generating justification excuses the team, whatever the others say.
        if let JustificationLookup::Read(found) = &*justification {
            if let Some(j) = found.iter().find(|j| j.suppresses_absences()) {
                debug!(
                    team_id = slot.team_id,
                    day = %slot.day,
                    electrician_id = slot.electrician_id,
                    justification_id = j.id,
                    reason = %j.reason,
                    "Absence suppressed by team justification"
                );
                return;
            }
        }

        match self.schedule.electrician_status(slot.electrician_id).await {
            Ok(Some(status)) if status.justifies_absence() => {
                debug!(
                    electrician_id = slot.electrician_id,
                    status = ?status,
                    "Absence suppressed by electrician status"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.warn(
                    outcome,
                    slot.team_id,
                    slot.day,
                    format!(
                        "could not read status of electrician {}: {}",
                        slot.electrician_id, e
                    ),
                );
                return;
            }
        }

        let absence = Absence {
            key: AbsenceKey {
                day: slot.day,
                team_id: slot.team_id,
                electrician_id: slot.electrician_id,
                system_reason: REASON_NO_OPENING.to_string(),
            },
            status: FactStatus::Pending,
        };
        self.record(Fact::Absence(absence), slot.team_id, slot.day, mode, outcome)
            .await;
    }

    async fn check_delay(
        &self,
        slot: &PlannedSlot,
        opening: &ShiftOpening,
        mode: &RecordMode,
        outcome: &mut DayOutcome,
    ) {
        let now = self.clock.now();
        match assess_delay(slot, opening, &self.window, self.delay_grace, now) {
            DelayAssessment::NotApplicable | DelayAssessment::OnTime => {}
            DelayAssessment::Compensated {
                expected,
                actual,
                delta,
            } => {
                let overtime = Overtime {
                    key: OvertimeKey {
                        shift_opening_id: opening.id,
                        overtime_type: OvertimeType::DelayCompensated,
                    },
                    day: slot.day,
                    team_id: slot.team_id,
                    electrician_id: slot.electrician_id,
                    hours_expected: expected,
                    hours_actual: actual,
                    hours_delta: delta,
                    status: FactStatus::Pending,
                };
                self.record(Fact::Overtime(overtime), slot.team_id, slot.day, mode, outcome)
                    .await;
            }
            DelayAssessment::Uncompensated {
                expected,
                actual,
                delta,
            } => {
                // TODO: record these as a `delay_uncompensated` fact once partial-absence
                // semantics exist; until then only the warning is kept.
                self.warn(
                    outcome,
                    slot.team_id,
                    slot.day,
                    format!(
                        "electrician {} started late on opening {} and worked {}h of {}h ({}h); no record created",
                        slot.electrician_id, opening.id, actual, expected, delta
                    ),
                );
            }
        }
    }

    async fn record_unscheduled_work(
        &self,
        team_id: TeamId,
        day: NaiveDate,
        openings: &DayOpenings,
        mode: &RecordMode,
        outcome: &mut DayOutcome,
    ) -> Result<(), StoreError> {
        let scheduled = self.schedule.scheduled_electricians(day).await?;
        let now = self.clock.now();
        for (electrician_id, opened) in openings.iter() {
            if scheduled.contains(electrician_id) {
                continue;
            }
            for opening in &opened.openings {
                let actual = worked_hours(opening, now);
                let overtime = Overtime {
                    key: OvertimeKey {
                        shift_opening_id: opening.id,
                        overtime_type: OvertimeType::UnscheduledWork,
                    },
                    day,
                    team_id: opening.team_id,
                    electrician_id: *electrician_id,
                    hours_expected: Decimal::ZERO,
                    hours_actual: actual,
                    hours_delta: actual,
                    status: FactStatus::Pending,
                };
                self.record(Fact::Overtime(overtime), team_id, day, mode, outcome)
                    .await;
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        fact: Fact,
        team_id: TeamId,
        day: NaiveDate,
        mode: &RecordMode,
        outcome: &mut DayOutcome,
    ) {
        if let RecordMode::DryRun(ledger) = mode {
            match self.fact_exists(&fact).await {
                Ok(false) if ledger.claim(fact.key()) => {
                    info!(team_id, day = %day, "[dry-run] would record {}", fact);
                    outcome.stats.created += 1;
                }
                Ok(_) => {
                    debug!(team_id, day = %day, "[dry-run] already recorded {}", fact);
                    outcome.stats.skipped += 1;
                }
                Err(e) => {
                    self.warn(outcome, team_id, day, format!("failed to look up {}: {}", fact, e));
                }
            }
            return;
        }

        let result = match &fact {
            Fact::Absence(a) => self.facts.upsert_absence(a).await,
            Fact::Divergence(d) => self.facts.upsert_divergence(d).await,
            Fact::Overtime(o) => self.facts.upsert_overtime(o).await,
        };
        match result {
            Ok(UpsertOutcome::Created) => {
                info!(team_id, day = %day, "Recorded {}", fact);
                outcome.stats.created += 1;
            }
            Ok(UpsertOutcome::AlreadyExisted) => {
                debug!(team_id, day = %day, "Already recorded {}", fact);
                outcome.stats.skipped += 1;
            }
            Err(e) => {
                self.warn(outcome, team_id, day, format!("failed to record {}: {}", fact, e));
            }
        }
    }

    async fn fact_exists(&self, fact: &Fact) -> Result<bool, StoreError> {
        match fact {
            Fact::Absence(a) => self.facts.absence_exists(&a.key).await,
            Fact::Divergence(d) => self.facts.divergence_exists(&d.key).await,
            Fact::Overtime(o) => self.facts.overtime_exists(&o.key).await,
        }
    }

    fn warn(&self, outcome: &mut DayOutcome, team_id: TeamId, day: NaiveDate, message: String) {
        let message = format!("team {} day {}: {}", team_id, day, message);
        warn!("{}", message);
        outcome.warnings.push(message);
    }
}

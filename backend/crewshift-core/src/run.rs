// src/run.rs
//! One reconciliation run: take the cluster lock, walk every (team, day) pair
//! in range through the engine, release the lock.
//!
//! Both triggers (the daily scheduler and the on-demand HTTP/CLI call) go
//! through [`ReconciliationRun::execute`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::day_window::DayWindow;
use crate::engine::{ReconcileStats, ReconciliationEngine, RecordMode};
use crate::error::ReconcileError;
use crate::lock::{lock_owner, DistributedLock, RECONCILIATION_JOB};
use crate::model::TeamId;

pub const MAX_DAY_COUNT: u32 = 366;

fn default_day_count() -> u32 {
    1
}

/// Parameters of a run. The wire name of `day_count` is `intervaloDias`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    /// First day of the range; today in the reference timezone when omitted.
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
    /// Restricts the run to one team; otherwise every team with a published
    /// roster period overlapping the range.
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(rename = "intervaloDias", default = "default_day_count")]
    pub day_count: u32,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            reference_date: None,
            team_id: None,
            day_count: default_day_count(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduler,
    Api,
    Cli,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunTrigger::Scheduler => "scheduler",
            RunTrigger::Api => "api",
            RunTrigger::Cli => "cli",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub success: bool,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub stats: ReconcileStats,
    pub warnings: Vec<String>,
}

pub struct ReconciliationRun {
    engine: Arc<ReconciliationEngine>,
    lock: DistributedLock,
    window: DayWindow,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
}

impl ReconciliationRun {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        lock: DistributedLock,
        window: DayWindow,
        clock: Arc<dyn Clock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            engine,
            lock,
            window,
            clock,
            lock_ttl,
        }
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn window(&self) -> DayWindow {
        self.window
    }

    pub async fn execute(
        &self,
        params: RunParams,
        triggered_by: RunTrigger,
    ) -> Result<RunReport, ReconcileError> {
        if self.lock_ttl.is_zero() {
            return Err(ReconcileError::Configuration(
                "reconciliation lock TTL must be greater than zero".to_string(),
            ));
        }
        if params.day_count == 0 || params.day_count > MAX_DAY_COUNT {
            return Err(ReconcileError::InvalidRequest(format!(
                "intervaloDias must be between 1 and {}, got {}",
                MAX_DAY_COUNT, params.day_count
            )));
        }

        let run_id = Uuid::new_v4().to_string();
        let owner = lock_owner(&run_id);
        let started_at = self.clock.now();

        let Some(guard) = self
            .lock
            .acquire_guard(RECONCILIATION_JOB, self.lock_ttl, &owner)
            .await
        else {
            warn!(
                run_id = %run_id,
                triggered_by = %triggered_by,
                "Reconciliation not started: another run holds the lock"
            );
            return Err(ReconcileError::LockContention {
                job: RECONCILIATION_JOB.to_string(),
            });
        };

        let first_day = params
            .reference_date
            .unwrap_or_else(|| self.window.local_date(started_at));
        let days = DayWindow::days(first_day, params.day_count);
        info!(
            run_id = %run_id,
            triggered_by = %triggered_by,
            first_day = %first_day,
            day_count = params.day_count,
            team_id = ?params.team_id,
            dry_run = params.dry_run,
            "Reconciliation run started"
        );

        let (stats, warnings) = self.reconcile_range(&params, &days).await;
        guard.release().await;

        let finished_at = self.clock.now();
        let report = RunReport {
            success: true,
            run_id,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            stats,
            warnings,
        };
        info!(
            run_id = %report.run_id,
            created = report.stats.created,
            skipped = report.stats.skipped,
            warnings = report.warnings.len(),
            duration_ms = report.duration_ms,
            "Reconciliation run finished"
        );
        Ok(report)
    }

    /// Sequential team × day walk. A failed pair becomes a warning and the
    /// walk goes on.
    async fn reconcile_range(
        &self,
        params: &RunParams,
        days: &[NaiveDate],
    ) -> (ReconcileStats, Vec<String>) {
        let mut stats = ReconcileStats::default();
        let mut warnings = Vec::new();
        let (Some(&first), Some(&last)) = (days.first(), days.last()) else {
            return (stats, warnings);
        };

        let teams = match params.team_id {
            Some(team_id) => vec![team_id],
            None => match self.engine.schedule().published_teams(first, last).await {
                Ok(teams) => teams,
                Err(e) => {
                    let message = format!(
                        "could not list teams with a published roster between {} and {}: {}",
                        first, last, e
                    );
                    error!("{}", message);
                    warnings.push(message);
                    return (stats, warnings);
                }
            },
        };
        info!(teams = teams.len(), days = days.len(), "Reconciling team days");

        let mode = RecordMode::from_flag(params.dry_run);
        for team_id in teams {
            for &day in days {
                match self.engine.classify_day(team_id, day, &mode).await {
                    Ok(outcome) => {
                        stats += outcome.stats;
                        warnings.extend(outcome.warnings);
                    }
                    Err(e) => {
                        let message = format!("team {} day {}: classification failed: {}", team_id, day, e);
                        warn!("{}", message);
                        warnings.push(message);
                    }
                }
            }
        }
        (stats, warnings)
    }
}

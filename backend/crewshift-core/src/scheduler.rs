// src/scheduler.rs
//! Cron trigger. Owns its own timer and calls the same
//! [`ReconciliationRun::execute`] as the on-demand path.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Offset, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::day_window::DayWindow;
use crate::error::{ConfigError, ReconcileError};
use crate::run::{ReconciliationRun, RunParams, RunReport, RunTrigger};

/// Far enough ahead to reach the next Feb 29 from any day.
const LOOKAHEAD_DAYS: i64 = 5 * 366;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A standard five-field cron expression (`minute hour day-of-month month
/// day-of-week`) evaluated in the reference timezone. Fields take `*`, values,
/// ranges `a-b`, steps `/n` and comma lists; months and weekdays also take
/// three-letter names, and weekday 7 is Sunday. When both day fields are
/// restricted a day matching either one fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
};

impl FieldSpec {
    fn value(&self, token: &str) -> Result<u32, String> {
        let upper = token.to_ascii_uppercase();
        if let Some(i) = self.names.iter().position(|n| *n == upper) {
            // Month names start at 1, weekday names at 0.
            return Ok(self.min + i as u32);
        }
        let value: u32 = token
            .parse()
            .map_err(|_| format!("bad {} '{}'", self.name, token))?;
        if value < self.min || value > self.max {
            return Err(format!(
                "{} {} out of range {}-{}",
                self.name, value, self.min, self.max
            ));
        }
        Ok(value)
    }

    fn parse(&self, field: &str) -> Result<u64, String> {
        let mut mask = 0u64;
        for item in field.split(',') {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| format!("bad step in {} '{}'", self.name, item))?;
                    (range, Some(step))
                }
                None => (item, None),
            };
            let (first, last) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (self.value(a)?, self.value(b)?);
                if a > b {
                    return Err(format!("empty {} range '{}'", self.name, range));
                }
                (a, b)
            } else {
                let a = self.value(range)?;
                // `a/n` runs from `a` to the end of the field.
                (a, if step.is_some() { self.max } else { a })
            };
            let step = step.unwrap_or(1) as usize;
            for v in (first..=last).step_by(step) {
                mask |= 1 << v;
            }
        }
        Ok(mask)
    }
}

fn bits(mask: u64) -> impl Iterator<Item = u32> {
    (0..64).filter(move |b| mask & (1 << b) != 0)
}

impl FromStr for CronSchedule {
    type Err = ConfigError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = |message: String| ConfigError::invalid("RECONCILIATION_CRON", message);
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(invalid(format!(
                "expected 5 fields 'minute hour day-of-month month day-of-week', got '{}'",
                expr
            )));
        };
        let mut days_of_week = DAY_OF_WEEK.parse(dow).map_err(&invalid)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }
        let schedule = Self {
            expr: fields.join(" "),
            minutes: MINUTE.parse(minute).map_err(&invalid)?,
            hours: HOUR.parse(hour).map_err(&invalid)?,
            days_of_month: DAY_OF_MONTH.parse(dom).map_err(&invalid)?,
            months: MONTH.parse(month).map_err(&invalid)?,
            days_of_week,
            day_of_month_restricted: !dom.starts_with('*'),
            day_of_week_restricted: !dow.starts_with('*'),
        };
        let anchor = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
        let utc = DayWindow::new(Utc.fix());
        if anchor.and_then(|a| schedule.next_after(a, &utc)).is_none() {
            return Err(invalid(format!("'{}' never fires", expr)));
        }
        Ok(schedule)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl CronSchedule {
    pub fn matches_day(&self, day: NaiveDate) -> bool {
        if self.months & (1 << day.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << day.day()) != 0;
        let dow = self.days_of_week & (1 << day.weekday().num_days_from_sunday()) != 0;
        if self.day_of_month_restricted && self.day_of_week_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>, window: &DayWindow) -> Option<DateTime<Utc>> {
        let today = window.local_date(now);
        (0..=LOOKAHEAD_DAYS)
            .map(|offset| today + Duration::days(offset))
            .filter(|day| self.matches_day(*day))
            .find_map(|day| {
                let midnight = window.range_for_date(day).start;
                bits(self.hours)
                    .flat_map(|h| bits(self.minutes).map(move |m| (h, m)))
                    .map(|(h, m)| {
                        midnight + Duration::hours(i64::from(h)) + Duration::minutes(i64::from(m))
                    })
                    .find(|fire| *fire > now)
            })
    }
}

/// Days the scheduler reconciles at `now`: `history_days` days ending
/// yesterday, or ending today once `today_grace` of the local day has passed.
pub fn history_window(
    now: DateTime<Utc>,
    window: &DayWindow,
    history_days: u32,
    today_grace: Duration,
) -> (NaiveDate, u32) {
    let today = window.local_date(now);
    let elapsed = now - window.range_for_date(today).start;
    let last = if elapsed >= today_grace {
        today
    } else {
        today.pred_opt().unwrap_or(today)
    };
    let span = i64::from(history_days.max(1)) - 1;
    (last - Duration::days(span), history_days.max(1))
}

pub struct Scheduler {
    run: Arc<ReconciliationRun>,
    clock: Arc<dyn Clock>,
    schedule: CronSchedule,
    history_days: u32,
    today_grace: Duration,
}

impl Scheduler {
    pub fn new(
        run: Arc<ReconciliationRun>,
        clock: Arc<dyn Clock>,
        schedule: CronSchedule,
        history_days: u32,
        today_grace: Duration,
    ) -> Self {
        Self {
            run,
            clock,
            schedule,
            history_days,
            today_grace,
        }
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule
            .next_after(self.clock.now(), &self.run.window())
    }

    pub fn params_at(&self, now: DateTime<Utc>) -> RunParams {
        let (first, day_count) =
            history_window(now, &self.run.window(), self.history_days, self.today_grace);
        RunParams {
            reference_date: Some(first),
            team_id: None,
            day_count,
            dry_run: false,
        }
    }

    /// One scheduled run. Never fails past this point: every outcome is logged.
    pub async fn tick(&self) -> Option<RunReport> {
        let params = self.params_at(self.clock.now());
        match self.run.execute(params, RunTrigger::Scheduler).await {
            Ok(report) => {
                if !report.warnings.is_empty() {
                    warn!(
                        run_id = %report.run_id,
                        warnings = report.warnings.len(),
                        "Scheduled reconciliation finished with warnings"
                    );
                }
                Some(report)
            }
            Err(ReconcileError::LockContention { job }) => {
                info!(job = %job, "Scheduled reconciliation skipped: already running elsewhere");
                None
            }
            Err(e) => {
                error!("Scheduled reconciliation failed: {}", e);
                None
            }
        }
    }

    pub async fn run_forever(self) {
        info!(
            schedule = %self.schedule,
            history_days = self.history_days,
            "Starting reconciliation scheduler"
        );
        loop {
            let Some(next) = self.next_fire() else {
                error!(
                    schedule = %self.schedule,
                    "Schedule has no future fire time; scheduler stopped"
                );
                return;
            };
            let wait = (next - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            info!(next_run = %next, "Next scheduled reconciliation");
            sleep(wait).await;
            self.tick().await;
        }
    }
}

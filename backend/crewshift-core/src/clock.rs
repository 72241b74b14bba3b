// src/clock.rs
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of "now" for the lock, the engine and the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests. Times are interpreted as UTC.
#[derive(Debug, Clone)]
pub struct TestClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(datetime_str: &str) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(parse_utc(datetime_str))),
        }
    }

    pub fn set_time(&self, datetime_str: &str) {
        *self.lock() = parse_utc(datetime_str);
    }

    pub fn advance(&self, duration: Duration) {
        *self.lock() += duration;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock only happens after a panicking test; keep the value.
        self.current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

fn parse_utc(datetime_str: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|e| panic!("TestClock: bad datetime '{}': {}", datetime_str, e))
        .and_utc()
}

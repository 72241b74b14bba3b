// src/lib.rs
pub mod clock;
pub mod config;
pub mod day_window;
pub mod engine;
pub mod error;
pub mod hours;
pub mod lock;
pub mod memory_store;
pub mod model;
pub mod readers;
pub mod run;
pub mod scheduler;
pub mod server;
pub mod store;

#[cfg(test)]
mod test_support;


use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::engine::ReconciliationEngine;
use crate::error::ConfigError;
use crate::lock::DistributedLock;
use crate::readers::{ScheduleReader, ShiftEventReader};
use crate::run::ReconciliationRun;
use crate::store::ReconciliationStore;

/// Wires a [`ReconciliationRun`] over one store and clock from validated config.
pub fn build_run<S>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Result<ReconciliationRun, ConfigError>
where
    S: ReconciliationStore + 'static,
{
    let window = config.day_window()?;
    let engine = ReconciliationEngine::new(
        ScheduleReader::new(store.clone(), window),
        ShiftEventReader::new(store.clone(), window),
        store.clone(),
        window,
        clock.clone(),
        config.delay_grace(),
    );
    let lock = DistributedLock::new(store, clock.clone());
    Ok(ReconciliationRun::new(
        Arc::new(engine),
        lock,
        window,
        clock,
        config.lock_ttl(),
    ))
}

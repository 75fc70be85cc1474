//! Fixed-cadence tick scheduling.
//!
//! Ticks run one at a time on the blocking pool. A tick still running when
//! the next one is due makes the scheduler skip that one.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use smoker_presets::{Actuator, Controller, Sensor, TransactionalStore};

pub async fn run<D, S, A>(
    controller: Controller<D, S, A>,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) where
    D: TransactionalStore + Send + 'static,
    S: Sensor + Send + 'static,
    A: Actuator + Send + 'static,
{
    let controller = Arc::new(Mutex::new(controller));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let controller = controller.clone();
                let tick = tokio::task::spawn_blocking(move || tick_guarded(&controller));
                if let Err(e) = tick.await {
                    error!(error = %e, "tick task failed");
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
    match controller.force_off() {
        Ok(()) => info!("relays off, exiting"),
        Err(e) => error!(error = %e, "could not switch relays off on exit"),
    }
}

/// Runs one tick; a panicking tick switches the relays off.
fn tick_guarded<D, S, A>(controller: &Mutex<Controller<D, S, A>>)
where
    D: TransactionalStore,
    S: Sensor,
    A: Actuator,
{
    let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
    if panic::catch_unwind(AssertUnwindSafe(|| controller.tick())).is_err() {
        error!("tick panicked, forcing relays off");
        if let Err(e) = controller.force_off() {
            error!(error = %e, "could not switch relays off");
        }
    }
}

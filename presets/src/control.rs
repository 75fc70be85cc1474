//! One control tick: read, resolve, decide, persist, then actuate.
//!
//! The previous relay state comes from the last audit record, read in the
//! same write transaction that appends the new one, so the controller keeps
//! no state of its own between ticks. Relays are driven only after the
//! record is committed; if the tick fails before that, nothing is written
//! and both relays are switched off.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{ActuatorError, SensorError, StoreError};
use crate::hysteresis::decide_sector;
use crate::model::{Sector, Temperature, TemperatureRecord, Timestamp};
use crate::resolver::{Resolution, Resolver, UnresolvedReason};
use crate::store::TransactionalStore;

/// Latest probe readings; `None` is an unknown reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readings {
    pub core: Option<Temperature>,
    pub oven: Option<Temperature>,
}

impl Readings {
    pub const UNKNOWN: Readings = Readings { core: None, oven: None };

    pub fn get(&self, sector: Sector) -> Option<Temperature> {
        match sector {
            Sector::Core => self.core,
            Sector::Oven => self.oven,
        }
    }
}

pub trait Sensor {
    fn read_temperatures(&mut self) -> Result<Readings, SensorError>;
}

pub trait Actuator {
    fn set_relays(&mut self, core_on: bool, oven_on: bool) -> Result<(), ActuatorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedCause {
    Sensor(SensorError),
    MissingReading(Sector),
    Unresolved(UnresolvedReason),
}

#[derive(Debug)]
pub enum TickOutcome {
    Committed(TemperatureRecord),
    /// Recorded, but with an unknown reading or no resolvable band. The
    /// affected sectors were switched off.
    Degraded {
        record: TemperatureRecord,
        causes: Vec<DegradedCause>,
    },
    /// Nothing recorded, relays forced off.
    Aborted { error: StoreError },
}

impl TickOutcome {
    pub fn record(&self) -> Option<&TemperatureRecord> {
        match self {
            TickOutcome::Committed(record) | TickOutcome::Degraded { record, .. } => Some(record),
            TickOutcome::Aborted { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TickOutcome::Committed(_) => "committed",
            TickOutcome::Degraded { .. } => "degraded",
            TickOutcome::Aborted { .. } => "aborted",
        }
    }
}

pub struct Controller<D, S, A> {
    store: D,
    sensor: S,
    actuator: A,
    resolver: Resolver,
    deadline: Duration,
}

impl<D: TransactionalStore, S: Sensor, A: Actuator> Controller<D, S, A> {
    pub fn new(store: D, sensor: S, actuator: A, resolver: Resolver, deadline: Duration) -> Self {
        Controller {
            store,
            sensor,
            actuator,
            resolver,
            deadline,
        }
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut D {
        &mut self.store
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn tick(&mut self) -> TickOutcome {
        self.tick_at(Utc::now().timestamp())
    }

    pub fn tick_at(&mut self, t: Timestamp) -> TickOutcome {
        let started = Instant::now();
        let mut causes = Vec::new();

        let readings = match self.sensor.read_temperatures() {
            Ok(readings) => {
                for sector in Sector::ALL {
                    if readings.get(sector).is_none() {
                        warn!(%sector, "no reading, sector stays off");
                        causes.push(DegradedCause::MissingReading(sector));
                    }
                }
                readings
            }
            Err(err) => {
                warn!(error = %err, "sensor read failed, both sectors stay off");
                causes.push(DegradedCause::Sensor(err));
                Readings::UNKNOWN
            }
        };

        let resolver = self.resolver;
        let deadline = self.deadline;
        let committed = self.store.write_transaction(|store| {
            let resolution = resolver.resolve(store, t)?;
            let previous = store.last_temperature_record()?;
            let band = resolution.band();
            let decide = |sector: Sector| {
                let was_on = previous.map_or(false, |record| record.is_on(sector));
                decide_sector(band.as_ref(), sector, readings.get(sector), was_on)
            };
            let record = TemperatureRecord {
                time: t,
                core: readings.core,
                oven: readings.oven,
                core_on: decide(Sector::Core),
                oven_on: decide(Sector::Oven),
            };
            store.append_temperature_record(&record)?;

            let elapsed = started.elapsed();
            if elapsed > deadline {
                return Err(StoreError::DeadlineExceeded(elapsed));
            }
            Ok((resolution, record))
        });

        match committed {
            Ok((resolution, record)) => {
                if let Resolution::Unresolved(reason) = resolution {
                    warn!(%reason, "configuration unresolved, both sectors stay off");
                    causes.push(DegradedCause::Unresolved(reason));
                }
                self.actuate(record.core_on, record.oven_on);
                let outcome = if causes.is_empty() {
                    TickOutcome::Committed(record)
                } else {
                    TickOutcome::Degraded { record, causes }
                };
                log_outcome(t, &outcome);
                outcome
            }
            Err(error) => {
                self.actuate(false, false);
                let outcome = TickOutcome::Aborted { error };
                log_outcome(t, &outcome);
                outcome
            }
        }
    }

    /// Switches both relays off.
    pub fn force_off(&mut self) -> Result<(), ActuatorError> {
        self.actuator.set_relays(false, false)
    }

    fn actuate(&mut self, core_on: bool, oven_on: bool) {
        if let Err(err) = self.actuator.set_relays(core_on, oven_on) {
            error!(error = %err, core_on, oven_on, "relay update failed");
        }
    }
}

fn log_outcome(t: Timestamp, outcome: &TickOutcome) {
    let name = outcome.name();
    match outcome {
        TickOutcome::Committed(record) => info!(
            outcome = name,
            time = t,
            core = ?record.core,
            oven = ?record.oven,
            core_on = record.core_on,
            oven_on = record.oven_on,
            "tick"
        ),
        TickOutcome::Degraded { record, causes } => warn!(
            outcome = name,
            time = t,
            causes = causes.len(),
            core_on = record.core_on,
            oven_on = record.oven_on,
            "tick"
        ),
        TickOutcome::Aborted { error } => error!(outcome = name, time = t, %error, "tick"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LocalCalendar;
    use crate::model::{AtomicBand, Band, PresetKind};
    use crate::resolver::DEFAULT_MAX_DEPTH;
    use crate::store::{PresetStore, SqliteStore};

    const T: Timestamp = 1_704_672_000;

    struct FakeSensor {
        result: Result<Readings, SensorError>,
        delay: Duration,
    }

    impl Sensor for FakeSensor {
        fn read_temperatures(&mut self) -> Result<Readings, SensorError> {
            std::thread::sleep(self.delay);
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct FakeActuator {
        calls: Vec<(bool, bool)>,
        fail: bool,
    }

    impl Actuator for FakeActuator {
        fn set_relays(&mut self, core_on: bool, oven_on: bool) -> Result<(), ActuatorError> {
            self.calls.push((core_on, oven_on));
            if self.fail {
                return Err(ActuatorError::Relay {
                    sector: Sector::Core,
                    message: "unreachable".to_owned(),
                });
            }
            Ok(())
        }
    }

    fn readings(core: i32, oven: i32) -> Result<Readings, SensorError> {
        Ok(Readings {
            core: Some(core),
            oven: Some(oven),
        })
    }

    fn controller(
        result: Result<Readings, SensorError>,
    ) -> Controller<SqliteStore, FakeSensor, FakeActuator> {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let id = store.create_preset(PresetKind::Atomic).unwrap();
        let band = AtomicBand {
            core: Band::new(140, 150),
            oven: Band::new(80, 90),
        };
        store.put_atomic(id, band, 0).unwrap();
        store.activate(id, 0).unwrap();
        let resolver =
            Resolver::new(LocalCalendar::new(chrono_tz::Europe::London), DEFAULT_MAX_DEPTH);
        let sensor = FakeSensor {
            result,
            delay: Duration::ZERO,
        };
        Controller::new(store, sensor, FakeActuator::default(), resolver, Duration::from_secs(20))
    }

    #[test]
    fn first_tick_inside_deadband_is_off() {
        let mut c = controller(readings(145, 85));
        let outcome = c.tick_at(T);
        let record = TemperatureRecord {
            time: T,
            core: Some(145),
            oven: Some(85),
            core_on: false,
            oven_on: false,
        };
        assert_eq!(outcome.name(), "committed");
        assert!(matches!(outcome, TickOutcome::Committed(r) if r == record));
        assert_eq!(c.actuator().calls, vec![(false, false)]);
        assert_eq!(c.store().connection().last_temperature_record().unwrap(), Some(record));
    }

    #[test]
    fn previous_state_comes_from_the_log() {
        let mut c = controller(readings(130, 70));
        let relays = |outcome: TickOutcome| outcome.record().map(|r| (r.core_on, r.oven_on));
        assert_eq!(relays(c.tick_at(T)), Some((true, true)));

        c.sensor_mut().result = readings(145, 85);
        assert_eq!(relays(c.tick_at(T + 60)), Some((true, true)));

        c.sensor_mut().result = readings(150, 85);
        assert_eq!(relays(c.tick_at(T + 120)), Some((false, true)));
        assert_eq!(c.actuator().calls, vec![(true, true), (true, true), (false, true)]);
    }

    #[test]
    fn sensor_failure_degrades_to_off() {
        let mut c = controller(readings(130, 70));
        c.tick_at(T);
        c.sensor_mut().result = Err(SensorError::NoFreshReadings { stale_secs: 180 });
        match c.tick_at(T + 60) {
            TickOutcome::Degraded { record, causes } => {
                let off = TemperatureRecord {
                    time: T + 60,
                    core: None,
                    oven: None,
                    core_on: false,
                    oven_on: false,
                };
                assert_eq!(record, off);
                let stale = SensorError::NoFreshReadings { stale_secs: 180 };
                assert_eq!(causes, vec![DegradedCause::Sensor(stale)]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn missing_reading_only_affects_its_sector() {
        let mut c = controller(Ok(Readings { core: Some(130), oven: None }));
        match c.tick_at(T) {
            TickOutcome::Degraded { record, causes } => {
                assert!(record.core_on);
                assert!(!record.oven_on);
                assert_eq!(causes, vec![DegradedCause::MissingReading(Sector::Oven)]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn unresolved_band_degrades() {
        let mut c = controller(readings(130, 70));
        c.store()
            .connection()
            .execute("DELETE FROM atomic_presets", [])
            .unwrap();
        match c.tick_at(T) {
            TickOutcome::Degraded { record, causes } => {
                assert!(!record.core_on && !record.oven_on);
                assert!(matches!(
                    causes.as_slice(),
                    [DegradedCause::Unresolved(UnresolvedReason::NoValidVersion { .. })]
                ));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn actuator_failure_keeps_the_record() {
        let mut c = controller(readings(130, 70));
        c.actuator.fail = true;
        assert!(matches!(c.tick_at(T), TickOutcome::Committed(_)));
        assert!(c.store().connection().last_temperature_record().unwrap().is_some());
    }

    #[test]
    fn storage_failure_aborts_and_forces_off() {
        let mut c = controller(readings(130, 70));
        c.store().connection().execute_batch("DROP TABLE temperatures").unwrap();
        let outcome = c.tick_at(T);
        assert!(matches!(outcome, TickOutcome::Aborted { error: StoreError::Sqlite(_) }));
        assert!(outcome.record().is_none());
        assert_eq!(c.actuator().calls, vec![(false, false)]);
    }

    #[test]
    fn late_tick_rolls_back() {
        let mut c = controller(readings(130, 70));
        c.deadline = Duration::from_millis(1);
        c.sensor_mut().delay = Duration::from_millis(20);
        let outcome = c.tick_at(T);
        assert!(matches!(outcome, TickOutcome::Aborted { error: StoreError::DeadlineExceeded(_) }));
        assert_eq!(outcome.name(), "aborted");
        assert!(c.store().connection().last_temperature_record().unwrap().is_none());
        assert_eq!(c.actuator().calls, vec![(false, false)]);
    }

    #[test]
    fn disabled_is_a_clean_off() {
        let mut c = controller(readings(20, 20));
        c.store_mut().activate(crate::model::PresetId::OFF, T - 1).unwrap();
        let outcome = c.tick_at(T);
        assert!(matches!(outcome, TickOutcome::Committed(r) if !r.core_on && !r.oven_on));
        assert!(c.force_off().is_ok());
        assert_eq!(c.actuator().calls, vec![(false, false), (false, false)]);
    }
}

//! Preset resolution and relay decisions for a two-sector smoker.
//!
//! Presets come in three kinds: atomic (a band per sector), day (chunks of
//! the local day, each naming another preset) and week (a preset per
//! weekday). One top-level preset is active at a time. [`resolver`] answers
//! which band applies at an instant, [`reconstruct`] which bands applied over
//! a window of history, and [`control`] runs the periodic relay decision.

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod hysteresis;
pub mod model;
pub mod reconstruct;
pub mod resolver;
pub mod store;

pub use clock::LocalCalendar;
pub use config::{ConfigError, ControllerConfig};
pub use control::{Actuator, Controller, DegradedCause, Readings, Sensor, TickOutcome};
pub use error::{ActuatorError, ReconstructError, SensorError, StoreError, StoreResult};
pub use model::{
    Activation, AtomicBand, Band, BandInterval, DayChunk, DayPreset, PresetId, PresetKind, Sector,
    Temperature, TemperatureRecord, TimeRange, Timestamp, WeekPreset,
};
pub use reconstruct::{Reconstructor, MAX_WINDOW_SECS};
pub use resolver::{Resolution, Resolver, UnresolvedReason};
pub use store::{PresetStore, SqliteStore, TransactionalStore};

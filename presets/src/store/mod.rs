//! The preset store boundary.
//!
//! The store owns all state: preset versions, the activation history and
//! the temperature audit log. The engine reads presets and activations and
//! writes nothing but audit records (and activations, for operator tools).

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreResult;
use crate::model::{
    Activation, PresetId, PresetKind, PresetRow, TemperatureRecord, TimeRange, Timestamp,
};

pub trait PresetStore {
    /// The activation with no end, if any.
    fn current_activation(&self) -> StoreResult<Option<Activation>>;

    /// Activations whose window overlaps `range`, ordered by start.
    fn activations_overlapping(&self, range: TimeRange) -> StoreResult<Vec<Activation>>;

    /// The kind tag of `preset_id`, `None` for an id that was never created.
    fn preset_kind(&self, preset_id: PresetId) -> StoreResult<Option<PresetKind>>;

    /// The version of a `kind` preset valid at `t`.
    fn valid_row_at(
        &self,
        kind: PresetKind,
        preset_id: PresetId,
        t: Timestamp,
    ) -> StoreResult<Option<PresetRow>>;

    /// Versions of a `kind` preset whose validity overlaps `range`, ordered by start.
    fn rows_overlapping(
        &self,
        kind: PresetKind,
        preset_id: PresetId,
        range: TimeRange,
    ) -> StoreResult<Vec<PresetRow>>;

    fn last_temperature_record(&self) -> StoreResult<Option<TemperatureRecord>>;

    fn append_temperature_record(&self, record: &TemperatureRecord) -> StoreResult<()>;

    /// Audit records with `time` in `range`, ordered by time.
    fn temperatures_between(&self, range: TimeRange) -> StoreResult<Vec<TemperatureRecord>>;
}

/// A store that can run a group of operations atomically.
pub trait TransactionalStore {
    /// Runs `body` against a consistent snapshot. Nothing is written.
    fn read_snapshot<T, F>(&mut self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn PresetStore) -> StoreResult<T>;

    /// Runs `body` as the only writer. Commits if `body` succeeds, rolls
    /// back otherwise.
    fn write_transaction<T, F>(&mut self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn PresetStore) -> StoreResult<T>;
}

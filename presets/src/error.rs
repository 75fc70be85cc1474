use std::time::Duration;

use crate::model::{PresetId, PresetKind, Sector, Timestamp};

/// Preset store failures. Fatal for a control tick, surfaced to reporting callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },

    #[error("unknown preset {0}")]
    UnknownPreset(PresetId),

    #[error("preset {preset_id} is a {actual} preset, not {expected}")]
    KindMismatch {
        preset_id: PresetId,
        expected: PresetKind,
        actual: PresetKind,
    },

    #[error("rejected preset {preset_id}: {reason}")]
    InvalidPreset { preset_id: PresetId, reason: String },

    #[error("write at {at} predates the current version starting at {current}")]
    OutOfOrder { at: Timestamp, current: Timestamp },

    #[error("tick deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum ReconstructError {
    #[error("empty range: start {start} is not before end {end}")]
    EmptyRange { start: Timestamp, end: Timestamp },

    #[error("range {start}..{end} is longer than {max_secs}s")]
    RangeTooLong { start: Timestamp, end: Timestamp, max_secs: Timestamp },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("no fresh probe reading within {stale_secs}s")]
    NoFreshReadings { stale_secs: u64 },

    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("{sector} relay: {message}")]
    Relay { sector: Sector, message: String },
}

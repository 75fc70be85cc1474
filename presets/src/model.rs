//! Preset, activation and audit record types.
//!
//! Every preset version and every activation carries a half-open window
//! `[from, to)`; `to == None` means the row is still current. Edits close
//! the old row and append a new one, so past configurations stay readable.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix time in seconds.
pub type Timestamp = i64;

/// Whole degrees, as reported by the probes and stored in presets.
pub type Temperature = i32;

pub const SECONDS_PER_DAY: u32 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetId(pub i64);

impl PresetId {
    /// Activating or referencing this id switches the appliance off.
    pub const OFF: PresetId = PresetId(0);

    pub fn is_off(self) -> bool {
        self == PresetId::OFF
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Atomic,
    Day,
    Week,
}

impl PresetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PresetKind::Atomic => "atomic",
            PresetKind::Day => "day",
            PresetKind::Week => "week",
        }
    }

    pub fn parse(s: &str) -> Option<PresetKind> {
        match s {
            "atomic" => Some(PresetKind::Atomic),
            "day" => Some(PresetKind::Day),
            "week" => Some(PresetKind::Week),
            _ => None,
        }
    }
}

impl fmt::Display for PresetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    Core,
    Oven,
}

impl Sector {
    pub const ALL: [Sector; 2] = [Sector::Core, Sector::Oven];

    pub fn as_str(self) -> &'static str {
        match self {
            Sector::Core => "core",
            Sector::Oven => "oven",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hysteresis band for one sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Band {
    pub high: Temperature,
    pub low: Temperature,
}

impl Band {
    pub fn new(low: Temperature, high: Temperature) -> Band {
        Band { high, low }
    }

    pub fn is_well_formed(&self) -> bool {
        self.high > self.low
    }
}

/// The concrete bands of an atomic preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomicBand {
    pub core: Band,
    pub oven: Band,
}

impl AtomicBand {
    pub fn sector(&self, sector: Sector) -> Band {
        match sector {
            Sector::Core => self.core,
            Sector::Oven => self.oven,
        }
    }

    /// Both bands well formed and the core band entirely above the oven band.
    pub fn is_consistent(&self) -> bool {
        self.core.is_well_formed() && self.oven.is_well_formed() && self.core.low >= self.oven.high
    }
}

/// Half-open time range `[start, end)`, never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Option<TimeRange> {
        (start < end).then_some(TimeRange { start, end })
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        TimeRange::new(self.start.max(other.start), self.end.min(other.end))
    }
}

/// Validity or activation window; `to == None` is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validity {
    pub from: Timestamp,
    pub to: Option<Timestamp>,
}

impl Validity {
    pub fn contains(&self, t: Timestamp) -> bool {
        self.from <= t && self.to.map_or(true, |to| to > t)
    }

    /// The part of `range` this window covers.
    pub fn clip(&self, range: &TimeRange) -> Option<TimeRange> {
        let end = match self.to {
            Some(to) => to.min(range.end),
            None => range.end,
        };
        TimeRange::new(self.from.max(range.start), end)
    }
}

/// One chunk of a day preset, in local wall-clock seconds of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayChunk {
    pub start: u32,
    pub end: u32,
    pub preset_id: PresetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPreset {
    pub chunks: Vec<DayChunk>,
}

impl DayPreset {
    /// Builds the chunk list from the boundaries between chunks, the way
    /// day presets are authored: `presets[i]` runs until `cuts[i]`.
    pub fn from_cuts(cuts: &[u32], presets: &[PresetId]) -> DayPreset {
        let mut chunks = Vec::with_capacity(presets.len());
        let mut start = 0;
        for (i, &preset_id) in presets.iter().enumerate() {
            let end = cuts.get(i).copied().unwrap_or(SECONDS_PER_DAY);
            chunks.push(DayChunk {
                start,
                end,
                preset_id,
            });
            start = end;
        }
        DayPreset { chunks }
    }

    /// Chunks start at 0, each starts where the previous ended, the last
    /// ends at midnight and none is empty.
    pub fn is_partition(&self) -> bool {
        let mut expected = 0;
        for chunk in &self.chunks {
            if chunk.start != expected || chunk.end <= chunk.start {
                return false;
            }
            expected = chunk.end;
        }
        expected == SECONDS_PER_DAY
    }
}

/// Preset ids for Monday through Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekPreset {
    pub days: [PresetId; 7],
}

impl WeekPreset {
    pub fn preset_for(&self, weekday: Weekday) -> PresetId {
        self.days[weekday.num_days_from_monday() as usize]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetBody {
    Atomic(AtomicBand),
    Day(DayPreset),
    Week(WeekPreset),
}

impl PresetBody {
    pub fn kind(&self) -> PresetKind {
        match self {
            PresetBody::Atomic(_) => PresetKind::Atomic,
            PresetBody::Day(_) => PresetKind::Day,
            PresetBody::Week(_) => PresetKind::Week,
        }
    }
}

/// One version of a preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRow {
    pub preset_id: PresetId,
    pub validity: Validity,
    pub body: PresetBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Activation {
    pub preset_id: PresetId,
    pub active_from: Timestamp,
    pub active_to: Option<Timestamp>,
}

impl Activation {
    pub fn window(&self) -> Validity {
        Validity {
            from: self.active_from,
            to: self.active_to,
        }
    }
}

/// One control tick: what the probes read and what the relays were told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemperatureRecord {
    pub time: Timestamp,
    pub core: Option<Temperature>,
    pub oven: Option<Temperature>,
    pub core_on: bool,
    pub oven_on: bool,
}

impl TemperatureRecord {
    pub fn is_on(&self, sector: Sector) -> bool {
        match sector {
            Sector::Core => self.core_on,
            Sector::Oven => self.oven_on,
        }
    }
}

/// A stretch of history with a single effective band; `None` while the
/// appliance was off or its configuration could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BandInterval {
    pub start: Timestamp,
    pub end: Timestamp,
    pub band: Option<AtomicBand>,
}

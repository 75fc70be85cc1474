//! Point-in-time resolution of the preset hierarchy.
//!
//! Every level is looked up at the same instant `t`, so a week preset and
//! the day preset it points to are each read in whatever version was valid
//! at `t`, independently of when the activation started.

use std::fmt;

use tracing::debug;

use crate::clock::LocalCalendar;
use crate::error::StoreResult;
use crate::model::{AtomicBand, DayPreset, PresetBody, PresetId, PresetKind, TimeRange, Timestamp};
use crate::store::PresetStore;

pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing active, or the walk reached preset 0.
    Disabled,
    Band { preset_id: PresetId, band: AtomicBand },
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn band(&self) -> Option<AtomicBand> {
        match self {
            Resolution::Band { band, .. } => Some(*band),
            Resolution::Disabled | Resolution::Unresolved(_) => None,
        }
    }
}

/// Why a walk ended without a band. These are data problems, not store
/// failures: the caller treats them as "no band".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    UnknownPreset(PresetId),
    NoValidVersion { preset_id: PresetId, kind: PresetKind },
    MalformedDay(PresetId),
    /// The local day of `t` cannot be laid out, at the edge of the calendar.
    OutsideCalendar { preset_id: PresetId, t: Timestamp },
    TooDeep { preset_id: PresetId, depth: usize },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::UnknownPreset(id) => write!(f, "preset {} does not exist", id),
            UnresolvedReason::NoValidVersion { preset_id, kind } => {
                write!(f, "{} preset {} has no version valid at that time", kind, preset_id)
            }
            UnresolvedReason::MalformedDay(id) => {
                write!(f, "day preset {} does not partition the day", id)
            }
            UnresolvedReason::OutsideCalendar { preset_id, t } => {
                write!(f, "day preset {} cannot be laid out around {}", preset_id, t)
            }
            UnresolvedReason::TooDeep { preset_id, depth } => {
                write!(f, "gave up at preset {} after {} levels", preset_id, depth)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    calendar: LocalCalendar,
    max_depth: usize,
}

impl Resolver {
    pub fn new(calendar: LocalCalendar, max_depth: usize) -> Resolver {
        Resolver { calendar, max_depth }
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolves `t` against the activation that is current now.
    pub fn resolve(&self, store: &dyn PresetStore, t: Timestamp) -> StoreResult<Resolution> {
        match store.current_activation()? {
            Some(activation) => self.resolve_preset(store, activation.preset_id, t),
            None => Ok(Resolution::Disabled),
        }
    }

    /// Resolves `t` against the activation that covered `t`.
    pub fn resolve_historical(
        &self,
        store: &dyn PresetStore,
        t: Timestamp,
    ) -> StoreResult<Resolution> {
        let instant = TimeRange {
            start: t,
            end: t.saturating_add(1),
        };
        match store.activations_overlapping(instant)?.first() {
            Some(activation) => self.resolve_preset(store, activation.preset_id, t),
            None => Ok(Resolution::Disabled),
        }
    }

    /// Walks from `preset_id` down to an atomic band valid at `t`.
    pub fn resolve_preset(
        &self,
        store: &dyn PresetStore,
        preset_id: PresetId,
        t: Timestamp,
    ) -> StoreResult<Resolution> {
        let mut id = preset_id;
        for _ in 0..self.max_depth {
            if id.is_off() {
                return Ok(Resolution::Disabled);
            }
            let Some(kind) = store.preset_kind(id)? else {
                return Ok(Resolution::Unresolved(UnresolvedReason::UnknownPreset(id)));
            };
            let Some(row) = store.valid_row_at(kind, id, t)? else {
                return Ok(Resolution::Unresolved(UnresolvedReason::NoValidVersion {
                    preset_id: id,
                    kind,
                }));
            };
            let next = match &row.body {
                PresetBody::Atomic(band) => {
                    return Ok(Resolution::Band {
                        preset_id: id,
                        band: *band,
                    })
                }
                PresetBody::Week(week) => week.preset_for(self.calendar.weekday(t)),
                PresetBody::Day(day) => {
                    if !day.is_partition() {
                        return Ok(Resolution::Unresolved(UnresolvedReason::MalformedDay(id)));
                    }
                    match self.chunk_preset(day, t) {
                        Some(chunk_preset) => chunk_preset,
                        None => {
                            return Ok(Resolution::Unresolved(UnresolvedReason::OutsideCalendar {
                                preset_id: id,
                                t,
                            }))
                        }
                    }
                }
            };
            debug!(from = %id, to = %next, t, "following preset reference");
            id = next;
        }
        Ok(Resolution::Unresolved(UnresolvedReason::TooDeep {
            preset_id: id,
            depth: self.max_depth,
        }))
    }

    /// The chunk whose instants on the local day of `t` contain `t`.
    fn chunk_preset(&self, day: &DayPreset, t: Timestamp) -> Option<PresetId> {
        let date = self.calendar.local_date(t);
        day.chunks
            .iter()
            .find(|chunk| {
                self.calendar
                    .span(date, chunk.start, chunk.end)
                    .is_some_and(|span| span.contains(t))
            })
            .map(|chunk| chunk.preset_id)
    }
}

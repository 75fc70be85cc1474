//! Reconstruction of the bands in effect over a window of history.
//!
//! Activations are expanded level by level: a week span is split at local
//! midnights, a day span at its chunk boundaries, each piece clipped by the
//! version of the preset that produced it. Atomic spans end the walk. The
//! resulting pieces are laid out on the window, gaps are filled with `None`
//! and neighbours with equal bands are merged.

use chrono::Datelike;
use tracing::{debug, warn};

use crate::clock::LocalCalendar;
use crate::error::{ReconstructError, StoreResult};
use crate::model::{AtomicBand, BandInterval, PresetBody, PresetId, TimeRange, Timestamp};
use crate::resolver::Resolver;
use crate::store::{PresetStore, TransactionalStore};

/// Longest window a reconstruction covers, four years.
pub const MAX_WINDOW_SECS: Timestamp = 4 * 366 * 86_400;

/// A stretch of time governed by one preset id, not yet resolved.
#[derive(Debug, Clone, Copy)]
struct Span {
    range: TimeRange,
    preset_id: PresetId,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconstructor {
    calendar: LocalCalendar,
    max_depth: usize,
}

impl Reconstructor {
    pub fn new(calendar: LocalCalendar, max_depth: usize) -> Reconstructor {
        Reconstructor { calendar, max_depth }
    }

    /// Checks that `[start, end)` is a window reconstruction accepts.
    pub fn window(start: Timestamp, end: Timestamp) -> Result<TimeRange, ReconstructError> {
        let range = TimeRange::new(start, end).ok_or(ReconstructError::EmptyRange { start, end })?;
        if end.checked_sub(start).map_or(true, |len| len > MAX_WINDOW_SECS) {
            return Err(ReconstructError::RangeTooLong {
                start,
                end,
                max_secs: MAX_WINDOW_SECS,
            });
        }
        Ok(range)
    }

    /// Intervals covering `[start, end)` exactly, sorted, with no two
    /// neighbours carrying the same band.
    pub fn reconstruct(
        &self,
        store: &dyn PresetStore,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<BandInterval>, ReconstructError> {
        let range = Self::window(start, end)?;
        Ok(self.reconstruct_range(store, range)?)
    }

    /// Same as [`Reconstructor::reconstruct`], read from one snapshot.
    pub fn reconstruct_snapshot<D: TransactionalStore>(
        &self,
        db: &mut D,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<BandInterval>, ReconstructError> {
        let range = Self::window(start, end)?;
        Ok(db.read_snapshot(|store| self.reconstruct_range(store, range))?)
    }

    /// Intervals covering `range`. The caller bounds `range`, see
    /// [`Reconstructor::window`].
    pub fn reconstruct_range(
        &self,
        store: &dyn PresetStore,
        range: TimeRange,
    ) -> StoreResult<Vec<BandInterval>> {
        let mut pending: Vec<Span> = store
            .activations_overlapping(range)?
            .into_iter()
            .filter(|activation| !activation.preset_id.is_off())
            .filter_map(|activation| {
                activation.window().clip(&range).map(|range| Span {
                    range,
                    preset_id: activation.preset_id,
                })
            })
            .collect();

        let mut resolved = Vec::new();
        for _ in 0..self.max_depth {
            if pending.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for span in pending {
                self.expand(store, span, &mut next, &mut resolved)?;
            }
            pending = next;
        }
        for span in &pending {
            warn!(
                preset_id = %span.preset_id,
                start = span.range.start,
                end = span.range.end,
                depth = self.max_depth,
                "preset nesting too deep, reporting no band"
            );
        }

        Ok(lay_out(range, resolved))
    }

    /// Replaces one span by the spans of the presets it refers to, or by
    /// resolved bands once it reaches an atomic preset.
    fn expand(
        &self,
        store: &dyn PresetStore,
        span: Span,
        next: &mut Vec<Span>,
        resolved: &mut Vec<(TimeRange, AtomicBand)>,
    ) -> StoreResult<()> {
        if span.preset_id.is_off() {
            return Ok(());
        }
        let Some(kind) = store.preset_kind(span.preset_id)? else {
            warn!(preset_id = %span.preset_id, "unknown preset referenced, reporting no band");
            return Ok(());
        };
        let rows = store.rows_overlapping(kind, span.preset_id, span.range)?;
        if rows.is_empty() {
            debug!(preset_id = %span.preset_id, %kind, "no version covers span");
        }
        for row in rows {
            let Some(clipped) = row.validity.clip(&span.range) else {
                continue;
            };
            match &row.body {
                PresetBody::Atomic(band) => resolved.push((clipped, *band)),
                PresetBody::Week(week) => {
                    for date in self.calendar.dates_covering(&clipped) {
                        let piece = self
                            .calendar
                            .day_range(date)
                            .and_then(|range| range.intersect(&clipped));
                        if let Some(range) = piece {
                            next.push(Span {
                                range,
                                preset_id: week.preset_for(date.weekday()),
                            });
                        }
                    }
                }
                PresetBody::Day(day) => {
                    if !day.is_partition() {
                        warn!(
                            preset_id = %span.preset_id,
                            "malformed day preset, reporting no band"
                        );
                        continue;
                    }
                    for date in self.calendar.dates_covering(&clipped) {
                        for chunk in &day.chunks {
                            let piece = self
                                .calendar
                                .span(date, chunk.start, chunk.end)
                                .and_then(|range| range.intersect(&clipped));
                            if let Some(range) = piece {
                                next.push(Span {
                                    range,
                                    preset_id: chunk.preset_id,
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl From<&Resolver> for Reconstructor {
    fn from(resolver: &Resolver) -> Reconstructor {
        Reconstructor::new(*resolver.calendar(), resolver.max_depth())
    }
}

/// Places resolved pieces on `range` in start order. Where pieces overlap
/// the earlier one wins; uncovered time becomes a `None` interval.
fn lay_out(range: TimeRange, mut resolved: Vec<(TimeRange, AtomicBand)>) -> Vec<BandInterval> {
    resolved.sort_by_key(|(piece, _)| (piece.start, piece.end));

    let mut out: Vec<BandInterval> = Vec::new();
    let mut cursor = range.start;
    for (piece, band) in resolved {
        let start = piece.start.max(cursor);
        if start >= piece.end {
            continue;
        }
        if start > cursor {
            push_merged(&mut out, cursor, start, None);
        }
        push_merged(&mut out, start, piece.end, Some(band));
        cursor = piece.end;
    }
    if cursor < range.end {
        push_merged(&mut out, cursor, range.end, None);
    }
    out
}

fn push_merged(
    out: &mut Vec<BandInterval>,
    start: Timestamp,
    end: Timestamp,
    band: Option<AtomicBand>,
) {
    if let Some(last) = out.last_mut() {
        if last.end == start && last.band == band {
            last.end = end;
            return;
        }
    }
    out.push(BandInterval { start, end, band });
}

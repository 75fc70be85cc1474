//! SQLite-backed preset store.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use super::{schema, PresetStore, TransactionalStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    Activation, AtomicBand, Band, DayChunk, DayPreset, PresetBody, PresetId, PresetKind, PresetRow,
    TemperatureRecord, TimeRange, Timestamp, Validity, WeekPreset,
};

const ATOMIC_COLUMNS: &str = "core_high, core_low, oven_high, oven_low, valid_from, valid_to";
const WEEK_COLUMNS: &str = "monday_preset_id, tuesday_preset_id, wednesday_preset_id,
     thursday_preset_id, friday_preset_id, saturday_preset_id, sunday_preset_id,
     valid_from, valid_to";
const DAY_COLUMNS: &str = "chunk_start, chunk_end, chunk_preset_id, valid_from, valid_to";

const VALID_AT: &str =
    "preset_id = ?1 AND valid_from <= ?2 AND (valid_to IS NULL OR valid_to > ?2)";
const OVERLAPPING: &str =
    "preset_id = ?1 AND valid_from < ?3 AND (valid_to IS NULL OR valid_to > ?2)";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (and if needed creates) a database file. Waits at most
    /// `busy_timeout` for another writer.
    pub fn open(path: &Path, busy_timeout: Duration) -> StoreResult<SqliteStore> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&conn)?;
        info!(path = %path.display(), journal_mode = %mode, "opened preset store");
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> StoreResult<SqliteStore> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn create_preset(&mut self, kind: PresetKind) -> StoreResult<PresetId> {
        self.conn
            .execute("INSERT INTO preset_ids (kind) VALUES (?1)", params![kind.as_str()])?;
        let id = PresetId(self.conn.last_insert_rowid());
        debug!(preset_id = %id, %kind, "created preset");
        Ok(id)
    }

    /// Makes `band` the definition of `preset_id` from `at` on.
    pub fn put_atomic(
        &mut self,
        preset_id: PresetId,
        band: AtomicBand,
        at: Timestamp,
    ) -> StoreResult<()> {
        if !band.is_consistent() {
            return Err(StoreError::InvalidPreset {
                preset_id,
                reason: format!("inconsistent bands {:?}", band),
            });
        }
        let tx = self.conn.transaction()?;
        close_version(&tx, "atomic_presets", PresetKind::Atomic, preset_id, at)?;
        tx.execute(
            &format!(
                "INSERT INTO atomic_presets (preset_id, {ATOMIC_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)"
            ),
            params![
                preset_id.0,
                band.core.high,
                band.core.low,
                band.oven.high,
                band.oven.low,
                at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn put_day(
        &mut self,
        preset_id: PresetId,
        day: &DayPreset,
        at: Timestamp,
    ) -> StoreResult<()> {
        if !day.is_partition() {
            return Err(StoreError::InvalidPreset {
                preset_id,
                reason: "chunks do not partition the day".to_owned(),
            });
        }
        let tx = self.conn.transaction()?;
        close_version(&tx, "day_preset_chunks", PresetKind::Day, preset_id, at)?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO day_preset_chunks (preset_id, {DAY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)"
            ))?;
            for chunk in &day.chunks {
                insert.execute(params![
                    preset_id.0,
                    chunk.start,
                    chunk.end,
                    chunk.preset_id.0,
                    at
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn put_week(
        &mut self,
        preset_id: PresetId,
        week: &WeekPreset,
        at: Timestamp,
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        close_version(&tx, "week_presets", PresetKind::Week, preset_id, at)?;
        let d = week.days.map(|id| id.0);
        tx.execute(
            &format!(
                "INSERT INTO week_presets (preset_id, {WEEK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)"
            ),
            params![preset_id.0, d[0], d[1], d[2], d[3], d[4], d[5], d[6], at],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Ends the current activation at `at` and, unless `preset_id` is
    /// [`PresetId::OFF`], starts a new one.
    pub fn activate(&mut self, preset_id: PresetId, at: Timestamp) -> StoreResult<()> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !preset_id.is_off() && tx.preset_kind(preset_id)?.is_none() {
            return Err(StoreError::UnknownPreset(preset_id));
        }
        if let Some(current) = tx.current_activation()? {
            if current.active_from > at {
                return Err(StoreError::OutOfOrder {
                    at,
                    current: current.active_from,
                });
            }
        }
        tx.execute(
            "UPDATE preset_history SET active_to = ?1 WHERE active_to IS NULL",
            params![at],
        )?;
        if !preset_id.is_off() {
            tx.execute(
                "INSERT INTO preset_history (preset_id, active_from, active_to)
                 VALUES (?1, ?2, NULL)",
                params![preset_id.0, at],
            )?;
        }
        tx.commit()?;
        info!(preset_id = %preset_id, at, "activated preset");
        Ok(())
    }
}

impl TransactionalStore for SqliteStore {
    fn read_snapshot<T, F>(&mut self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn PresetStore) -> StoreResult<T>,
    {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let conn: &Connection = &tx;
        let out = body(conn)?;
        tx.commit()?;
        Ok(out)
    }

    fn write_transaction<T, F>(&mut self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn PresetStore) -> StoreResult<T>,
    {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let conn: &Connection = &tx;
        let out = body(conn)?;
        tx.commit()?;
        Ok(out)
    }
}

impl PresetStore for Connection {
    fn current_activation(&self) -> StoreResult<Option<Activation>> {
        Ok(self
            .query_row(
                "SELECT preset_id, active_from, active_to FROM preset_history
                 WHERE active_to IS NULL
                 ORDER BY active_from DESC LIMIT 1",
                [],
                activation_from_row,
            )
            .optional()?)
    }

    fn activations_overlapping(&self, range: TimeRange) -> StoreResult<Vec<Activation>> {
        let mut stmt = self.prepare(
            "SELECT preset_id, active_from, active_to FROM preset_history
             WHERE active_from < ?2 AND (active_to IS NULL OR active_to > ?1)
             ORDER BY active_from, rowid",
        )?;
        let rows = stmt.query_map(params![range.start, range.end], activation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn preset_kind(&self, preset_id: PresetId) -> StoreResult<Option<PresetKind>> {
        let kind: Option<String> = self
            .query_row(
                "SELECT kind FROM preset_ids WHERE preset_id = ?1",
                params![preset_id.0],
                |row| row.get(0),
            )
            .optional()?;
        match kind {
            None => Ok(None),
            Some(kind) => PresetKind::parse(&kind).map(Some).ok_or_else(|| StoreError::CorruptRow {
                table: "preset_ids",
                detail: format!("preset {} has unknown kind {:?}", preset_id, kind),
            }),
        }
    }

    fn valid_row_at(
        &self,
        kind: PresetKind,
        preset_id: PresetId,
        t: Timestamp,
    ) -> StoreResult<Option<PresetRow>> {
        let rows = match kind {
            PresetKind::Atomic => query_atomic(self, VALID_AT, params![preset_id.0, t], preset_id)?,
            PresetKind::Week => query_week(self, VALID_AT, params![preset_id.0, t], preset_id)?,
            PresetKind::Day => query_day(self, VALID_AT, params![preset_id.0, t], preset_id)?,
        };
        Ok(rows.into_iter().next())
    }

    fn rows_overlapping(
        &self,
        kind: PresetKind,
        preset_id: PresetId,
        range: TimeRange,
    ) -> StoreResult<Vec<PresetRow>> {
        let (id, start, end) = (preset_id.0, range.start, range.end);
        match kind {
            PresetKind::Atomic => {
                query_atomic(self, OVERLAPPING, params![id, start, end], preset_id)
            }
            PresetKind::Week => query_week(self, OVERLAPPING, params![id, start, end], preset_id),
            PresetKind::Day => query_day(self, OVERLAPPING, params![id, start, end], preset_id),
        }
    }

    fn last_temperature_record(&self) -> StoreResult<Option<TemperatureRecord>> {
        Ok(self
            .query_row(
                "SELECT time, core, oven, core_on, oven_on FROM temperatures
                 ORDER BY time DESC, rowid DESC LIMIT 1",
                [],
                record_from_row,
            )
            .optional()?)
    }

    fn append_temperature_record(&self, record: &TemperatureRecord) -> StoreResult<()> {
        self.execute(
            "INSERT INTO temperatures (time, core, oven, core_on, oven_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.time, record.core, record.oven, record.core_on, record.oven_on],
        )?;
        Ok(())
    }

    fn temperatures_between(&self, range: TimeRange) -> StoreResult<Vec<TemperatureRecord>> {
        let mut stmt = self.prepare(
            "SELECT time, core, oven, core_on, oven_on FROM temperatures
             WHERE time >= ?1 AND time < ?2
             ORDER BY time, rowid",
        )?;
        let rows = stmt.query_map(params![range.start, range.end], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn activation_from_row(row: &Row<'_>) -> rusqlite::Result<Activation> {
    Ok(Activation {
        preset_id: PresetId(row.get(0)?),
        active_from: row.get(1)?,
        active_to: row.get(2)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TemperatureRecord> {
    Ok(TemperatureRecord {
        time: row.get(0)?,
        core: row.get(1)?,
        oven: row.get(2)?,
        core_on: row.get(3)?,
        oven_on: row.get(4)?,
    })
}

fn query_atomic(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
    preset_id: PresetId,
) -> StoreResult<Vec<PresetRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATOMIC_COLUMNS} FROM atomic_presets WHERE {filter} ORDER BY valid_from, rowid"
    ))?;
    let rows = stmt.query_map(args, |row| {
        Ok(PresetRow {
            preset_id,
            validity: Validity {
                from: row.get(4)?,
                to: row.get(5)?,
            },
            body: PresetBody::Atomic(AtomicBand {
                core: Band {
                    high: row.get(0)?,
                    low: row.get(1)?,
                },
                oven: Band {
                    high: row.get(2)?,
                    low: row.get(3)?,
                },
            }),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn query_week(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
    preset_id: PresetId,
) -> StoreResult<Vec<PresetRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WEEK_COLUMNS} FROM week_presets WHERE {filter} ORDER BY valid_from, rowid"
    ))?;
    let rows = stmt.query_map(args, |row| {
        let mut days = [PresetId::OFF; 7];
        for (i, day) in days.iter_mut().enumerate() {
            *day = PresetId(row.get(i)?);
        }
        Ok(PresetRow {
            preset_id,
            validity: Validity {
                from: row.get(7)?,
                to: row.get(8)?,
            },
            body: PresetBody::Week(WeekPreset { days }),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// A day version is the set of chunk rows sharing one validity window.
fn query_day(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
    preset_id: PresetId,
) -> StoreResult<Vec<PresetRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DAY_COLUMNS} FROM day_preset_chunks WHERE {filter}
         ORDER BY valid_from, valid_to, chunk_start"
    ))?;
    let rows = stmt.query_map(args, |row| {
        Ok((
            Validity {
                from: row.get(3)?,
                to: row.get(4)?,
            },
            DayChunk {
                start: row.get(0)?,
                end: row.get(1)?,
                preset_id: PresetId(row.get(2)?),
            },
        ))
    })?;

    let mut versions: Vec<PresetRow> = Vec::new();
    for row in rows {
        let (validity, chunk) = row?;
        let same_version = matches!(versions.last(), Some(last) if last.validity == validity);
        if same_version {
            if let Some(PresetRow {
                body: PresetBody::Day(day),
                ..
            }) = versions.last_mut()
            {
                day.chunks.push(chunk);
            }
        } else {
            versions.push(PresetRow {
                preset_id,
                validity,
                body: PresetBody::Day(DayPreset { chunks: vec![chunk] }),
            });
        }
    }
    Ok(versions)
}

/// Checks the kind tag, then ends the open version of `preset_id` at `at`.
fn close_version(
    conn: &Connection,
    table: &str,
    kind: PresetKind,
    preset_id: PresetId,
    at: Timestamp,
) -> StoreResult<()> {
    match conn.preset_kind(preset_id)? {
        None => return Err(StoreError::UnknownPreset(preset_id)),
        Some(actual) if actual != kind => {
            return Err(StoreError::KindMismatch {
                preset_id,
                expected: kind,
                actual,
            })
        }
        Some(_) => {}
    }
    let current: Option<Timestamp> = conn
        .query_row(
            &format!(
                "SELECT MAX(valid_from) FROM {table} WHERE preset_id = ?1 AND valid_to IS NULL"
            ),
            params![preset_id.0],
            |row| row.get::<_, Option<Timestamp>>(0),
        )
        .optional()?
        .flatten();
    if let Some(current) = current {
        if current > at {
            return Err(StoreError::OutOfOrder { at, current });
        }
    }
    conn.execute(
        &format!("UPDATE {table} SET valid_to = ?2 WHERE preset_id = ?1 AND valid_to IS NULL"),
        params![preset_id.0, at],
    )?;
    Ok(())
}

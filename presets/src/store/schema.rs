//! Table layout, versioned with `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreResult;

pub const SCHEMA_VERSION: u32 = 1;

const V1: &str = "
    CREATE TABLE IF NOT EXISTS preset_ids (
        preset_id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind      TEXT NOT NULL CHECK (kind IN ('atomic', 'day', 'week'))
    );

    CREATE TABLE IF NOT EXISTS atomic_presets (
        preset_id  INTEGER NOT NULL REFERENCES preset_ids(preset_id),
        core_high  INTEGER NOT NULL,
        core_low   INTEGER NOT NULL,
        oven_high  INTEGER NOT NULL,
        oven_low   INTEGER NOT NULL,
        valid_from INTEGER NOT NULL,
        valid_to   INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_atomic_presets_valid
        ON atomic_presets(preset_id, valid_from);

    CREATE TABLE IF NOT EXISTS day_preset_chunks (
        preset_id       INTEGER NOT NULL REFERENCES preset_ids(preset_id),
        chunk_start     INTEGER NOT NULL,
        chunk_end       INTEGER NOT NULL,
        chunk_preset_id INTEGER NOT NULL,
        valid_from      INTEGER NOT NULL,
        valid_to        INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_day_preset_chunks_valid
        ON day_preset_chunks(preset_id, valid_from);

    CREATE TABLE IF NOT EXISTS week_presets (
        preset_id           INTEGER NOT NULL REFERENCES preset_ids(preset_id),
        monday_preset_id    INTEGER NOT NULL,
        tuesday_preset_id   INTEGER NOT NULL,
        wednesday_preset_id INTEGER NOT NULL,
        thursday_preset_id  INTEGER NOT NULL,
        friday_preset_id    INTEGER NOT NULL,
        saturday_preset_id  INTEGER NOT NULL,
        sunday_preset_id    INTEGER NOT NULL,
        valid_from          INTEGER NOT NULL,
        valid_to            INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_week_presets_valid
        ON week_presets(preset_id, valid_from);

    CREATE TABLE IF NOT EXISTS preset_history (
        preset_id   INTEGER NOT NULL,
        active_from INTEGER NOT NULL,
        active_to   INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_preset_history_from
        ON preset_history(active_from);

    CREATE TABLE IF NOT EXISTS temperatures (
        time    INTEGER NOT NULL,
        core    INTEGER,
        oven    INTEGER,
        core_on INTEGER NOT NULL,
        oven_on INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_temperatures_time
        ON temperatures(time);
";

pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Brings the schema up to [`SCHEMA_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    let version = current_version(conn)?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute_batch(V1)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    info!(from = version, to = SCHEMA_VERSION, "migrated preset store schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() -> StoreResult<()> {
        let conn = Connection::open_in_memory()?;
        assert_eq!(current_version(&conn)?, 0);
        migrate(&conn)?;
        migrate(&conn)?;
        assert_eq!(current_version(&conn)?, SCHEMA_VERSION);
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                ('preset_ids', 'atomic_presets', 'day_preset_chunks', 'week_presets',
                 'preset_history', 'temperatures')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 6);
        Ok(())
    }
}

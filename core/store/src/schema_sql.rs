use astra_types::SchemaName;
use rusqlite::Connection;

use crate::error::to_core;
use astra_types::CoreResult;

/// Create the per-schema record tables and the shared index table, plus
/// their composite indices, if they don't already exist. Table names are
/// produced only from [`SchemaName::table_name`], never from user input.
pub fn ensure_schema(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(to_core)?;

    for schema in SchemaName::ALL {
        let table = schema.table_name();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                cid TEXT PRIMARY KEY,
                peer_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                bytes BLOB NOT NULL,
                signature BLOB,
                created_at INTEGER NOT NULL
            );"
        );
        conn.execute_batch(&ddl).map_err(to_core)?;
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS record_index (
            schema TEXT NOT NULL,
            cid TEXT NOT NULL,
            norad_cat_id INTEGER,
            entity_id TEXT,
            epoch_unix INTEGER,
            epoch_day TEXT,
            source_timestamp INTEGER NOT NULL,
            PRIMARY KEY (schema, cid)
        );
        CREATE INDEX IF NOT EXISTS idx_record_index_day
            ON record_index(schema, epoch_day, norad_cat_id, entity_id, source_timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_record_index_norad
            ON record_index(schema, norad_cat_id, source_timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_record_index_entity
            ON record_index(schema, entity_id, source_timestamp DESC);
        ",
    )
    .map_err(to_core)?;

    Ok(())
}

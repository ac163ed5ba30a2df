use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use astra_types::{CoreError, CoreResult, IndexEntry, PeerId, Record, SchemaName};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::StoreConfig;
use crate::error::to_core;
use crate::index;
use crate::schema_sql::ensure_schema;

/// Content-addressed, schema-partitioned local store, backed by a single
/// SQLite connection shared under a mutex. All mutating operations run
/// inside that mutex's critical section for the duration of their
/// transaction; reads share the same connection since SQLite in WAL mode
/// allows concurrent readers even while a writer holds the lock briefly.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    config: StoreConfig,
}

impl Store {
    pub fn init(config: StoreConfig) -> CoreResult<Self> {
        astra_utils::config::ensure_parent_dir(&config.db_path)?;
        let conn = Connection::open(&config.db_path).map_err(to_core)?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
    }

    /// Compute the content identifier for `bytes`: lower-case hex SHA-256.
    pub fn compute_cid(bytes: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(bytes))
    }

    pub async fn store(
        &self,
        schema: SchemaName,
        bytes: Vec<u8>,
        peer_id: PeerId,
        signature: Option<Vec<u8>>,
    ) -> CoreResult<String> {
        let cid = Self::compute_cid(&bytes);
        let now = now_unix();
        let table = schema.table_name();

        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {table}
                     (cid, peer_id, timestamp, bytes, signature, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![cid, peer_id.0, now, bytes, signature, now],
            )
            .map_err(to_core)?;

            let extracted = index::extract(schema, &bytes).unwrap_or_else(|err| {
                tracing::warn!(%err, %schema, cid = %cid, "index extraction failed, record stored without derived fields");
                index::ExtractedFields::default()
            });
            let epoch_day = extracted.epoch_unix.and_then(index::epoch_day);

            conn.execute(
                "INSERT INTO record_index
                 (schema, cid, norad_cat_id, entity_id, epoch_unix, epoch_day, source_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(schema, cid) DO UPDATE SET
                    norad_cat_id = excluded.norad_cat_id,
                    entity_id = excluded.entity_id,
                    epoch_unix = excluded.epoch_unix,
                    epoch_day = excluded.epoch_day,
                    source_timestamp = excluded.source_timestamp",
                params![
                    schema.as_str(),
                    cid,
                    extracted.norad_cat_id,
                    extracted.entity_id,
                    extracted.epoch_unix,
                    epoch_day,
                    now,
                ],
            )
            .map_err(to_core)?;

            Ok(cid.clone())
        })
        .await
    }

    pub async fn get(&self, schema: SchemaName, cid: String) -> CoreResult<Vec<u8>> {
        let table = schema.table_name();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT bytes FROM {table} WHERE cid = ?1"),
                params![cid],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_core)?
            .ok_or(CoreError::NotFound)
        })
        .await
    }

    pub async fn get_record(&self, schema: SchemaName, cid: String) -> CoreResult<Record> {
        let table = schema.table_name();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT cid, peer_id, timestamp, bytes, signature FROM {table} WHERE cid = ?1"
                ),
                params![cid],
                |row| {
                    Ok(Record {
                        cid: row.get(0)?,
                        schema,
                        peer_id: PeerId(row.get(1)?),
                        timestamp: row.get(2)?,
                        bytes: row.get(3)?,
                        signature: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(to_core)?
            .ok_or(CoreError::NotFound)
        })
        .await
    }

    /// Administrative linear scan. `where_clause` is appended verbatim to
    /// `WHERE`, but its placeholders are always bound through `args` --
    /// never string-concatenate caller-controlled values into it.
    pub async fn query(
        &self,
        schema: SchemaName,
        where_clause: String,
        args: Vec<rusqlite::types::Value>,
    ) -> CoreResult<Vec<Vec<u8>>> {
        let table = schema.table_name();
        self.with_conn(move |conn| {
            let sql = format!("SELECT bytes FROM {table} WHERE {where_clause}");
            let mut stmt = conn.prepare(&sql).map_err(to_core)?;
            let params = rusqlite::params_from_iter(args.iter());
            let rows = stmt
                .query_map(params, |row| row.get::<_, Vec<u8>>(0))
                .map_err(to_core)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(to_core)
        })
        .await
    }

    pub async fn query_by_index(
        &self,
        schema: SchemaName,
        day: Option<String>,
        norad_cat_id: Option<u32>,
        entity_id: Option<String>,
        limit: u32,
    ) -> CoreResult<Vec<Record>> {
        if let Some(day) = &day {
            if chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").is_err() {
                return Err(CoreError::Validation(format!("malformed day: {day}")));
            }
        }
        let limit = limit.clamp(1, self.config.max_query_limit);
        let table = schema.table_name();

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT r.cid, r.peer_id, r.timestamp, r.bytes, r.signature
                 FROM {table} r
                 JOIN record_index i ON i.schema = ?1 AND i.cid = r.cid
                 WHERE (?2 IS NULL OR i.epoch_day = ?2)
                   AND (?3 IS NULL OR i.norad_cat_id = ?3)
                   AND (?4 IS NULL OR i.entity_id = ?4)
                 ORDER BY COALESCE(i.epoch_unix, i.source_timestamp) DESC
                 LIMIT ?5"
            );
            let mut stmt = conn.prepare(&sql).map_err(to_core)?;
            let rows = stmt
                .query_map(
                    params![schema.as_str(), day, norad_cat_id, entity_id, limit],
                    |row| {
                        Ok(Record {
                            cid: row.get(0)?,
                            schema,
                            peer_id: PeerId(row.get(1)?),
                            timestamp: row.get(2)?,
                            bytes: row.get(3)?,
                            signature: row.get(4)?,
                        })
                    },
                )
                .map_err(to_core)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(to_core)
        })
        .await
    }

    pub async fn delete(&self, schema: SchemaName, cid: String) -> CoreResult<()> {
        let table = schema.table_name();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(to_core)?;
            let changed = tx
                .execute(&format!("DELETE FROM {table} WHERE cid = ?1"), params![cid])
                .map_err(to_core)?;
            if changed == 0 {
                return Err(CoreError::NotFound);
            }
            tx.execute(
                "DELETE FROM record_index WHERE schema = ?1 AND cid = ?2",
                params![schema.as_str(), cid],
            )
            .map_err(to_core)?;
            tx.commit().map_err(to_core)?;
            Ok(())
        })
        .await
    }

    pub async fn count(&self, schema: SchemaName) -> CoreResult<u64> {
        let table = schema.table_name();
        self.with_conn(move |conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(to_core)
        })
        .await
    }

    pub async fn garbage_collect(&self, max_age: Duration) -> CoreResult<u64> {
        let cutoff = now_unix() - max_age.as_secs() as i64;
        self.with_conn(move |conn| {
            let mut total = 0u64;
            let tx = conn.unchecked_transaction().map_err(to_core)?;
            for schema in SchemaName::ALL {
                let table = schema.table_name();
                let cids: Vec<String> = {
                    let mut stmt = tx
                        .prepare(&format!("SELECT cid FROM {table} WHERE timestamp < ?1"))
                        .map_err(to_core)?;
                    let rows = stmt
                        .query_map(params![cutoff], |row| row.get(0))
                        .map_err(to_core)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(to_core)?
                };
                for cid in &cids {
                    tx.execute(&format!("DELETE FROM {table} WHERE cid = ?1"), params![cid])
                        .map_err(to_core)?;
                    tx.execute(
                        "DELETE FROM record_index WHERE schema = ?1 AND cid = ?2",
                        params![schema.as_str(), cid],
                    )
                    .map_err(to_core)?;
                }
                total += cids.len() as u64;
            }
            tx.commit().map_err(to_core)?;
            Ok(total)
        })
        .await
    }

    /// Rescan every schema table and upsert an index row per record.
    /// Per-record extraction failures are skipped and counted separately,
    /// they never abort the rebuild. Serialized behind the same mutex as
    /// every writer, so it's always safe to run alongside other store
    /// operations.
    pub async fn rebuild_index(&self) -> CoreResult<HashMap<SchemaName, u64>> {
        self.with_conn(move |conn| {
            let mut counts = HashMap::new();
            let tx = conn.unchecked_transaction().map_err(to_core)?;
            for schema in SchemaName::ALL {
                let table = schema.table_name();
                let rows: Vec<(String, Vec<u8>, i64)> = {
                    let mut stmt = tx
                        .prepare(&format!("SELECT cid, bytes, timestamp FROM {table}"))
                        .map_err(to_core)?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                        .map_err(to_core)?;
                    rows.collect::<Result<Vec<_>, _>>().map_err(to_core)?
                };
                let mut indexed = 0u64;
                for (cid, bytes, timestamp) in rows {
                    let extracted = index::extract(schema, &bytes).unwrap_or_default();
                    let epoch_day = extracted.epoch_unix.and_then(index::epoch_day);
                    tx.execute(
                        "INSERT INTO record_index
                         (schema, cid, norad_cat_id, entity_id, epoch_unix, epoch_day, source_timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(schema, cid) DO UPDATE SET
                            norad_cat_id = excluded.norad_cat_id,
                            entity_id = excluded.entity_id,
                            epoch_unix = excluded.epoch_unix,
                            epoch_day = excluded.epoch_day,
                            source_timestamp = excluded.source_timestamp",
                        params![
                            schema.as_str(),
                            cid,
                            extracted.norad_cat_id,
                            extracted.entity_id,
                            extracted.epoch_unix,
                            epoch_day,
                            timestamp,
                        ],
                    )
                    .map_err(to_core)?;
                    indexed += 1;
                }
                counts.insert(schema, indexed);
            }
            tx.commit().map_err(to_core)?;
            Ok(counts)
        })
        .await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn default_query_limit(&self) -> u32 {
        self.config.default_query_limit
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::from("peer-test")
    }

    fn omm_bytes(norad: u32, epoch: &str) -> Vec<u8> {
        let mut bytes = SchemaName::Omm.file_identifier().to_vec();
        bytes.extend_from_slice(
            format!("NORAD_CAT_ID = {norad}\nOBJECT_ID = 1998-067A\nEPOCH = {epoch}\n").as_bytes(),
        );
        bytes
    }

    #[tokio::test]
    async fn s1_store_get_round_trip() {
        let store = Store::init(StoreConfig::test("s1")).unwrap();

        let bytes = vec![0x01, 0x02, 0x03];
        let cid = Store::compute_cid(&bytes);
        assert_eq!(cid, Store::compute_cid(&[0x01, 0x02, 0x03]));

        let mut framed = SchemaName::Omm.file_identifier().to_vec();
        framed.extend_from_slice(&bytes);
        let stored_cid = store
            .store(SchemaName::Omm, framed.clone(), peer(), None)
            .await
            .unwrap();
        assert_eq!(stored_cid, Store::compute_cid(&framed));

        let fetched = store.get(SchemaName::Omm, stored_cid.clone()).await.unwrap();
        assert_eq!(fetched, framed);
    }

    #[tokio::test]
    async fn duplicate_insert_is_idempotent() {
        let store = Store::init(StoreConfig::test("dup")).unwrap();
        let bytes = omm_bytes(1, "2024-01-15T00:00:00Z");
        store.store(SchemaName::Omm, bytes.clone(), peer(), None).await.unwrap();
        store.store(SchemaName::Omm, bytes.clone(), peer(), None).await.unwrap();
        assert_eq!(store.count(SchemaName::Omm).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn s2_index_rebuild_and_query() {
        let store = Store::init(StoreConfig::test("s2")).unwrap();

        store
            .store(
                SchemaName::Omm,
                omm_bytes(25544, "2024-01-15T00:00:00Z"),
                peer(),
                None,
            )
            .await
            .unwrap();
        store
            .store(
                SchemaName::Omm,
                omm_bytes(25544, "2024-01-15T06:00:00Z"),
                peer(),
                None,
            )
            .await
            .unwrap();
        store
            .store(
                SchemaName::Omm,
                omm_bytes(25544, "2024-01-16T00:00:00Z"),
                peer(),
                None,
            )
            .await
            .unwrap();

        let counts = store.rebuild_index().await.unwrap();
        assert_eq!(counts[&SchemaName::Omm], 3);

        let results = store
            .query_by_index(
                SchemaName::Omm,
                Some("2024-01-15".to_string()),
                Some(25544),
                None,
                10,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].bytes.windows(b"06:00:00".len()).any(|w| w == b"06:00:00"));
    }

    #[tokio::test]
    async fn delete_removes_record_and_index_row() {
        let store = Store::init(StoreConfig::test("delete")).unwrap();
        let cid = store
            .store(SchemaName::Omm, omm_bytes(1, "2024-01-15"), peer(), None)
            .await
            .unwrap();

        store.delete(SchemaName::Omm, cid.clone()).await.unwrap();
        assert!(matches!(
            store.get(SchemaName::Omm, cid.clone()).await,
            Err(CoreError::NotFound)
        ));

        let rows = store
            .query_by_index(SchemaName::Omm, None, Some(1), None, 10)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn rebuild_index_is_idempotent() {
        let store = Store::init(StoreConfig::test("rebuild-idem")).unwrap();
        store
            .store(SchemaName::Omm, omm_bytes(42, "2024-01-15"), peer(), None)
            .await
            .unwrap();

        let first = store.rebuild_index().await.unwrap();
        let second = store.rebuild_index().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rejects_malformed_day() {
        let store = Store::init(StoreConfig::test("malformed-day")).unwrap();
        let result = store
            .query_by_index(SchemaName::Omm, Some("not-a-day".to_string()), None, None, 10)
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}

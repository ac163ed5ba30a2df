use serde::{Deserialize, Serialize};

use crate::peer::PeerId;
use crate::schema::SchemaName;

/// The indivisible stored unit. `cid` is the lower-case hex SHA-256 of
/// `bytes` and is immutable once stored: a later insert of the same schema
/// and cid is only valid if `bytes` is byte-identical (a CID collision with
/// different bytes would mean SHA-256 collided, which we don't attempt to
/// handle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub cid: String,
    pub schema: SchemaName,
    pub peer_id: PeerId,
    pub timestamp: i64,
    pub bytes: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

/// Structured view computed from a record's bytes, kept for fast filtered
/// lookup. Every `Record` has exactly one `IndexEntry`; fields the per-schema
/// extractor couldn't find are left `None`, never block the record insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexEntry {
    pub schema: Option<SchemaName>,
    pub cid: String,
    pub norad_cat_id: Option<u32>,
    pub entity_id: Option<String>,
    pub epoch_unix: Option<i64>,
    pub epoch_day: Option<String>,
    pub source_timestamp: i64,
}

impl IndexEntry {
    pub fn empty(schema: SchemaName, cid: String, source_timestamp: i64) -> Self {
        Self {
            schema: Some(schema),
            cid,
            norad_cat_id: None,
            entity_id: None,
            epoch_unix: None,
            epoch_day: None,
            source_timestamp,
        }
    }
}

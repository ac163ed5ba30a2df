use std::collections::HashMap;

use astra_types::SchemaName;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Fields extracted from a record's bytes for the secondary index. Parsing
/// failures are per-field: a record that doesn't carry a given field simply
/// leaves it `None`, it never fails the whole extraction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub norad_cat_id: Option<u32>,
    pub entity_id: Option<String>,
    pub epoch_unix: Option<i64>,
}

/// Error returned when a record's bytes can't be parsed as the key=value
/// notation body at all (e.g. not valid UTF-8, or missing the schema's file
/// identifier). Extraction errors are always non-fatal to the caller: the
/// record is still stored, only the derived index fields are skipped.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("record body is not valid UTF-8")]
    NotUtf8,
}

struct FieldNames {
    norad: &'static str,
    entity: &'static str,
    epoch: &'static str,
}

fn field_names(schema: SchemaName) -> FieldNames {
    match schema {
        SchemaName::Omm => FieldNames {
            norad: "NORAD_CAT_ID",
            entity: "OBJECT_ID",
            epoch: "EPOCH",
        },
        SchemaName::Cdm => FieldNames {
            norad: "NORAD_CAT_ID_1",
            entity: "OBJECT_DESIGNATOR_1",
            epoch: "TCA",
        },
        SchemaName::Epm => FieldNames {
            norad: "NORAD_CAT_ID",
            entity: "ENTITY_ID",
            epoch: "EPOCH",
        },
    }
}

/// Parse a CCSDS-style key=value-notation body (one `KEY = VALUE` pair per
/// line, `#` comments, blank lines ignored) into a lookup table.
fn parse_kvn(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
        }
    }
    fields
}

/// Extract `(norad_cat_id, entity_id, epoch_unix)` from a record's bytes.
/// The first 4 bytes (the schema file identifier) are skipped; the
/// remainder is parsed as key=value notation.
pub fn extract(schema: SchemaName, bytes: &[u8]) -> Result<ExtractedFields, ExtractionError> {
    let body = bytes.get(4..).unwrap_or(&[]);
    let body = std::str::from_utf8(body).map_err(|_| ExtractionError::NotUtf8)?;
    let fields = parse_kvn(body);
    let names = field_names(schema);

    Ok(ExtractedFields {
        norad_cat_id: fields.get(names.norad).and_then(|v| v.parse().ok()),
        entity_id: fields.get(names.entity).cloned(),
        epoch_unix: fields.get(names.epoch).and_then(|v| parse_epoch(v)),
    })
}

/// Parse an epoch string under the first layout that matches: ISO-8601 with
/// fractional seconds, ISO-8601 without them, date-only, or a bare integer
/// number of seconds since the Unix epoch.
pub fn parse_epoch(raw: &str) -> Option<i64> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive).timestamp());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive).timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?).timestamp());
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    None
}

/// Derive the `YYYY-MM-DD` UTC day string from a Unix timestamp.
pub fn epoch_day(epoch_unix: i64) -> Option<String> {
    Utc.timestamp_opt(epoch_unix, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn omm_bytes(norad: u32, epoch: &str) -> Vec<u8> {
        let mut bytes = SchemaName::Omm.file_identifier().to_vec();
        bytes.extend_from_slice(
            format!("NORAD_CAT_ID = {norad}\nOBJECT_ID = 1998-067A\nEPOCH = {epoch}\n").as_bytes(),
        );
        bytes
    }

    #[test]
    fn extracts_omm_fields() {
        let bytes = omm_bytes(25544, "2024-01-15T00:00:00Z");
        let extracted = extract(SchemaName::Omm, &bytes).unwrap();
        assert_eq!(extracted.norad_cat_id, Some(25544));
        assert_eq!(extracted.entity_id.as_deref(), Some("1998-067A"));
        assert_eq!(extracted.epoch_unix, Some(1705276800));
    }

    #[test]
    fn missing_fields_are_none_not_errors() {
        let bytes = SchemaName::Omm.file_identifier().to_vec();
        let extracted = extract(SchemaName::Omm, &bytes).unwrap();
        assert_eq!(extracted, ExtractedFields::default());
    }

    #[test]
    fn epoch_accepts_date_only_and_numeric() {
        assert_eq!(parse_epoch("2024-01-15"), Some(1705276800));
        assert_eq!(parse_epoch("1705276800"), Some(1705276800));
        assert_eq!(
            parse_epoch("2024-01-15T00:00:00.500"),
            Some(1705276800)
        );
    }

    #[test]
    fn epoch_day_derivation() {
        assert_eq!(epoch_day(1705276800).as_deref(), Some("2024-01-15"));
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A member of the closed, versioned set of record formats the node knows
/// about at startup. Each schema carries a canonical 4-byte file identifier
/// that every valid record for that schema must begin with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaName {
    /// Orbital Mean-Elements Message.
    Omm,
    /// Conjunction Data Message.
    Cdm,
    /// Entity Profile Message.
    Epm,
}

impl SchemaName {
    /// The closed set of schemas known at startup.
    pub const ALL: [SchemaName; 3] = [SchemaName::Omm, SchemaName::Cdm, SchemaName::Epm];

    /// Short identifier used in topic names, table names and wire framing.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaName::Omm => "OMM",
            SchemaName::Cdm => "CDM",
            SchemaName::Epm => "EPM",
        }
    }

    /// The canonical 4-byte file identifier embedded at the start of every
    /// valid record for this schema.
    pub fn file_identifier(&self) -> [u8; 4] {
        match self {
            SchemaName::Omm => *b"OMM\0",
            SchemaName::Cdm => *b"CDM\0",
            SchemaName::Epm => *b"EPM\0",
        }
    }

    /// The name of the per-schema table in the record store. Never derived
    /// from user input directly -- only ever produced from a `SchemaName`
    /// that has already round-tripped through [`SchemaName::from_str`].
    pub fn table_name(&self) -> &'static str {
        match self {
            SchemaName::Omm => "records_omm",
            SchemaName::Cdm => "records_cdm",
            SchemaName::Epm => "records_epm",
        }
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OMM" => Ok(SchemaName::Omm),
            "CDM" => Ok(SchemaName::Cdm),
            "EPM" => Ok(SchemaName::Epm),
            other => Err(CoreError::InvalidSchema(other.to_string())),
        }
    }
}

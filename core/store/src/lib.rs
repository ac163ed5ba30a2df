//! Content-addressed, schema-partitioned local store over an embedded
//! relational database, plus the secondary index that makes it queryable.

pub mod config;
pub mod error;
pub mod index;
pub mod schema_sql;
mod store;

pub use config::StoreConfig;
pub use store::Store;

//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - metadata(table_name, schema_version, container_type) - one row per backing table
//! - one backing table per container handle, column layout fixed per container kind
//!
//! `base` owns connection sharing, metadata resolution and backing-table
//! lifetime; the container modules own their table layouts and queries.

pub mod base;
pub mod schema;

pub use base::{Connection, RebuildStrategy};

//! # sqlite-collections - Disk-backed collection containers
//!
//! Persistent substitutes for in-memory associative and set containers,
//! stored in SQLite tables instead of heap-resident hash tables.
//!
//! sqlite-collections provides:
//! - [`Dict`]: an insertion-ordered key-value mapping backed by one table
//! - [`Set`]: an unordered value table with full set algebra
//! - A pluggable serialization pipeline over a dynamic [`Value`] model
//! - Shared schema/metadata tracking with automatic rebuild of stale tables
//! - Transient result tables dropped when their owning handle goes away
//!
//! Every container operation translates to one or a few SQL statements
//! against a shared [`Connection`]; nothing is cached handle-side, so a
//! mutation through one handle is immediately visible to every other
//! handle bound to the same table.

pub mod dict;
pub mod serialize;
pub mod set;
pub mod storage;
pub mod value;

// Re-exports for convenient access
pub use dict::Dict;
pub use serialize::Codec;
pub use set::{Set, SetOperand};
pub use storage::base::{Connection, RebuildStrategy};
pub use value::Value;

/// Result type alias for sqlite-collections operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for sqlite-collections operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A key/value-accessing operation targeted an absent entry and no
    /// default was supplied. Carries a rendering of the missing key.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The probe or key argument is of a type that cannot serve as a key.
    /// Raised before any SQL is issued.
    #[error("unhashable type: '{0}'")]
    Unhashable(&'static str),

    /// Binary set/merge operator whose right-hand operand cannot be
    /// combined with the left one (e.g. bound to a different database).
    #[error("unsupported operand: {0}")]
    UnsupportedOperand(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//! Shared container machinery: connection handle, metadata resolution,
//! backing-table lifecycle
//!
//! Every container handle is a thin pair of (connection, table name). The
//! connection is an externally owned shared resource; the handle only owns
//! the *lifecycle decision* for its backing table: persistent tables
//! survive the handle, transient ones are dropped exactly once when the
//! handle is closed or goes out of scope.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::schema;
use crate::Result;

/// Cheaply clonable handle to one open SQLite database.
///
/// Many container handles may share a single connection; binary
/// operations (merge, set algebra) require both operands to live on the
/// same one, since SQL cannot join across databases.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<rusqlite::Connection>,
}

impl Connection {
    /// Open a database file (creates if it doesn't exist)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            inner: Rc::new(rusqlite::Connection::open(path)?),
        })
    }

    /// Open an in-memory database (for testing and scratch work)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            inner: Rc::new(rusqlite::Connection::open_in_memory()?),
        })
    }

    /// Wrap an already-open rusqlite connection
    pub fn from_rusqlite(conn: rusqlite::Connection) -> Self {
        Self {
            inner: Rc::new(conn),
        }
    }

    pub(crate) fn raw(&self) -> &rusqlite::Connection {
        &self.inner
    }

    /// Whether two handles point at the same open database.
    pub(crate) fn same_database(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// How to treat an existing backing table whose stored shape may not match
/// the current serialization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildStrategy {
    /// Never rebuild, even on mismatch. The handle then operates against a
    /// table whose on-disk shape may not match its in-memory contract;
    /// accepted caller risk.
    Skip,
    /// Deserialize and re-serialize the first stored element; rebuild when
    /// the bytes don't round-trip.
    #[default]
    CheckWithFirstElement,
    /// Always re-serialize every row on construction.
    Always,
}

/// Outcome of metadata resolution for a (table_name, container_type) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// No metadata row and no table: both were created empty.
    Create,
    /// Table is compatible; use as-is (subject to the first-element probe).
    Reuse,
    /// Same container kind under a stale schema version, or an explicit
    /// `Always` strategy: the caller must re-serialize every row.
    Rebuild,
    /// Incompatible container kind: the table was dropped and re-created
    /// empty under the current schema.
    Recreate,
}

/// Strip a caller-supplied table name down to `[A-Za-z0-9_]`.
///
/// Table names cannot be bound as SQL parameters, so everything else is
/// filtered out before the name is ever interpolated into a statement.
pub(crate) fn sanitize_table_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Auto-generated name for an anonymous backing table.
pub(crate) fn generate_table_name(container_type: &str) -> String {
    format!(
        "{}_{}",
        container_type.to_lowercase(),
        Uuid::new_v4().simple()
    )
}

/// Connection + table binding shared by every container kind.
pub(crate) struct CollectionCore {
    conn: Connection,
    table: String,
    container_type: &'static str,
    persist: bool,
    released: Cell<bool>,
}

impl CollectionCore {
    /// Bind to `table_name` (generated when `None`), creating or repairing
    /// the backing table and its metadata row as needed.
    ///
    /// `create_sql` is the DDL for this container kind's table layout.
    /// Returns the bound core and the action taken; on `Action::Rebuild`
    /// the caller still has to run its own row re-serialization pass.
    pub(crate) fn bind(
        conn: &Connection,
        table_name: Option<&str>,
        container_type: &'static str,
        strategy: RebuildStrategy,
        persist: bool,
        create_sql: impl Fn(&str) -> String,
    ) -> Result<(Self, Action)> {
        let table = match table_name {
            Some(name) => sanitize_table_name(name),
            None => generate_table_name(container_type),
        };
        conn.raw().execute(schema::CREATE_METADATA_TABLE, [])?;

        let core = Self {
            conn: conn.clone(),
            table,
            container_type,
            persist,
            released: Cell::new(false),
        };
        let action = core.resolve(strategy)?;
        match action {
            Action::Create => {
                core.conn.raw().execute(&create_sql(&core.table), [])?;
                core.upsert_metadata()?;
            }
            Action::Recreate => {
                tracing::warn!(
                    "table {} belongs to another container kind; dropping and re-creating",
                    core.table
                );
                core.conn
                    .raw()
                    .execute(&format!("DROP TABLE IF EXISTS {}", core.table), [])?;
                core.conn.raw().execute(&create_sql(&core.table), [])?;
                core.upsert_metadata()?;
            }
            Action::Rebuild => {
                // refresh the stamp; the caller re-serializes the rows
                core.upsert_metadata()?;
            }
            Action::Reuse => {}
        }
        Ok((core, action))
    }

    /// Decide create/reuse/rebuild for this binding, per the recorded
    /// metadata and the caller's strategy.
    fn resolve(&self, strategy: RebuildStrategy) -> Result<Action> {
        let meta: Option<(String, String)> = self
            .conn
            .raw()
            .query_row(
                "SELECT schema_version, container_type FROM metadata WHERE table_name = ?1",
                params![self.table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let table_exists: bool = self
            .conn
            .raw()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        let action = match meta {
            None if !table_exists => Action::Create,
            None => {
                // table exists without a metadata row: adopt it rather than
                // destroy data this layer never recorded
                tracing::warn!(
                    "table {} exists without a metadata row; adopting as {}",
                    self.table,
                    self.container_type
                );
                self.upsert_metadata()?;
                Action::Reuse
            }
            Some((version, kind)) => {
                if kind != self.container_type {
                    if strategy == RebuildStrategy::Skip {
                        tracing::warn!(
                            "table {} recorded as {} but opened as {}; strategy is Skip, reusing as-is",
                            self.table,
                            kind,
                            self.container_type
                        );
                        Action::Reuse
                    } else {
                        Action::Recreate
                    }
                } else if version != schema::SCHEMA_VERSION {
                    if strategy == RebuildStrategy::Skip {
                        tracing::warn!(
                            "table {} stored under schema version {}; strategy is Skip, reusing as-is",
                            self.table,
                            version
                        );
                        Action::Reuse
                    } else {
                        Action::Rebuild
                    }
                } else if strategy == RebuildStrategy::Always {
                    Action::Rebuild
                } else {
                    Action::Reuse
                }
            }
        };
        Ok(action)
    }

    /// Leave exactly one current metadata row for this table.
    fn upsert_metadata(&self) -> Result<()> {
        self.conn.raw().execute(
            "INSERT OR REPLACE INTO metadata (table_name, schema_version, container_type) \
             VALUES (?1, ?2, ?3)",
            params![self.table, schema::SCHEMA_VERSION, self.container_type],
        )?;
        Ok(())
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn persist(&self) -> bool {
        self.persist
    }

    /// Row count of the backing table.
    pub(crate) fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.raw().query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Drop the backing table and delete its metadata row. Safe to call
    /// more than once; only the first call does anything.
    pub(crate) fn release(&self) -> Result<()> {
        if self.released.replace(true) {
            return Ok(());
        }
        self.conn.raw().execute(
            "DELETE FROM metadata WHERE table_name = ?1 AND container_type = ?2",
            params![self.table, self.container_type],
        )?;
        self.conn
            .raw()
            .execute(&format!("DROP TABLE IF EXISTS {}", self.table), [])?;
        Ok(())
    }
}

impl Drop for CollectionCore {
    fn drop(&mut self) {
        if !self.persist && !self.released.get() {
            if let Err(e) = self.release() {
                tracing::warn!("failed to drop transient table {}: {}", self.table, e);
            }
        }
    }
}

impl std::fmt::Debug for CollectionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCore")
            .field("table", &self.table)
            .field("container_type", &self.container_type)
            .field("persist", &self.persist)
            .finish()
    }
}

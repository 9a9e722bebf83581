//! Unordered value container with set algebra, backed by one SQLite table
//!
//! Rows are single `serialized_value` blobs with uniqueness enforced by
//! the primary key. Algebra operands are first materialized into transient
//! buffer tables encoded through the left operand's pipeline, so the
//! actual set operations run as single SQL statements joining two tables.

use std::ops::{BitAnd, BitOr, BitXor, Sub};

use rusqlite::{OptionalExtension, params};

use crate::serialize::Codec;
use crate::storage::base::{
    Action, CollectionCore, Connection, RebuildStrategy, generate_table_name,
};
use crate::storage::schema;
use crate::value::Value;
use crate::{Error, Result};

const CONTAINER_TYPE: &str = "Set";

/// One operand of a binary set operation: either another stored [`Set`]
/// or a plain slice of values.
///
/// Both shapes are materialized into a serialized-value buffer table
/// before the algebra runs, so the engine treats them uniformly.
pub enum SetOperand<'a> {
    Stored(&'a Set),
    Values(&'a [Value]),
}

impl<'a> From<&'a Set> for SetOperand<'a> {
    fn from(set: &'a Set) -> Self {
        SetOperand::Stored(set)
    }
}

impl<'a> From<&'a [Value]> for SetOperand<'a> {
    fn from(values: &'a [Value]) -> Self {
        SetOperand::Values(values)
    }
}

impl<'a> From<&'a Vec<Value>> for SetOperand<'a> {
    fn from(values: &'a Vec<Value>) -> Self {
        SetOperand::Values(values)
    }
}

/// Unordered set of hashable [`Value`]s persisted in a SQLite table.
///
/// Iteration order is whatever the storage returns; only membership and
/// cardinality are contractual.
pub struct Set {
    core: CollectionCore,
    codec: Codec,
}

impl Set {
    /// Start building a Set bound to `conn`.
    pub fn builder(conn: &Connection) -> SetBuilder {
        SetBuilder {
            conn: conn.clone(),
            table_name: None,
            serializer: None,
            deserializer: None,
            persist: false,
            rebuild_strategy: RebuildStrategy::default(),
            data: None,
        }
    }

    /// Name of the backing table.
    pub fn table_name(&self) -> &str {
        self.core.table()
    }

    /// Whether the backing table survives this handle.
    pub fn persist(&self) -> bool {
        self.core.persist()
    }

    pub(crate) fn connection(&self) -> &Connection {
        self.core.connection()
    }

    /// Fresh handle over a new auto-named table with the same pipeline.
    fn materialize(&self, persist: bool) -> Result<Set> {
        let (core, _) = CollectionCore::bind(
            self.core.connection(),
            None,
            CONTAINER_TYPE,
            RebuildStrategy::Skip,
            persist,
            schema::create_set_table,
        )?;
        Ok(Set {
            core,
            codec: self.codec.clone(),
        })
    }

    // ========== Element operations ==========

    pub fn contains(&self, value: &Value) -> Result<bool> {
        let blob = self.codec.encode_key(value)?;
        let hit: Option<i64> = self
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE serialized_value = ?1 LIMIT 1",
                    self.core.table()
                ),
                params![blob],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Idempotent insert.
    pub fn add(&mut self, value: &Value) -> Result<()> {
        let blob = self.codec.encode_key(value)?;
        self.core.connection().raw().execute(
            &format!(
                "INSERT OR IGNORE INTO {} (serialized_value) VALUES (?1)",
                self.core.table()
            ),
            params![blob],
        )?;
        Ok(())
    }

    /// Delete `value`, failing when it is absent.
    pub fn remove(&mut self, value: &Value) -> Result<()> {
        let blob = self.codec.encode_key(value)?;
        let deleted = self.core.connection().raw().execute(
            &format!(
                "DELETE FROM {} WHERE serialized_value = ?1",
                self.core.table()
            ),
            params![blob],
        )?;
        if deleted == 0 {
            return Err(Error::KeyNotFound(value.to_string()));
        }
        Ok(())
    }

    /// Delete `value` if present; no error when absent.
    pub fn discard(&mut self, value: &Value) -> Result<()> {
        let blob = self.codec.encode_key(value)?;
        self.core.connection().raw().execute(
            &format!(
                "DELETE FROM {} WHERE serialized_value = ?1",
                self.core.table()
            ),
            params![blob],
        )?;
        Ok(())
    }

    /// Delete and return an arbitrary element.
    pub fn pop(&mut self) -> Result<Value> {
        let row: Option<(i64, Vec<u8>)> = self
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT rowid, serialized_value FROM {} LIMIT 1",
                    self.core.table()
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((rowid, blob)) = row else {
            return Err(Error::KeyNotFound("pop from an empty set".into()));
        };
        self.core.connection().raw().execute(
            &format!("DELETE FROM {} WHERE rowid = ?1", self.core.table()),
            params![rowid],
        )?;
        self.codec.decode(&blob)
    }

    pub fn len(&self) -> Result<usize> {
        self.core.count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete every row. Table and metadata survive.
    pub fn clear(&mut self) -> Result<()> {
        self.core
            .connection()
            .raw()
            .execute(&format!("DELETE FROM {}", self.core.table()), [])?;
        Ok(())
    }

    /// Lazy, restartable iterator over the elements; no order guarantee
    /// and no snapshot semantics.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            last_rowid: i64::MIN,
            done: false,
        }
    }

    /// Independent transient copy.
    pub fn copy(&self) -> Result<Set> {
        let copied = self.materialize(false)?;
        self.core.connection().raw().execute(
            &format!(
                "INSERT INTO {} (serialized_value) SELECT serialized_value FROM {}",
                copied.core.table(),
                self.core.table()
            ),
            [],
        )?;
        Ok(copied)
    }

    // ========== Operand materialization ==========

    /// Materialize an operand into a transient buffer table encoded
    /// through this set's pipeline. Plain values get the hashability
    /// check; stored sets are re-encoded element by element so differing
    /// pipelines stay comparable.
    fn buffer(&self, operand: &SetOperand<'_>) -> Result<Set> {
        let mut buf = self.materialize(false)?;
        match operand {
            SetOperand::Stored(other) => {
                if !self.connection().same_database(other.connection()) {
                    return Err(Error::UnsupportedOperand(
                        "set operands must share one connection".into(),
                    ));
                }
                for value in other.iter() {
                    buf.add(&value?)?;
                }
            }
            SetOperand::Values(values) => {
                for value in *values {
                    buf.add(value)?;
                }
            }
        }
        Ok(buf)
    }

    // ========== In-place algebra ==========

    fn union_update_single(&mut self, buf: &Set) -> Result<()> {
        self.core.connection().raw().execute(
            &format!(
                "INSERT OR IGNORE INTO {} (serialized_value) SELECT serialized_value FROM {}",
                self.core.table(),
                buf.core.table()
            ),
            [],
        )?;
        Ok(())
    }

    fn intersection_update_single(&mut self, buf: &Set) -> Result<()> {
        self.core.connection().raw().execute(
            &format!(
                "DELETE FROM {self_t} WHERE NOT EXISTS \
                 (SELECT 1 FROM {buf_t} WHERE {buf_t}.serialized_value = {self_t}.serialized_value)",
                self_t = self.core.table(),
                buf_t = buf.core.table()
            ),
            [],
        )?;
        Ok(())
    }

    fn difference_update_single(&mut self, buf: &Set) -> Result<()> {
        self.core.connection().raw().execute(
            &format!(
                "DELETE FROM {self_t} WHERE EXISTS \
                 (SELECT 1 FROM {buf_t} WHERE {buf_t}.serialized_value = {self_t}.serialized_value)",
                self_t = self.core.table(),
                buf_t = buf.core.table()
            ),
            [],
        )?;
        Ok(())
    }

    /// self := (self \ common) ∪ (buf \ common), where common = self ∩ buf.
    fn symmetric_difference_update_single(&mut self, buf: &Set) -> Result<()> {
        let common = self.materialize(false)?;
        let raw = self.core.connection().raw();
        raw.execute(
            &format!(
                "INSERT INTO {common_t} (serialized_value) \
                 SELECT serialized_value FROM {buf_t} WHERE EXISTS \
                 (SELECT 1 FROM {self_t} WHERE {self_t}.serialized_value = {buf_t}.serialized_value)",
                common_t = common.core.table(),
                buf_t = buf.core.table(),
                self_t = self.core.table()
            ),
            [],
        )?;
        raw.execute(
            &format!(
                "DELETE FROM {self_t} WHERE EXISTS \
                 (SELECT 1 FROM {common_t} WHERE {common_t}.serialized_value = {self_t}.serialized_value)",
                self_t = self.core.table(),
                common_t = common.core.table()
            ),
            [],
        )?;
        raw.execute(
            &format!(
                "INSERT OR IGNORE INTO {self_t} (serialized_value) \
                 SELECT serialized_value FROM {buf_t} WHERE NOT EXISTS \
                 (SELECT 1 FROM {common_t} WHERE {common_t}.serialized_value = {buf_t}.serialized_value)",
                self_t = self.core.table(),
                buf_t = buf.core.table(),
                common_t = common.core.table()
            ),
            [],
        )?;
        common.close()
    }

    /// Add every element of every operand, left to right.
    pub fn update(&mut self, others: &[SetOperand<'_>]) -> Result<()> {
        for operand in others {
            let buf = self.buffer(operand)?;
            self.union_update_single(&buf)?;
            buf.close()?;
        }
        Ok(())
    }

    /// Keep only elements present in every operand.
    pub fn intersection_update(&mut self, others: &[SetOperand<'_>]) -> Result<()> {
        for operand in others {
            let buf = self.buffer(operand)?;
            self.intersection_update_single(&buf)?;
            buf.close()?;
        }
        Ok(())
    }

    /// Drop elements present in any operand.
    pub fn difference_update(&mut self, others: &[SetOperand<'_>]) -> Result<()> {
        for operand in others {
            let buf = self.buffer(operand)?;
            self.difference_update_single(&buf)?;
            buf.close()?;
        }
        Ok(())
    }

    /// Fold the symmetric difference of each operand into self, left to
    /// right.
    pub fn symmetric_difference_update(&mut self, others: &[SetOperand<'_>]) -> Result<()> {
        for operand in others {
            let buf = self.buffer(operand)?;
            self.symmetric_difference_update_single(&buf)?;
            buf.close()?;
        }
        Ok(())
    }

    // ========== Materializing algebra ==========

    pub fn union(&self, others: &[SetOperand<'_>]) -> Result<Set> {
        let mut result = self.copy()?;
        result.update(others)?;
        Ok(result)
    }

    /// With zero operands this is simply a copy of self.
    pub fn intersection(&self, others: &[SetOperand<'_>]) -> Result<Set> {
        let mut result = self.copy()?;
        result.intersection_update(others)?;
        Ok(result)
    }

    pub fn difference(&self, others: &[SetOperand<'_>]) -> Result<Set> {
        let mut result = self.copy()?;
        result.difference_update(others)?;
        Ok(result)
    }

    pub fn symmetric_difference(&self, others: &[SetOperand<'_>]) -> Result<Set> {
        let mut result = self.copy()?;
        result.symmetric_difference_update(others)?;
        Ok(result)
    }

    // ========== Comparisons ==========

    /// Count of self's rows that also appear in `buf`.
    fn overlap_count(&self, buf: &Set) -> Result<usize> {
        let count: i64 = self.core.connection().raw().query_row(
            &format!(
                "SELECT COUNT(*) FROM {self_t} WHERE EXISTS \
                 (SELECT 1 FROM {buf_t} WHERE {buf_t}.serialized_value = {self_t}.serialized_value)",
                self_t = self.core.table(),
                buf_t = buf.core.table()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_disjoint(&self, other: SetOperand<'_>) -> Result<bool> {
        let buf = self.buffer(&other)?;
        let overlap = self.overlap_count(&buf)?;
        buf.close()?;
        Ok(overlap == 0)
    }

    pub fn is_subset(&self, other: SetOperand<'_>) -> Result<bool> {
        let buf = self.buffer(&other)?;
        let subset = self.overlap_count(&buf)? == self.len()?;
        buf.close()?;
        Ok(subset)
    }

    pub fn is_proper_subset(&self, other: SetOperand<'_>) -> Result<bool> {
        let buf = self.buffer(&other)?;
        let proper =
            self.overlap_count(&buf)? == self.len()? && self.len()? < buf.len()?;
        buf.close()?;
        Ok(proper)
    }

    pub fn is_superset(&self, other: SetOperand<'_>) -> Result<bool> {
        let buf = self.buffer(&other)?;
        let superset = buf.overlap_count(self)? == buf.len()?;
        buf.close()?;
        Ok(superset)
    }

    pub fn is_proper_superset(&self, other: SetOperand<'_>) -> Result<bool> {
        let buf = self.buffer(&other)?;
        let proper =
            buf.overlap_count(self)? == buf.len()? && self.len()? > buf.len()?;
        buf.close()?;
        Ok(proper)
    }

    /// Equality as sets of values.
    pub fn set_eq(&self, other: SetOperand<'_>) -> Result<bool> {
        let buf = self.buffer(&other)?;
        let equal =
            self.len()? == buf.len()? && self.overlap_count(&buf)? == self.len()?;
        buf.close()?;
        Ok(equal)
    }

    // ========== Rebuild ==========

    /// Whether the first stored element fails to round-trip through the
    /// current pipeline.
    fn first_element_is_stale(&self) -> Result<bool> {
        let first: Option<Vec<u8>> = self
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT serialized_value FROM {} LIMIT 1",
                    self.core.table()
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = first else {
            return Ok(false);
        };
        let value = self.codec.decode(&blob)?;
        Ok(self.codec.encode_key(&value)? != blob)
    }

    /// Copy rows into a backup table, clear the main one, reinsert every
    /// row re-serialized through the current pipeline, drop the backup.
    fn rebuild_rows(&mut self) -> Result<()> {
        tracing::debug!("rebuilding rows of {}", self.core.table());
        let backup = format!("bk_{}", generate_table_name(CONTAINER_TYPE));
        let raw = self.core.connection().raw();
        raw.execute(
            &format!(
                "CREATE TABLE {} AS SELECT * FROM {}",
                backup,
                self.core.table()
            ),
            [],
        )?;
        raw.execute(&format!("DELETE FROM {}", self.core.table()), [])?;
        let mut last_rowid = i64::MIN;
        loop {
            let row: Option<(i64, Vec<u8>)> = raw
                .query_row(
                    &format!(
                        "SELECT rowid, serialized_value FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT 1",
                        backup
                    ),
                    params![last_rowid],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((rowid, blob)) = row else {
                break;
            };
            let reencoded = self.codec.encode_key(&self.codec.decode(&blob)?)?;
            raw.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (serialized_value) VALUES (?1)",
                    self.core.table()
                ),
                params![reencoded],
            )?;
            last_rowid = rowid;
        }
        raw.execute(&format!("DROP TABLE {}", backup), [])?;
        Ok(())
    }

    /// Drop a transient backing table now instead of waiting for `Drop`.
    /// Persistent handles release nothing.
    pub fn close(self) -> Result<()> {
        if !self.core.persist() {
            self.core.release()?;
        }
        Ok(())
    }
}

impl BitOr<&Set> for &Set {
    type Output = Result<Set>;

    fn bitor(self, rhs: &Set) -> Result<Set> {
        self.union(&[rhs.into()])
    }
}

impl BitAnd<&Set> for &Set {
    type Output = Result<Set>;

    fn bitand(self, rhs: &Set) -> Result<Set> {
        self.intersection(&[rhs.into()])
    }
}

impl Sub<&Set> for &Set {
    type Output = Result<Set>;

    fn sub(self, rhs: &Set) -> Result<Set> {
        self.difference(&[rhs.into()])
    }
}

impl BitXor<&Set> for &Set {
    type Output = Result<Set>;

    fn bitxor(self, rhs: &Set) -> Result<Set> {
        self.symmetric_difference(&[rhs.into()])
    }
}

impl std::fmt::Debug for Set {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Set")
            .field("table", &self.core.table())
            .field("persist", &self.core.persist())
            .finish_non_exhaustive()
    }
}

/// Lazy element iterator returned by [`Set::iter`].
///
/// Walks the table by rowid, one fetch per step; concurrent mutation may
/// be reflected mid-iteration.
pub struct Iter<'a> {
    set: &'a Set,
    last_rowid: i64,
    done: bool,
}

impl Iterator for Iter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let row: Result<Option<(i64, Vec<u8>)>> = self
            .set
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT rowid, serialized_value FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT 1",
                    self.set.core.table()
                ),
                params![self.last_rowid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(Into::into);
        match row {
            Ok(Some((rowid, blob))) => {
                self.last_rowid = rowid;
                Some(self.set.codec.decode(&blob))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Configures and constructs a [`Set`].
pub struct SetBuilder {
    conn: Connection,
    table_name: Option<String>,
    serializer: Option<crate::serialize::SerializeFn>,
    deserializer: Option<crate::serialize::DeserializeFn>,
    persist: bool,
    rebuild_strategy: RebuildStrategy,
    data: Option<Vec<Value>>,
}

impl SetBuilder {
    /// Bind to a named table instead of an auto-generated one.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn serializer(mut self, f: impl Fn(&Value) -> Result<Vec<u8>> + 'static) -> Self {
        self.serializer = Some(std::rc::Rc::new(f));
        self
    }

    pub fn deserializer(mut self, f: impl Fn(&[u8]) -> Result<Value> + 'static) -> Self {
        self.deserializer = Some(std::rc::Rc::new(f));
        self
    }

    /// Keep the backing table when the handle goes away (default: drop it).
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn rebuild_strategy(mut self, strategy: RebuildStrategy) -> Self {
        self.rebuild_strategy = strategy;
        self
    }

    /// Initial elements; replaces any rows already stored in the table.
    pub fn data<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.data = Some(values.into_iter().collect());
        self
    }

    pub fn build(self) -> Result<Set> {
        let codec = Codec::with_overrides(self.serializer, self.deserializer);
        let (core, action) = CollectionCore::bind(
            &self.conn,
            self.table_name.as_deref(),
            CONTAINER_TYPE,
            self.rebuild_strategy,
            self.persist,
            schema::create_set_table,
        )?;
        let mut set = Set { core, codec };
        let stale = match action {
            Action::Rebuild => true,
            Action::Reuse if self.rebuild_strategy == RebuildStrategy::CheckWithFirstElement => {
                set.first_element_is_stale()?
            }
            _ => false,
        };
        if stale {
            set.rebuild_rows()?;
        }
        if let Some(data) = self.data {
            set.clear()?;
            for value in &data {
                set.add(value)?;
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    fn set_with(conn: &Connection, name: &str, values: &[&str]) -> Set {
        Set::builder(conn)
            .table_name(name)
            .data(values.iter().map(|s| text(s)))
            .build()
            .unwrap()
    }

    fn collected(set: &Set) -> Vec<Value> {
        let mut values: Vec<Value> = set.iter().map(|v| v.unwrap()).collect();
        values.sort_by_key(|v| v.to_string());
        values
    }

    #[test]
    fn test_add_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let mut sut = Set::builder(&conn).table_name("items").build().unwrap();
        sut.add(&text("a")).unwrap();
        sut.add(&text("a")).unwrap();
        assert_eq!(sut.len().unwrap(), 1);
        assert!(sut.contains(&text("a")).unwrap());
    }

    #[test]
    fn test_builder_data_dedupes_and_replaces() {
        let conn = Connection::open_in_memory().unwrap();
        let sut = set_with(&conn, "items", &["a", "b", "a", "a"]);
        assert_eq!(sut.len().unwrap(), 2);
        let again = Set::builder(&conn)
            .table_name("items")
            .data(vec![text("z")])
            .build()
            .unwrap();
        assert_eq!(collected(&again), vec![text("z")]);
    }

    #[test]
    fn test_remove_and_discard() {
        let conn = Connection::open_in_memory().unwrap();
        let mut sut = set_with(&conn, "items", &["a", "b"]);
        sut.remove(&text("a")).unwrap();
        assert!(!sut.contains(&text("a")).unwrap());
        let err = sut.remove(&text("a")).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        assert!(err.to_string().contains("\"a\""));
        sut.discard(&text("a")).unwrap();
        sut.discard(&text("b")).unwrap();
        assert!(sut.is_empty().unwrap());
    }

    #[test]
    fn test_unhashable_element_fails_before_sql() {
        let conn = Connection::open_in_memory().unwrap();
        let mut sut = set_with(&conn, "items", &["a"]);
        let probe = Value::Map(vec![]);
        assert!(matches!(
            sut.contains(&probe).unwrap_err(),
            Error::Unhashable("map")
        ));
        assert!(matches!(
            sut.add(&probe).unwrap_err(),
            Error::Unhashable("map")
        ));
        assert_eq!(sut.len().unwrap(), 1);
    }

    #[test]
    fn test_pop_drains_and_errors_when_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let mut sut = set_with(&conn, "items", &["a", "b"]);
        let first = sut.pop().unwrap();
        let second = sut.pop().unwrap();
        assert_ne!(first, second);
        let err = sut.pop().unwrap_err();
        assert_eq!(err.to_string(), "key not found: pop from an empty set");
    }

    #[test]
    fn test_union_cardinality_law() {
        let conn = Connection::open_in_memory().unwrap();
        let a = set_with(&conn, "a", &["1", "2", "3"]);
        let b = set_with(&conn, "b", &["2", "3", "4", "5"]);
        let union = a.union(&[(&b).into()]).unwrap();
        let inter = a.intersection(&[(&b).into()]).unwrap();
        assert_eq!(
            union.len().unwrap(),
            a.len().unwrap() + b.len().unwrap() - inter.len().unwrap()
        );
    }

    #[test]
    fn test_disjoint_iff_intersection_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let a = set_with(&conn, "a", &["1", "2"]);
        let b = set_with(&conn, "b", &["3", "4"]);
        let c = set_with(&conn, "c", &["2", "3"]);
        assert!(a.is_disjoint((&b).into()).unwrap());
        assert!(a.intersection(&[(&b).into()]).unwrap().is_empty().unwrap());
        assert!(!a.is_disjoint((&c).into()).unwrap());
        assert!(!a.intersection(&[(&c).into()]).unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_symmetric_difference_identity() {
        let conn = Connection::open_in_memory().unwrap();
        let a = set_with(&conn, "a", &["1", "2", "3"]);
        let b = set_with(&conn, "b", &["3", "4"]);
        let left = (&a - &b).unwrap();
        let right = (&b - &a).unwrap();
        let via_diffs = (&left | &right).unwrap();
        let direct = (&a ^ &b).unwrap();
        assert!(via_diffs.set_eq((&direct).into()).unwrap());
        assert_eq!(
            collected(&direct),
            vec![text("1"), text("2"), text("4")]
        );
    }

    #[test]
    fn test_idempotence_laws() {
        let conn = Connection::open_in_memory().unwrap();
        let a = set_with(&conn, "a", &["x", "y"]);
        assert!(a.union(&[(&a).into()]).unwrap().set_eq((&a).into()).unwrap());
        assert!(
            a.intersection(&[(&a).into()])
                .unwrap()
                .set_eq((&a).into())
                .unwrap()
        );
        assert!(a.difference(&[(&a).into()]).unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_variadic_difference_with_plain_iterables() {
        let conn = Connection::open_in_memory().unwrap();
        let sut = set_with(&conn, "items", &["a", "b", "c"]);
        let first = vec![text("a"), text("b")];
        let second = vec![text("b")];
        let result = sut
            .difference(&[(&first).into(), (&second).into()])
            .unwrap();
        assert_eq!(collected(&result), vec![text("c")]);
        // sut untouched
        assert_eq!(sut.len().unwrap(), 3);

        // the materialized result table is transient
        let result_table = result.table_name().to_string();
        drop(result);
        let gone: std::result::Result<i64, _> = conn.raw().query_row(
            &format!("SELECT COUNT(*) FROM {}", result_table),
            [],
            |row| row.get(0),
        );
        assert!(gone.is_err());
    }

    #[test]
    fn test_intersection_with_no_operands_copies() {
        let conn = Connection::open_in_memory().unwrap();
        let sut = set_with(&conn, "items", &["a", "b"]);
        let copy = sut.intersection(&[]).unwrap();
        assert!(copy.set_eq((&sut).into()).unwrap());
        assert_ne!(copy.table_name(), sut.table_name());
    }

    #[test]
    fn test_in_place_updates() {
        let conn = Connection::open_in_memory().unwrap();
        let mut sut = set_with(&conn, "items", &["1", "2", "3"]);
        let table = sut.table_name().to_string();

        sut.update(&[(&vec![text("4")]).into()]).unwrap();
        assert_eq!(
            collected(&sut),
            vec![text("1"), text("2"), text("3"), text("4")]
        );

        sut.intersection_update(&[(&vec![text("2"), text("3"), text("4"), text("9")]).into()])
            .unwrap();
        assert_eq!(collected(&sut), vec![text("2"), text("3"), text("4")]);

        sut.difference_update(&[(&vec![text("4")]).into()]).unwrap();
        assert_eq!(collected(&sut), vec![text("2"), text("3")]);

        sut.symmetric_difference_update(&[(&vec![text("3"), text("5")]).into()])
            .unwrap();
        assert_eq!(collected(&sut), vec![text("2"), text("5")]);

        // identity preserved across all in-place ops
        assert_eq!(sut.table_name(), table);
    }

    #[test]
    fn test_subset_superset_relations() {
        let conn = Connection::open_in_memory().unwrap();
        let small = set_with(&conn, "small", &["a", "b"]);
        let big = set_with(&conn, "big", &["a", "b", "c"]);
        assert!(small.is_subset((&big).into()).unwrap());
        assert!(small.is_proper_subset((&big).into()).unwrap());
        assert!(big.is_superset((&small).into()).unwrap());
        assert!(big.is_proper_superset((&small).into()).unwrap());
        assert!(small.is_subset((&small).into()).unwrap());
        assert!(!small.is_proper_subset((&small).into()).unwrap());
        assert!(!big.is_subset((&small).into()).unwrap());
    }

    #[test]
    fn test_operands_across_connections_are_rejected() {
        let conn_a = Connection::open_in_memory().unwrap();
        let conn_b = Connection::open_in_memory().unwrap();
        let a = set_with(&conn_a, "a", &["1"]);
        let b = set_with(&conn_b, "b", &["2"]);
        assert!(matches!(
            a.union(&[(&b).into()]).unwrap_err(),
            Error::UnsupportedOperand(_)
        ));
    }

    #[test]
    fn test_copy_is_independent() {
        let conn = Connection::open_in_memory().unwrap();
        let sut = set_with(&conn, "items", &["a"]);
        let mut copied = sut.copy().unwrap();
        copied.add(&text("b")).unwrap();
        assert_eq!(sut.len().unwrap(), 1);
        assert_eq!(copied.len().unwrap(), 2);
        assert!(!copied.persist());
    }

    #[test]
    fn test_rebuild_reserializes_rows() {
        let conn = Connection::open_in_memory().unwrap();
        {
            let _seed = Set::builder(&conn)
                .table_name("items")
                .persist(true)
                .serializer(|v: &Value| match v {
                    Value::Text(s) => Ok(s.clone().into_bytes()),
                    _ => Err(Error::Serialization("expected text".into())),
                })
                .deserializer(|blob: &[u8]| {
                    String::from_utf8(blob.to_vec())
                        .map(Value::Text)
                        .map_err(|e| Error::Serialization(e.to_string()))
                })
                .data(vec![text("a"), text("b"), text("c")])
                .build()
                .unwrap();
        }
        let sut = Set::builder(&conn)
            .table_name("items")
            .persist(true)
            .serializer(|v: &Value| match v {
                Value::Text(s) => Ok(s.to_uppercase().into_bytes()),
                _ => Err(Error::Serialization("expected text".into())),
            })
            .deserializer(|blob: &[u8]| {
                String::from_utf8(blob.to_vec())
                    .map(|s| Value::Text(s.to_lowercase()))
                    .map_err(|e| Error::Serialization(e.to_string()))
            })
            .rebuild_strategy(RebuildStrategy::Always)
            .build()
            .unwrap();

        let mut raw_values: Vec<Vec<u8>> = {
            let raw = conn.raw();
            let mut stmt = raw
                .prepare("SELECT serialized_value FROM items")
                .unwrap();
            let rows = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
            rows
        };
        raw_values.sort();
        assert_eq!(
            raw_values,
            vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );
        assert_eq!(sut.len().unwrap(), 3);
    }

    #[test]
    fn test_transient_table_dropped_on_scope_exit() {
        let conn = Connection::open_in_memory().unwrap();
        {
            let _sut = set_with(&conn, "scratch", &["a"]);
        }
        let gone: std::result::Result<i64, _> =
            conn.raw()
                .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0));
        assert!(gone.is_err());
    }
}

//! Ordered key-value container backed by one SQLite table
//!
//! Rows are `(serialized_key, serialized_value, item_order)`; keys are
//! unique and `item_order` totally orders iteration by insertion time.
//! Re-assigning an existing key updates its value in place without moving
//! it, so iteration order is stable under updates.

use std::ops::BitOr;

use rusqlite::{OptionalExtension, params};

use crate::serialize::{Codec, PipelineConfig};
use crate::storage::base::{Action, CollectionCore, Connection, RebuildStrategy};
use crate::storage::schema;
use crate::value::Value;
use crate::{Error, Result};

const CONTAINER_TYPE: &str = "Dict";

/// Insertion-ordered key-value mapping persisted in a SQLite table.
///
/// All operations translate to SQL against the shared connection; nothing
/// is cached handle-side. Keys must be hashable [`Value`] shapes; probes
/// with unhashable shapes fail before any SQL is issued.
pub struct Dict {
    core: CollectionCore,
    key_codec: Codec,
    value_codec: Codec,
}

impl Dict {
    /// Start building a Dict bound to `conn`.
    pub fn builder(conn: &Connection) -> DictBuilder {
        DictBuilder {
            conn: conn.clone(),
            table_name: None,
            pipelines: PipelineConfig::default(),
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

    /// Fresh handle over a new auto-named table with the same pipelines.
    fn materialize(&self, persist: bool) -> Result<Dict> {
        let (core, _) = CollectionCore::bind(
            self.core.connection(),
            None,
            CONTAINER_TYPE,
            RebuildStrategy::Skip,
            persist,
            schema::create_dict_table,
        )?;
        Ok(Dict {
            core,
            key_codec: self.key_codec.clone(),
            value_codec: self.value_codec.clone(),
        })
    }

    // ========== Raw row access ==========

    fn exists_raw(&self, key_blob: &[u8]) -> Result<bool> {
        let hit: Option<i64> = self
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE serialized_key = ?1 LIMIT 1",
                    self.core.table()
                ),
                params![key_blob],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn value_blob(&self, key_blob: &[u8]) -> Result<Option<Vec<u8>>> {
        self.core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT serialized_value FROM {} WHERE serialized_key = ?1",
                    self.core.table()
                ),
                params![key_blob],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn next_order(&self) -> Result<i64> {
        let max: Option<i64> = self.core.connection().raw().query_row(
            &format!("SELECT MAX(item_order) FROM {}", self.core.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(max.map_or(0, |m| m + 1))
    }

    /// Insert at the next order slot, or update in place when the key is
    /// already present (its `item_order` never changes).
    fn upsert_raw(&self, key_blob: &[u8], value_blob: &[u8]) -> Result<()> {
        let raw = self.core.connection().raw();
        if self.exists_raw(key_blob)? {
            raw.execute(
                &format!(
                    "UPDATE {} SET serialized_value = ?1 WHERE serialized_key = ?2",
                    self.core.table()
                ),
                params![value_blob, key_blob],
            )?;
        } else {
            raw.execute(
                &format!(
                    "INSERT INTO {} (serialized_key, serialized_value, item_order) VALUES (?1, ?2, ?3)",
                    self.core.table()
                ),
                params![key_blob, value_blob, self.next_order()?],
            )?;
        }
        Ok(())
    }

    fn delete_raw(&self, key_blob: &[u8]) -> Result<()> {
        self.core.connection().raw().execute(
            &format!(
                "DELETE FROM {} WHERE serialized_key = ?1",
                self.core.table()
            ),
            params![key_blob],
        )?;
        Ok(())
    }

    // ========== Mapping operations ==========

    /// Look up the value stored under `key`.
    pub fn get_item(&self, key: &Value) -> Result<Value> {
        let key_blob = self.key_codec.encode_key(key)?;
        match self.value_blob(&key_blob)? {
            Some(blob) => self.value_codec.decode(&blob),
            None => Err(Error::KeyNotFound(key.to_string())),
        }
    }

    /// Insert or overwrite `key`. New keys land at the end of iteration
    /// order; existing keys keep their position.
    pub fn set_item(&mut self, key: &Value, value: &Value) -> Result<()> {
        let key_blob = self.key_codec.encode_key(key)?;
        let value_blob = self.value_codec.encode(value)?;
        self.upsert_raw(&key_blob, &value_blob)
    }

    /// Remove `key`, failing when it is absent.
    pub fn del_item(&mut self, key: &Value) -> Result<()> {
        let key_blob = self.key_codec.encode_key(key)?;
        if !self.exists_raw(&key_blob)? {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        self.delete_raw(&key_blob)
    }

    pub fn contains(&self, key: &Value) -> Result<bool> {
        let key_blob = self.key_codec.encode_key(key)?;
        self.exists_raw(&key_blob)
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

    /// `get_item` without the error: `None` when the key is absent.
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        let key_blob = self.key_codec.encode_key(key)?;
        match self.value_blob(&key_blob)? {
            Some(blob) => Ok(Some(self.value_codec.decode(&blob)?)),
            None => Ok(None),
        }
    }

    /// `get` with a fallback value for absent keys.
    pub fn get_or(&self, key: &Value, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Delete `key` and return its value; error when absent.
    pub fn pop(&mut self, key: &Value) -> Result<Value> {
        let key_blob = self.key_codec.encode_key(key)?;
        match self.value_blob(&key_blob)? {
            Some(blob) => {
                self.delete_raw(&key_blob)?;
                self.value_codec.decode(&blob)
            }
            None => Err(Error::KeyNotFound(key.to_string())),
        }
    }

    /// Delete `key` and return its value; return `default` without
    /// mutating anything when absent.
    pub fn pop_or(&mut self, key: &Value, default: Value) -> Result<Value> {
        let key_blob = self.key_codec.encode_key(key)?;
        match self.value_blob(&key_blob)? {
            Some(blob) => {
                self.delete_raw(&key_blob)?;
                self.value_codec.decode(&blob)
            }
            None => Ok(default),
        }
    }

    /// Remove and return the most-recently-appended entry.
    pub fn popitem(&mut self) -> Result<(Value, Value)> {
        let last: Option<(Vec<u8>, Vec<u8>)> = self
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT serialized_key, serialized_value FROM {} ORDER BY item_order DESC LIMIT 1",
                    self.core.table()
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((key_blob, value_blob)) = last else {
            return Err(Error::KeyNotFound("popitem(): dictionary is empty".into()));
        };
        self.delete_raw(&key_blob)?;
        Ok((
            self.key_codec.decode(&key_blob)?,
            self.value_codec.decode(&value_blob)?,
        ))
    }

    /// Return the stored value for `key`, inserting `default` at the next
    /// order slot first when the key is absent.
    pub fn setdefault(&mut self, key: &Value, default: Value) -> Result<Value> {
        let key_blob = self.key_codec.encode_key(key)?;
        match self.value_blob(&key_blob)? {
            Some(blob) => self.value_codec.decode(&blob),
            None => {
                let value_blob = self.value_codec.encode(&default)?;
                self.core.connection().raw().execute(
                    &format!(
                        "INSERT INTO {} (serialized_key, serialized_value, item_order) VALUES (?1, ?2, ?3)",
                        self.core.table()
                    ),
                    params![key_blob, value_blob, self.next_order()?],
                )?;
                Ok(default)
            }
        }
    }

    /// Upsert every pair, in the iteration order of the argument.
    pub fn update<I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        for (key, value) in pairs {
            self.set_item(&key, &value)?;
        }
        Ok(())
    }

    /// Overlay `other`'s entries onto this mapping in place. Collisions
    /// overwrite the value but keep this mapping's `item_order`; keys new
    /// to `other` are appended in `other`'s order.
    pub fn merge_update(&mut self, other: &Dict) -> Result<()> {
        if !self.connection().same_database(other.connection()) {
            return Err(Error::UnsupportedOperand(
                "merge requires both dictionaries on the same connection".into(),
            ));
        }
        let pairs: Vec<(Value, Value)> = other.items().collect::<Result<_>>()?;
        self.update(pairs)
    }

    /// `self | other`: fresh table holding this mapping's entries overlaid
    /// by `other`'s. The result inherits this handle's persist flag.
    pub fn merge(&self, other: &Dict) -> Result<Dict> {
        if !self.connection().same_database(other.connection()) {
            return Err(Error::UnsupportedOperand(
                "merge requires both dictionaries on the same connection".into(),
            ));
        }
        let mut merged = self.materialize(self.persist())?;
        merged.copy_rows_from(self)?;
        merged.merge_update(other)?;
        Ok(merged)
    }

    /// Independent transient copy with identical rows and order.
    pub fn copy(&self) -> Result<Dict> {
        let copied = self.materialize(false)?;
        copied.copy_rows_from(self)?;
        Ok(copied)
    }

    /// Bulk-copy rows (including order numbers) from a sibling table.
    fn copy_rows_from(&self, source: &Dict) -> Result<()> {
        self.core.connection().raw().execute(
            &format!(
                "INSERT INTO {} (serialized_key, serialized_value, item_order) \
                 SELECT serialized_key, serialized_value, item_order FROM {}",
                self.core.table(),
                source.core.table()
            ),
            [],
        )?;
        Ok(())
    }

    // ========== Iteration ==========

    /// Keys in ascending insertion order. Lazy and restartable; no
    /// snapshot is taken, so concurrent mutation may be reflected.
    pub fn keys(&self) -> Keys<'_> {
        Keys(RowCursor::new(self, false))
    }

    /// Keys in descending insertion order.
    pub fn reversed_keys(&self) -> Keys<'_> {
        Keys(RowCursor::new(self, true))
    }

    /// Values in ascending key insertion order.
    pub fn values(&self) -> Values<'_> {
        Values(RowCursor::new(self, false))
    }

    /// `(key, value)` pairs in ascending insertion order.
    pub fn items(&self) -> Items<'_> {
        Items(RowCursor::new(self, false))
    }

    // ========== Rebuild ==========

    /// Whether the first stored key fails to round-trip through the
    /// current key pipeline.
    fn first_element_is_stale(&self) -> Result<bool> {
        let first: Option<Vec<u8>> = self
            .core
            .connection()
            .raw()
            .query_row(
                &format!(
                    "SELECT serialized_key FROM {} ORDER BY item_order LIMIT 1",
                    self.core.table()
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = first else {
            return Ok(false);
        };
        let key = self.key_codec.decode(&blob)?;
        Ok(self.key_codec.encode_key(&key)? != blob)
    }

    /// Re-serialize every row through the current pipelines, in place.
    /// `item_order` is untouched, so relative order is preserved.
    fn rebuild_rows(&mut self) -> Result<()> {
        tracing::debug!("rebuilding rows of {}", self.core.table());
        let mut last_order = i64::MIN;
        loop {
            let row: Option<(i64, Vec<u8>, Vec<u8>)> = self
                .core
                .connection()
                .raw()
                .query_row(
                    &format!(
                        "SELECT item_order, serialized_key, serialized_value FROM {} \
                         WHERE item_order > ?1 ORDER BY item_order LIMIT 1",
                        self.core.table()
                    ),
                    params![last_order],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((order, key_blob, value_blob)) = row else {
                break;
            };
            let new_key = self.key_codec.encode_key(&self.key_codec.decode(&key_blob)?)?;
            let new_value = self
                .value_codec
                .encode(&self.value_codec.decode(&value_blob)?)?;
            self.core.connection().raw().execute(
                &format!(
                    "UPDATE {} SET serialized_key = ?1, serialized_value = ?2 WHERE item_order = ?3",
                    self.core.table()
                ),
                params![new_key, new_value, order],
            )?;
            last_order = order;
        }
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

impl BitOr<&Dict> for &Dict {
    type Output = Result<Dict>;

    fn bitor(self, rhs: &Dict) -> Result<Dict> {
        self.merge(rhs)
    }
}

impl std::fmt::Debug for Dict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dict")
            .field("table", &self.core.table())
            .field("persist", &self.core.persist())
            .finish_non_exhaustive()
    }
}

/// Order-walking cursor: each step fetches the row just past the last
/// seen `item_order`, so no statement stays open across steps.
struct RowCursor<'a> {
    dict: &'a Dict,
    last: i64,
    reverse: bool,
    done: bool,
}

impl<'a> RowCursor<'a> {
    fn new(dict: &'a Dict, reverse: bool) -> Self {
        Self {
            dict,
            last: if reverse { i64::MAX } else { i64::MIN },
            reverse,
            done: false,
        }
    }

    fn next_row(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }
        let sql = if self.reverse {
            format!(
                "SELECT item_order, serialized_key, serialized_value FROM {} \
                 WHERE item_order < ?1 ORDER BY item_order DESC LIMIT 1",
                self.dict.core.table()
            )
        } else {
            format!(
                "SELECT item_order, serialized_key, serialized_value FROM {} \
                 WHERE item_order > ?1 ORDER BY item_order LIMIT 1",
                self.dict.core.table()
            )
        };
        let row: Option<(i64, Vec<u8>, Vec<u8>)> = self
            .dict
            .core
            .connection()
            .raw()
            .query_row(&sql, params![self.last], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;
        match row {
            Some((order, key_blob, value_blob)) => {
                self.last = order;
                Ok(Some((key_blob, value_blob)))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Lazy key iterator returned by [`Dict::keys`] / [`Dict::reversed_keys`].
pub struct Keys<'a>(RowCursor<'a>);

impl Iterator for Keys<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.next_row() {
            Ok(Some((key_blob, _))) => Some(self.0.dict.key_codec.decode(&key_blob)),
            Ok(None) => None,
            Err(e) => {
                self.0.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazy value iterator returned by [`Dict::values`].
pub struct Values<'a>(RowCursor<'a>);

impl Iterator for Values<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.next_row() {
            Ok(Some((_, value_blob))) => Some(self.0.dict.value_codec.decode(&value_blob)),
            Ok(None) => None,
            Err(e) => {
                self.0.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazy entry iterator returned by [`Dict::items`].
pub struct Items<'a>(RowCursor<'a>);

impl Iterator for Items<'_> {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.next_row() {
            Ok(Some((key_blob, value_blob))) => {
                let dict = self.0.dict;
                let pair = dict
                    .key_codec
                    .decode(&key_blob)
                    .and_then(|k| Ok((k, dict.value_codec.decode(&value_blob)?)));
                Some(pair)
            }
            Ok(None) => None,
            Err(e) => {
                self.0.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Configures and constructs a [`Dict`].
pub struct DictBuilder {
    conn: Connection,
    table_name: Option<String>,
    pipelines: PipelineConfig,
    persist: bool,
    rebuild_strategy: RebuildStrategy,
    data: Option<Vec<(Value, Value)>>,
}

impl DictBuilder {
    /// Bind to a named table instead of an auto-generated one.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn key_serializer(
        mut self,
        f: impl Fn(&Value) -> Result<Vec<u8>> + 'static,
    ) -> Self {
        self.pipelines.key_serializer = Some(std::rc::Rc::new(f));
        self
    }

    pub fn key_deserializer(mut self, f: impl Fn(&[u8]) -> Result<Value> + 'static) -> Self {
        self.pipelines.key_deserializer = Some(std::rc::Rc::new(f));
        self
    }

    pub fn value_serializer(
        mut self,
        f: impl Fn(&Value) -> Result<Vec<u8>> + 'static,
    ) -> Self {
        self.pipelines.value_serializer = Some(std::rc::Rc::new(f));
        self
    }

    pub fn value_deserializer(mut self, f: impl Fn(&[u8]) -> Result<Value> + 'static) -> Self {
        self.pipelines.value_deserializer = Some(std::rc::Rc::new(f));
        self
    }

    /// Legacy combined option; overrides the key pipeline only.
    #[deprecated(note = "use key_serializer or value_serializer instead")]
    pub fn serializer(mut self, f: impl Fn(&Value) -> Result<Vec<u8>> + 'static) -> Self {
        self.pipelines.legacy_serializer = Some(std::rc::Rc::new(f));
        self
    }

    /// Legacy combined option; overrides the key pipeline only.
    #[deprecated(note = "use key_deserializer or value_deserializer instead")]
    pub fn deserializer(mut self, f: impl Fn(&[u8]) -> Result<Value> + 'static) -> Self {
        self.pipelines.legacy_deserializer = Some(std::rc::Rc::new(f));
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

    /// Initial entries; replaces any rows already stored in the table.
    pub fn data<I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        self.data = Some(pairs.into_iter().collect());
        self
    }

    pub fn build(self) -> Result<Dict> {
        let (key_codec, value_codec) = self.pipelines.resolve();
        let (core, action) = CollectionCore::bind(
            &self.conn,
            self.table_name.as_deref(),
            CONTAINER_TYPE,
            self.rebuild_strategy,
            self.persist,
            schema::create_dict_table,
        )?;
        let mut dict = Dict {
            core,
            key_codec,
            value_codec,
        };
        let stale = match action {
            Action::Rebuild => true,
            Action::Reuse if self.rebuild_strategy == RebuildStrategy::CheckWithFirstElement => {
                dict.first_element_is_stale()?
            }
            _ => false,
        };
        if stale {
            dict.rebuild_rows()?;
        }
        if let Some(data) = self.data {
            dict.clear()?;
            dict.update(data)?;
        }
        Ok(dict)
    }
}

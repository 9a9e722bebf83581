//! Serialization pipeline
//!
//! Keys and values travel to the database as byte blobs. Each container
//! role (key, value, set element) carries its own [`Codec`], a pluggable
//! serializer/deserializer pair; the default codec is a type-preserving
//! serde_json encoding of [`Value`].
//!
//! Key-role encoding doubles as the hashability capability check: a value
//! whose shape cannot serve as a key is rejected here, before any SQL is
//! issued.

use std::fmt;
use std::rc::Rc;

use crate::value::Value;
use crate::{Error, Result};

/// Function converting a native value into its stored byte form.
pub type SerializeFn = Rc<dyn Fn(&Value) -> Result<Vec<u8>>>;

/// Function converting stored bytes back into a native value.
pub type DeserializeFn = Rc<dyn Fn(&[u8]) -> Result<Value>>;

/// A serializer/deserializer pair for one pipeline role.
///
/// Cheap to clone; handles produced by binary operations (merge, set
/// algebra, copy) share their parent's codecs.
#[derive(Clone)]
pub struct Codec {
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

impl Codec {
    pub fn new(serialize: SerializeFn, deserialize: DeserializeFn) -> Self {
        Self {
            serialize,
            deserialize,
        }
    }

    /// The default pipeline: serde_json over the tagged [`Value`] enum.
    ///
    /// Round-trips arbitrary composites and is deterministic, so equal
    /// values always encode to equal blobs (required for key uniqueness).
    pub fn default_json() -> Self {
        Self {
            serialize: Rc::new(|v: &Value| {
                serde_json::to_vec(v).map_err(|e| Error::Serialization(e.to_string()))
            }),
            deserialize: Rc::new(|blob: &[u8]| {
                serde_json::from_slice(blob).map_err(|e| Error::Serialization(e.to_string()))
            }),
        }
    }

    /// Build a codec from optional overrides, falling back to the default
    /// pipeline for whichever half is omitted.
    pub fn with_overrides(serialize: Option<SerializeFn>, deserialize: Option<DeserializeFn>) -> Self {
        let default = Self::default_json();
        Self {
            serialize: serialize.unwrap_or(default.serialize),
            deserialize: deserialize.unwrap_or(default.deserialize),
        }
    }

    /// Encode a value for storage.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        (self.serialize)(value)
    }

    /// Encode a key, rejecting unhashable shapes before any I/O happens.
    pub fn encode_key(&self, key: &Value) -> Result<Vec<u8>> {
        if !key.is_hashable() {
            return Err(Error::Unhashable(key.type_name()));
        }
        (self.serialize)(key)
    }

    /// Decode a stored blob back into a value.
    pub fn decode(&self, blob: &[u8]) -> Result<Value> {
        (self.deserialize)(blob)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::default_json()
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

/// Raw pipeline configuration collected by the container builders.
///
/// Translates the legacy combined `serializer`/`deserializer` options into
/// the current key-role pipeline, keeping the compatibility shim out of
/// the engine code. The deprecation notice fires at most once per
/// construction call, from [`PipelineConfig::resolve`].
#[derive(Default)]
pub struct PipelineConfig {
    pub key_serializer: Option<SerializeFn>,
    pub key_deserializer: Option<DeserializeFn>,
    pub value_serializer: Option<SerializeFn>,
    pub value_deserializer: Option<DeserializeFn>,
    pub legacy_serializer: Option<SerializeFn>,
    pub legacy_deserializer: Option<DeserializeFn>,
}

impl PipelineConfig {
    /// Resolve into `(key_codec, value_codec)`.
    ///
    /// The legacy options override the key role only; explicit
    /// `key_serializer`/`key_deserializer` win over them.
    pub fn resolve(self) -> (Codec, Codec) {
        if self.legacy_serializer.is_some() || self.legacy_deserializer.is_some() {
            tracing::warn!(
                "serializer/deserializer options are deprecated; \
                 use key_serializer/key_deserializer (or value_serializer/value_deserializer) instead"
            );
        }
        let key = Codec::with_overrides(
            self.key_serializer.or(self.legacy_serializer),
            self.key_deserializer.or(self.legacy_deserializer),
        );
        let value = Codec::with_overrides(self.value_serializer, self.value_deserializer);
        (key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_codec_roundtrip() {
        let codec = Codec::default_json();
        let v = Value::Tuple(vec![
            Value::Int(1),
            Value::Text("a".into()),
            Value::Bytes(vec![0, 255]),
        ]);
        let blob = codec.encode(&v).unwrap();
        assert_eq!(codec.decode(&blob).unwrap(), v);
    }

    #[test]
    fn test_default_codec_is_deterministic() {
        let codec = Codec::default_json();
        let v = Value::Map(vec![(Value::Text("k".into()), Value::Int(1))]);
        assert_eq!(codec.encode(&v).unwrap(), codec.encode(&v).unwrap());
    }

    #[test]
    fn test_encode_key_rejects_unhashable() {
        let codec = Codec::default_json();
        let err = codec.encode_key(&Value::List(vec![])).unwrap_err();
        assert!(matches!(err, Error::Unhashable("list")));
        assert_eq!(err.to_string(), "unhashable type: 'list'");
    }

    #[test]
    fn test_overrides_fall_back_to_default() {
        let upper: SerializeFn = Rc::new(|v: &Value| match v {
            Value::Text(s) => Ok(s.to_uppercase().into_bytes()),
            other => Err(Error::Serialization(format!("expected text, got {}", other))),
        });
        let codec = Codec::with_overrides(Some(upper), None);
        assert_eq!(codec.encode(&Value::Text("ab".into())).unwrap(), b"AB");
        // deserializer half is still the default json pipeline
        let json = serde_json::to_vec(&Value::Int(7)).unwrap();
        assert_eq!(codec.decode(&json).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_legacy_options_override_key_role_only() {
        let upper: SerializeFn = Rc::new(|v: &Value| match v {
            Value::Text(s) => Ok(s.to_uppercase().into_bytes()),
            _ => Err(Error::Serialization("expected text".into())),
        });
        let config = PipelineConfig {
            legacy_serializer: Some(upper),
            ..Default::default()
        };
        let (key, value) = config.resolve();
        assert_eq!(key.encode(&Value::Text("a".into())).unwrap(), b"A");
        // value pipeline is untouched
        assert_eq!(
            value.encode(&Value::Text("a".into())).unwrap(),
            serde_json::to_vec(&Value::Text("a".into())).unwrap()
        );
    }
}

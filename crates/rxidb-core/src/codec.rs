//! Value codecs applied by entity handles
//!
//! A codec runs `serialize` before every write and `deserialize` after every
//! read. [`Identity`] passes JSON values through untouched and is the default
//! for every handle.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Serialize/deserialize pair for record values.
pub trait Codec: 'static {
    type Item: 'static;

    fn serialize(&self, item: Self::Item) -> Result<Value>;
    fn deserialize(&self, value: Value) -> Result<Self::Item>;
}

/// Pass-through codec over raw JSON values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Codec for Identity {
    type Item = Value;

    fn serialize(&self, item: Value) -> Result<Value> {
        Ok(item)
    }

    fn deserialize(&self, value: Value) -> Result<Value> {
        Ok(value)
    }
}

/// Codec for any serde type.
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Json<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned + 'static> Codec for Json<T> {
    type Item = T;

    fn serialize(&self, item: T) -> Result<Value> {
        Ok(serde_json::to_value(item)?)
    }

    fn deserialize(&self, value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Codec built from a pair of closures.
pub struct FnCodec<T, S, D> {
    serialize: S,
    deserialize: D,
    _item: PhantomData<fn() -> T>,
}

impl<T, S, D> FnCodec<T, S, D>
where
    S: Fn(T) -> Result<Value>,
    D: Fn(Value) -> Result<T>,
{
    pub fn new(serialize: S, deserialize: D) -> Self {
        Self {
            serialize,
            deserialize,
            _item: PhantomData,
        }
    }
}

impl<T, S, D> Codec for FnCodec<T, S, D>
where
    T: 'static,
    S: Fn(T) -> Result<Value> + 'static,
    D: Fn(Value) -> Result<T> + 'static,
{
    type Item = T;

    fn serialize(&self, item: T) -> Result<Value> {
        (self.serialize)(item)
    }

    fn deserialize(&self, value: Value) -> Result<T> {
        (self.deserialize)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u32,
        body: String,
    }

    #[test]
    fn test_identity_passes_through() {
        let value = json!({"a": [1, 2]});
        assert_eq!(Identity.serialize(value.clone()).unwrap(), value);
        assert_eq!(Identity.deserialize(value.clone()).unwrap(), value);
    }

    #[test]
    fn test_json_codec() {
        let codec = Json::<Note>::new();
        let value = codec
            .serialize(Note {
                id: 1,
                body: "hi".into(),
            })
            .unwrap();
        assert_eq!(value, json!({"id": 1, "body": "hi"}));
        assert_eq!(
            codec.deserialize(value).unwrap(),
            Note {
                id: 1,
                body: "hi".into()
            }
        );
    }

    #[test]
    fn test_json_codec_rejects_wrong_shape() {
        let err = Json::<Note>::new().deserialize(json!("text")).unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)));
    }

    #[test]
    fn test_fn_codec() {
        let codec = FnCodec::new(
            |n: i64| Ok(json!({ "n": n })),
            |v: Value| {
                v["n"]
                    .as_i64()
                    .ok_or_else(|| DbError::Serialization("missing n".into()))
            },
        );
        assert_eq!(codec.serialize(3).unwrap(), json!({"n": 3}));
        assert_eq!(codec.deserialize(json!({"n": 9})).unwrap(), 9);
    }
}

//! CBOR helpers for CTAP structures
//!
//! CTAP responses are CBOR maps keyed by small integers, with nested maps keyed
//! by text (options, extensions, credential parameters). This module provides a
//! builder and a parser for the integer-keyed layer plus small accessors for the
//! text-keyed one.

use crate::status::{Result, StatusCode};

use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

/// Encode a value to CBOR bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer).map_err(|_| StatusCode::InvalidCbor)?;
    Ok(buffer)
}

/// Decode CBOR bytes to a value
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|_| StatusCode::InvalidCbor)
}

/// Encode value to CBOR Value for manual map construction
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Value::serialized(value).map_err(|_| StatusCode::InvalidCbor)
}

/// Decode CBOR Value to typed value
pub fn from_value<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T> {
    value.deserialized().map_err(|_| StatusCode::CborUnexpectedType)
}

/// Split a text-keyed CBOR map into its entries
///
/// Non-text keys are rejected, as CTAP never uses them in text-keyed maps.
pub fn text_map(value: &Value) -> Result<BTreeMap<String, Value>> {
    let pairs = value.as_map().ok_or(StatusCode::CborUnexpectedType)?;
    let mut map = BTreeMap::new();
    for (k, v) in pairs {
        let key = k.as_text().ok_or(StatusCode::CborUnexpectedType)?;
        map.insert(key.to_string(), v.clone());
    }
    Ok(map)
}

/// Build a CBOR map with integer keys (common in CTAP)
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: Vec<(i32, Value)>,
}

impl MapBuilder {
    /// Create a new map builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an integer key and value
    pub fn insert<T: Serialize>(mut self, key: i32, value: T) -> Result<Self> {
        self.entries.push((key, to_value(&value)?));
        Ok(self)
    }

    /// Insert an optional value (only if Some)
    pub fn insert_opt<T: Serialize>(self, key: i32, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    /// Insert bytes directly (avoids array serialization)
    pub fn insert_bytes(mut self, key: i32, bytes: &[u8]) -> Result<Self> {
        self.entries.push((key, Value::Bytes(bytes.to_vec())));
        Ok(self)
    }

    /// Insert an already-built CBOR value
    pub fn insert_value(mut self, key: i32, value: Value) -> Self {
        self.entries.push((key, value));
        self
    }

    /// Build the map and encode to CBOR bytes
    pub fn build(self) -> Result<Vec<u8>> {
        encode(&self.build_value())
    }

    /// Build the map as a CBOR Value
    pub fn build_value(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::Integer(k.into()), v))
                .collect(),
        )
    }
}

/// Parse a CBOR map with integer keys
#[derive(Debug, Clone)]
pub struct MapParser {
    map: BTreeMap<i128, Value>,
}

impl MapParser {
    /// Parse from CBOR bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value: Value = ciborium::from_reader(data).map_err(|_| StatusCode::InvalidCbor)?;
        Self::from_value(value)
    }

    /// Parse from a CBOR Value
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Map(pairs) = value else {
            return Err(StatusCode::CborUnexpectedType);
        };
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            let Value::Integer(key) = k else {
                return Err(StatusCode::CborUnexpectedType);
            };
            map.insert(i128::from(key), v);
        }
        Ok(Self { map })
    }

    /// Get a required value by key
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: i32) -> Result<T> {
        from_value(self.raw(key).ok_or(StatusCode::MissingParameter)?)
    }

    /// Get an optional value by key
    pub fn get_opt<T: for<'de> Deserialize<'de>>(&self, key: i32) -> Result<Option<T>> {
        self.raw(key).map(from_value).transpose()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: i32) -> bool {
        self.map.contains_key(&i128::from(key))
    }

    /// Get the undecoded value stored under a key
    pub fn raw(&self, key: i32) -> Option<&Value> {
        self.map.get(&i128::from(key))
    }

    /// Get a required byte string
    ///
    /// `Value::Bytes` does not deserialize into `Vec<u8>` through serde, so
    /// byte strings are read directly.
    pub fn get_bytes(&self, key: i32) -> Result<Vec<u8>> {
        self.get_bytes_opt(key)?.ok_or(StatusCode::MissingParameter)
    }

    /// Get an optional byte string
    pub fn get_bytes_opt(&self, key: i32) -> Result<Option<Vec<u8>>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(StatusCode::CborUnexpectedType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_builder_and_parser() {
        let cbor = MapBuilder::new()
            .insert(1, "packed")
            .unwrap()
            .insert(2, 42i32)
            .unwrap()
            .insert_bytes(3, &[1, 2, 3])
            .unwrap()
            .build()
            .unwrap();

        let parser = MapParser::from_bytes(&cbor).unwrap();
        let s: String = parser.get(1).unwrap();
        let i: i32 = parser.get(2).unwrap();

        assert_eq!(s, "packed");
        assert_eq!(i, 42);
        assert_eq!(parser.get_bytes(3).unwrap(), vec![1u8, 2, 3]);
    }

    #[test]
    fn test_map_builder_optional() {
        let cbor = MapBuilder::new()
            .insert_opt(2, Some(42i32))
            .unwrap()
            .insert_opt::<i32>(3, None)
            .unwrap()
            .build()
            .unwrap();

        let parser = MapParser::from_bytes(&cbor).unwrap();
        assert!(parser.contains_key(2));
        assert!(!parser.contains_key(3));
        assert_eq!(parser.get_opt::<i32>(3).unwrap(), None);
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let cbor = MapBuilder::new().insert(1, "text").unwrap().build().unwrap();
        let parser = MapParser::from_bytes(&cbor).unwrap();

        assert_eq!(parser.get::<String>(99).unwrap_err(), StatusCode::MissingParameter);
        assert_eq!(parser.get_bytes(1).unwrap_err(), StatusCode::CborUnexpectedType);
    }

    #[test]
    fn test_text_keyed_map_rejected_by_parser() {
        let value = Value::Map(vec![(Value::Text("rk".into()), Value::Bool(true))]);
        assert_eq!(
            MapParser::from_value(value.clone()).unwrap_err(),
            StatusCode::CborUnexpectedType
        );
        let map = text_map(&value).unwrap();
        assert_eq!(map.get("rk"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_invalid_cbor() {
        let result: Result<String> = decode(&[0xff, 0xff, 0xff]);
        assert_eq!(result.unwrap_err(), StatusCode::InvalidCbor);
    }
}

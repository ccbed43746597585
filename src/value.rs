use std::convert::{TryFrom, TryInto};
use thiserror::Error;

/// A host value accepted for binding: either text or a raw byte sequence.
///
/// Which form a variable stores is decided by its kind: character kinds
/// measure and cap values as text, the binary kind as bytes. Input in the
/// other form is coerced before storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Borrows this value.
    #[must_use]
    pub fn as_ref(&self) -> ValueRef {
        match self {
            Value::Text(s) => ValueRef::Text(s),
            Value::Bytes(b) => ValueRef::Bytes(b),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = TypeMismatch;

    /// Converts a dynamically-typed host value. JSON strings become text;
    /// JSON arrays of integers in `0..=255` (serde's representation of a byte
    /// sequence) become bytes. Every other JSON kind is rejected.
    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            serde_json::Value::Array(items) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    let byte = item
                        .as_u64()
                        .and_then(|b| b.try_into().ok())
                        .ok_or(TypeMismatch { got: "array" })?;
                    bytes.push(byte);
                }
                Ok(Value::Bytes(bytes))
            }
            serde_json::Value::Null => Err(TypeMismatch { got: "null" }),
            serde_json::Value::Bool(_) => Err(TypeMismatch { got: "boolean" }),
            serde_json::Value::Number(_) => Err(TypeMismatch { got: "number" }),
            serde_json::Value::Object(_) => Err(TypeMismatch { got: "object" }),
        }
    }
}

/// A borrowed view of a host value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueRef<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a str> for ValueRef<'a> {
    fn from(s: &'a str) -> Self {
        ValueRef::Text(s)
    }
}

impl<'a> From<&'a [u8]> for ValueRef<'a> {
    fn from(b: &'a [u8]) -> Self {
        ValueRef::Bytes(b)
    }
}

impl<'a> From<&'a Value> for ValueRef<'a> {
    fn from(v: &'a Value) -> Self {
        v.as_ref()
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("string or byte value required, got {got}")]
pub struct TypeMismatch {
    pub got: &'static str,
}

//! The dynamic value domain carried in cluster RPC messages.
//!
//! Mirrors the value model of the reference framework: nil, booleans,
//! 64-bit integers, doubles, byte strings, and tables with an array part
//! plus a hash part. Functions, threads, and userdata never cross the
//! wire.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::codec::ValueError;

/// A single dynamically-typed value.
///
/// Strings are raw byte sequences — the wire format does not require
/// UTF-8 and neither do we.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(Vec<u8>),
    Table(Table),
}

/// A table: ordered array part plus keyed hash part.
///
/// Either part may be empty. Values in both parts must be non-nil; the
/// codec rejects nil values when packing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub array: Vec<Value>,
    pub hash: HashMap<Key, Value>,
}

/// The subset of [`Value`] usable as a table key.
///
/// Nil and table keys are unrepresentable here, which is exactly the
/// restriction the wire format imposes. Real keys compare and hash by
/// IEEE-754 bit pattern so the map stays coherent.
#[derive(Debug, Clone)]
pub enum Key {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(Vec<u8>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// The string payload, when it is one and is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl Table {
    /// Look up a hash-part entry.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.hash.get(key)
    }
}

// Real keys are compared by bit pattern: NaN keys stay retrievable and
// 0.0 / -0.0 are distinct, matching the hash below.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Boolean(a), Key::Boolean(b)) => a == b,
            (Key::Integer(a), Key::Integer(b)) => a == b,
            (Key::Real(a), Key::Real(b)) => a.to_bits() == b.to_bits(),
            (Key::String(a), Key::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Boolean(b) => {
                state.write_u8(0);
                b.hash(state);
            }
            Key::Integer(i) => {
                state.write_u8(1);
                i.hash(state);
            }
            Key::Real(r) => {
                state.write_u8(2);
                r.to_bits().hash(state);
            }
            Key::String(s) => {
                state.write_u8(3);
                s.hash(state);
            }
        }
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Value {
        match key {
            Key::Boolean(b) => Value::Boolean(b),
            Key::Integer(i) => Value::Integer(i),
            Key::Real(r) => Value::Real(r),
            Key::String(s) => Value::String(s),
        }
    }
}

impl TryFrom<Value> for Key {
    type Error = ValueError;

    fn try_from(value: Value) -> Result<Key, ValueError> {
        match value {
            Value::Boolean(b) => Ok(Key::Boolean(b)),
            Value::Integer(i) => Ok(Key::Integer(i)),
            Value::Real(r) => Ok(Key::Real(r)),
            Value::String(s) => Ok(Key::String(s)),
            Value::Nil | Value::Table(_) => Err(ValueError::InvalidKey),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Value {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Value {
        Value::String(bytes)
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Value {
        Value::Table(table)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Key {
        Key::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Key {
        Key::String(s.into_bytes())
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Key {
        Key::Integer(i)
    }
}

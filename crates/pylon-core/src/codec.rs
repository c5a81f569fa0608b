//! Compact tagged serialization of the [`Value`] domain.
//!
//! Every value starts with one type byte: the low 3 bits carry the type
//! tag, the high 5 bits carry a cookie whose meaning depends on the tag.
//! Multi-byte payloads are little-endian. The format is inherited from
//! the reference framework and must match it bit-for-bit.

use bytes::{Buf, BufMut, BytesMut};

use crate::value::{Key, Table, Value};

const TYPE_NIL: u8 = 0;
const TYPE_BOOLEAN: u8 = 1;
const TYPE_NUMBER: u8 = 2;
const TYPE_USERDATA: u8 = 3;
const TYPE_SHORT_STRING: u8 = 4;
const TYPE_LONG_STRING: u8 = 5;
const TYPE_TABLE: u8 = 6;

// Number cookies select width and shape.
const NUMBER_ZERO: u8 = 0;
const NUMBER_BYTE: u8 = 1;
const NUMBER_WORD: u8 = 2;
const NUMBER_DWORD: u8 = 4;
const NUMBER_QWORD: u8 = 6;
const NUMBER_REAL: u8 = 8;

/// Highest value the 5-bit cookie field can carry. Reserved in table
/// headers to mean "real array length follows as an integer".
const COOKIE_MAX: u8 = 31;

/// Deepest table nesting either codec direction will follow.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("table nesting exceeds {MAX_DEPTH} levels")]
    TooDeep,

    #[error("table key can't be nil or a table")]
    InvalidKey,

    #[error("table value can't be nil")]
    NilTableValue,

    #[error("unknown value type {0}")]
    UnknownType(u8),

    #[error("unknown integer cookie {0}")]
    UnknownIntegerCookie(u8),

    #[error("unknown long string cookie {0}")]
    UnknownLongStringCookie(u8),

    #[error("bad table length header 0x{0:02x}")]
    BadTableLength(u8),

    #[error("value data truncated")]
    Truncated,
}

fn combine(typ: u8, cookie: u8) -> u8 {
    typ | (cookie << 3)
}

/// Serialize an ordered value sequence into its wire concatenation.
pub fn serialize(values: &[Value]) -> Result<Vec<u8>, ValueError> {
    let mut buf = BytesMut::new();
    for value in values {
        encode_value(&mut buf, value, 0)?;
    }
    Ok(buf.to_vec())
}

/// Decode an entire buffer back into the value sequence it encodes.
pub fn deserialize(data: &[u8]) -> Result<Vec<Value>, ValueError> {
    let mut buf = data;
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(decode_value(&mut buf, 0)?);
    }
    Ok(values)
}

// ── Encoding ─────────────────────────────────────────────────────────────────

fn encode_value(buf: &mut BytesMut, value: &Value, depth: usize) -> Result<(), ValueError> {
    match value {
        Value::Nil => buf.put_u8(combine(TYPE_NIL, 0)),
        Value::Boolean(b) => buf.put_u8(combine(TYPE_BOOLEAN, *b as u8)),
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Real(r) => {
            buf.put_u8(combine(TYPE_NUMBER, NUMBER_REAL));
            buf.put_f64_le(*r);
        }
        Value::String(s) => encode_string(buf, s),
        Value::Table(t) => encode_table(buf, t, depth)?,
    }
    Ok(())
}

fn encode_key(buf: &mut BytesMut, key: &Key) {
    match key {
        Key::Boolean(b) => buf.put_u8(combine(TYPE_BOOLEAN, *b as u8)),
        Key::Integer(i) => encode_integer(buf, *i),
        Key::Real(r) => {
            buf.put_u8(combine(TYPE_NUMBER, NUMBER_REAL));
            buf.put_f64_le(*r);
        }
        Key::String(s) => encode_string(buf, s),
    }
}

/// The encoder always picks the narrowest number representation.
fn encode_integer(buf: &mut BytesMut, v: i64) {
    if v == 0 {
        buf.put_u8(combine(TYPE_NUMBER, NUMBER_ZERO));
    } else if v as i32 as i64 != v {
        buf.put_u8(combine(TYPE_NUMBER, NUMBER_QWORD));
        buf.put_i64_le(v);
    } else if v < 0 {
        buf.put_u8(combine(TYPE_NUMBER, NUMBER_DWORD));
        buf.put_i32_le(v as i32);
    } else if v < 0x100 {
        buf.put_u8(combine(TYPE_NUMBER, NUMBER_BYTE));
        buf.put_u8(v as u8);
    } else if v < 0x10000 {
        buf.put_u8(combine(TYPE_NUMBER, NUMBER_WORD));
        buf.put_u16_le(v as u16);
    } else {
        buf.put_u8(combine(TYPE_NUMBER, NUMBER_DWORD));
        buf.put_u32_le(v as u32);
    }
}

fn encode_string(buf: &mut BytesMut, s: &[u8]) {
    let sz = s.len();
    if sz < COOKIE_MAX as usize {
        buf.put_u8(combine(TYPE_SHORT_STRING, sz as u8));
    } else if sz < 0x10000 {
        buf.put_u8(combine(TYPE_LONG_STRING, 2));
        buf.put_u16_le(sz as u16);
    } else {
        buf.put_u8(combine(TYPE_LONG_STRING, 4));
        buf.put_u32_le(sz as u32);
    }
    buf.put_slice(s);
}

fn encode_table(buf: &mut BytesMut, table: &Table, depth: usize) -> Result<(), ValueError> {
    if depth >= MAX_DEPTH {
        return Err(ValueError::TooDeep);
    }
    let arr_len = table.array.len();
    if arr_len >= COOKIE_MAX as usize {
        buf.put_u8(combine(TYPE_TABLE, COOKIE_MAX));
        encode_integer(buf, arr_len as i64);
    } else {
        buf.put_u8(combine(TYPE_TABLE, arr_len as u8));
    }
    for value in &table.array {
        if value.is_nil() {
            return Err(ValueError::NilTableValue);
        }
        encode_value(buf, value, depth + 1)?;
    }
    for (key, value) in &table.hash {
        if value.is_nil() {
            return Err(ValueError::NilTableValue);
        }
        encode_key(buf, key);
        encode_value(buf, value, depth + 1)?;
    }
    // nil sentinel terminates the hash part
    buf.put_u8(combine(TYPE_NIL, 0));
    Ok(())
}

// ── Decoding ─────────────────────────────────────────────────────────────────

fn need(buf: &mut &[u8], n: usize) -> Result<(), ValueError> {
    if buf.remaining() < n {
        return Err(ValueError::Truncated);
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, ValueError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>, ValueError> {
    need(buf, n)?;
    let mut out = vec![0u8; n];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn decode_value(buf: &mut &[u8], depth: usize) -> Result<Value, ValueError> {
    let head = take_u8(buf)?;
    let (typ, cookie) = (head & 0x07, head >> 3);
    match typ {
        TYPE_NIL => Ok(Value::Nil),
        TYPE_BOOLEAN => Ok(Value::Boolean(cookie != 0)),
        TYPE_NUMBER => {
            if cookie == NUMBER_REAL {
                need(buf, 8)?;
                Ok(Value::Real(buf.get_f64_le()))
            } else {
                Ok(Value::Integer(decode_integer(buf, cookie)?))
            }
        }
        TYPE_USERDATA => {
            // the reference format stores a raw pointer here; skip it
            need(buf, 8)?;
            buf.advance(8);
            Ok(Value::Nil)
        }
        TYPE_SHORT_STRING => Ok(Value::String(take_bytes(buf, cookie as usize)?)),
        TYPE_LONG_STRING => decode_long_string(buf, cookie),
        TYPE_TABLE => decode_table(buf, cookie, depth),
        other => Err(ValueError::UnknownType(other)),
    }
}

fn decode_integer(buf: &mut &[u8], cookie: u8) -> Result<i64, ValueError> {
    match cookie {
        NUMBER_ZERO => Ok(0),
        NUMBER_BYTE => {
            need(buf, 1)?;
            Ok(i64::from(buf.get_u8()))
        }
        NUMBER_WORD => {
            need(buf, 2)?;
            Ok(i64::from(buf.get_u16_le()))
        }
        NUMBER_DWORD => {
            need(buf, 4)?;
            Ok(i64::from(buf.get_i32_le()))
        }
        NUMBER_QWORD => {
            need(buf, 8)?;
            Ok(buf.get_i64_le())
        }
        other => Err(ValueError::UnknownIntegerCookie(other)),
    }
}

fn decode_long_string(buf: &mut &[u8], cookie: u8) -> Result<Value, ValueError> {
    let sz = match cookie {
        2 => {
            need(buf, 2)?;
            buf.get_u16_le() as usize
        }
        4 => {
            need(buf, 4)?;
            buf.get_u32_le() as usize
        }
        other => return Err(ValueError::UnknownLongStringCookie(other)),
    };
    Ok(Value::String(take_bytes(buf, sz)?))
}

fn decode_table(buf: &mut &[u8], cookie: u8, depth: usize) -> Result<Value, ValueError> {
    if depth >= MAX_DEPTH {
        return Err(ValueError::TooDeep);
    }
    let arr_len = if cookie == COOKIE_MAX {
        let head = take_u8(buf)?;
        let (typ, c) = (head & 0x07, head >> 3);
        if typ != TYPE_NUMBER || c == NUMBER_REAL {
            return Err(ValueError::BadTableLength(head));
        }
        let n = decode_integer(buf, c)?;
        usize::try_from(n).map_err(|_| ValueError::BadTableLength(head))?
    } else {
        cookie as usize
    };

    // every element is at least one byte, so a declared length beyond
    // the remaining buffer is truncation; checked before any allocation
    need(buf, arr_len)?;

    let mut table = Table {
        array: Vec::with_capacity(arr_len),
        hash: Default::default(),
    };
    for _ in 0..arr_len {
        table.array.push(decode_value(buf, depth + 1)?);
    }
    loop {
        let key = decode_value(buf, depth + 1)?;
        if key.is_nil() {
            break;
        }
        let key = Key::try_from(key)?;
        let value = decode_value(buf, depth + 1)?;
        table.hash.insert(key, value);
    }
    Ok(Value::Table(table))
}

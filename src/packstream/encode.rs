//! Canonical Packstream encoder.
//!
//! Every value is emitted in its shortest valid form: integers pick the
//! narrowest marker that fits, and sized values pick the smallest of the
//! tiny/8/16/32 length classes.

use super::value::{Structure, Value};
use super::{PackstreamError, MAX_SIZE_32};
use bytes::{BufMut, BytesMut};

// Fixed markers.
pub(crate) const NULL: u8 = 0xC0;
pub(crate) const FLOAT_64: u8 = 0xC1;
pub(crate) const FALSE: u8 = 0xC2;
pub(crate) const TRUE: u8 = 0xC3;

// Integer width markers. TINY_INT is the byte itself for [-16, 127].
pub(crate) const INT_8: u8 = 0xC8;
pub(crate) const INT_16: u8 = 0xC9;
pub(crate) const INT_32: u8 = 0xCA;
pub(crate) const INT_64: u8 = 0xCB;

// Sized-value markers: tiny nibble base, then 8/16/32-bit length prefixes.
pub(crate) const TINY_STRING: u8 = 0x80;
pub(crate) const STRING_8: u8 = 0xD0;
pub(crate) const STRING_16: u8 = 0xD1;
pub(crate) const STRING_32: u8 = 0xD2;

pub(crate) const TINY_LIST: u8 = 0x90;
pub(crate) const LIST_8: u8 = 0xD4;
pub(crate) const LIST_16: u8 = 0xD5;
pub(crate) const LIST_32: u8 = 0xD6;

pub(crate) const TINY_MAP: u8 = 0xA0;
pub(crate) const MAP_8: u8 = 0xD8;
pub(crate) const MAP_16: u8 = 0xD9;
pub(crate) const MAP_32: u8 = 0xDA;

pub(crate) const BYTES_8: u8 = 0xCC;
pub(crate) const BYTES_16: u8 = 0xCD;
pub(crate) const BYTES_32: u8 = 0xCE;

pub(crate) const TINY_STRUCT: u8 = 0xB0;

/// Encode `value` onto `out`.
pub fn encode(value: &Value, out: &mut BytesMut) -> Result<(), PackstreamError> {
    match value {
        Value::Null => out.put_u8(NULL),
        Value::Bool(true) => out.put_u8(TRUE),
        Value::Bool(false) => out.put_u8(FALSE),
        Value::Int(i) => encode_int(*i, out),
        Value::Float(f) => {
            out.put_u8(FLOAT_64);
            out.put_f64(*f);
        }
        Value::String(s) => {
            encode_size(s.len(), TINY_STRING, STRING_8, STRING_16, STRING_32, out)?;
            out.put_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            encode_bytes_size(b.len(), out)?;
            out.put_slice(b);
        }
        Value::List(items) => {
            encode_size(items.len(), TINY_LIST, LIST_8, LIST_16, LIST_32, out)?;
            for item in items {
                encode(item, out)?;
            }
        }
        Value::Map(map) => {
            encode_size(map.len(), TINY_MAP, MAP_8, MAP_16, MAP_32, out)?;
            for (key, val) in map {
                encode_size(key.len(), TINY_STRING, STRING_8, STRING_16, STRING_32, out)?;
                out.put_slice(key.as_bytes());
                encode(val, out)?;
            }
        }
        Value::Structure(s) => encode_structure(s, out)?,
    }
    Ok(())
}

/// Encode a single value into a fresh buffer.
pub fn encode_to_vec(value: &Value) -> Result<Vec<u8>, PackstreamError> {
    let mut buf = BytesMut::new();
    encode(value, &mut buf)?;
    Ok(buf.to_vec())
}

pub(crate) fn encode_structure(s: &Structure, out: &mut BytesMut) -> Result<(), PackstreamError> {
    if s.fields.len() > 15 {
        return Err(PackstreamError::StructTooLarge(s.fields.len()));
    }
    out.put_u8(TINY_STRUCT | s.fields.len() as u8);
    out.put_u8(s.signature);
    for field in &s.fields {
        encode(field, out)?;
    }
    Ok(())
}

fn encode_int(i: i64, out: &mut BytesMut) {
    if (-16..=127).contains(&i) {
        out.put_i8(i as i8);
    } else if i8::try_from(i).is_ok() {
        out.put_u8(INT_8);
        out.put_i8(i as i8);
    } else if i16::try_from(i).is_ok() {
        out.put_u8(INT_16);
        out.put_i16(i as i16);
    } else if i32::try_from(i).is_ok() {
        out.put_u8(INT_32);
        out.put_i32(i as i32);
    } else {
        out.put_u8(INT_64);
        out.put_i64(i);
    }
}

fn encode_size(
    len: usize,
    tiny: u8,
    m8: u8,
    m16: u8,
    m32: u8,
    out: &mut BytesMut,
) -> Result<(), PackstreamError> {
    if len < 16 {
        out.put_u8(tiny | len as u8);
    } else if len < 256 {
        out.put_u8(m8);
        out.put_u8(len as u8);
    } else if len < 65_536 {
        out.put_u8(m16);
        out.put_u16(len as u16);
    } else if len <= MAX_SIZE_32 {
        out.put_u8(m32);
        out.put_u32(len as u32);
    } else {
        return Err(PackstreamError::LengthOverflow(len as u64));
    }
    Ok(())
}

fn encode_bytes_size(len: usize, out: &mut BytesMut) -> Result<(), PackstreamError> {
    if len < 256 {
        out.put_u8(BYTES_8);
        out.put_u8(len as u8);
    } else if len < 65_536 {
        out.put_u8(BYTES_16);
        out.put_u16(len as u16);
    } else if len <= MAX_SIZE_32 {
        out.put_u8(BYTES_32);
        out.put_u32(len as u32);
    } else {
        return Err(PackstreamError::LengthOverflow(len as u64));
    }
    Ok(())
}

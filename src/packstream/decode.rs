//! Bounded Packstream decoder.
//!
//! A pure function over a byte slice. Rejects unknown markers, length
//! prefixes that exceed the remaining input, invalid UTF-8 in string
//! positions, duplicate map keys, and nesting beyond
//! [`MAX_NESTING_DEPTH`](super::MAX_NESTING_DEPTH).

use super::value::{Structure, Value, ValueMap};
use super::{PackstreamError, MAX_NESTING_DEPTH, MAX_SIZE_32};

/// Decode one value from the front of `input`, returning it together with
/// the number of bytes consumed.
pub fn decode(input: &[u8]) -> Result<(Value, usize), PackstreamError> {
    let mut decoder = Decoder::new(input);
    let value = decoder.decode_value()?;
    Ok((value, decoder.position()))
}

/// Decode one value and require that it spans the whole input.
pub fn decode_exact(input: &[u8]) -> Result<Value, PackstreamError> {
    let (value, consumed) = decode(input)?;
    if consumed != input.len() {
        return Err(PackstreamError::TrailingBytes(input.len() - consumed));
    }
    Ok(value)
}

/// Cursor over a byte slice with depth accounting.
pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn decode_value(&mut self) -> Result<Value, PackstreamError> {
        let marker = self.take_u8()?;
        match marker {
            // Tiny positive int: the marker byte is the value.
            0x00..=0x7F => Ok(Value::Int(marker as i64)),
            // Tiny negative int: [-16, -1].
            0xF0..=0xFF => Ok(Value::Int(marker as i8 as i64)),

            super::encode::NULL => Ok(Value::Null),
            super::encode::TRUE => Ok(Value::Bool(true)),
            super::encode::FALSE => Ok(Value::Bool(false)),
            super::encode::FLOAT_64 => {
                let raw = self.take_array::<8>()?;
                Ok(Value::Float(f64::from_be_bytes(raw)))
            }

            super::encode::INT_8 => Ok(Value::Int(self.take_u8()? as i8 as i64)),
            super::encode::INT_16 => {
                let raw = self.take_array::<2>()?;
                Ok(Value::Int(i16::from_be_bytes(raw) as i64))
            }
            super::encode::INT_32 => {
                let raw = self.take_array::<4>()?;
                Ok(Value::Int(i32::from_be_bytes(raw) as i64))
            }
            super::encode::INT_64 => {
                let raw = self.take_array::<8>()?;
                Ok(Value::Int(i64::from_be_bytes(raw)))
            }

            0x80..=0x8F => self.decode_string((marker & 0x0F) as usize),
            super::encode::STRING_8 => {
                let len = self.take_u8()? as usize;
                self.decode_string(len)
            }
            super::encode::STRING_16 => {
                let len = self.take_u16()? as usize;
                self.decode_string(len)
            }
            super::encode::STRING_32 => {
                let len = self.take_u32_size()?;
                self.decode_string(len)
            }

            super::encode::BYTES_8 => {
                let len = self.take_u8()? as usize;
                Ok(Value::Bytes(self.take_slice(len)?.to_vec()))
            }
            super::encode::BYTES_16 => {
                let len = self.take_u16()? as usize;
                Ok(Value::Bytes(self.take_slice(len)?.to_vec()))
            }
            super::encode::BYTES_32 => {
                let len = self.take_u32_size()?;
                Ok(Value::Bytes(self.take_slice(len)?.to_vec()))
            }

            0x90..=0x9F => self.decode_list((marker & 0x0F) as usize),
            super::encode::LIST_8 => {
                let len = self.take_u8()? as usize;
                self.decode_list(len)
            }
            super::encode::LIST_16 => {
                let len = self.take_u16()? as usize;
                self.decode_list(len)
            }
            super::encode::LIST_32 => {
                let len = self.take_u32_size()?;
                self.decode_list(len)
            }

            0xA0..=0xAF => self.decode_map((marker & 0x0F) as usize),
            super::encode::MAP_8 => {
                let len = self.take_u8()? as usize;
                self.decode_map(len)
            }
            super::encode::MAP_16 => {
                let len = self.take_u16()? as usize;
                self.decode_map(len)
            }
            super::encode::MAP_32 => {
                let len = self.take_u32_size()?;
                self.decode_map(len)
            }

            0xB0..=0xBF => self.decode_structure((marker & 0x0F) as usize),

            other => Err(PackstreamError::UnknownMarker(other)),
        }
    }

    fn decode_string(&mut self, len: usize) -> Result<Value, PackstreamError> {
        let raw = self.take_slice(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| PackstreamError::InvalidUtf8)?;
        Ok(Value::String(s.to_owned()))
    }

    fn decode_list(&mut self, len: usize) -> Result<Value, PackstreamError> {
        self.enter()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode_value()?);
        }
        self.leave();
        Ok(Value::List(items))
    }

    fn decode_map(&mut self, len: usize) -> Result<Value, PackstreamError> {
        self.enter()?;
        let mut map = ValueMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match self.decode_value()? {
                Value::String(s) => s,
                _ => return Err(PackstreamError::InvalidUtf8),
            };
            let value = self.decode_value()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(PackstreamError::DuplicateKey(key));
            }
        }
        self.leave();
        Ok(Value::Map(map))
    }

    fn decode_structure(&mut self, size: usize) -> Result<Value, PackstreamError> {
        self.enter()?;
        let signature = self.take_u8()?;
        let mut fields = Vec::with_capacity(size);
        for _ in 0..size {
            fields.push(self.decode_value()?);
        }
        self.leave();
        Ok(Value::Structure(Structure::new(signature, fields)))
    }

    fn enter(&mut self) -> Result<(), PackstreamError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(PackstreamError::DepthExceeded);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn take_u8(&mut self) -> Result<u8, PackstreamError> {
        let b = *self
            .input
            .get(self.pos)
            .ok_or(PackstreamError::UnexpectedEnd {
                needed: 1,
                remaining: 0,
            })?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u16(&mut self) -> Result<u16, PackstreamError> {
        let raw = self.take_array::<2>()?;
        Ok(u16::from_be_bytes(raw))
    }

    fn take_u32_size(&mut self) -> Result<usize, PackstreamError> {
        let raw = self.take_array::<4>()?;
        let len = u32::from_be_bytes(raw) as usize;
        if len > MAX_SIZE_32 {
            return Err(PackstreamError::LengthOverflow(len as u64));
        }
        Ok(len)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PackstreamError> {
        let slice = self.take_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], PackstreamError> {
        let remaining = self.input.len() - self.pos;
        if len > remaining {
            return Err(PackstreamError::UnexpectedEnd {
                needed: len - remaining,
                remaining,
            });
        }
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::super::encode::encode_to_vec;
    use super::*;

    fn roundtrip(value: Value) {
        let bytes = encode_to_vec(&value).unwrap();
        let back = decode_exact(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn roundtrips_every_variant() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Int(i64::MAX));
        roundtrip(Value::Float(std::f64::consts::PI));
        roundtrip(Value::String("héllo wörld".into()));
        roundtrip(Value::Bytes(vec![0, 1, 2, 255]));
        roundtrip(Value::List(vec![
            Value::Int(1),
            Value::String("two".into()),
            Value::Null,
        ]));
        roundtrip(Value::map([
            ("name", Value::String("ada".into())),
            ("age", Value::Int(36)),
        ]));
        roundtrip(Value::Structure(Structure::new(
            0x4E,
            vec![Value::Int(7), Value::List(vec![]), Value::Map(ValueMap::new())],
        )));
    }

    #[test]
    fn wide_markers_for_small_values_still_decode() {
        // A non-canonical encoding (INT_64 for 1) must be accepted.
        let bytes = [0xCB, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(decode_exact(&bytes).unwrap(), Value::Int(1));
    }

    #[test]
    fn rejects_unknown_marker() {
        assert!(matches!(
            decode_exact(&[0xC7]),
            Err(PackstreamError::UnknownMarker(0xC7))
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        // STRING_8 announcing 5 bytes with only 2 present.
        let bytes = [0xD0, 0x05, b'a', b'b'];
        assert!(matches!(
            decode_exact(&bytes),
            Err(PackstreamError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let bytes = [0x82, 0xFF, 0xFE];
        assert!(matches!(
            decode_exact(&bytes),
            Err(PackstreamError::InvalidUtf8)
        ));
    }

    #[test]
    fn rejects_duplicate_map_keys() {
        // {"a": 1, "a": 2} on the wire.
        let bytes = [0xA2, 0x81, b'a', 0x01, 0x81, b'a', 0x02];
        assert!(matches!(
            decode_exact(&bytes),
            Err(PackstreamError::DuplicateKey(_))
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        // 300 nested single-element lists.
        let mut bytes = vec![0x91u8; 300];
        bytes.push(0xC0);
        assert!(matches!(
            decode_exact(&bytes),
            Err(PackstreamError::DepthExceeded)
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let bytes = [0x01, 0x02];
        assert!(matches!(
            decode_exact(&bytes),
            Err(PackstreamError::TrailingBytes(1))
        ));
    }
}

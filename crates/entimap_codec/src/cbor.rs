//! Canonical CBOR encoding of documents.
//!
//! Encoding rules (RFC 8949 §4.2.1 subset):
//! - integers and lengths use the shortest form
//! - map keys are text and appear in canonical order
//! - no floats, tags or indefinite-length items
//!
//! The decoder enforces the same rules, so `encode(decode(b)) == b` for any
//! accepted input.

use crate::error::{CodecError, CodecResult};
use crate::value::{key_order, Value};
use std::cmp::Ordering;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;

/// Largest element count accepted for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Largest byte or text string accepted.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Encodes a value to canonical CBOR bytes.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Appends the canonical encoding of `value` to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Null => out.push(NULL),
        Value::Bool(b) => out.push(if *b { TRUE } else { FALSE }),
        Value::Integer(n) => {
            if *n >= 0 {
                write_head(out, MAJOR_UNSIGNED, n.unsigned_abs());
            } else {
                // -1 - n, computed without overflow for i64::MIN
                write_head(out, MAJOR_NEGATIVE, (n + 1).unsigned_abs());
            }
        }
        Value::Bytes(b) => {
            write_head(out, MAJOR_BYTES, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Text(s) => write_text(out, s),
        Value::Array(items) => {
            write_head(out, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                encode_into(item, out)?;
            }
        }
        Value::Map(pairs) => {
            write_head(out, MAJOR_MAP, pairs.len() as u64);
            let mut prev: Option<&str> = None;
            for (key, item) in pairs {
                if let Some(p) = prev {
                    if key_order(p, key) != Ordering::Less {
                        return Err(CodecError::non_canonical(format!(
                            "map key {key:?} out of order"
                        )));
                    }
                }
                prev = Some(key);
                write_text(out, key);
                encode_into(item, out)?;
            }
        }
    }
    Ok(())
}

fn write_text(out: &mut Vec<u8>, s: &str) {
    write_head(out, MAJOR_TEXT, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

#[allow(clippy::cast_possible_truncation)]
fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let mt = major << 5;
    if arg < 24 {
        out.push(mt | arg as u8);
    } else if arg <= u64::from(u8::MAX) {
        out.push(mt | 24);
        out.push(arg as u8);
    } else if arg <= u64::from(u16::MAX) {
        out.push(mt | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u64::from(u32::MAX) {
        out.push(mt | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(mt | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

/// Decodes exactly one value from `bytes`.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.value()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: bytes.len() - decoder.pos,
        });
    }
    Ok(value)
}

/// Streaming canonical CBOR decoder.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns true once all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Decodes the next value.
    pub fn value(&mut self) -> CodecResult<Value> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        match major {
            MAJOR_UNSIGNED => {
                let n = self.argument(info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            MAJOR_NEGATIVE => {
                let n = self.argument(info)?;
                i64::try_from(n)
                    .map(|n| Value::Integer(-1 - n))
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            MAJOR_BYTES => {
                let len = self.length(info, MAX_BYTES_LENGTH)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_TEXT => {
                let len = self.length(info, MAX_BYTES_LENGTH)?;
                Ok(Value::Text(self.text(len)?))
            }
            MAJOR_ARRAY => {
                let len = self.length(info, MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.value()?);
                }
                Ok(Value::Array(items))
            }
            MAJOR_MAP => self.map(info),
            MAJOR_TAG => Err(CodecError::unsupported("tagged item")),
            MAJOR_SIMPLE => self.simple(info),
            _ => unreachable!("major type is three bits"),
        }
    }

    fn map(&mut self, info: u8) -> CodecResult<Value> {
        let len = self.length(info, MAX_CONTAINER_ELEMENTS)?;
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let head = self.byte()?;
            if head >> 5 != MAJOR_TEXT {
                return Err(CodecError::NonTextKey);
            }
            let key_len = self.length(head & 0x1f, MAX_BYTES_LENGTH)?;
            let key = self.text(key_len)?;
            if let Some((prev, _)) = pairs.last() {
                if key_order(prev, &key) != Ordering::Less {
                    return Err(CodecError::non_canonical("map keys not in sorted order"));
                }
            }
            let item = self.value()?;
            pairs.push((key, item));
        }
        Ok(Value::Map(pairs))
    }

    fn simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            25..=27 => Err(CodecError::FloatForbidden),
            31 => Err(CodecError::IndefiniteLengthForbidden),
            other => Err(CodecError::unsupported(format!("simple value {other}"))),
        }
    }

    fn byte(&mut self) -> CodecResult<u8> {
        let b = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn text(&mut self, len: usize) -> CodecResult<String> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn length(&mut self, info: u8, limit: u64) -> CodecResult<usize> {
        let claimed = self.argument(info)?;
        if claimed > limit {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed: limit,
            });
        }
        Ok(claimed as usize)
    }

    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (value, min) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.byte()?), 24),
            25 => {
                let b = self.take(2)?;
                (u64::from(u16::from_be_bytes([b[0], b[1]])), 0x100)
            }
            26 => {
                let b = self.take(4)?;
                (u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])), 0x1_0000)
            }
            27 => {
                let b = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                (u64::from_be_bytes(buf), 0x1_0000_0000)
            }
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::unsupported("reserved additional info")),
        };
        if value < min {
            return Err(CodecError::non_canonical(
                "argument could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_use_shortest_form() {
        assert_eq!(to_canonical_cbor(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_canonical_cbor(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(24)).unwrap(),
            vec![0x18, 24]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(256)).unwrap(),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(to_canonical_cbor(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(-100)).unwrap(),
            vec![0x38, 99]
        );
    }

    #[test]
    fn integer_extremes() {
        for n in [i64::MIN, i64::MAX, 0, -1] {
            let bytes = to_canonical_cbor(&Value::Integer(n)).unwrap();
            assert_eq!(from_cbor(&bytes).unwrap(), Value::Integer(n));
        }
    }

    #[test]
    fn document_encoding_is_canonical() {
        let doc = Value::document().with("bb", 2).with("a", 1);
        let bytes = to_canonical_cbor(&doc).unwrap();
        assert_eq!(bytes, vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]);
    }

    #[test]
    fn nested_document() {
        let doc = Value::document()
            .with("name", "Ada")
            .with("tags", Value::Array(vec!["x".into(), "y".into()]))
            .with("address", Value::document().with("city", "London"))
            .with("id", Value::Bytes(vec![1, 2, 3]))
            .with("spouse", Value::Null);
        let bytes = to_canonical_cbor(&doc).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), doc);
    }

    #[test]
    fn hand_built_unsorted_map_is_rejected_by_encoder() {
        let map = Value::Map(vec![
            ("b".to_string(), Value::Null),
            ("a".to_string(), Value::Null),
        ]);
        assert!(matches!(
            to_canonical_cbor(&map),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn rejects_unsorted_keys() {
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn rejects_integer_keys() {
        assert_eq!(from_cbor(&[0xa1, 0x01, 0x01]), Err(CodecError::NonTextKey));
    }

    #[test]
    fn rejects_floats_and_indefinite_items() {
        assert_eq!(from_cbor(&[0xf9, 0, 0]), Err(CodecError::FloatForbidden));
        assert_eq!(
            from_cbor(&[0x9f, 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        );
    }

    #[test]
    fn rejects_non_shortest_argument() {
        assert!(matches!(
            from_cbor(&[0x18, 23]),
            Err(CodecError::NonCanonical { .. })
        ));
        assert!(matches!(
            from_cbor(&[0x19, 0x00, 0xff]),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn rejects_unsigned_beyond_i64() {
        let mut bytes = vec![0x1b];
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(from_cbor(&bytes), Err(CodecError::IntegerOverflow));
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert_eq!(
            from_cbor(&[0x01, 0x02]),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn truncated_input() {
        assert_eq!(from_cbor(&[]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x62, b'a']), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn rejects_tags() {
        assert!(matches!(
            from_cbor(&[0xc1, 0x01]),
            Err(CodecError::Unsupported { .. })
        ));
    }
}

//! Strict canonical CBOR decoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;

/// Longest byte or text string accepted.
const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;

/// Most elements accepted in one array or map.
const MAX_CONTAINER_LEN: u64 = 4 * 1024 * 1024;

/// Deepest nesting of arrays and maps accepted.
pub const MAX_DEPTH: usize = 128;

/// Decodes exactly one canonical value from `bytes`.
///
/// # Errors
///
/// Any deviation from canonical form, a float, a tag, trailing bytes, or
/// a truncated input.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    match decoder.remaining().len() {
        0 => Ok(value),
        remaining => Err(CodecError::TrailingBytes { remaining }),
    }
}

/// Reads canonical values from a byte slice one at a time.
#[derive(Debug)]
pub struct CanonicalDecoder<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Wraps `input`.
    #[must_use]
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    /// Decodes the next value.
    ///
    /// # Errors
    ///
    /// See [`from_cbor`].
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        match major {
            0 => {
                let n = self.argument(info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.argument(info)?;
                let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?;
                Ok(Value::Integer(-1 - n))
            }
            2 => {
                let len = self.length(info, MAX_STRING_LEN)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            3 => {
                let len = self.length(info, MAX_STRING_LEN)?;
                let raw = self.take(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_owned()))
            }
            4 => {
                let len = self.length(info, MAX_CONTAINER_LEN)?;
                self.nested(|this| {
                    let mut items = Vec::with_capacity(len.min(1024));
                    for _ in 0..len {
                        items.push(this.decode()?);
                    }
                    Ok(Value::Array(items))
                })
            }
            5 => {
                let len = self.length(info, MAX_CONTAINER_LEN)?;
                self.nested(|this| this.map_entries(len))
            }
            6 => Err(CodecError::unsupported_type("tagged item")),
            _ => self.simple(info),
        }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        let input = self.input;
        &input[self.pos..]
    }

    /// Returns `true` once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::DepthLimitExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn map_entries(&mut self, len: usize) -> CodecResult<Value> {
        let mut pairs = Vec::with_capacity(len.min(1024));
        let mut previous: Option<&'a [u8]> = None;
        for _ in 0..len {
            let start = self.pos;
            let key = self.decode()?;
            let input = self.input;
            let raw_key = &input[start..self.pos];
            if let Some(prev) = previous {
                match prev.len().cmp(&raw_key.len()).then_with(|| prev.cmp(raw_key)) {
                    Ordering::Less => {}
                    Ordering::Equal => return Err(CodecError::non_canonical("duplicate map key")),
                    Ordering::Greater => {
                        return Err(CodecError::non_canonical("map keys out of order"))
                    }
                }
            }
            previous = Some(raw_key);
            let value = self.decode()?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }

    fn simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Err(CodecError::unsupported_type("undefined")),
            25..=27 => Err(CodecError::FloatForbidden),
            31 => Err(CodecError::invalid_structure("break outside indefinite item")),
            other => Err(CodecError::unsupported_type(format!("simple value {other}"))),
        }
    }

    fn length(&mut self, info: u8, max: u64) -> CodecResult<usize> {
        let claimed = self.argument(info)?;
        if claimed > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed: max,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed: max,
        })
    }

    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (value, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.byte()?), 24),
            25 => (u64::from(u16::from_be_bytes(self.array()?)), 0x100),
            26 => (u64::from(u32::from_be_bytes(self.array()?)), 0x1_0000),
            27 => (u64::from_be_bytes(self.array()?), 0x1_0000_0000),
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if value < floor {
            return Err(CodecError::non_canonical("integer head is not the shortest form"));
        }
        Ok(value)
    }

    fn byte(&mut self) -> CodecResult<u8> {
        let byte = *self.input.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let input = self.input;
        let slice = input.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }
}

//! Canonical CBOR encoder (RFC 8949 §4.2.1 core deterministic encoding).

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use bytes::{BufMut, Bytes, BytesMut};

/// Encodes `value` to its canonical CBOR bytes.
///
/// # Errors
///
/// Fails only for maps holding the same key twice.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.finish().to_vec())
}

/// Incremental canonical encoder.
///
/// Several values may be written back to back; [`finish`](Self::finish)
/// hands out the buffer as immutable [`Bytes`].
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buf: BytesMut,
}

impl CanonicalEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends the encoding of `value`.
    ///
    /// # Errors
    ///
    /// [`CodecError::NonCanonical`] for a map with a duplicated key.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buf.put_u8(0xf6),
            Value::Bool(false) => self.buf.put_u8(0xf4),
            Value::Bool(true) => self.buf.put_u8(0xf5),
            Value::Integer(n) if *n >= 0 => self.head(0, n.unsigned_abs()),
            // -1 - n, which is |n| - 1 and never overflows
            Value::Integer(n) => self.head(1, n.unsigned_abs() - 1),
            Value::Bytes(bytes) => {
                self.head(2, bytes.len() as u64);
                self.buf.put_slice(bytes);
            }
            Value::Text(text) => {
                self.head(3, text.len() as u64);
                self.buf.put_slice(text.as_bytes());
            }
            Value::Array(items) => {
                self.head(4, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Map(pairs) => self.encode_map(pairs)?,
        }
        Ok(())
    }

    /// Bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn head(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        match arg {
            0..=23 => self.buf.put_u8(major | arg as u8),
            24..=0xFF => {
                self.buf.put_u8(major | 24);
                self.buf.put_u8(arg as u8);
            }
            0x100..=0xFFFF => {
                self.buf.put_u8(major | 25);
                self.buf.put_u16(arg as u16);
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.buf.put_u8(major | 26);
                self.buf.put_u32(arg as u32);
            }
            _ => {
                self.buf.put_u8(major | 27);
                self.buf.put_u64(arg);
            }
        }
    }

    fn encode_map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            entries.push((to_canonical_cbor(key)?, value));
        }
        entries.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
        if entries.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(CodecError::non_canonical("duplicate map key"));
        }

        self.head(5, entries.len() as u64);
        for (key, value) in entries {
            self.buf.put_slice(&key);
            self.encode(value)?;
        }
        Ok(())
    }
}

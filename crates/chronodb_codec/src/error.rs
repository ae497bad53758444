//! Codec errors.

use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding canonical CBOR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Floating point values have no canonical form here.
    #[error("floating point values are not allowed")]
    FloatForbidden,

    /// Indefinite-length strings, arrays and maps are rejected.
    #[error("indefinite-length items are not allowed")]
    IndefiniteLengthForbidden,

    /// Text was not valid UTF-8.
    #[error("text is not valid UTF-8")]
    InvalidUtf8,

    /// Input ended in the middle of an item.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Bytes remained after the top-level item.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// Well-formed CBOR that violates a canonical rule.
    #[error("non-canonical encoding: {message}")]
    NonCanonical {
        /// Which rule was broken.
        message: String,
    },

    /// Malformed CBOR.
    #[error("invalid CBOR structure: {message}")]
    InvalidStructure {
        /// Description of the problem.
        message: String,
    },

    /// A CBOR construct this model does not represent (tags, undefined, ...).
    #[error("unsupported CBOR item: {type_name}")]
    UnsupportedType {
        /// What was found.
        type_name: String,
    },

    /// An integer outside the `i64` range.
    #[error("integer does not fit in i64")]
    IntegerOverflow,

    /// A length prefix larger than the decoder accepts.
    #[error("length {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// Length announced by the input.
        claimed: u64,
        /// Configured maximum.
        max_allowed: u64,
    },

    /// Arrays and maps nested deeper than the decoder accepts.
    #[error("nesting deeper than {max_depth}")]
    DepthLimitExceeded {
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// Conversion through serde failed.
    #[error("serde conversion failed: {message}")]
    Serde {
        /// Message from the serde data model.
        message: String,
    },
}

impl CodecError {
    /// Builds a [`CodecError::NonCanonical`].
    pub fn non_canonical(message: impl Into<String>) -> Self {
        Self::NonCanonical {
            message: message.into(),
        }
    }

    /// Builds a [`CodecError::InvalidStructure`].
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Builds a [`CodecError::UnsupportedType`].
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Builds a [`CodecError::Serde`].
    pub fn serde(message: impl std::fmt::Display) -> Self {
        Self::Serde {
            message: message.to_string(),
        }
    }
}

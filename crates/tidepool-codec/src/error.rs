//! Error types for the envelope codec.

use thiserror::Error;

use crate::types::TypeCode;

/// Errors returned while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The decoder saw a type code outside the closed set.
    #[error("unknown envelope type code {0:#04x}")]
    UnknownTypeCode(u8),

    /// The payload length does not match the scalar type's fixed width.
    #[error("payload of {found} bytes invalid for {code:?} (expected {expected})")]
    PayloadLength {
        code: TypeCode,
        expected: usize,
        found: usize,
    },

    /// A text payload was not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The stored UTF-16 code unit is not a scalar value (a lone surrogate).
    #[error("{0:#06x} is not a valid UTF-16 code unit for a char")]
    InvalidChar(u16),

    /// Chars outside the Basic Multilingual Plane take two UTF-16 units and
    /// cannot use the single-unit Char encoding.
    #[error("char {0:?} does not fit in one UTF-16 code unit")]
    WideChar(char),

    /// Structured payloads must have a document or a sequence at the root.
    #[error("object payload root must be a document or a sequence")]
    ObjectRoot,

    /// The decoded value does not have the type the caller asked for.
    #[error("expected a {expected} value, found {found:?}")]
    TypeMismatch {
        expected: &'static str,
        found: TypeCode,
    },

    /// BSON encoding of a structured object failed.
    #[error("object encode: {0}")]
    ObjectEncode(#[from] bson::ser::Error),

    /// BSON decoding of a structured object failed.
    #[error("object decode: {0}")]
    ObjectDecode(#[from] bson::de::Error),
}

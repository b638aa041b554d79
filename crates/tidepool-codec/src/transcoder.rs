//! The pluggable codec seam.
//!
//! `Transcoder` is the interface the operation layer encodes and decodes
//! through; `EnvelopeTranscoder` is the stock implementation. Deployments
//! with their own storage format substitute a different implementation
//! instead of subclassing anything.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;
use crate::parse;
use crate::serialize;
use crate::types::{CacheItem, CacheValue, TickTime, TypeCode};

/// Encodes values into wire envelopes and back.
pub trait Transcoder: Send + Sync {
    fn encode(&self, value: &CacheValue) -> Result<CacheItem, CodecError>;
    fn decode(&self, item: &CacheItem) -> Result<CacheValue, CodecError>;
}

/// The stock type-tagged envelope codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeTranscoder;

impl Transcoder for EnvelopeTranscoder {
    fn encode(&self, value: &CacheValue) -> Result<CacheItem, CodecError> {
        serialize::encode(value)
    }

    fn decode(&self, item: &CacheItem) -> Result<CacheValue, CodecError> {
        parse::decode(item)
    }
}

impl EnvelopeTranscoder {
    /// Decodes into a concrete scalar type when the caller knows what the
    /// slot holds.
    pub fn decode_as<T>(&self, item: &CacheItem) -> Result<T, CodecError>
    where
        T: TryFrom<CacheValue, Error = CodecError>,
    {
        T::try_from(parse::decode(item)?)
    }

    /// Encodes any serializable value as a structured-object envelope.
    pub fn encode_object<T: Serialize>(&self, value: &T) -> Result<CacheItem, CodecError> {
        serialize::encode_object(value)
    }

    /// Decodes a structured-object envelope into a concrete type.
    pub fn decode_object<T: DeserializeOwned>(&self, item: &CacheItem) -> Result<T, CodecError> {
        parse::decode_object(item)
    }

    /// Decodes a structured-object envelope whose root is a sequence.
    pub fn decode_object_seq<T: DeserializeOwned>(
        &self,
        item: &CacheItem,
    ) -> Result<T, CodecError> {
        parse::decode_object_seq(item)
    }
}

fn mismatch(expected: &'static str, value: &CacheValue) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        found: value.type_code().unwrap_or(TypeCode::Empty),
    }
}

macro_rules! scalar_try_from {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl TryFrom<CacheValue> for $ty {
                type Error = CodecError;

                fn try_from(value: CacheValue) -> Result<Self, CodecError> {
                    match value {
                        CacheValue::$variant(v) => Ok(v),
                        other => Err(mismatch($name, &other)),
                    }
                }
            }
        )*
    };
}

scalar_try_from! {
    bool => Bool, "bool";
    char => Char, "char";
    i8 => I8, "i8";
    u8 => U8, "u8";
    i16 => I16, "i16";
    u16 => U16, "u16";
    i32 => I32, "i32";
    u32 => U32, "u32";
    i64 => I64, "i64";
    u64 => U64, "u64";
    f32 => F32, "f32";
    f64 => F64, "f64";
    TickTime => Time, "time";
}

impl TryFrom<CacheValue> for String {
    type Error = CodecError;

    fn try_from(value: CacheValue) -> Result<Self, CodecError> {
        match value {
            CacheValue::Str(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl TryFrom<CacheValue> for bytes::Bytes {
    type Error = CodecError;

    fn try_from(value: CacheValue) -> Result<Self, CodecError> {
        match value {
            CacheValue::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

//! Envelope → value decoding.
//!
//! The raw sentinel is handled before the type switch; everything else
//! dispatches on the low byte of `flags`. Servers may negotiate a 16-bit
//! flags field, so only the low 16 bits are interpreted.

use bson::{Bson, Document};
use serde::de::DeserializeOwned;

use crate::error::CodecError;
use crate::types::{CacheItem, CacheValue, TickTime, TypeCode, FLAG_RAW};

/// Decodes a wire envelope back into a value.
pub fn decode(item: &CacheItem) -> Result<CacheValue, CodecError> {
    let flags = item.flags & 0xFFFF;
    if flags == FLAG_RAW {
        return Ok(CacheValue::Bytes(item.data.clone()));
    }

    let code = (flags & 0xFF) as u8;
    let code = TypeCode::from_u8(code).ok_or(CodecError::UnknownTypeCode(code))?;
    let data = &item.data;

    Ok(match code {
        // Legacy untyped envelopes: empty means null; anything else is text.
        // Servers return counters as ASCII digits with zero flags after an
        // increment, so this path must stay.
        TypeCode::Empty => {
            if data.is_empty() {
                CacheValue::Null
            } else {
                CacheValue::Str(std::str::from_utf8(data)?.to_owned())
            }
        }
        TypeCode::Null => CacheValue::Null,
        TypeCode::Str => CacheValue::Str(std::str::from_utf8(data)?.to_owned()),
        TypeCode::Bool => CacheValue::Bool(fixed::<1>(code, data)?[0] != 0),
        TypeCode::Char => {
            let unit = u16::from_le_bytes(fixed(code, data)?);
            let c = char::from_u32(u32::from(unit)).ok_or(CodecError::InvalidChar(unit))?;
            CacheValue::Char(c)
        }
        TypeCode::I8 => CacheValue::I8(i8::from_le_bytes(fixed(code, data)?)),
        TypeCode::U8 => CacheValue::U8(u8::from_le_bytes(fixed(code, data)?)),
        TypeCode::I16 => CacheValue::I16(i16::from_le_bytes(fixed(code, data)?)),
        TypeCode::U16 => CacheValue::U16(u16::from_le_bytes(fixed(code, data)?)),
        TypeCode::I32 => CacheValue::I32(i32::from_le_bytes(fixed(code, data)?)),
        TypeCode::U32 => CacheValue::U32(u32::from_le_bytes(fixed(code, data)?)),
        TypeCode::I64 => CacheValue::I64(i64::from_le_bytes(fixed(code, data)?)),
        TypeCode::U64 => CacheValue::U64(u64::from_le_bytes(fixed(code, data)?)),
        TypeCode::F32 => CacheValue::F32(f32::from_le_bytes(fixed(code, data)?)),
        TypeCode::F64 => CacheValue::F64(f64::from_le_bytes(fixed(code, data)?)),
        TypeCode::Time => {
            CacheValue::Time(TickTime::from_bits(u64::from_le_bytes(fixed(code, data)?)))
        }
        TypeCode::Object | TypeCode::Decimal => {
            CacheValue::Object(Bson::Document(read_document(data)?))
        }
    })
}

/// Decodes a structured-object envelope into a concrete type.
pub fn decode_object<T: DeserializeOwned>(item: &CacheItem) -> Result<T, CodecError> {
    let doc = read_document(&item.data)?;
    Ok(bson::from_bson(Bson::Document(doc))?)
}

/// Decodes a structured-object envelope whose root is a sequence.
///
/// The writers store root sequences as a document keyed `"0"`, `"1"`, …;
/// this is the "read root as array" entry point that undoes that form.
pub fn decode_object_seq<T: DeserializeOwned>(item: &CacheItem) -> Result<T, CodecError> {
    let doc = read_document(&item.data)?;
    let items: Vec<Bson> = doc.into_iter().map(|(_, value)| value).collect();
    Ok(bson::from_bson(Bson::Array(items))?)
}

fn read_document(data: &[u8]) -> Result<Document, CodecError> {
    Ok(Document::from_reader(data)?)
}

fn fixed<const N: usize>(code: TypeCode, data: &[u8]) -> Result<[u8; N], CodecError> {
    data.try_into().map_err(|_| CodecError::PayloadLength {
        code,
        expected: N,
        found: data.len(),
    })
}

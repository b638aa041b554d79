//! Value → envelope encoding.
//!
//! Scalars are written little-endian with `flags = 0x0100 | type_code`.
//! Raw byte payloads skip the type switch entirely and go out under the
//! [`FLAG_RAW`] sentinel without copying.

use bson::{Bson, Document};
use bytes::Bytes;
use serde::Serialize;

use crate::error::CodecError;
use crate::types::{CacheItem, CacheValue, TypeCode, FLAG_RAW};

/// Encodes a value into its wire envelope.
pub fn encode(value: &CacheValue) -> Result<CacheItem, CodecError> {
    let item = match value {
        // fast path: opaque bytes, zero copy
        CacheValue::Bytes(b) => CacheItem::new(FLAG_RAW, b.clone()),
        CacheValue::Null => CacheItem::new(TypeCode::Null.flags(), Bytes::new()),
        CacheValue::Str(s) => CacheItem::new(
            TypeCode::Str.flags(),
            Bytes::copy_from_slice(s.as_bytes()),
        ),
        CacheValue::Bool(v) => scalar(TypeCode::Bool, &[u8::from(*v)]),
        CacheValue::Char(c) => {
            let unit =
                u16::try_from(*c as u32).map_err(|_| CodecError::WideChar(*c))?;
            scalar(TypeCode::Char, &unit.to_le_bytes())
        }
        CacheValue::I8(v) => scalar(TypeCode::I8, &v.to_le_bytes()),
        CacheValue::U8(v) => scalar(TypeCode::U8, &v.to_le_bytes()),
        CacheValue::I16(v) => scalar(TypeCode::I16, &v.to_le_bytes()),
        CacheValue::U16(v) => scalar(TypeCode::U16, &v.to_le_bytes()),
        CacheValue::I32(v) => scalar(TypeCode::I32, &v.to_le_bytes()),
        CacheValue::U32(v) => scalar(TypeCode::U32, &v.to_le_bytes()),
        CacheValue::I64(v) => scalar(TypeCode::I64, &v.to_le_bytes()),
        CacheValue::U64(v) => scalar(TypeCode::U64, &v.to_le_bytes()),
        CacheValue::F32(v) => scalar(TypeCode::F32, &v.to_le_bytes()),
        CacheValue::F64(v) => scalar(TypeCode::F64, &v.to_le_bytes()),
        CacheValue::Time(t) => scalar(TypeCode::Time, &t.to_bits().to_le_bytes()),
        CacheValue::Object(b) => {
            CacheItem::new(TypeCode::Object.flags(), bson_payload(b)?)
        }
    };
    Ok(item)
}

/// Encodes any serializable value as a structured-object envelope.
///
/// Sequences are written as a document keyed `"0"`, `"1"`, … — the root-array
/// form the canonical clients use. Scalar roots are rejected; they belong in
/// the typed envelope paths.
pub fn encode_object<T: Serialize>(value: &T) -> Result<CacheItem, CodecError> {
    let bson = bson::to_bson(value)?;
    Ok(CacheItem::new(TypeCode::Object.flags(), bson_payload(&bson)?))
}

fn scalar(code: TypeCode, bytes: &[u8]) -> CacheItem {
    CacheItem::new(code.flags(), Bytes::copy_from_slice(bytes))
}

fn bson_payload(value: &Bson) -> Result<Bytes, CodecError> {
    let doc = match value {
        Bson::Document(doc) => doc.clone(),
        Bson::Array(items) => {
            let mut doc = Document::new();
            for (i, item) in items.iter().enumerate() {
                doc.insert(i.to_string(), item.clone());
            }
            doc
        }
        _ => return Err(CodecError::ObjectRoot),
    };
    let mut buf = Vec::new();
    doc.to_writer(&mut buf)?;
    Ok(Bytes::from(buf))
}

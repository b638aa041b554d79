//! tidepool-codec: the value envelope.
//!
//! Cached values travel as a `(flags, bytes)` pair. The low byte of `flags`
//! carries a type code from a closed set, so heterogeneous clients can read
//! each other's writes; the payload is the little-endian encoding of the
//! value. Raw byte blobs skip typing entirely and are marked with a sentinel
//! flags value.
//!
//! The crate is purely synchronous — it never touches the network. The
//! operation layer reads a complete payload first and hands it here.

mod error;
mod parse;
mod serialize;
mod transcoder;
mod types;

pub use error::CodecError;
pub use parse::{decode, decode_object, decode_object_seq};
pub use serialize::{encode, encode_object};
pub use transcoder::{EnvelopeTranscoder, Transcoder};
pub use types::{CacheItem, CacheValue, TickTime, TimeKind, TypeCode, FLAG_HANDLED, FLAG_RAW};

//! Envelope types: the wire item, the closed type-code set, and the tagged
//! value union.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Bit set in `flags` for every envelope this codec produces. Values written
/// by foreign clients that never set it are passed through as opaque bytes.
pub const FLAG_HANDLED: u32 = 0x0100;

/// Sentinel flags value marking an opaque byte payload with no further
/// interpretation.
pub const FLAG_RAW: u32 = 0xFA52;

/// The `(flags, data)` pair stored in a cache slot.
///
/// `data` is reference-counted; cloning an item never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub flags: u32,
    pub data: Bytes,
}

impl CacheItem {
    pub fn new(flags: u32, data: Bytes) -> Self {
        Self { flags, data }
    }

    /// True when `flags` says the payload was written by this codec.
    pub fn is_handled(flags: u32) -> bool {
        flags & FLAG_HANDLED != 0
    }
}

/// The closed set of envelope type codes.
///
/// The numeric values are wire format — they match the canonical clients and
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    /// Untyped legacy values; see the decoder's counter-compat rule.
    Empty = 0,
    /// Structured object, BSON payload.
    Object = 1,
    /// An explicit null, zero-length payload.
    Null = 2,
    Bool = 3,
    /// One UTF-16 code unit.
    Char = 4,
    I8 = 5,
    U8 = 6,
    I16 = 7,
    U16 = 8,
    I32 = 9,
    U32 = 10,
    I64 = 11,
    U64 = 12,
    F32 = 13,
    F64 = 14,
    /// Legacy fixed-point form, BSON payload. Read-only compatibility.
    Decimal = 15,
    /// 62-bit tick count plus a 2-bit time-zone kind.
    Time = 16,
    Str = 18,
}

impl TypeCode {
    /// Maps a wire code back into the closed set.
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => TypeCode::Empty,
            1 => TypeCode::Object,
            2 => TypeCode::Null,
            3 => TypeCode::Bool,
            4 => TypeCode::Char,
            5 => TypeCode::I8,
            6 => TypeCode::U8,
            7 => TypeCode::I16,
            8 => TypeCode::U16,
            9 => TypeCode::I32,
            10 => TypeCode::U32,
            11 => TypeCode::I64,
            12 => TypeCode::U64,
            13 => TypeCode::F32,
            14 => TypeCode::F64,
            15 => TypeCode::Decimal,
            16 => TypeCode::Time,
            18 => TypeCode::Str,
            _ => return None,
        })
    }

    /// The flags word marking an envelope of this type.
    pub fn flags(self) -> u32 {
        FLAG_HANDLED | self as u32
    }
}

/// A decoded cache value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Null,
    /// Opaque bytes, stored and returned without interpretation.
    Bytes(Bytes),
    Str(String),
    Bool(bool),
    Char(char),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Time(TickTime),
    /// Structured fallback. Always a document or a sequence at the root.
    Object(bson::Bson),
}

impl CacheValue {
    /// The type code this value encodes under. Raw bytes have no code; they
    /// use the [`FLAG_RAW`] sentinel instead.
    pub fn type_code(&self) -> Option<TypeCode> {
        Some(match self {
            CacheValue::Bytes(_) => return None,
            CacheValue::Null => TypeCode::Null,
            CacheValue::Str(_) => TypeCode::Str,
            CacheValue::Bool(_) => TypeCode::Bool,
            CacheValue::Char(_) => TypeCode::Char,
            CacheValue::I8(_) => TypeCode::I8,
            CacheValue::U8(_) => TypeCode::U8,
            CacheValue::I16(_) => TypeCode::I16,
            CacheValue::U16(_) => TypeCode::U16,
            CacheValue::I32(_) => TypeCode::I32,
            CacheValue::U32(_) => TypeCode::U32,
            CacheValue::I64(_) => TypeCode::I64,
            CacheValue::U64(_) => TypeCode::U64,
            CacheValue::F32(_) => TypeCode::F32,
            CacheValue::F64(_) => TypeCode::F64,
            CacheValue::Time(_) => TypeCode::Time,
            CacheValue::Object(_) => TypeCode::Object,
        })
    }
}

/// Time-zone kind carried in the top two bits of an encoded instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TimeKind {
    #[default]
    Unspecified = 0,
    Utc = 1,
    Local = 2,
}

/// Ticks are 100 ns.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds between 0001-01-01T00:00:00 and the Unix epoch.
const UNIX_EPOCH_OFFSET_SECS: u64 = 62_135_596_800;

const TICKS_MASK: u64 = (1 << 62) - 1;

/// An instant as the envelope stores it: 62 bits of 100 ns ticks since
/// 0001-01-01T00:00:00, plus a time-zone kind in the top two bits.
///
/// The kind survives a round-trip unchanged; it is metadata, not an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickTime {
    ticks: u64,
    kind: TimeKind,
}

impl TickTime {
    pub fn new(ticks: u64, kind: TimeKind) -> Self {
        Self {
            ticks: ticks & TICKS_MASK,
            kind,
        }
    }

    /// 100 ns ticks since 0001-01-01T00:00:00.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn kind(&self) -> TimeKind {
        self.kind
    }

    /// Packs ticks and kind into the 64-bit wire form.
    pub fn to_bits(self) -> u64 {
        self.ticks | (self.kind as u64) << 62
    }

    /// Unpacks the 64-bit wire form.
    pub fn from_bits(bits: u64) -> Self {
        let kind = match bits >> 62 {
            0 => TimeKind::Unspecified,
            1 => TimeKind::Utc,
            // 3 is the writers' ambiguous-DST local form; both read as Local
            _ => TimeKind::Local,
        };
        Self {
            ticks: bits & TICKS_MASK,
            kind,
        }
    }

    /// Converts a system clock reading, stamped as Utc. Times before the
    /// year 1 clamp to zero ticks.
    pub fn from_system_time(t: SystemTime) -> Self {
        let ticks = match t.duration_since(UNIX_EPOCH) {
            Ok(after) => {
                let unix_ticks =
                    after.as_secs() * TICKS_PER_SECOND + u64::from(after.subsec_nanos() / 100);
                UNIX_EPOCH_OFFSET_SECS * TICKS_PER_SECOND + unix_ticks
            }
            Err(e) => {
                let before = e.duration();
                let back =
                    before.as_secs() * TICKS_PER_SECOND + u64::from(before.subsec_nanos() / 100);
                (UNIX_EPOCH_OFFSET_SECS * TICKS_PER_SECOND).saturating_sub(back)
            }
        };
        Self::new(ticks, TimeKind::Utc)
    }

    /// Converts back to the system clock's timeline. The kind is metadata
    /// only and does not shift the result.
    pub fn to_system_time(self) -> SystemTime {
        let epoch_ticks = UNIX_EPOCH_OFFSET_SECS * TICKS_PER_SECOND;
        if self.ticks >= epoch_ticks {
            let after = self.ticks - epoch_ticks;
            UNIX_EPOCH
                + Duration::new(
                    after / TICKS_PER_SECOND,
                    (after % TICKS_PER_SECOND) as u32 * 100,
                )
        } else {
            let before = epoch_ticks - self.ticks;
            UNIX_EPOCH
                - Duration::new(
                    before / TICKS_PER_SECOND,
                    (before % TICKS_PER_SECOND) as u32 * 100,
                )
        }
    }
}

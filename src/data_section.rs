//! Data section encoding for the MMDB v2 format.
//!
//! Serializes tagged values into the MaxMind DB type/length framing: one
//! control byte carrying the type (3 bits) and a length descriptor (5 bits),
//! optional big-endian length-extension bytes, an extended-type byte for
//! types above 7, then the payload.
//!
//! # Supported Types
//!
//! - **Pointer**: reference to another data item by data-section offset
//! - **String**: UTF-8 text
//! - **Double**: 64-bit IEEE 754
//! - **Bytes**: raw byte arrays
//! - **Uint16 / Uint32 / Uint64**: unsigned integers
//! - **Int32**: signed 32-bit integer
//! - **Map**: key-value pairs with string keys, insertion order preserved
//! - **Array**: ordered value lists
//! - **Bool**: boolean
//! - **Float**: 32-bit IEEE 754
//! - **EndMarker**: zero-length terminator
//!
//! `Uint128` and `DataCache` are recognized but rejected with a distinct
//! unsupported-type error.
//!
//! See: <https://maxmind.github.io/MaxMind-DB/>

use crate::error::{MmdbError, Result};
use serde::Deserialize;

const TYPE_POINTER: u8 = 1;
const TYPE_UTF8: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_ARRAY: u8 = 11;
const TYPE_END_MARKER: u8 = 13;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

// Length descriptor thresholds. Descriptors 29/30/31 add one, two or three
// big-endian extension bytes holding the length minus the threshold base.
const LEN_EXT1: usize = 29;
const LEN_EXT2: usize = 285;
const LEN_EXT3: usize = 65821;
const LEN_LIMIT: usize = 16_843_036;

/// Data value that can be stored in the data section
///
/// Maps keep their pairs in insertion order; that order is what gets
/// written, so two maps with the same pairs in different orders produce
/// different bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// Pointer to another data item (data-section offset)
    Pointer(u32),
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only per MMDB spec), insertion-ordered
    Map(Vec<(String, DataValue)>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer (recognized, not encodable)
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
    /// Zero-length end marker terminating a data-cache sequence
    EndMarker,
    /// Data-cache container reference (recognized, not encodable)
    DataCache(u32),
}

impl DataValue {
    /// Lift an untyped JSON value into a tagged value.
    ///
    /// Objects become maps (insertion order preserved), arrays become
    /// arrays, strings become UTF-8 strings. Integers below 2^32 become
    /// `Uint32`, larger ones `Uint64`; negative integers fitting an i32
    /// become `Int32`. Floats become `Float`. Anything else (booleans,
    /// null) has no automatic mapping and yields an unsupported-type
    /// error; use [`Encoder::insert_raw_data`](crate::Encoder::insert_raw_data)
    /// with an explicit tag for those.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| MmdbError::UnsupportedType(e.to_string()))
    }

    /// Look up a map entry by key. Returns `None` for non-map values.
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

// JSON serialization covers the data-bearing variants; internal format
// details (Pointer, EndMarker, DataCache) have no JSON form.
impl serde::Serialize for DataValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            DataValue::Pointer(_) => Err(serde::ser::Error::custom(
                "Pointer is an internal type and cannot be serialized to JSON",
            )),
            DataValue::EndMarker => Err(serde::ser::Error::custom(
                "EndMarker is an internal type and cannot be serialized to JSON",
            )),
            DataValue::DataCache(_) => Err(serde::ser::Error::custom(
                "DataCache is an internal type and cannot be serialized to JSON",
            )),
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => serializer.serialize_bytes(b),
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            DataValue::Uint128(n) => serializer.serialize_u128(*n),
            DataValue::Array(a) => a.serialize(serializer),
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

// Deserialization applies the automatic typing rules: integer magnitude
// picks the unsigned width, floats land on Float, and types with no
// automatic mapping (booleans, null) are rejected.
impl<'de> serde::Deserialize<'de> for DataValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DataValueVisitor;

        impl<'de> serde::de::Visitor<'de> for DataValueVisitor {
            type Value = DataValue;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a map, array, integer, float, or string")
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<DataValue, E>
            where
                E: serde::de::Error,
            {
                if v >= 0 {
                    self.visit_u64(v as u64)
                } else if v >= i32::MIN as i64 {
                    Ok(DataValue::Int32(v as i32))
                } else {
                    Err(E::custom(format!(
                        "integer {} is below the int32 range and has no automatic mapping",
                        v
                    )))
                }
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<DataValue, E>
            where
                E: serde::de::Error,
            {
                if v < (1u64 << 32) {
                    Ok(DataValue::Uint32(v as u32))
                } else {
                    Ok(DataValue::Uint64(v))
                }
            }

            fn visit_f64<E>(self, v: f64) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Float(v as f32))
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<DataValue, E> {
                Ok(DataValue::String(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<DataValue, E> {
                Ok(DataValue::String(v))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Bytes(v.to_vec()))
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<DataValue, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut array = Vec::new();
                while let Some(value) = seq.next_element()? {
                    array.push(value);
                }
                Ok(DataValue::Array(array))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<DataValue, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut pairs = Vec::new();
                while let Some((key, value)) = map.next_entry()? {
                    pairs.push((key, value));
                }
                Ok(DataValue::Map(pairs))
            }
        }

        deserializer.deserialize_any(DataValueVisitor)
    }
}

/// On-disk form of pointer values
///
/// The fixed form always spends five bytes (control byte `0x38` plus a
/// 4-byte big-endian address), which is itself a valid size-3 pointer any
/// conforming reader accepts. The canonical form picks the smallest of the
/// 11/19/27/32-bit encodings for each address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerFormat {
    /// Fixed 4-byte big-endian address, matching databases produced by
    /// earlier encoders
    #[default]
    Fixed4,
    /// Smallest canonical MMDB pointer encoding for each address
    Canonical,
}

/// Data section encoder
///
/// Serializes values into a single append-only buffer and hands out the
/// byte offset of each entry. Offsets are assigned sequentially in call
/// order and never move; an entry that fails to encode leaves the buffer
/// untouched.
pub struct DataEncoder {
    buffer: Vec<u8>,
    pointer_format: PointerFormat,
}

impl DataEncoder {
    /// Create an encoder writing pointers in the given format
    pub fn new(pointer_format: PointerFormat) -> Self {
        Self {
            buffer: Vec::new(),
            pointer_format,
        }
    }

    /// Encode a value, append it to the section, and return its offset
    pub fn encode(&mut self, value: &DataValue) -> Result<u32> {
        let mut entry = Vec::new();
        Self::encode_value(value, self.pointer_format, &mut entry)?;

        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(&entry);
        Ok(offset)
    }

    /// Change the pointer format for subsequently encoded values
    pub fn set_pointer_format(&mut self, pointer_format: PointerFormat) {
        self.pointer_format = pointer_format;
    }

    /// Current section size in bytes
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Encoded section contents
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the encoder and return the encoded section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Encode one value (framing plus payload) into a buffer
    pub(crate) fn encode_value(
        value: &DataValue,
        pointer_format: PointerFormat,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        match value {
            DataValue::Pointer(addr) => Self::encode_pointer(*addr, pointer_format, buf),
            DataValue::String(s) => {
                Self::write_control(TYPE_UTF8, s.len(), buf)?;
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            DataValue::Double(d) => {
                Self::write_control(TYPE_DOUBLE, 8, buf)?;
                buf.extend_from_slice(&d.to_be_bytes());
                Ok(())
            }
            DataValue::Bytes(b) => {
                Self::write_control(TYPE_BYTES, b.len(), buf)?;
                buf.extend_from_slice(b);
                Ok(())
            }
            DataValue::Uint16(n) => {
                Self::write_control(TYPE_UINT16, 2, buf)?;
                buf.extend_from_slice(&n.to_be_bytes());
                Ok(())
            }
            DataValue::Uint32(n) => {
                Self::write_control(TYPE_UINT32, 4, buf)?;
                buf.extend_from_slice(&n.to_be_bytes());
                Ok(())
            }
            DataValue::Map(pairs) => {
                Self::write_control(TYPE_MAP, pairs.len(), buf)?;
                for (key, val) in pairs {
                    Self::write_control(TYPE_UTF8, key.len(), buf)?;
                    buf.extend_from_slice(key.as_bytes());
                    Self::encode_value(val, pointer_format, buf)?;
                }
                Ok(())
            }
            DataValue::Int32(n) => {
                Self::write_control(TYPE_INT32, 4, buf)?;
                buf.extend_from_slice(&n.to_be_bytes());
                Ok(())
            }
            DataValue::Uint64(n) => {
                Self::write_control(TYPE_UINT64, 8, buf)?;
                buf.extend_from_slice(&n.to_be_bytes());
                Ok(())
            }
            DataValue::Array(a) => {
                Self::write_control(TYPE_ARRAY, a.len(), buf)?;
                for val in a {
                    Self::encode_value(val, pointer_format, buf)?;
                }
                Ok(())
            }
            DataValue::Bool(b) => Self::write_control(TYPE_BOOL, *b as usize, buf),
            DataValue::Float(f) => {
                Self::write_control(TYPE_FLOAT, 4, buf)?;
                buf.extend_from_slice(&f.to_be_bytes());
                Ok(())
            }
            DataValue::EndMarker => Self::write_control(TYPE_END_MARKER, 0, buf),
            DataValue::Uint128(_) => Err(MmdbError::UnsupportedType(
                "128-bit unsigned integers are not encodable".to_string(),
            )),
            DataValue::DataCache(_) => Err(MmdbError::UnsupportedType(
                "data-cache containers are not encodable".to_string(),
            )),
        }
    }

    /// Emit the control sequence for a (type, length) pair: control byte,
    /// length-extension bytes, extended-type byte for types above 7.
    fn write_control(type_id: u8, length: usize, buf: &mut Vec<u8>) -> Result<()> {
        if length >= LEN_LIMIT {
            return Err(MmdbError::Format(format!(
                "length {} exceeds the maximum encodable {}",
                length,
                LEN_LIMIT - 1
            )));
        }

        let field = if type_id > 7 { 0 } else { type_id };
        let type_bits = field << 5;

        if length < LEN_EXT1 {
            buf.push(type_bits | length as u8);
        } else if length < LEN_EXT2 {
            buf.push(type_bits | 29);
            buf.push((length - LEN_EXT1) as u8);
        } else if length < LEN_EXT3 {
            buf.push(type_bits | 30);
            buf.extend_from_slice(&((length - LEN_EXT2) as u16).to_be_bytes());
        } else {
            buf.push(type_bits | 31);
            buf.extend_from_slice(&((length - LEN_EXT3) as u32).to_be_bytes()[1..]);
        }

        if type_id > 7 {
            buf.push(type_id - 7);
        }
        Ok(())
    }

    fn encode_pointer(addr: u32, format: PointerFormat, buf: &mut Vec<u8>) -> Result<()> {
        match format {
            PointerFormat::Fixed4 => {
                // Length field 24 sets the two size bits to 3: a 32-bit
                // pointer with the low control bits unused.
                Self::write_control(TYPE_POINTER, 24, buf)?;
                buf.extend_from_slice(&addr.to_be_bytes());
            }
            PointerFormat::Canonical => Self::encode_pointer_canonical(addr, buf),
        }
        Ok(())
    }

    // Canonical pointers pack a two-bit size field and the high address
    // bits into the control byte: 11, 19 and 27-bit forms are biased by
    // the capacity of the next-smaller form; the 32-bit form ignores the
    // control byte's low bits.
    fn encode_pointer_canonical(addr: u32, buf: &mut Vec<u8>) {
        const BASE: u8 = TYPE_POINTER << 5;
        if addr < 2048 {
            buf.push(BASE | ((addr >> 8) & 0x7) as u8);
            buf.push((addr & 0xFF) as u8);
        } else if addr < 2048 + 524_288 {
            let adjusted = addr - 2048;
            buf.push(BASE | (1 << 3) | ((adjusted >> 16) & 0x7) as u8);
            buf.push(((adjusted >> 8) & 0xFF) as u8);
            buf.push((adjusted & 0xFF) as u8);
        } else if addr < 2048 + 524_288 + 134_217_728 {
            let adjusted = addr - 526_336;
            buf.push(BASE | (2 << 3) | ((adjusted >> 24) & 0x7) as u8);
            buf.push(((adjusted >> 16) & 0xFF) as u8);
            buf.push(((adjusted >> 8) & 0xFF) as u8);
            buf.push((adjusted & 0xFF) as u8);
        } else {
            buf.push(BASE | (3 << 3));
            buf.extend_from_slice(&addr.to_be_bytes());
        }
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new(PointerFormat::default())
    }
}

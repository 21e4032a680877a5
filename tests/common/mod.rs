//! Minimal MMDB reader used to verify written artifacts against the
//! format a real reader expects: metadata located from the marker, node
//! records walked bit by bit, data decoded with pointer resolution.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use mmdbforge::{DataValue, METADATA_MARKER};

/// Parsed view over a written artifact
pub struct Reader<'a> {
    buf: &'a [u8],
    pub node_count: u32,
    pub record_size: u16,
    pub ip_version: u16,
    pub metadata: DataValue,
    pub data_start: usize,
    pub marker_pos: usize,
}

impl<'a> Reader<'a> {
    pub fn parse(buf: &'a [u8]) -> Reader<'a> {
        let marker_pos = buf
            .windows(METADATA_MARKER.len())
            .rposition(|w| w == METADATA_MARKER)
            .expect("metadata marker not found");

        let meta_decoder = Decoder {
            buf: &buf[marker_pos + METADATA_MARKER.len()..],
        };
        let metadata = meta_decoder.decode(0).expect("metadata must decode");

        let get_uint = |key: &str| -> u64 {
            match metadata.get(key) {
                Some(DataValue::Uint16(v)) => *v as u64,
                Some(DataValue::Uint32(v)) => *v as u64,
                Some(DataValue::Uint64(v)) => *v,
                other => panic!("metadata key {} missing or mistyped: {:?}", key, other),
            }
        };

        let node_count = get_uint("node_count") as u32;
        let record_size = get_uint("record_size") as u16;
        let ip_version = get_uint("ip_version") as u16;

        let node_bytes = record_size as usize * 2 / 8;
        let data_start = node_count as usize * node_bytes + 16;

        // The 16 bytes between tree and data must be zero.
        let separator = &buf[node_count as usize * node_bytes..data_start];
        assert!(separator.iter().all(|&b| b == 0), "separator not zeroed");

        Reader {
            buf,
            node_count,
            record_size,
            ip_version,
            metadata,
            data_start,
            marker_pos,
        }
    }

    /// Read one child pointer out of a node record
    pub fn read_record(&self, node: u32, right: bool) -> u32 {
        let node_bytes = self.record_size as usize * 2 / 8;
        let base = node as usize * node_bytes;
        let be24 = |o: usize| {
            ((self.buf[o] as u32) << 16) | ((self.buf[o + 1] as u32) << 8) | self.buf[o + 2] as u32
        };

        match self.record_size {
            24 => be24(base + if right { 3 } else { 0 }),
            28 => {
                let mid = self.buf[base + 3];
                if right {
                    (((mid & 0x0F) as u32) << 24) | be24(base + 4)
                } else {
                    (((mid >> 4) as u32) << 24) | be24(base)
                }
            }
            32 => {
                let o = base + if right { 4 } else { 0 };
                u32::from_be_bytes([
                    self.buf[o],
                    self.buf[o + 1],
                    self.buf[o + 2],
                    self.buf[o + 3],
                ])
            }
            other => panic!("unsupported record size {}", other),
        }
    }

    /// Walk the tree for `depth` bits of `bits`, returning the data record
    /// for the longest matching prefix
    pub fn lookup_bits(&self, bits: u128, depth: u8) -> Option<DataValue> {
        let mut node = 0u32;
        for i in 0..depth {
            let bit = ((bits >> (depth - i - 1)) & 1) != 0;
            let record = self.read_record(node, bit);
            if record == self.node_count {
                return None;
            }
            if record < self.node_count {
                node = record;
                continue;
            }
            let offset = record - self.node_count - 16;
            return Some(self.decode_data(offset));
        }
        None
    }

    pub fn lookup_v4(&self, addr: std::net::Ipv4Addr) -> Option<DataValue> {
        assert_eq!(self.ip_version, 4);
        self.lookup_bits(u32::from(addr) as u128, 32)
    }

    pub fn lookup_v6(&self, addr: std::net::Ipv6Addr) -> Option<DataValue> {
        assert_eq!(self.ip_version, 6);
        self.lookup_bits(u128::from(addr), 128)
    }

    pub fn decode_data(&self, offset: u32) -> DataValue {
        let decoder = Decoder {
            buf: &self.buf[self.data_start..self.marker_pos],
        };
        decoder.decode(offset as usize).expect("data must decode")
    }
}

/// Data section decoder with inline pointer resolution
pub struct Decoder<'a> {
    pub buf: &'a [u8],
}

impl Decoder<'_> {
    pub fn decode(&self, offset: usize) -> Result<DataValue, String> {
        let mut cursor = offset;
        self.decode_at(&mut cursor)
    }

    fn decode_at(&self, cursor: &mut usize) -> Result<DataValue, String> {
        let ctrl = *self.buf.get(*cursor).ok_or("cursor out of bounds")?;
        *cursor += 1;

        let type_id = ctrl >> 5;
        let payload = ctrl & 0x1F;

        match type_id {
            0 => self.decode_extended(cursor, payload),
            1 => self.decode_pointer(cursor, payload),
            2 => {
                let len = self.decode_size(cursor, payload)?;
                let bytes = self.take(cursor, len)?;
                Ok(DataValue::String(
                    std::str::from_utf8(bytes).map_err(|_| "invalid UTF-8")?.to_string(),
                ))
            }
            3 => {
                let len = self.decode_size(cursor, payload)?;
                if len != 8 {
                    return Err(format!("double with length {}", len));
                }
                let bytes = self.take(cursor, 8)?;
                Ok(DataValue::Double(f64::from_be_bytes(
                    bytes.try_into().unwrap(),
                )))
            }
            4 => {
                let len = self.decode_size(cursor, payload)?;
                Ok(DataValue::Bytes(self.take(cursor, len)?.to_vec()))
            }
            5 => Ok(DataValue::Uint16(self.decode_uint(cursor, payload, 2)? as u16)),
            6 => Ok(DataValue::Uint32(self.decode_uint(cursor, payload, 4)? as u32)),
            7 => self.decode_map(cursor, payload),
            _ => Err("invalid type".to_string()),
        }
    }

    fn decode_extended(&self, cursor: &mut usize, payload: u8) -> Result<DataValue, String> {
        let ext = *self.buf.get(*cursor).ok_or("extended type truncated")?;
        *cursor += 1;

        match 7 + ext {
            8 => {
                let size = self.decode_size(cursor, payload)?;
                let bytes = self.take(cursor, size)?;
                let mut value: i32 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
                    -1
                } else {
                    0
                };
                for &b in bytes {
                    value = (value << 8) | b as i32;
                }
                Ok(DataValue::Int32(value))
            }
            9 => Ok(DataValue::Uint64(self.decode_uint(cursor, payload, 8)?)),
            11 => {
                let count = self.decode_size(cursor, payload)?;
                let mut array = Vec::with_capacity(count);
                for _ in 0..count {
                    array.push(self.decode_at(cursor)?);
                }
                Ok(DataValue::Array(array))
            }
            13 => Ok(DataValue::EndMarker),
            14 => Ok(DataValue::Bool(payload != 0)),
            15 => {
                let size = self.decode_size(cursor, payload)?;
                if size != 4 {
                    return Err(format!("float with length {}", size));
                }
                let bytes = self.take(cursor, 4)?;
                Ok(DataValue::Float(f32::from_be_bytes(
                    bytes.try_into().unwrap(),
                )))
            }
            other => Err(format!("unknown extended type {}", other)),
        }
    }

    // Pointers are resolved inline: the decoded target value stands in for
    // the pointer itself.
    fn decode_pointer(&self, cursor: &mut usize, payload: u8) -> Result<DataValue, String> {
        let size_bits = (payload >> 3) & 0x3;
        let low = (payload & 0x7) as u32;

        let target = match size_bits {
            0 => {
                let b = self.take(cursor, 1)?;
                (low << 8) | b[0] as u32
            }
            1 => {
                let b = self.take(cursor, 2)?;
                2048 + ((low << 16) | ((b[0] as u32) << 8) | b[1] as u32)
            }
            2 => {
                let b = self.take(cursor, 3)?;
                526_336 + ((low << 24) | ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
            }
            _ => {
                let b = self.take(cursor, 4)?;
                u32::from_be_bytes(b.try_into().unwrap())
            }
        };

        self.decode(target as usize)
    }

    fn decode_map(&self, cursor: &mut usize, payload: u8) -> Result<DataValue, String> {
        let count = self.decode_size(cursor, payload)?;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let key = match self.decode_at(cursor)? {
                DataValue::String(s) => s,
                other => return Err(format!("map key must be a string, got {:?}", other)),
            };
            let value = self.decode_at(cursor)?;
            pairs.push((key, value));
        }
        Ok(DataValue::Map(pairs))
    }

    fn decode_uint(&self, cursor: &mut usize, payload: u8, max_bytes: usize) -> Result<u64, String> {
        let size = self.decode_size(cursor, payload)?;
        if size > max_bytes {
            return Err(format!("integer payload of {} bytes", size));
        }
        let mut value = 0u64;
        for &b in self.take(cursor, size)? {
            value = (value << 8) | b as u64;
        }
        Ok(value)
    }

    fn decode_size(&self, cursor: &mut usize, payload: u8) -> Result<usize, String> {
        match payload {
            0..=28 => Ok(payload as usize),
            29 => Ok(29 + self.take(cursor, 1)?[0] as usize),
            30 => {
                let b = self.take(cursor, 2)?;
                Ok(285 + (((b[0] as usize) << 8) | b[1] as usize))
            }
            _ => {
                let b = self.take(cursor, 3)?;
                Ok(65821 + (((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize))
            }
        }
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&[u8], String> {
        let end = *cursor + len;
        if end > self.buf.len() {
            return Err("payload out of bounds".to_string());
        }
        let slice = &self.buf[*cursor..end];
        *cursor = end;
        Ok(slice)
    }
}

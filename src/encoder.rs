//! Database encoder: configuration, network insertion and artifact
//! assembly.
//!
//! The artifact layout is: node records in breadth-first order, a 16-byte
//! zero separator, the data section, the metadata marker, and the metadata
//! map. Data is inserted first (`insert_data` / `insert_raw_data` return
//! data-section offsets), then networks reference those offsets, then
//! `write` emits everything into a sink.

use std::fs::File;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::data_section::{DataEncoder, DataValue, PointerFormat};
use crate::error::{MmdbError, Result};
use crate::prefix_trie::PrefixTrie;
use crate::record::RecordSize;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// MMDB database encoder
///
/// # Example
/// ```
/// use mmdbforge::Encoder;
/// use serde_json::json;
///
/// let mut encoder = Encoder::new(4, 24)?
///     .with_database_type("My-IP-Data")
///     .with_languages(["en"])
///     .with_description("en", "example database");
///
/// let offset = encoder.insert_data(&json!({"country": "DE"}))?;
/// encoder.insert_network("10.0.0.0/8", offset, true)?;
///
/// let mut artifact = Vec::new();
/// encoder.write(&mut artifact)?;
/// # Ok::<(), mmdbforge::MmdbError>(())
/// ```
pub struct Encoder {
    ip_version: u16,
    record_size: RecordSize,
    database_type: String,
    languages: Vec<String>,
    description: Vec<(String, String)>,
    compat: bool,
    trie: PrefixTrie,
    data: DataEncoder,
}

impl Encoder {
    /// Create an encoder for the given IP version (4 or 6) and record
    /// size in bits (24, 28 or 32)
    pub fn new(ip_version: u16, record_size: u16) -> Result<Self> {
        if ip_version != 4 && ip_version != 6 {
            return Err(MmdbError::Config(format!(
                "{} is not a valid IP version (4 or 6)",
                ip_version
            )));
        }
        let record_size = RecordSize::from_bits(record_size)?;

        Ok(Self {
            ip_version,
            record_size,
            database_type: String::new(),
            languages: Vec::new(),
            description: Vec::new(),
            compat: true,
            trie: PrefixTrie::new(),
            data: DataEncoder::default(),
        })
    }

    /// Set the database type name written into the metadata
    pub fn with_database_type(mut self, database_type: impl Into<String>) -> Self {
        self.database_type = database_type.into();
        self
    }

    /// Set the metadata language list
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Add a description in a specific language
    ///
    /// Can be called multiple times for different languages; entries keep
    /// their first-call order in the metadata map.
    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let language = language.into();
        let text = text.into();
        if let Some(entry) = self.description.iter_mut().find(|(l, _)| *l == language) {
            entry.1 = text;
        } else {
            self.description.push((language, text));
        }
        self
    }

    /// Control the IPv4-in-IPv6 embedding of a v6 database
    ///
    /// `true` (the default) places IPv4 prefixes at `::a.b.c.d`, skipping
    /// the `ffff` marker the way MaxMind databases lay out the first 96
    /// bits; `false` uses the IPv4-mapped form `::ffff:a.b.c.d`.
    pub fn with_compat(mut self, compat: bool) -> Self {
        self.compat = compat;
        self
    }

    /// Select the on-disk pointer form for subsequently inserted data
    pub fn with_pointer_format(mut self, pointer_format: PointerFormat) -> Self {
        self.data.set_pointer_format(pointer_format);
        self
    }

    /// Append an already-tagged value to the data section and return its
    /// offset
    pub fn insert_raw_data(&mut self, value: &DataValue) -> Result<u32> {
        self.data.encode(value)
    }

    /// Auto-tag an untyped JSON value and append it to the data section
    ///
    /// See [`DataValue::from_json`] for the typing rules.
    pub fn insert_data(&mut self, value: &serde_json::Value) -> Result<u32> {
        let tagged = DataValue::from_json(value)?;
        self.data.encode(&tagged)
    }

    /// Insert a network, given as an address or CIDR string, pointing at a
    /// previously inserted data offset
    ///
    /// Host bits below the prefix length are masked off. In strict mode an
    /// insertion overlapping existing data fails and changes nothing; in
    /// non-strict mode overlaps resolve in favor of the more specific
    /// prefix (see [`PrefixTrie::insert`](crate::prefix_trie::PrefixTrie::insert)).
    pub fn insert_network(&mut self, prefix: &str, data_offset: u32, strict: bool) -> Result<()> {
        let (addr, prefix_len) = parse_prefix(prefix)?;

        let (bits, prefix_len, max_prefix_len) = match addr {
            IpAddr::V4(v4) => {
                if self.ip_version == 6 {
                    (self.embed_v4(v4), prefix_len + 96, 128)
                } else {
                    (u128::from(u32::from(v4)), prefix_len, 32)
                }
            }
            IpAddr::V6(v6) => {
                if self.ip_version == 4 {
                    return Err(MmdbError::Config(
                        "cannot insert an IPv6 network into an IPv4 database".to_string(),
                    ));
                }
                (u128::from(v6), prefix_len, 128)
            }
        };

        let bits = mask_host_bits(bits, prefix_len, max_prefix_len);
        self.trie
            .insert(bits, prefix_len, max_prefix_len, data_offset, strict)
    }

    /// Number of internal trie nodes
    pub fn node_count(&self) -> u32 {
        self.trie.node_count()
    }

    /// Current data section size in bytes
    pub fn data_size(&self) -> usize {
        self.data.size()
    }

    /// Emit the complete artifact into a byte sink
    pub fn write<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&self.trie.serialize_records(self.record_size))?;
        sink.write_all(&[0u8; 16])?;
        sink.write_all(self.data.bytes())?;
        sink.write_all(METADATA_MARKER)?;

        let mut meta_encoder = DataEncoder::default();
        meta_encoder.encode(&self.metadata())?;
        sink.write_all(meta_encoder.bytes())?;

        Ok(())
    }

    /// Write the artifact to a file
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        self.write(&mut file)
    }

    // Embed a v4 address in the low bits of a /128 field, with or without
    // the ffff marker of the IPv4-mapped range.
    fn embed_v4(&self, addr: Ipv4Addr) -> u128 {
        let addr = u128::from(u32::from(addr));
        if self.compat {
            addr
        } else {
            (0xFFFF_u128 << 32) | addr
        }
    }

    fn metadata(&self) -> DataValue {
        let description = DataValue::Map(
            self.description
                .iter()
                .map(|(lang, text)| (lang.clone(), DataValue::String(text.clone())))
                .collect(),
        );
        let languages = DataValue::Array(
            self.languages
                .iter()
                .map(|lang| DataValue::String(lang.clone()))
                .collect(),
        );
        let build_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        DataValue::Map(vec![
            (
                "node_count".to_string(),
                DataValue::Uint32(self.trie.node_count()),
            ),
            (
                "record_size".to_string(),
                DataValue::Uint16(self.record_size.bits()),
            ),
            ("ip_version".to_string(), DataValue::Uint16(self.ip_version)),
            (
                "database_type".to_string(),
                DataValue::String(self.database_type.clone()),
            ),
            ("description".to_string(), description),
            ("languages".to_string(), languages),
            (
                "binary_format_major_version".to_string(),
                DataValue::Uint16(2),
            ),
            (
                "binary_format_minor_version".to_string(),
                DataValue::Uint16(0),
            ),
            ("build_epoch".to_string(), DataValue::Uint64(build_epoch)),
        ])
    }
}

/// Parse an IP address or CIDR string into an address and prefix length
fn parse_prefix(prefix: &str) -> Result<(IpAddr, u8)> {
    if let Some((addr_str, len_str)) = prefix.split_once('/') {
        let addr: IpAddr = addr_str
            .parse()
            .map_err(|_| MmdbError::InvalidPrefix(format!("invalid address in {:?}", prefix)))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| MmdbError::InvalidPrefix(format!("invalid prefix length in {:?}", prefix)))?;

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(MmdbError::InvalidPrefix(format!(
                "prefix length {} exceeds {} in {:?}",
                prefix_len, max, prefix
            )));
        }
        Ok((addr, prefix_len))
    } else {
        let addr: IpAddr = prefix
            .parse()
            .map_err(|_| MmdbError::InvalidPrefix(format!("invalid address {:?}", prefix)))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        Ok((addr, max))
    }
}

fn mask_host_bits(bits: u128, prefix_len: u8, max_prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        return 0;
    }
    let field = if max_prefix_len == 128 {
        u128::MAX
    } else {
        (1u128 << max_prefix_len) - 1
    };
    bits & field & (u128::MAX << (max_prefix_len - prefix_len))
}

//! mmdbforge - Writer for MaxMind MMDB v2 IP-lookup databases
//!
//! Builds binary databases in the MaxMind DB (MMDB) version 2 format from
//! in-memory inputs: network prefixes paired with structured data records.
//! The resulting artifact can be memory-mapped and queried by any
//! conforming MMDB reader, libmaxminddb included.
//!
//! # Quick Start
//!
//! ```rust
//! use mmdbforge::Encoder;
//! use serde_json::json;
//!
//! let mut encoder = Encoder::new(4, 24)?
//!     .with_database_type("Threat-Networks")
//!     .with_languages(["en"])
//!     .with_description("en", "known scanner networks");
//!
//! // Data first: every insert returns a stable data-section offset...
//! let scanners = encoder.insert_data(&json!({
//!     "category": "scanner",
//!     "confidence": 90,
//! }))?;
//!
//! // ...then prefixes reference those offsets.
//! encoder.insert_network("198.51.100.0/24", scanners, true)?;
//! encoder.insert_network("203.0.113.0/24", scanners, true)?;
//!
//! let mut artifact = Vec::new();
//! encoder.write(&mut artifact)?;
//! # Ok::<(), mmdbforge::MmdbError>(())
//! ```
//!
//! # Artifact Layout
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │  1. Search tree (binary trie records) │
//! │  2. 16-byte zero separator            │
//! │  3. Data section                      │
//! │  4. Metadata marker                   │
//! │  5. Metadata map                      │
//! └───────────────────────────────────────┘
//! ```
//!
//! Overlapping prefixes of different lengths are resolved at build time so
//! that readers always see the longest matching prefix: inserting a /8
//! after a /16 it contains (or the other way around) fills exactly the
//! address space not claimed by the more specific entry.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Data section encoding (tagged values, type/length framing)
pub mod data_section;
/// Public encoder API and artifact assembly
pub mod encoder;
/// Error types for encoder operations
pub mod error;
/// Binary radix trie over IP address bits
pub mod prefix_trie;
/// Node record sizes and packing
pub mod record;

pub use crate::data_section::{DataEncoder, DataValue, PointerFormat};
pub use crate::encoder::{Encoder, METADATA_MARKER};
pub use crate::error::{MmdbError, Result};
pub use crate::record::RecordSize;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

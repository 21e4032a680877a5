/// Error types for the mmdbforge library
use std::fmt;

/// Result type alias for encoder operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Main error type for database encoding operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// Invalid encoder configuration (IP version, record size, address family mix)
    Config(String),

    /// A prefix insertion would overwrite or split existing data in strict mode
    Overlap(String),

    /// Value type that the MMDB data section cannot carry
    UnsupportedType(String),

    /// Structurally invalid or unencodable value
    Format(String),

    /// Network prefix string that does not parse as an address or CIDR
    InvalidPrefix(String),

    /// I/O errors from the output sink
    Io(String),
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MmdbError::Overlap(msg) => write!(f, "Overlap violation: {}", msg),
            MmdbError::UnsupportedType(msg) => write!(f, "Unsupported type: {}", msg),
            MmdbError::Format(msg) => write!(f, "Format error: {}", msg),
            MmdbError::InvalidPrefix(msg) => write!(f, "Invalid prefix: {}", msg),
            MmdbError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}

impl From<std::io::Error> for MmdbError {
    fn from(err: std::io::Error) -> Self {
        MmdbError::Io(err.to_string())
    }
}

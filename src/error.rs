use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// A write was attempted against a finalized database or a sealed space.
    Immutable(String),
    /// Structural damage: bad magic, truncated header or footer, impossible lengths.
    Corruption(String),
    ChecksumMismatch { offset: u64 },
    /// SortedTable keys must be strictly increasing.
    UnsortedKey { previous: Vec<u8>, key: Vec<u8> },
    Decompress(String),
    Decode(&'static str, io::Error),
    InvalidArgument(String),
    InvalidOperation(String),
}

impl Error {
    /// Whether the error means the file cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_)
                | Error::ChecksumMismatch { .. }
                | Error::UnsortedKey { .. }
                | Error::Decompress(_)
                | Error::Decode(..)
        )
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Immutable(msg) => write!(f, "Immutable: {}", msg),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::ChecksumMismatch { offset } => {
                write!(f, "Checksum mismatch in block at offset {}", offset)
            }
            Error::UnsortedKey { previous, key } => write!(
                f,
                "Key {:?} is not greater than previous key {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(previous)
            ),
            Error::Decompress(msg) => write!(f, "Failed to decompress block: {}", msg),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) | Error::Decode(_, err) => Some(err),
            _ => None,
        }
    }
}

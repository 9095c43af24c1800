//! Error types for the Canopy engine.

use thiserror::Error;

/// All possible errors from the Canopy engine.
#[derive(Debug, Error)]
pub enum Error {
    // Path errors
    #[error("malformed path: {0}")]
    MalformedPath(String),

    // Entry codec errors
    #[error("entry stream corrupted: {0}")]
    EntryCorrupted(String),

    #[error("entry key is {0} bytes, exceeding the u16 key-size field")]
    KeyTooLong(usize),

    #[error("entry is encrypted and no decryption key was provided")]
    NoDecryptionKey,

    #[error("unsupported cipher id: {0}")]
    UnsupportedCipher(u8),

    #[error("invalid extended JSON: {0}")]
    InvalidExtendedJson(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

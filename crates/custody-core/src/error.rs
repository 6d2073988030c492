//! Error types for the custody core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Purpose not set up: {0}")]
    InvalidPurpose(String),

    #[error("Invalid derivation path or purpose: {0}")]
    InvalidPathOrPurpose(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("Alias {alias} is already bound to purpose {existing}")]
    AliasConflict { alias: String, existing: String },

    #[error("Seed error: {0}")]
    Seed(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Stable wire code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidPurpose(_) => "InvalidPurpose",
            Error::InvalidPathOrPurpose(_) => "InvalidPathOrPurpose",
            Error::InvalidSignatureEncoding(_) => "InvalidSignatureEncoding",
            Error::DecryptionFailed => "DecryptionFailed",
            Error::InvalidPublicKey(_) => "InvalidPublicKey",
            Error::InvalidOrigin(_) => "InvalidOrigin",
            Error::AliasConflict { .. } => "AliasConflict",
            Error::Seed(_) => "SeedError",
            Error::Crypto(_) => "CryptoError",
            Error::Serialization(_) => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

//! Protocol primitive error types.

use thiserror::Error;

/// Error type for keys, events and filters.
#[derive(Debug, Error)]
pub enum NostrError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("bech32 error: {0}")]
    Bech32(String),

    #[error("invalid mnemonic: {0}")]
    Mnemonic(String),

    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] bitcoin::secp256k1::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("event id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("invalid signature for event {0}")]
    InvalidSignature(String),

    #[error("system clock error: {0}")]
    Clock(String),
}

/// Result type for protocol primitives.
pub type Result<T> = std::result::Result<T, NostrError>;

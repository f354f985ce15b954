use std::fmt;
use std::io;

/// Errors from key handling, sealing, and signing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("encryption failed")]
    Encryption,

    /// Wrong key or tampered ciphertext; the two are indistinguishable.
    #[error("decryption failed: wrong key or corrupted data")]
    Decryption,

    #[error("invalid signature")]
    InvalidSignature,
}

impl PartialEq for CryptoError {
    fn eq(&self, other: &Self) -> bool {
        // Compare by display representation for test convenience.
        fmt::format(format_args!("{self}")) == fmt::format(format_args!("{other}"))
    }
}

impl Eq for CryptoError {}

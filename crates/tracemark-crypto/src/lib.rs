//! Cryptographic primitives for tracemark.
//!
//! Provides domain-separated BLAKE3 fingerprints, project key derivation,
//! XChaCha20-Poly1305 sealing for the ledger store, and Ed25519 signatures
//! over build records.
//!
//! All crypto operations wrap established libraries.

pub mod error;
pub mod hasher;
pub mod keys;
pub mod seal;
pub mod signer;

pub use error::CryptoError;
pub use hasher::{ContentHasher, HasherError};
pub use keys::{LedgerKey, ProjectSecret};
pub use seal::{open, seal, Sealed, NONCE_LEN};
pub use signer::{OperatorKey, OperatorPublicKey, RecordSignature};

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::RngCore;
use tracing::debug;

use crate::error::CryptoError;

const LEDGER_KEY_CONTEXT: &str = "tracemark 2024 ledger sealing key v1";
const TOKEN_KEY_CONTEXT: &str = "tracemark 2024 recipient token key v1";
const PASSWORD_KEY_CONTEXT: &str = "tracemark 2024 document password key v1";

/// Project-local secret from which every project key is derived.
///
/// The secret never leaves the machine: it lives in the project's hidden
/// state directory and is only ever used as input to BLAKE3 key derivation.
pub struct ProjectSecret([u8; 32]);

impl ProjectSecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Load a hex-encoded secret from disk.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let text = fs::read_to_string(path)?;
        let bytes = decode_key_hex(text.trim())?;
        Ok(Self(bytes))
    }

    /// Write the secret as hex, readable only by the owner on unix.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        write_private(path, hex::encode(self.0).as_bytes())?;
        debug!(path = %path.display(), "project secret written");
        Ok(())
    }

    /// Key that seals the ledger store.
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey(blake3::derive_key(LEDGER_KEY_CONTEXT, &self.0))
    }

    /// Key for recipient token derivation.
    pub fn token_key(&self) -> [u8; 32] {
        blake3::derive_key(TOKEN_KEY_CONTEXT, &self.0)
    }

    /// Deterministic document password for a build.
    ///
    /// Used when protection is requested without an explicit password. The
    /// result is four dash-separated groups of four hex characters.
    pub fn derive_password(&self, build_id: &[u8], classification: &str) -> String {
        let key = blake3::derive_key(PASSWORD_KEY_CONTEXT, &self.0);
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(build_id);
        hasher.update(&[0]);
        hasher.update(classification.as_bytes());
        let digest = hex::encode(&hasher.finalize().as_bytes()[..8]);
        digest
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl std::fmt::Debug for ProjectSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProjectSecret(<redacted>)")
    }
}

/// Symmetric key sealing the ledger store.
#[derive(Clone, PartialEq, Eq)]
pub struct LedgerKey([u8; 32]);

impl LedgerKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerKey(<redacted>)")
    }
}

pub(crate) fn decode_key_hex(text: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(text).map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        CryptoError::InvalidKeyMaterial(format!("expected 32 bytes, got {}", v.len()))
    })
}

pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<(), CryptoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

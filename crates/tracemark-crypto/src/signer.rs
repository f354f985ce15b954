use std::path::Path;

use serde::{Deserialize, Serialize};
use tracemark_types::Fingerprint;

use crate::error::CryptoError;
use crate::hasher::ContentHasher;
use crate::keys::{decode_key_hex, write_private};

/// Ed25519 key of the operator who runs builds.
pub struct OperatorKey(ed25519_dalek::SigningKey);

/// Public half of an [`OperatorKey`].
#[derive(Clone, PartialEq, Eq)]
pub struct OperatorPublicKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature over a canonical record encoding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSignature(#[serde(with = "signature_serde")] ed25519_dalek::Signature);

impl OperatorKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Load a hex-encoded key from disk.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_bytes(decode_key_hex(text.trim())?))
    }

    /// Persist the key as hex, owner-readable only on unix.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        write_private(path, hex::encode(self.0.as_bytes()).as_bytes())
    }

    pub fn public_key(&self) -> OperatorPublicKey {
        OperatorPublicKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> RecordSignature {
        use ed25519_dalek::Signer;
        RecordSignature(self.0.sign(message))
    }
}

impl RecordSignature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }
}

impl OperatorPublicKey {
    pub fn verify(&self, message: &[u8], signature: &RecordSignature) -> Result<(), CryptoError> {
        use ed25519_dalek::Verifier;
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Stable fingerprint identifying this operator in the ledger.
    pub fn fingerprint(&self) -> Fingerprint {
        ContentHasher::OPERATOR.hash(&self.0.to_bytes())
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidKeyMaterial("invalid ed25519 public key".into()))?;
        Ok(Self(key))
    }
}

impl std::fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorKey(<redacted>)")
    }
}

impl std::fmt::Debug for OperatorPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorPublicKey({})", hex::encode(self.0.to_bytes()))
    }
}

impl std::fmt::Debug for RecordSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordSignature({}...)", hex::encode(&self.0.to_bytes()[..8]))
    }
}

mod signature_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(sig: &ed25519_dalek::Signature, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&sig.to_bytes())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ed25519_dalek::Signature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64-byte signature"))?;
        Ok(ed25519_dalek::Signature::from_bytes(&arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = OperatorKey::generate();
        let sig = key.sign(b"record #1");
        assert!(key.public_key().verify(b"record #1", &sig).is_ok());
    }

    #[test]
    fn signature_bytes_roundtrip() {
        let key = OperatorKey::generate();
        let sig = key.sign(b"export");
        let restored = RecordSignature::from_bytes(&sig.to_bytes());
        assert!(key.public_key().verify(b"export", &restored).is_ok());
    }

    #[test]
    fn verify_rejects_other_message() {
        let key = OperatorKey::generate();
        let sig = key.sign(b"record #1");
        assert_eq!(
            key.public_key().verify(b"record #2", &sig),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn verify_rejects_other_key() {
        let sig = OperatorKey::generate().sign(b"msg");
        assert!(OperatorKey::generate().public_key().verify(b"msg", &sig).is_err());
    }

    #[test]
    fn save_and_load_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operator.key");
        let key = OperatorKey::generate();
        key.save(&path).unwrap();
        let loaded = OperatorKey::load(&path).unwrap();
        assert_eq!(loaded.public_key(), key.public_key());
    }

    #[test]
    fn fingerprint_is_stable() {
        let key = OperatorKey::from_bytes([3u8; 32]);
        assert_eq!(
            key.public_key().fingerprint(),
            key.public_key().fingerprint()
        );
    }

    #[test]
    fn signature_serde_roundtrip() {
        let sig = OperatorKey::generate().sign(b"x");
        let json = serde_json::to_string(&sig).unwrap();
        let back: RecordSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn public_key_bytes_roundtrip() {
        let pk = OperatorKey::generate().public_key();
        assert_eq!(OperatorPublicKey::from_bytes(pk.as_bytes()).unwrap(), pk);
    }
}

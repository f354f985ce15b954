use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracemark_types::Fingerprint;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"tracemark-source-v1"`) that is
/// prepended to every hash computation, so a source file and a PDF with
/// identical bytes still produce different fingerprints.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for build inputs (LaTeX sources).
    pub const SOURCE: Self = Self {
        domain: "tracemark-source-v1",
    };
    /// Hasher for produced artifacts (PDF outputs).
    pub const ARTIFACT: Self = Self {
        domain: "tracemark-artifact-v1",
    };
    /// Hasher for canonical record encodings (signatures, export checksums).
    pub const RECORD: Self = Self {
        domain: "tracemark-record-v1",
    };
    /// Hasher for operator public keys.
    pub const OPERATOR: Self = Self {
        domain: "tracemark-operator-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Fingerprint {
        let mut hasher = self.start();
        hasher.update(data);
        Fingerprint::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a file's content with domain separation, streaming it from disk.
    pub fn hash_file(&self, path: &Path) -> io::Result<Fingerprint> {
        let mut file = File::open(path)?;
        let mut hasher = self.start();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Fingerprint::from_hash(*hasher.finalize().as_bytes()))
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<Fingerprint, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected fingerprint.
    pub fn verify(&self, data: &[u8], expected: &Fingerprint) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }

    fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"\\documentclass{article}";
        assert_eq!(ContentHasher::SOURCE.hash(data), ContentHasher::SOURCE.hash(data));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        assert_ne!(
            ContentHasher::SOURCE.hash(data),
            ContentHasher::ARTIFACT.hash(data)
        );
        assert_ne!(
            ContentHasher::ARTIFACT.hash(data),
            ContentHasher::RECORD.hash(data)
        );
    }

    #[test]
    fn file_hash_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        let content = vec![7u8; 200_000];
        std::fs::write(&path, &content).unwrap();
        assert_eq!(
            ContentHasher::ARTIFACT.hash_file(&path).unwrap(),
            ContentHasher::ARTIFACT.hash(&content)
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let fp = ContentHasher::ARTIFACT.hash(b"original");
        assert!(ContentHasher::ARTIFACT.verify(b"original", &fp));
        assert!(!ContentHasher::ARTIFACT.verify(b"tampered", &fp));
    }

    #[test]
    fn hash_json_works() {
        let value = serde_json::json!({"classification": "SECRET"});
        let a = ContentHasher::RECORD.hash_json(&value).unwrap();
        let b = ContentHasher::RECORD.hash_json(&value).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ContentHasher::SOURCE
            .hash_file(Path::new("/definitely/not/here.tex"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}

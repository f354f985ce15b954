//! On-disk format of the sealed ledger store.
//!
//! ```text
//! [8 bytes: magic "TRACEMRK"]
//! [2 bytes: format version (little-endian u16)]
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload = 24-byte nonce || XChaCha20-Poly1305 ciphertext]
//! ```
//!
//! The plaintext is the bincode encoding of [`LedgerContents`]. The magic and
//! version are bound into the AEAD tag as associated data. The CRC only
//! catches torn or truncated writes before decryption is attempted;
//! authenticity comes from the AEAD.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracemark_crypto::{open, seal, LedgerKey, RecordSignature, Sealed, NONCE_LEN};
use tracemark_types::{BuildRecord, RecordId};

use crate::error::{LedgerError, Result, StorageError};

pub(crate) const MAGIC: [u8; 8] = *b"TRACEMRK";
pub(crate) const VERSION: u16 = 1;
const HEADER_SIZE: usize = 8 + 2 + 4 + 4;

/// A record plus the operator signature over its canonical encoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub record: BuildRecord,
    pub operator_key: Option<[u8; 32]>,
    pub signature: Option<RecordSignature>,
}

/// Decrypted ledger state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct LedgerContents {
    pub created_at: DateTime<Utc>,
    pub entries: Vec<StoredEntry>,
}

impl LedgerContents {
    pub fn empty() -> Self {
        Self {
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn next_id(&self) -> RecordId {
        self.entries
            .last()
            .map_or(RecordId::FIRST, |e| e.record.id.next())
    }

    /// Ids must run 1, 2, 3, ... without gaps.
    fn check_sequence(&self) -> Result<()> {
        let mut expected = RecordId::FIRST;
        for entry in &self.entries {
            if entry.record.id != expected {
                return Err(LedgerError::Access(format!(
                    "ledger store is corrupt: expected record {expected}, found {}",
                    entry.record.id
                )));
            }
            expected = expected.next();
        }
        Ok(())
    }
}

fn aad() -> [u8; 10] {
    let mut aad = [0u8; 10];
    aad[..8].copy_from_slice(&MAGIC);
    aad[8..].copy_from_slice(&VERSION.to_le_bytes());
    aad
}

/// Serialize and seal `contents` into the on-disk byte layout.
pub(crate) fn encode(contents: &LedgerContents, key: &LedgerKey) -> Result<Vec<u8>> {
    let plaintext =
        bincode::serialize(contents).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let sealed = seal(key, &plaintext, &aad())
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + sealed.ciphertext.len());
    payload.extend_from_slice(&sealed.nonce);
    payload.extend_from_slice(&sealed.ciphertext);

    let length = u32::try_from(payload.len())
        .map_err(|_| StorageError::Serialization("ledger exceeds 4 GiB".into()))?;
    let crc = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Validate framing, decrypt, and deserialize a store image.
///
/// Every failure is an access error: nothing is returned unless the whole
/// store authenticates under `key`.
pub(crate) fn decode(bytes: &[u8], key: &LedgerKey) -> Result<LedgerContents> {
    let corrupt = |reason: &str| LedgerError::Access(format!("ledger store is corrupt: {reason}"));

    if bytes.len() < HEADER_SIZE + NONCE_LEN {
        return Err(corrupt("truncated header"));
    }
    if bytes[..8] != MAGIC {
        return Err(LedgerError::Access("not a tracemark ledger".into()));
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != VERSION {
        return Err(LedgerError::Access(format!(
            "unsupported ledger format version {version}"
        )));
    }
    let length = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]) as usize;
    let expected_crc = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != length {
        return Err(corrupt("length mismatch"));
    }
    if crc32fast::hash(payload) != expected_crc {
        return Err(corrupt("checksum mismatch"));
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&payload[..NONCE_LEN]);
    let sealed = Sealed {
        nonce,
        ciphertext: payload[NONCE_LEN..].to_vec(),
    };
    let plaintext = open(key, &sealed, &aad())
        .map_err(|_| LedgerError::Access("wrong key or tampered ledger".into()))?;

    let contents: LedgerContents =
        bincode::deserialize(&plaintext).map_err(|e| corrupt(&e.to_string()))?;
    contents.check_sequence()?;
    Ok(contents)
}

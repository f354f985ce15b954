use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracemark_crypto::{OperatorKey, OperatorPublicKey, RecordSignature};
use tracemark_types::Fingerprint;
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::filter::RecordFilter;
use crate::traits::AuditLedger;

/// File name of the decrypted export.
pub const EXPORT_FILE: &str = "builds.json";
/// File name of the BLAKE3 checksum written next to the export, in the
/// `b3sum` line format.
pub const CHECKSUM_FILE: &str = "builds.json.b3";
/// File name of the operator signature over the export.
pub const SIGNATURE_FILE: &str = "builds.json.sig";

/// Prefixed to the export bytes before signing so an export signature can
/// never be replayed as a record signature.
const SIGNING_CONTEXT: &[u8] = b"tracemark-export-v1\n";

/// What [`export_records`] wrote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportSummary {
    pub records: usize,
    pub json_path: PathBuf,
    pub checksum_path: PathBuf,
    pub checksum: String,
    /// Present when the export was signed.
    pub signature_path: Option<PathBuf>,
    pub signer: Option<Fingerprint>,
}

/// Contents of [`SIGNATURE_FILE`].
#[derive(Debug, Serialize, Deserialize)]
struct SignatureFile {
    operator: Fingerprint,
    /// Hex ed25519 public key.
    public_key: String,
    /// Hex ed25519 signature over the export bytes.
    signature: String,
}

/// Outcome of [`verify_export`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportCheck {
    pub checksum_matches: bool,
    pub signature: ExportSignature,
}

impl ExportCheck {
    /// Checksum matches and any signature present verifies.
    pub fn is_valid(&self) -> bool {
        self.checksum_matches && !matches!(self.signature, ExportSignature::Invalid)
    }
}

/// State of the signature next to an export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportSignature {
    /// No signature file was written.
    Unsigned,
    /// Signed by the operator key with this fingerprint.
    Valid { operator: Fingerprint },
    /// The signature file is malformed or does not match the export.
    Invalid,
}

/// Write every record as pretty JSON plus a checksum file into `out_dir`,
/// and a signature file when `signer` is given.
///
/// The export is plaintext: it is meant for handing the audit trail to a
/// reviewer, and the checksum lets them confirm it was not edited. The
/// signature also tells them who exported it.
pub fn export_records(
    ledger: &dyn AuditLedger,
    out_dir: &Path,
    signer: Option<&OperatorKey>,
) -> Result<ExportSummary> {
    let records = ledger.query(&RecordFilter::all())?.to_vec();
    let json = serde_json::to_vec_pretty(&records)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let checksum = blake3::hash(&json).to_hex().to_string();

    fs::create_dir_all(out_dir).map_err(StorageError::Io)?;
    let json_path = out_dir.join(EXPORT_FILE);
    let checksum_path = out_dir.join(CHECKSUM_FILE);
    let signature_path = out_dir.join(SIGNATURE_FILE);
    fs::write(&json_path, &json).map_err(StorageError::Io)?;
    fs::write(&checksum_path, format!("{checksum}  {EXPORT_FILE}\n")).map_err(StorageError::Io)?;

    let signer = match signer {
        Some(key) => {
            let public = key.public_key();
            let file = SignatureFile {
                operator: public.fingerprint(),
                public_key: hex::encode(public.as_bytes()),
                signature: hex::encode(key.sign(&signing_message(&json)).to_bytes()),
            };
            let text = serde_json::to_string_pretty(&file)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            fs::write(&signature_path, text).map_err(StorageError::Io)?;
            Some(file.operator)
        }
        None => {
            // A stale signature from an earlier export would not match.
            remove_if_present(&signature_path)?;
            None
        }
    };

    info!(
        records = records.len(),
        path = %json_path.display(),
        signed = signer.is_some(),
        "ledger exported"
    );
    Ok(ExportSummary {
        records: records.len(),
        json_path,
        checksum_path,
        checksum,
        signature_path: signer.map(|_| signature_path),
        signer,
    })
}

/// Check an export directory against its checksum and signature files.
pub fn verify_export(out_dir: &Path) -> Result<ExportCheck> {
    let json = fs::read(out_dir.join(EXPORT_FILE)).map_err(StorageError::Io)?;
    let line = fs::read_to_string(out_dir.join(CHECKSUM_FILE)).map_err(StorageError::Io)?;
    let expected = line.split_whitespace().next().unwrap_or_default();
    let checksum_matches = blake3::hash(&json).to_hex().as_str() == expected;

    let signature = match fs::read(out_dir.join(SIGNATURE_FILE)) {
        Ok(bytes) => check_signature(&bytes, &json),
        Err(e) if e.kind() == io::ErrorKind::NotFound => ExportSignature::Unsigned,
        Err(e) => return Err(StorageError::Io(e).into()),
    };
    Ok(ExportCheck {
        checksum_matches,
        signature,
    })
}

fn check_signature(file: &[u8], json: &[u8]) -> ExportSignature {
    let Ok(file) = serde_json::from_slice::<SignatureFile>(file) else {
        warn!("export signature file is malformed");
        return ExportSignature::Invalid;
    };
    let public = hex::decode(&file.public_key)
        .ok()
        .and_then(|b| <[u8; 32]>::try_from(b).ok())
        .and_then(|b| OperatorPublicKey::from_bytes(b).ok());
    let signature = hex::decode(&file.signature)
        .ok()
        .and_then(|b| <[u8; 64]>::try_from(b).ok())
        .map(|b| RecordSignature::from_bytes(&b));
    let (Some(public), Some(signature)) = (public, signature) else {
        return ExportSignature::Invalid;
    };
    // The recorded fingerprint must belong to the key that signed.
    if public.fingerprint() != file.operator
        || public.verify(&signing_message(json), &signature).is_err()
    {
        return ExportSignature::Invalid;
    }
    ExportSignature::Valid {
        operator: file.operator,
    }
}

fn signing_message(json: &[u8]) -> Vec<u8> {
    let mut message = SIGNING_CONTEXT.to_vec();
    message.extend_from_slice(json);
    message
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Io(e).into()),
    }
}

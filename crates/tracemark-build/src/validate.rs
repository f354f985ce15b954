use std::fs;
use std::path::{Path, PathBuf};

use tracemark_crypto::ContentHasher;
use tracemark_ledger::{AuditLedger, RecordFilter};
use tracemark_mark::metadata::KEY_KEYWORDS;
use tracemark_mark::{extract_tokens, DocumentMetadata, RecipientToken};
use tracemark_tools::DocumentRenderer;
use tracemark_types::BuildRecord;
use tracing::{debug, info};

use crate::error::Result;

/// What a document found in the wild says about where it came from.
#[derive(Clone, Debug)]
pub struct ValidationReport {
    pub pdf: PathBuf,
    /// Empty when the information dictionary could not be read, e.g. for a
    /// password-protected copy.
    pub metadata: DocumentMetadata,
    pub metadata_error: Option<String>,
    /// Recipient tokens found in the metadata or anywhere in the raw bytes.
    pub tokens: Vec<RecipientToken>,
    /// Ledger records carrying one of `tokens`.
    pub token_matches: Vec<BuildRecord>,
    /// The record whose build id is embedded in the document.
    pub build_record: Option<BuildRecord>,
    /// The record whose output is byte-identical to this document.
    pub hash_match: Option<BuildRecord>,
}

impl ValidationReport {
    /// Whether any evidence links the document to a recorded build.
    pub fn is_attributed(&self) -> bool {
        !self.token_matches.is_empty() || self.build_record.is_some() || self.hash_match.is_some()
    }

    /// Distinct recipients the document is attributed to.
    pub fn recipients(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .token_matches
            .iter()
            .filter_map(|r| r.recipient.as_deref())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Attribute `pdf` to ledger records through its tokens, embedded build id,
/// and content fingerprint.
pub fn validate_document(
    ledger: &dyn AuditLedger,
    renderer: &dyn DocumentRenderer,
    pdf: &Path,
) -> Result<ValidationReport> {
    let bytes = fs::read(pdf)?;
    let (metadata, metadata_error) = match renderer.read_metadata(pdf) {
        Ok(metadata) => (metadata, None),
        Err(e) => {
            debug!(error = %e, "metadata unreadable");
            (DocumentMetadata::new(), Some(e.to_string()))
        }
    };

    let mut tokens = extract_tokens(&String::from_utf8_lossy(&bytes));
    for text in [metadata.token(), metadata.get(KEY_KEYWORDS)].into_iter().flatten() {
        for token in extract_tokens(text) {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
    }

    let mut token_matches: Vec<BuildRecord> = Vec::new();
    for token in &tokens {
        for record in ledger.find_by_token(token.as_str())? {
            if !token_matches.iter().any(|r| r.id == record.id) {
                token_matches.push(record);
            }
        }
    }
    token_matches.sort_by_key(|r| r.id);

    let all = ledger.query(&RecordFilter::all())?;
    let build_record = metadata
        .build_id()
        .and_then(|id| all.iter().find(|r| r.build_id == id).cloned());
    let fingerprint = ContentHasher::ARTIFACT.hash(&bytes);
    let hash_match = all
        .iter()
        .find(|r| r.output_hash == Some(fingerprint))
        .cloned();

    let report = ValidationReport {
        pdf: pdf.to_path_buf(),
        metadata,
        metadata_error,
        tokens,
        token_matches,
        build_record,
        hash_match,
    };
    info!(
        pdf = %pdf.display(),
        tokens = report.tokens.len(),
        attributed = report.is_attributed(),
        "document validated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BuildRequest, Password};
    use crate::testing::{toolbox, write_sample_pdf, Behaviour, Fixture};

    fn fixture() -> Fixture {
        Fixture::new(toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Works))
    }

    #[test]
    fn leaked_copy_is_attributed_to_recipient() {
        let fx = fixture();
        let orch = fx.orchestrator();
        orch.run(&BuildRequest::new(fx.source()).recipient("alice").output_dir(fx.dir().join("a")))
            .unwrap();
        let bob = orch
            .run(&BuildRequest::new(fx.source()).recipient("bob").output_dir(fx.dir().join("b")))
            .unwrap();

        let report = validate_document(&fx.ledger, fx.tools.renderer.as_ref(), &bob.output).unwrap();

        assert!(report.is_attributed());
        assert_eq!(report.recipients(), vec!["bob"]);
        assert_eq!(report.build_record.as_ref().map(|r| r.id), Some(bob.record.id));
        assert_eq!(report.hash_match.as_ref().map(|r| r.id), Some(bob.record.id));
    }

    #[test]
    fn modified_copy_still_matches_by_token() {
        let fx = fixture();
        let report = fx
            .orchestrator()
            .run(&BuildRequest::new(fx.source()).recipient("dave"))
            .unwrap();
        let mut bytes = fs::read(&report.output).unwrap();
        bytes.extend_from_slice(b"\n% appended by someone\n");
        let copy = fx.dir().join("copy.pdf");
        fs::write(&copy, bytes).unwrap();

        let found = validate_document(&fx.ledger, fx.tools.renderer.as_ref(), &copy).unwrap();
        assert!(found.hash_match.is_none());
        assert_eq!(found.recipients(), vec!["dave"]);
    }

    #[test]
    fn protected_copy_matches_by_hash() {
        let fx = fixture();
        let report = fx
            .orchestrator()
            .run(&BuildRequest::new(fx.source()).protect(Some(Password::new("pw"))))
            .unwrap();
        let found =
            validate_document(&fx.ledger, fx.tools.renderer.as_ref(), &report.output).unwrap();
        assert_eq!(found.hash_match.map(|r| r.id), Some(report.record.id));
    }

    #[test]
    fn unknown_document_is_unattributed() {
        let fx = fixture();
        let pdf = fx.dir().join("stranger.pdf");
        write_sample_pdf(&pdf, 1);
        let report = validate_document(&fx.ledger, fx.tools.renderer.as_ref(), &pdf).unwrap();
        assert!(!report.is_attributed());
        assert!(report.tokens.is_empty());
    }

    #[test]
    fn unreadable_metadata_is_reported_not_fatal() {
        let fx = fixture();
        let pdf = fx.dir().join("garbage.pdf");
        fs::write(&pdf, b"%PDF-1.4 tm-00112233445566778899 trailing").unwrap();
        let report = validate_document(&fx.ledger, fx.tools.renderer.as_ref(), &pdf).unwrap();
        assert!(report.metadata_error.is_some());
        assert_eq!(report.tokens.len(), 1);
        assert!(!report.is_attributed());
    }
}

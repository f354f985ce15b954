//! Per-recipient identifiers embedded in distributed copies.
//!
//! A token is `tm-` followed by 20 lowercase hex characters: the first ten
//! bytes of a keyed BLAKE3 hash over the document id and the recipient.
//! Without the project key a token reveals nothing about the recipient;
//! mapping a token back to a person is a ledger lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix of every recipient token.
pub const TOKEN_PREFIX: &str = "tm-";
/// Number of hash bytes kept in a token.
pub const TOKEN_BYTES: usize = 10;
const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

/// A recipient token such as `tm-3f9a0c1b2d4e5f607182`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientToken(String);

impl RecipientToken {
    /// Parse a token, accepting only the exact `tm-<20 hex>` form.
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix(TOKEN_PREFIX)?;
        if hex.len() == TOKEN_HEX_LEN && hex.bytes().all(is_lower_hex) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RecipientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives recipient tokens under a project's token key.
#[derive(Clone)]
pub struct RecipientTokenizer {
    key: [u8; 32],
}

impl RecipientTokenizer {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Token for `recipient` on `document_id`. Surrounding whitespace in the
    /// recipient is ignored; a blank recipient has no token.
    pub fn token(&self, document_id: &[u8], recipient: &str) -> Option<RecipientToken> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return None;
        }
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(document_id);
        hasher.update(&[0]);
        hasher.update(recipient.as_bytes());
        let digest = hasher.finalize();
        Some(RecipientToken(format!(
            "{TOKEN_PREFIX}{}",
            hex::encode(&digest.as_bytes()[..TOKEN_BYTES])
        )))
    }
}

impl fmt::Debug for RecipientTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientTokenizer(<redacted>)")
    }
}

/// Every distinct token appearing in `text`, in order of first appearance.
///
/// A candidate must not be glued to further hex digits on either side.
pub fn extract_tokens(text: &str) -> Vec<RecipientToken> {
    let bytes = text.as_bytes();
    let mut found: Vec<RecipientToken> = Vec::new();
    let mut start = 0;
    while let Some(offset) = text[start..].find(TOKEN_PREFIX) {
        let at = start + offset;
        let hex_start = at + TOKEN_PREFIX.len();
        let hex_end = hex_start + TOKEN_HEX_LEN;
        let preceded_ok = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        if preceded_ok
            && hex_end <= bytes.len()
            && bytes[hex_start..hex_end].iter().copied().all(is_lower_hex)
            && bytes.get(hex_end).map_or(true, |b| !b.is_ascii_alphanumeric())
        {
            let token = RecipientToken(text[at..hex_end].to_string());
            if !found.contains(&token) {
                found.push(token);
            }
            start = hex_end;
        } else {
            start = hex_start;
        }
    }
    found
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

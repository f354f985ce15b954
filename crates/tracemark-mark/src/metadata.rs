//! Document information fields written by a marking pass.

use std::collections::BTreeMap;

use tracemark_types::Classification;
use uuid::Uuid;

/// Prefix shared by every custom key tracemark writes.
pub const NAMESPACE: &str = "Tracemark";

/// Value written to the standard `Creator` key.
pub const CREATOR: &str = "tracemark";

pub const KEY_SUBJECT: &str = "Subject";
pub const KEY_AUTHOR: &str = "Author";
pub const KEY_KEYWORDS: &str = "Keywords";
pub const KEY_CREATOR: &str = "Creator";
pub const KEY_CLASSIFICATION: &str = "TracemarkClassification";
pub const KEY_OWNER: &str = "TracemarkOwner";
pub const KEY_PURPOSE: &str = "TracemarkPurpose";
pub const KEY_NUDGE: &str = "TracemarkNudge";
pub const KEY_BUILD_ID: &str = "TracemarkBuildId";
pub const KEY_TOKEN: &str = "TracemarkToken";
pub const KEY_OPERATOR: &str = "TracemarkOperator";

/// Inputs to a metadata pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkingFields {
    pub classification: Classification,
    pub owner: Option<String>,
    pub purpose: Option<String>,
    pub nudge: Option<String>,
    pub build_id: Option<Uuid>,
    pub token: Option<String>,
    pub operator: Option<String>,
}

/// Key/value pairs for a PDF document information dictionary.
///
/// Keys are unique; writing the same map twice leaves the document
/// unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    entries: BTreeMap<String, String>,
}

impl DocumentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Only the keys in the tracemark namespace.
    pub fn namespaced(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| k.starts_with(NAMESPACE))
    }

    pub fn classification(&self) -> Option<&str> {
        self.get(KEY_CLASSIFICATION)
    }

    pub fn token(&self) -> Option<&str> {
        self.get(KEY_TOKEN)
    }

    pub fn build_id(&self) -> Option<Uuid> {
        self.get(KEY_BUILD_ID).and_then(|s| Uuid::parse_str(s).ok())
    }
}

impl FromIterator<(String, String)> for DocumentMetadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Maps marking fields onto document information keys.
#[derive(Clone, Debug, Default)]
pub struct MetadataEmbedder;

impl MetadataEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// The entries to write for `fields`. `Title` is never touched, and
    /// absent fields produce no key at all.
    pub fn entries(&self, fields: &MarkingFields) -> DocumentMetadata {
        let mut meta = DocumentMetadata::new();
        let classification = fields.classification.as_str();

        meta.insert(KEY_SUBJECT, format!("Classification: {classification}"));
        meta.insert(KEY_CREATOR, CREATOR);
        meta.insert(
            KEY_KEYWORDS,
            match &fields.token {
                Some(token) => format!("{classification}, {token}"),
                None => classification.to_string(),
            },
        );
        meta.insert(KEY_CLASSIFICATION, classification);

        if let Some(owner) = &fields.owner {
            meta.insert(KEY_AUTHOR, owner.clone());
            meta.insert(KEY_OWNER, owner.clone());
        }
        if let Some(purpose) = &fields.purpose {
            meta.insert(KEY_PURPOSE, purpose.clone());
        }
        if let Some(nudge) = &fields.nudge {
            meta.insert(KEY_NUDGE, nudge.clone());
        }
        if let Some(build_id) = fields.build_id {
            meta.insert(KEY_BUILD_ID, build_id.to_string());
        }
        if let Some(token) = &fields.token {
            meta.insert(KEY_TOKEN, token.clone());
        }
        if let Some(operator) = &fields.operator {
            meta.insert(KEY_OPERATOR, operator.clone());
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> MarkingFields {
        MarkingFields {
            classification: Classification::from("SECRET"),
            owner: Some("Alice".into()),
            purpose: Some("board review".into()),
            nudge: Some("do not forward".into()),
            build_id: Some(Uuid::nil()),
            token: Some("tm-00112233445566778899".into()),
            operator: Some("alice@workstation".into()),
        }
    }

    #[test]
    fn standard_keys() {
        let meta = MetadataEmbedder::new().entries(&full());
        assert_eq!(meta.get(KEY_SUBJECT), Some("Classification: SECRET"));
        assert_eq!(meta.get(KEY_AUTHOR), Some("Alice"));
        assert_eq!(meta.get(KEY_CREATOR), Some("tracemark"));
        assert_eq!(
            meta.get(KEY_KEYWORDS),
            Some("SECRET, tm-00112233445566778899")
        );
        assert_eq!(meta.get("Title"), None);
    }

    #[test]
    fn namespaced_keys() {
        let meta = MetadataEmbedder::new().entries(&full());
        assert_eq!(meta.classification(), Some("SECRET"));
        assert_eq!(meta.token(), Some("tm-00112233445566778899"));
        assert_eq!(meta.build_id(), Some(Uuid::nil()));
        assert_eq!(meta.get(KEY_OPERATOR), Some("alice@workstation"));
        assert_eq!(meta.namespaced().count(), 7);
    }

    #[test]
    fn absent_fields_are_omitted() {
        let meta = MetadataEmbedder::new().entries(&MarkingFields::default());
        assert_eq!(meta.get(KEY_AUTHOR), None);
        assert_eq!(meta.get(KEY_TOKEN), None);
        assert_eq!(meta.get(KEY_PURPOSE), None);
        assert_eq!(meta.get(KEY_KEYWORDS), Some("UNCLASSIFIED"));
        assert!(meta.iter().all(|(_, v)| !v.is_empty()));
    }

    #[test]
    fn entries_are_deterministic() {
        let embedder = MetadataEmbedder::new();
        assert_eq!(embedder.entries(&full()), embedder.entries(&full()));
    }
}

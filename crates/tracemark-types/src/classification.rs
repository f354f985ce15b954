use std::fmt;

use serde::{Deserialize, Serialize};

/// Sensitivity label attached to a build.
///
/// Classifications form an open set: well-known labels are provided as
/// constants, but any string is accepted and stored exactly as given.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classification(String);

impl Classification {
    pub const UNCLASSIFIED: &'static str = "UNCLASSIFIED";
    pub const INTERNAL: &'static str = "INTERNAL";
    pub const CONFIDENTIAL: &'static str = "CONFIDENTIAL";
    pub const SECRET: &'static str = "SECRET";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::new(Self::UNCLASSIFIED)
    }
}

impl fmt::Debug for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Classification({})", self.0)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Classification {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Classification {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_exactly_as_given() {
        let c = Classification::new("eyes-only / Project X");
        assert_eq!(c.as_str(), "eyes-only / Project X");
    }

    #[test]
    fn default_is_unclassified() {
        assert_eq!(Classification::default().as_str(), "UNCLASSIFIED");
    }

    #[test]
    fn serde_is_transparent() {
        let c = Classification::from(Classification::SECRET);
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"SECRET\"");
    }
}

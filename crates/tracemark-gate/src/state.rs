use std::fmt;
use std::time::Duration;

use tracemark_types::ProtectionMethod;

use crate::error::ProtectionError;

// ---------------------------------------------------------------------------
// ProtectionState
// ---------------------------------------------------------------------------

/// States of one protection attempt.
///
/// ```text
/// Unprotected -> AttemptExternal -> Protected(External)
///                       |
///                       v
///                 AttemptNative  -> Protected(Native)
///                       |
///                       v
///                    Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtectionState {
    Unprotected,
    AttemptExternal,
    AttemptNative,
    Protected(ProtectionMethod),
    Failed,
}

impl ProtectionState {
    /// Whether the state machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: ProtectionState) -> bool {
        use ProtectionState::*;
        matches!(
            (self, next),
            (Unprotected, AttemptExternal)
                | (AttemptExternal, Protected(ProtectionMethod::External))
                | (AttemptExternal, AttemptNative)
                | (AttemptNative, Protected(ProtectionMethod::Native))
                | (AttemptNative, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProtectionState::Protected(_) | ProtectionState::Failed)
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionState::Unprotected => f.write_str("unprotected"),
            ProtectionState::AttemptExternal => f.write_str("attempt-external"),
            ProtectionState::AttemptNative => f.write_str("attempt-native"),
            ProtectionState::Protected(method) => write!(f, "protected({method})"),
            ProtectionState::Failed => f.write_str("failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// ProtectionTrace
// ---------------------------------------------------------------------------

/// One recorded state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: ProtectionState,
    pub to: ProtectionState,
    /// Why the move happened, e.g. the tool error that forced a fallback.
    pub note: Option<String>,
    /// Time spent in `from` before moving on.
    pub elapsed: Duration,
}

/// Ordered log of every transition of one protection attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectionTrace {
    state: ProtectionState,
    transitions: Vec<Transition>,
}

impl Default for ProtectionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtectionTrace {
    pub fn new() -> Self {
        Self {
            state: ProtectionState::Unprotected,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> ProtectionState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Move to `next`, rejecting any move the state machine does not allow.
    pub fn advance(
        &mut self,
        next: ProtectionState,
        note: Option<String>,
        elapsed: Duration,
    ) -> Result<(), ProtectionError> {
        if !self.state.can_transition_to(next) {
            return Err(ProtectionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            note,
            elapsed,
        });
        self.state = next;
        Ok(())
    }

    /// Notes attached to transitions, in order.
    pub fn notes(&self) -> impl Iterator<Item = &str> {
        self.transitions.iter().filter_map(|t| t.note.as_deref())
    }

    /// Compact rendering such as `unprotected -> attempt-external -> protected(external)`.
    pub fn path(&self) -> String {
        let mut parts = vec![ProtectionState::Unprotected.to_string()];
        parts.extend(self.transitions.iter().map(|t| t.to.to_string()));
        parts.join(" -> ")
    }
}

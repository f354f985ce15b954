//! Protection gate for tracemark builds.
//!
//! [`ProtectionGate`] drives an explicit state machine
//! ([`ProtectionState`]): the configured external protector is tried first,
//! native encryption second, and every move is recorded in a
//! [`ProtectionTrace`]. A file is only reported protected once the renderer
//! confirms it cannot be opened without the password.

pub mod error;
pub mod gate;
pub mod state;

pub use error::ProtectionError;
pub use gate::{ProtectionGate, ProtectionOutcome};
pub use state::{ProtectionState, ProtectionTrace, Transition};

//! Foundation types for tracemark.
//!
//! Every other tracemark crate depends on `tracemark-types`.
//!
//! # Key Types
//!
//! - [`BuildRecord`] / [`PendingRecord`]: one build attempt, before and after
//!   the ledger assigns its id
//! - [`Fingerprint`]: BLAKE3 content fingerprint of a source or artifact
//! - [`Classification`]: open-ended sensitivity label
//! - [`Stage`] and [`Outcome`]: where a build got to and how it ended
//! - [`WatermarkParams`]: visible watermark request

pub mod classification;
pub mod error;
pub mod fingerprint;
pub mod record;

pub use classification::Classification;
pub use error::TypeError;
pub use fingerprint::Fingerprint;
pub use record::{
    BuildRecord, Outcome, OutcomeKind, PendingRecord, ProtectionMethod, RecordId, Stage,
    WatermarkParams,
};

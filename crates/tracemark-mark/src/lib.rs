//! Document marking for tracemark builds.
//!
//! - [`WatermarkEngine`] lays out the visible overlay for each page
//! - [`MetadataEmbedder`] maps classification, owner, token, and build
//!   identity onto document information keys
//! - [`RecipientTokenizer`] derives per-recipient tokens and
//!   [`extract_tokens`] recovers them from a leaked copy
//!
//! Nothing here touches PDF bytes; the renderer in `tracemark-tools` applies
//! the plans produced by this crate.

pub mod error;
pub mod metadata;
pub mod token;
pub mod watermark;

pub use error::MarkingError;
pub use metadata::{DocumentMetadata, MarkingFields, MetadataEmbedder};
pub use token::{extract_tokens, RecipientToken, RecipientTokenizer};
pub use watermark::{OverlaySpec, PageGeometry, Placement, WatermarkEngine, MIN_TILE_GAP};

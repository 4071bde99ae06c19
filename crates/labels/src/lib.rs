//! Label identities for physical volumes.
//!
//! Display identities are generated for volumes that have no stored label
//! yet, and reconciled against stored label codes, which exist in two
//! historical formats.

pub mod code;
pub mod generator;
pub mod reconcile;

pub use code::{LabelCode, LabelCodeFormat};
pub use generator::{Clock, DEFAULT_OFFSET_MINUTES, FixedClock, LabelIdGenerator, SystemClock};
pub use reconcile::{DurableLabelRecord, LabelIdentity, LabelSheet, LabelStatus};

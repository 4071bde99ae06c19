//! Loading order aggregate.
//!
//! `OrderSession` owns everything a user assembles before finalizing: the
//! header, the admitted invoices, the volume ledger and the two parties. It
//! also tracks whether any of that differs from the last committed state.

pub mod dirty;
pub mod header;
pub mod session;

pub use dirty::DirtyStateTracker;
pub use header::{MovementType, OrderHeader, Priority};
pub use session::{LabelGateError, OrderSession, OrderSnapshot, OrderTotals, PendingVolumes};

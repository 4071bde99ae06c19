//! Aggregate root trait.

/// Aggregate root marker + minimal interface.
///
/// Kept small: the loading order is not event-sourced, but callers still need
/// a stable identity and a change counter to reason about staleness.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing count of in-memory mutations.
    ///
    /// Every accepted change bumps this by one; rejected changes leave it alone.
    fn version(&self) -> u64;
}

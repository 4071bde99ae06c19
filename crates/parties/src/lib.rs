//! Parties involved in a loading order (sender and recipient).
//!
//! Pure data: tax-id based lookup of a party is an external collaborator and
//! lives behind a port in the infra crate.

pub mod party;

pub use party::{Address, PartyRecord, PartyRole, TaxId, TaxIdKind};

//! Physical volumes of invoices and the ledger that holds them per invoice.
//!
//! Measurements are in metres and kilograms. Cubic volume and weights are
//! stored rounded to two decimals.

pub mod ledger;
pub mod unit;

pub use ledger::{LedgerEntry, LedgerKey, LedgerSnapshot, RekeyReport, UpsertOutcome, VolumeLedger};
pub use unit::{Dimensions, VolumeDimensionSet, VolumeUnit, round2};

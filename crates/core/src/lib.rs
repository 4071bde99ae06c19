//! `loadorder-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the loading-order
//! crates (no infrastructure concerns, no IO).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::AggregateRoot;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{DurableId, LocalId, TenantId};
pub use value_object::ValueObject;

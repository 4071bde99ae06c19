//! Multi-step, non-transactional commit flows.

pub mod order_assembly;

pub use order_assembly::{
    CommitError, CommitOutcome, CommitStage, OrderAssemblyCoordinator, PartialCommit, WriteStage,
};

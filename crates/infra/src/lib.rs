//! Infrastructure layer: persistence gateways, the commit coordinator,
//! ingestion channels, label printing and configuration.

pub mod config;
pub mod external;
pub mod gateway;
pub mod handle;
pub mod ingest;
pub mod labels;
pub mod retry;
pub mod saga;

pub use config::CommitConfig;
pub use gateway::{GatewayError, InMemoryGateway};
pub use handle::OrderHandle;
pub use saga::order_assembly::{
    CommitError, CommitOutcome, CommitStage, OrderAssemblyCoordinator, PartialCommit, WriteStage,
};

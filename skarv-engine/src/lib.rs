//! # skarv-engine
//!
//! Event distribution engine: takes completed events from the assembly
//! path, materializes each into a pooled buffer, delivers it to the
//! attached consumer groups and keeps upstream peers supplied with
//! buffer replenishment requests.
//!
//! ### Key Submodules:
//! - `strategy`: the three-operation delivery seam and the production
//!   builder strategy
//! - `groups`: competing/broadcast consumer-group delivery
//! - `distribution`: the generic engine driving one event end to end
//! - `runtime`: ingress, assembly and distribution tasks plus shutdown

pub mod distribution;
pub mod error;
pub mod groups;
pub mod runtime;
pub mod strategy;

pub use distribution::{DistributionEngine, ProcessOutcome};
pub use error::EngineError;
pub use groups::{ConsumerGroups, EventConsumer};
pub use runtime::{connect_peers, run_builder, BuilderReport};
pub use strategy::{BuilderStrategy, DeliveryStrategy, RequestOutcome};

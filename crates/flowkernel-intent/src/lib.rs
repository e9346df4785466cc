//! The cross-domain plane (spec §4.6): signed `FlowIntent` verification and
//! metering (`IntentRegistry`), domain→(adapter, receiver, executor
//! allowlist) mapping (`DomainDirectory`), and the component that wires
//! them into one cross-domain pull (`Rebalancer`).

pub mod directory;
pub mod rebalancer;
pub mod registry;

pub use directory::DomainDirectory;
pub use rebalancer::{Rebalancer, SourcePullAdapter};
pub use registry::{intent_hash, IntentRegistry};

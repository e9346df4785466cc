pub mod authorization;
pub mod constants;
pub mod error;
pub mod events;
pub mod ids;
pub mod intent;
pub mod types;

pub use authorization::{Authorization, AuthorizationCore};
pub use error::{KernelError, KernelResult};
pub use ids::{AuthHash, Id, IntentHash};
pub use intent::FlowIntent;
pub use types::{Amount, Signature, Timestamp};

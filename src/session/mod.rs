mod registry;
mod types;

pub use registry::{RegistryStats, SessionRegistry};
pub use types::ConnectionHandle;

// Library exports for the binary and integration tests
pub mod config;
pub mod error;
pub mod registry;
pub mod session;

pub use error::{RegistryError, SessionError, SessionResult};
pub use registry::{MemoryRegistry, SessionRegistry};
pub use session::{SessionCoordinator, SessionHooks};

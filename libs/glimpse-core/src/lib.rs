pub mod docker;
pub mod engine;
pub mod error;
pub mod executor;
pub mod pool;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod sanitizer;
pub mod stream;
pub mod submission;

#[cfg(test)]
mod docker_tests;
#[cfg(test)]
mod testing;

pub use error::{ErrorKind, ExecutionError};
pub use executor::{ExecutionResult, Orchestrator};
pub use pool::{PoolStats, SandboxLease, SandboxPool};
pub use registry::{LanguageRegistry, LanguageSpec};

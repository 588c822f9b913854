pub mod defaults;
pub mod detector;
pub mod error;
pub mod git;
pub mod github;
pub mod process;
pub mod runner;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub mod testing;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};

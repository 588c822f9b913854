#[cfg(not(unix))]
compile_error!("tipwatch relies on Unix process groups and only builds on Unix targets");

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `tipwatch::supervisor` instead of `tipwatch::core::supervisor`
pub use core::*;
pub use utils::*;

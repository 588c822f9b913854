//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Async command execution with error handling and output forwarding

pub mod command;

//! Shared plumbing for the Keel crates: logging, command-line arguments and collections.

pub mod cli;
pub mod collections;
pub mod log;

//! Command-line interface
//!
//! Argument parsing for the ledger binary. Every subcommand maps onto one
//! library operation in `main.rs`.

pub mod commands;

pub use commands::{Command, Opt};

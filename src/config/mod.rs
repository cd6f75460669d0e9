//! Configuration management
//!
//! Node address, peers, mining address and data locations, read from an
//! optional `node.toml` and overridden by environment variables.

pub mod settings;

pub use settings::{Config, Settings, DEFAULT_NODE_ADDR, GLOBAL_CONFIG};

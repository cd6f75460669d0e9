//! Data storage and persistence
//!
//! The UTXO set lives next to the blocks in the same sled database. The
//! memory pool and the in-transit queue are in-memory and owned by the node.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::{Outputs, UTXOSet};

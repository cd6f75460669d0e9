//! # P2P Ledger - My Proof-of-Work UTXO Ledger
//!
//! A small ledger I can run as several nodes on one machine. Blocks are mined
//! with a fixed-difficulty proof-of-work, value moves through unspent outputs
//! and nodes keep each other in sync with a gossip protocol over TCP.
//!
//! ## How I Organized My Code
//! - `core/`: blocks, transactions, Merkle root, proof-of-work, chain store, mining
//! - `storage/`: UTXO index, memory pool, blocks still in transit
//! - `network/`: wire messages, the protocol state machine, TCP server and transport
//! - `wallet/`: key pairs, addresses and the per-node wallet file
//! - `config/`: node settings from `node.toml` and the environment
//! - `utils/`: hashing, signatures and the canonical encoding
//! - `cli/`: command-line arguments
//!
//! ## Things I Need to Remember
//! - The same bincode encoding is stored on disk, sent on the wire and hashed.
//! - The tip follows the highest block seen, and nothing else. A block that
//!   is higher wins even if I never checked its ancestors.
//! - The UTXO set is derived state. `reindex` rebuilds it from the blocks and
//!   must agree with applying `update` block by block.
//! - Node state sits behind one lock; handlers return the messages to send and
//!   the server delivers them after the lock is released.
//! - Only storage errors stop the node. Everything else drops the message or
//!   the peer and carries on.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, MerkleTree, MiningCoordinator, ProofOfWork, TXInput, TXOutput,
    Transaction, MINING_THRESHOLD, SUBSIDY, TARGET_BITS,
};
pub use error::{BlockchainError, Result};
pub use network::{
    send_tx, Message, NodeContext, Nodes, OpType, Outbound, Server, SyncState, TcpTransport,
    Transport, CENTRAL_NODE,
};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign,
    ecdsa_p256_sha256_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};

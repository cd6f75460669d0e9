//! Core ledger functionality
//!
//! Blocks, transactions, the Merkle commitment, proof-of-work, the chain
//! store and the mining coordinator that turns pending transactions into blocks.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod miner;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use merkle::MerkleTree;
pub use miner::{MiningCoordinator, MINING_THRESHOLD};
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{
    TXInput, TXOutput, Transaction, COINBASE_VOUT, GENESIS_COINBASE_DATA, SUBSIDY,
};

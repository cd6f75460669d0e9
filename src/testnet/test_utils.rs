//! Test utilities for ledger testing

use crate::core::{Block, Blockchain, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::wallet::Wallet;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// A chain in a temp directory whose genesis pays `owner`, with its UTXO
/// set already indexed.
pub struct TestChain {
    pub owner: Wallet,
    pub blockchain: Blockchain,
    pub utxo_set: UTXOSet,
    _temp_dir: TempDir,
}

impl TestChain {
    pub fn new() -> TestChain {
        let temp_dir = create_temp_dir().unwrap();
        let owner = Wallet::new().unwrap();
        let blockchain = Blockchain::create_blockchain(
            &owner.get_address(),
            &temp_dir.path().join("test_chain"),
        )
        .unwrap();
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();

        TestChain {
            owner,
            blockchain,
            utxo_set,
            _temp_dir: temp_dir,
        }
    }

    /// Mines `count` coinbase-only blocks paying the owner.
    pub fn mint(&self, count: usize) -> Vec<Block> {
        (0..count)
            .map(|_| {
                let coinbase = Transaction::new_coinbase_tx(&self.owner.get_address()).unwrap();
                let block = self.blockchain.mine_block(&[coinbase]).unwrap();
                self.utxo_set.update(&block).unwrap();
                block
            })
            .collect()
    }

    /// A signed payment from the owner, not yet mined.
    pub fn pay(&self, to: &Wallet, amount: u64) -> Transaction {
        Transaction::new_utxo_transaction(&self.owner, &to.get_address(), amount, &self.utxo_set)
            .unwrap()
    }
}

/// The same transaction with one signature byte flipped. The id still
/// matches since ids leave signatures out.
pub fn with_broken_signature(tx: &Transaction) -> Transaction {
    let signature = tx.get_vin()[0].get_signature().to_vec();
    let mut bytes = tx.serialize().unwrap();
    let at = bytes
        .windows(signature.len())
        .position(|window| window == signature.as_slice())
        .unwrap();
    bytes[at] ^= 0x01;
    Transaction::deserialize(&bytes).unwrap()
}

/// Walks tip to genesis checking linkage, heights and proof-of-work.
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash = blockchain.get_tip_hash()?;

    for block in blockchain.iterator()? {
        let block = block?;
        if expected_hash.as_deref() != Some(block.get_hash()) {
            return Ok(false);
        }
        if !ProofOfWork::validate(&block) {
            return Ok(false);
        }
        if block.is_genesis() {
            return Ok(block.get_height() == 0);
        }
        expected_hash = Some(block.get_pre_block_hash().to_string());
    }

    Ok(expected_hash.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chain_starts_at_genesis() {
        let chain = TestChain::new();
        assert_eq!(chain.blockchain.get_best_height().unwrap(), Some(0));
        assert!(validate_blockchain_integrity(&chain.blockchain).unwrap());
    }

    #[test]
    fn test_minted_chain_keeps_integrity() {
        let chain = TestChain::new();
        let blocks = chain.mint(2);

        assert_eq!(blocks[1].get_height(), 2);
        assert!(validate_blockchain_integrity(&chain.blockchain).unwrap());
        assert_eq!(
            chain.utxo_set.get_balance(&chain.owner.get_pub_key_hash()).unwrap(),
            150
        );
    }
}

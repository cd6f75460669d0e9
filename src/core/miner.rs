use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{MemoryPool, UTXOSet};
use crate::wallet::validate_address;
use log::{info, warn};
use std::collections::HashSet;

/// Pending transactions needed before a miner starts a round.
pub const MINING_THRESHOLD: usize = 2;

/// Turns pending transactions into blocks for a node that has a reward
/// address.
#[derive(Debug, Clone)]
pub struct MiningCoordinator {
    mining_address: String,
}

impl MiningCoordinator {
    pub fn new(mining_address: &str) -> Result<MiningCoordinator> {
        if !validate_address(mining_address) {
            return Err(BlockchainError::InvalidAddress(format!(
                "Mining address {mining_address} is not valid"
            )));
        }
        Ok(MiningCoordinator {
            mining_address: mining_address.to_string(),
        })
    }

    pub fn should_mine(&self, mempool: &MemoryPool) -> bool {
        mempool.len() >= MINING_THRESHOLD
    }

    /// Mines rounds until the pool is empty or nothing in it is valid.
    /// Each round takes every currently valid transaction, adds one coinbase
    /// and commits the block. Returns the mined blocks in order.
    pub fn mine_pending(
        &self,
        utxo_set: &UTXOSet,
        mempool: &mut MemoryPool,
    ) -> Result<Vec<Block>> {
        let mut mined = vec![];

        while !mempool.is_empty() {
            let mut txs = self.select_transactions(utxo_set, mempool)?;
            if txs.is_empty() {
                info!("All pending transactions invalid, awaiting new ones");
                break;
            }

            let coinbase = Transaction::new_coinbase_tx(&self.mining_address)?;
            txs.push(coinbase);

            let block = utxo_set.get_blockchain().mine_block(&txs)?;
            for tx in &txs {
                mempool.remove(&tx.get_id_hex());
            }
            utxo_set.update(&block)?;

            info!(
                "New block {} is mined with {} transactions",
                block.get_hash(),
                txs.len()
            );
            mined.push(block);
        }

        Ok(mined)
    }

    // Pool order is by id. A transaction is skipped, and stays pending, when it
    // fails verification or touches an output that is gone or already taken
    // by an earlier pick.
    fn select_transactions(
        &self,
        utxo_set: &UTXOSet,
        mempool: &MemoryPool,
    ) -> Result<Vec<Transaction>> {
        let blockchain = utxo_set.get_blockchain();
        let mut claimed = HashSet::new();
        let mut selected = vec![];

        'pending: for tx in mempool.get_all() {
            if tx.is_coinbase() {
                warn!("Skipping pending coinbase {}", tx.get_id_hex());
                continue;
            }
            if !blockchain.verify_transaction(&tx)? {
                warn!("Skipping unverifiable transaction {}", tx.get_id_hex());
                continue;
            }

            let mut spends = HashSet::new();
            for vin in tx.get_vin() {
                let outpoint = (vin.get_txid().to_vec(), vin.get_vout());
                if claimed.contains(&outpoint)
                    || spends.contains(&outpoint)
                    || !utxo_set.is_unspent(vin.get_txid(), vin.get_vout())?
                {
                    warn!(
                        "Skipping transaction {} spending unavailable output {}:{}",
                        tx.get_id_hex(),
                        vin.get_txid_hex(),
                        vin.get_vout()
                    );
                    continue 'pending;
                }
                spends.insert(outpoint);
            }

            claimed.extend(spends);
            selected.push(tx);
        }

        Ok(selected)
    }
}

// The chain store: every block I have ever accepted, keyed by hash, plus a tip pointer.
// Blocks and the tip live in one sled tree so a block write and its tip update
// commit together.

use crate::core::{Block, ProofOfWork, TXOutput, Transaction, GENESIS_COINBASE_DATA};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use sled::transaction::TransactionError;
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

#[derive(Clone)]
pub struct Blockchain {
    // None until the first block arrives on a node that joined with an empty store
    tip_hash: Arc<RwLock<Option<String>>>,
    db: Db,
}

impl Blockchain {
    // When I start a brand new chain: genesis pays the subsidy to `genesis_address`
    pub fn create_blockchain(genesis_address: &str, db_path: &Path) -> Result<Blockchain> {
        let blockchain = Self::open_blockchain(db_path)?;
        if let Some(tip) = blockchain.get_tip_hash()? {
            return Err(BlockchainError::Database(format!(
                "A blockchain already exists at {} (tip {tip})",
                db_path.display()
            )));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase =
            Transaction::new_coinbase_tx_with_data(genesis_address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::generate_genesis_block(&coinbase)?;
        blockchain.add_block(&genesis)?;
        Ok(blockchain)
    }

    // When I open whatever is on disk; an empty store is fine, the node syncs into it
    pub fn open_blockchain(db_path: &Path) -> Result<Blockchain> {
        let db = sled::open(db_path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        let tip_hash = match blocks_tree
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip hash: {e}")))?
        {
            Some(bytes) => Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                BlockchainError::Database(format!("Invalid tip hash format: {e}"))
            })?),
            None => None,
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
        })
    }

    fn blocks_tree(&self) -> Result<Tree> {
        self.db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))
    }

    fn read_tip(&self) -> Result<RwLockReadGuard<'_, Option<String>>> {
        self.tip_hash
            .read()
            .map_err(|_| BlockchainError::Database("Tip hash lock poisoned".to_string()))
    }

    fn write_tip(&self) -> Result<RwLockWriteGuard<'_, Option<String>>> {
        self.tip_hash
            .write()
            .map_err(|_| BlockchainError::Database("Tip hash lock poisoned".to_string()))
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_tip_hash(&self) -> Result<Option<String>> {
        Ok(self.read_tip()?.clone())
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockchainError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }

    // I need the tip block itself for its height; a tip pointing at nothing means a corrupt store
    fn tip_block(&self, tip_hash: &str) -> Result<Block> {
        self.get_block(tip_hash.as_bytes())?.ok_or_else(|| {
            BlockchainError::Database(format!("Tip block {tip_hash} missing from store"))
        })
    }

    // Stores the block and, when asked, moves the tip to it in the same sled transaction
    fn commit_block(&self, blocks_tree: &Tree, block: &Block, set_tip: bool) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block_hash, block_data.as_slice())?;
                if set_tip {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError| {
                BlockchainError::Database(format!("Failed to store block {block_hash}: {e}"))
            })
    }

    /// Verifies `transactions`, mines them into a block on top of the tip and
    /// commits it as the new tip. The caller adds any coinbase.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot mine a block without transactions".to_string(),
            ));
        }
        for transaction in transactions {
            if !self.verify_transaction(transaction)? {
                return Err(BlockchainError::Transaction(format!(
                    "Invalid transaction {}",
                    transaction.get_id_hex()
                )));
            }
        }
        check_for_double_spending(transactions)?;

        // The tip stays locked for the whole search so nobody moves it underneath me
        let mut tip = self.write_tip()?;
        let tip_hash = (*tip).clone().ok_or_else(|| {
            BlockchainError::InvalidBlock(
                "Cannot mine on an empty chain; create or sync it first".to_string(),
            )
        })?;
        let height = self.tip_block(&tip_hash)?.get_height() + 1;

        let block = Block::new_block(tip_hash, transactions, height)?;
        self.commit_block(&self.blocks_tree()?, &block, true)?;
        *tip = Some(block.get_hash().to_string());

        info!("Block {} is the new tip at height {height}", block.get_hash());
        Ok(block)
    }

    /// Stores `block` and adopts it as tip when the chain is empty or the block
    /// is strictly higher than the current tip. Returns whether the tip moved.
    /// Ancestry is not checked; height alone decides.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        let blocks_tree = self.blocks_tree()?;
        if blocks_tree
            .contains_key(block.get_hash())
            .map_err(|e| BlockchainError::Database(format!("Failed to check block existence: {e}")))?
        {
            debug!("Block {} already stored", block.get_hash());
            return Ok(false);
        }

        let mut tip = self.write_tip()?;
        let adopt = match tip.as_deref() {
            None => true,
            Some(tip_hash) => block.get_height() > self.tip_block(tip_hash)?.get_height(),
        };
        self.commit_block(&blocks_tree, block, adopt)?;
        if adopt {
            *tip = Some(block.get_hash().to_string());
            info!(
                "Block {} at height {} is the new tip",
                block.get_hash(),
                block.get_height()
            );
        } else {
            info!(
                "Stored block {} at height {} off the tip",
                block.get_hash(),
                block.get_height()
            );
        }
        Ok(adopt)
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        self.walk_from(self.get_tip_hash()?)
    }

    fn walk_from(&self, start: Option<String>) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator {
            blocks_tree: self.blocks_tree()?,
            current_hash: start,
        })
    }

    /// Full replay from tip to genesis: txid (hex) -> outputs nobody spends,
    /// keyed by their index in the transaction.
    pub fn find_utxo(&self) -> Result<HashMap<String, BTreeMap<usize, TXOutput>>> {
        let mut utxo: HashMap<String, BTreeMap<usize, TXOutput>> = HashMap::new();
        let mut spent_txos: HashMap<String, HashSet<usize>> = HashMap::new();

        for block in self.iterator()? {
            let block = block?;
            // Walking newest-first, so every spender of this block's outputs has
            // already been seen, including spenders inside this same block.
            for tx in block.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(txin.get_txid_hex())
                        .or_default()
                        .insert(txin.get_vout());
                }
            }

            for tx in block.get_transactions() {
                let txid_hex = tx.get_id_hex();
                let spent = spent_txos.get(&txid_hex);
                let unspent: BTreeMap<usize, TXOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent.is_some_and(|outs| outs.contains(idx)))
                    .map(|(idx, out)| (idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(txid_hex, unspent);
                }
            }
        }
        Ok(utxo)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        find_transaction_in(self.iterator()?, txid)
    }

    // Prior transactions referenced by `tx`'s inputs, searched from `start` down;
    // the ones I cannot find are left out
    fn find_prev_transactions(
        &self,
        tx: &Transaction,
        start: Option<String>,
    ) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid_hex = vin.get_txid_hex();
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            let blocks = self.walk_from(start.clone())?;
            if let Some(prev_tx) = find_transaction_in(blocks, vin.get_txid())? {
                prev_txs.insert(txid_hex, prev_tx);
            }
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.find_prev_transactions(tx, self.get_tip_hash()?)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.find_prev_transactions(tx, self.get_tip_hash()?)?;
        Ok(tx.verify(&prev_txs))
    }

    /// A block from elsewhere is acceptable when its proof-of-work holds, no
    /// output is spent twice inside it and every non-coinbase transaction
    /// verifies against the block's own ancestors.
    pub fn validate_block(&self, block: &Block) -> Result<bool> {
        if !ProofOfWork::validate(block) {
            warn!("Block {} fails proof-of-work", block.get_hash());
            return Ok(false);
        }
        if let Err(e) = check_for_double_spending(block.get_transactions()) {
            warn!("Block {} rejected: {e}", block.get_hash());
            return Ok(false);
        }

        // genesis has no parent, so nothing it spends can be found
        let parent = Some(block.get_pre_block_hash())
            .filter(|hash| !hash.is_empty())
            .map(str::to_string);
        for tx in block.get_transactions().iter().filter(|tx| !tx.is_coinbase()) {
            let prev_txs = self.find_prev_transactions(tx, parent.clone())?;
            if !tx.verify(&prev_txs) {
                warn!(
                    "Block {} carries invalid transaction {}",
                    block.get_hash(),
                    tx.get_id_hex()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Height of the tip block, or None for an empty store.
    pub fn get_best_height(&self) -> Result<Option<usize>> {
        match self.get_tip_hash()? {
            Some(tip_hash) => Ok(Some(self.tip_block(&tip_hash)?.get_height())),
            None => Ok(None),
        }
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let block_bytes = self
            .blocks_tree()?
            .get(block_hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?;
        match block_bytes {
            Some(bytes) => Ok(Some(decode_stored_block(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Hashes of the tip's chain, newest first.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()?
            .map(|block| block.map(|b| b.get_hash_bytes()))
            .collect()
    }

    // No height index, so this walks back from the tip
    pub fn get_block_by_height(&self, height: usize) -> Result<Option<Block>> {
        for block in self.iterator()? {
            let block = block?;
            if block.get_height() == height {
                return Ok(Some(block));
            }
            if block.get_height() < height {
                break;
            }
        }
        Ok(None)
    }
}

fn decode_stored_block(bytes: &[u8]) -> Result<Block> {
    Block::deserialize(bytes)
        .map_err(|e| BlockchainError::Database(format!("Corrupt block in store: {e}")))
}

// The same output must not be spent twice inside one block
fn find_transaction_in(blocks: BlockchainIterator, txid: &[u8]) -> Result<Option<Transaction>> {
    for block in blocks {
        let block = block?;
        if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == txid) {
            return Ok(Some(tx.clone()));
        }
    }
    Ok(None)
}

fn check_for_double_spending(transactions: &[Transaction]) -> Result<()> {
    let mut spent_outputs: HashSet<(&[u8], usize)> = HashSet::new();
    for transaction in transactions.iter().filter(|tx| !tx.is_coinbase()) {
        for input in transaction.get_vin() {
            if !spent_outputs.insert((input.get_txid(), input.get_vout())) {
                return Err(BlockchainError::Transaction(format!(
                    "Output {}:{} spent twice in one block",
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                )));
            }
        }
    }
    Ok(())
}

/// Walks from the tip back to genesis, newest first. Stops early at a block the
/// store does not have yet (a node mid-sync).
pub struct BlockchainIterator {
    blocks_tree: Tree,
    current_hash: Option<String>,
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        let data = match self.blocks_tree.get(hash.as_bytes()) {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!("Block {hash} not in store yet, chain walk stops here");
                return None;
            }
            Err(e) => {
                return Some(Err(BlockchainError::Database(format!(
                    "Failed to read block {hash}: {e}"
                ))))
            }
        };

        match decode_stored_block(&data) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_pre_block_hash().to_string());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

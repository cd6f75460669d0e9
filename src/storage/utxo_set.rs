use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use sled::{Batch, Tree};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

const UTXO_TREE: &str = "chainstate";

/// Unspent outputs of one transaction, keyed by their original output index.
pub type Outputs = BTreeMap<usize, TXOutput>;

/// ( K -> txid bytes, V -> Outputs ) kept in the chain's database, derived
/// from the blocks and rebuilt from them on demand.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Outputs)>> {
        let mut entries = vec![];
        for item in self.utxo_tree()?.iter() {
            let (k, v) = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            entries.push((k.to_vec(), decode_outputs(&v)?));
        }
        Ok(entries)
    }

    /// Collects outputs owned by `pub_key_hash` until they cover `amount`.
    /// Returns the collected total and txid (hex) -> output indices.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0u64;

        'scan: for (txid, outs) in self.entries()? {
            let txid_hex = HEXLOWER.encode(&txid);
            for (idx, out) in outs {
                if accumulated >= amount {
                    break 'scan;
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(out.get_value());
                    unspent_outputs.entry(txid_hex.clone()).or_default().push(idx);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        Ok(self
            .entries()?
            .into_iter()
            .flat_map(|(_, outs)| outs.into_values())
            .filter(|out| out.is_locked_with_key(pub_key_hash))
            .collect())
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    pub fn count_transactions(&self) -> Result<usize> {
        Ok(self.utxo_tree()?.len())
    }

    pub fn is_unspent(&self, txid: &[u8], vout: usize) -> Result<bool> {
        let stored = self
            .utxo_tree()?
            .get(txid)
            .map_err(|e| BlockchainError::Database(format!("Failed to get UTXO: {e}")))?;
        match stored {
            Some(bytes) => Ok(decode_outputs(&bytes)?.contains_key(&vout)),
            None => Ok(false),
        }
    }

    /// Whole set ordered by txid (hex).
    pub fn snapshot(&self) -> Result<BTreeMap<String, Outputs>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|(txid, outs)| (HEXLOWER.encode(&txid), outs))
            .collect())
    }

    /// Throws the set away and replays the chain from the tip.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        let mut batch = Batch::default();
        for key in utxo_tree.iter().keys() {
            let key = key.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            batch.remove(key);
        }
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            batch.insert(txid, serialize(outs)?);
        }
        utxo_tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to rebuild UTXO set: {e}")))?;

        info!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(())
    }

    /// Applies one block on top of the current set. Fails without writing
    /// anything if the block spends an output that is not in the set.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let mut touched: HashMap<Vec<u8>, Outputs> = HashMap::new();

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let outs = match touched.entry(vin.get_txid().to_vec()) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            let stored = utxo_tree.get(vin.get_txid()).map_err(|e| {
                                BlockchainError::Database(format!("Failed to get UTXO: {e}"))
                            })?;
                            let outs = match stored {
                                Some(bytes) => decode_outputs(&bytes)?,
                                None => Outputs::new(),
                            };
                            entry.insert(outs)
                        }
                    };
                    if outs.remove(&vin.get_vout()).is_none() {
                        return Err(BlockchainError::InvalidBlock(format!(
                            "Block {} spends {}:{} which is not unspent",
                            block.get_hash(),
                            vin.get_txid_hex(),
                            vin.get_vout()
                        )));
                    }
                }
            }

            let new_outputs: Outputs = tx.get_vout().iter().cloned().enumerate().collect();
            touched.insert(tx.get_id().to_vec(), new_outputs);
        }

        let mut batch = Batch::default();
        for (txid, outs) in touched {
            if outs.is_empty() {
                batch.remove(txid);
            } else {
                batch.insert(txid, serialize(&outs)?);
            }
        }
        utxo_tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to update UTXO set: {e}")))?;
        Ok(())
    }
}

fn decode_outputs(bytes: &[u8]) -> Result<Outputs> {
    deserialize(bytes)
        .map_err(|e| BlockchainError::Database(format!("Corrupt UTXO entry: {e}")))
}

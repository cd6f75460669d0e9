// Transactions follow the UTXO model: each one consumes earlier outputs and
// creates new ones. A coinbase is the only kind that creates value.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign, ecdsa_p256_sha256_verify, serialize, sha256_digest,
};
use crate::wallet::{hash_pub_key, pub_key_hash_from_address, Wallet};
use data_encoding::HEXLOWER;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Reward paid by every coinbase.
pub const SUBSIDY: u64 = 50;

/// Output index carried by a coinbase input, which references no output.
pub const COINBASE_VOUT: usize = usize::MAX;

pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

// A reference to an earlier output plus the proof that I am allowed to spend it
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: usize,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_txid_hex(&self) -> String {
        HEXLOWER.encode(&self.txid)
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(&self.pub_key) == pub_key_hash
    }
}

// Value locked to the hash of a public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::Transaction(
                "Output value must be positive".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key_hash: pub_key_hash_from_address(address)?,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    // Coinbase paying the subsidy to `to`, with random data so every coinbase gets its own id
    pub fn new_coinbase_tx(to: &str) -> Result<Transaction> {
        Self::new_coinbase_tx_with_data(to, &Uuid::new_v4().to_string())
    }

    pub fn new_coinbase_tx_with_data(to: &str, data: &str) -> Result<Transaction> {
        let tx_input = TXInput::new(&[], COINBASE_VOUT, data.as_bytes());
        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Pays `amount` from `wallet` to `to`, returning any overpayment as change.
    /// No fee is taken.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        let recipient = TXOutput::new(amount, to)?;

        let pub_key_hash = wallet.get_pub_key_hash();
        let (accumulated, spendable) = utxo_set.find_spendable_outputs(&pub_key_hash, amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut txids: Vec<&String> = spendable.keys().collect();
        txids.sort();
        let mut inputs = vec![];
        for txid_hex in txids {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Transaction(format!("Invalid transaction ID {txid_hex}: {e}"))
            })?;
            for vout in &spendable[txid_hex] {
                inputs.push(TXInput::new(&txid, *vout, wallet.get_public_key()));
            }
        }

        let mut outputs = vec![recipient];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, &wallet.get_address())?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    // Copy with every signature and public key blanked; the base of each signing digest
    fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: vec![],
            vin: self
                .vin
                .iter()
                .map(|input| TXInput::new(&input.txid, input.vout, &[]))
                .collect(),
            vout: self.vout.clone(),
        }
    }

    // Digest signed by input `idx`: the trimmed copy with only that input's
    // public key slot holding the owner key hash of the output it spends.
    fn signing_digest(trimmed: &mut Transaction, idx: usize, locking_hash: &[u8]) -> Result<Vec<u8>> {
        trimmed.vin[idx].pub_key = locking_hash.to_vec();
        let encoded = Transaction::serialize(trimmed);
        trimmed.vin[idx].pub_key = vec![];
        Ok(sha256_digest(&encoded?))
    }

    fn referenced_output<'a>(
        input: &TXInput,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Option<&'a TXOutput> {
        prev_txs
            .get(&input.get_txid_hex())
            .and_then(|prev| prev.vout.get(input.vout))
    }

    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut trimmed = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let output = Self::referenced_output(&self.vin[idx], prev_txs).ok_or_else(|| {
                BlockchainError::Transaction(format!(
                    "Output {}:{} referenced by input {idx} not found",
                    self.vin[idx].get_txid_hex(),
                    self.vin[idx].vout
                ))
            })?;
            let digest = Self::signing_digest(&mut trimmed, idx, &output.pub_key_hash)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign(pkcs8, &digest)?;
        }
        Ok(())
    }

    /// Checks signatures, key ownership, that no output is spent twice and that
    /// outputs never exceed the referenced inputs. A coinbase always verifies.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }
        if self.vin.is_empty() || self.vout.is_empty() {
            warn!("Transaction {} has no inputs or no outputs", self.get_id_hex());
            return false;
        }
        match self.hash() {
            Ok(hash) if hash == self.id => {}
            _ => {
                warn!("Transaction {} does not match its id", self.get_id_hex());
                return false;
            }
        }

        let mut trimmed = self.trimmed_copy();
        let mut input_value: u64 = 0;
        let mut spent = HashSet::new();
        for (idx, input) in self.vin.iter().enumerate() {
            if !spent.insert((input.txid.as_slice(), input.vout)) {
                warn!(
                    "Transaction {} spends output {}:{} twice",
                    self.get_id_hex(),
                    input.get_txid_hex(),
                    input.vout
                );
                return false;
            }
            let output = match Self::referenced_output(input, prev_txs) {
                Some(output) => output,
                None => {
                    warn!(
                        "Transaction {} spends unknown output {}:{}",
                        self.get_id_hex(),
                        input.get_txid_hex(),
                        input.vout
                    );
                    return false;
                }
            };
            if !input.uses_key(&output.pub_key_hash) {
                warn!("Transaction {} input {idx} key does not own the output", self.get_id_hex());
                return false;
            }

            let digest = match Self::signing_digest(&mut trimmed, idx, &output.pub_key_hash) {
                Ok(digest) => digest,
                Err(_) => return false,
            };
            if !ecdsa_p256_sha256_verify(&input.pub_key, &input.signature, &digest) {
                warn!("Transaction {} input {idx} has a bad signature", self.get_id_hex());
                return false;
            }

            input_value = match input_value.checked_add(output.value) {
                Some(sum) => sum,
                None => return false,
            };
        }

        match self.output_value() {
            Some(output_value) if output_value <= input_value => true,
            _ => {
                warn!(
                    "Transaction {} spends more than its inputs ({input_value})",
                    self.get_id_hex()
                );
                false
            }
        }
    }

    /// SHA-256 of the canonical encoding with the id and all signatures cleared.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let mut tx_copy = self.clone();
        tx_copy.id = vec![];
        for input in &mut tx_copy.vin {
            input.signature = vec![];
        }
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn output_value(&self) -> Option<u64> {
        self.vout
            .iter()
            .try_fold(0u64, |sum, out| sum.checked_add(out.value))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

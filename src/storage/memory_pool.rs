use crate::core::Transaction;
use std::collections::HashMap;

/// ( K -> txid_hex, V => Transaction )
///
/// Pending transactions seen on the wire and not yet mined. Nothing evicts
/// them except inclusion in a mined block.
#[derive(Default)]
pub struct MemoryPool {
    inner: HashMap<String, Transaction>,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: HashMap::new(),
        }
    }

    pub fn get(&self, txid_hex: &str) -> Option<&Transaction> {
        self.inner.get(txid_hex)
    }

    /// Returns false when the transaction was already pending.
    pub fn add(&mut self, tx: Transaction) -> bool {
        let txid_hex = tx.get_id_hex();
        if self.inner.contains_key(&txid_hex) {
            return false;
        }
        self.inner.insert(txid_hex, tx);
        true
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        self.inner.contains_key(txid_hex)
    }

    pub fn remove(&mut self, txid_hex: &str) -> Option<Transaction> {
        self.inner.remove(txid_hex)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// All pending transactions, ordered by id so selection is repeatable.
    pub fn get_all(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.inner.values().cloned().collect();
        txs.sort_by(|a, b| a.get_id().cmp(b.get_id()));
        txs
    }
}

/// Block hashes announced by a peer that still have to be fetched, in the
/// order the peer listed them.
#[derive(Default)]
pub struct BlockInTransit {
    inner: Vec<Vec<u8>>,
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit { inner: vec![] }
    }

    /// A new block inventory supersedes whatever was still queued.
    pub fn replace(&mut self, blocks: &[Vec<u8>]) {
        self.inner = blocks.to_vec();
    }

    pub fn first(&self) -> Option<&[u8]> {
        self.inner.first().map(Vec::as_slice)
    }

    pub fn remove(&mut self, block_hash: &[u8]) {
        if let Some(idx) = self.inner.iter().position(|x| x.eq(block_hash)) {
            self.inner.remove(idx);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get_items(&self) -> &[Vec<u8>] {
        self.inner.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn coinbase() -> Transaction {
        let address = Wallet::new().unwrap().get_address();
        Transaction::new_coinbase_tx(&address).unwrap()
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut pool = MemoryPool::new();
        let tx = coinbase();

        assert!(pool.add(tx.clone()));
        assert!(!pool.add(tx.clone()));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&tx.get_id_hex()));
    }

    #[test]
    fn test_get_all_is_sorted_by_id() {
        let mut pool = MemoryPool::new();
        for _ in 0..5 {
            pool.add(coinbase());
        }

        let ids: Vec<Vec<u8>> = pool.get_all().iter().map(|tx| tx.get_id().to_vec()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_remove() {
        let mut pool = MemoryPool::new();
        let tx = coinbase();
        pool.add(tx.clone());

        assert!(pool.remove(&tx.get_id_hex()).is_some());
        assert!(pool.is_empty());
        assert!(pool.remove(&tx.get_id_hex()).is_none());
    }

    #[test]
    fn test_blocks_in_transit_replace_and_drain() {
        let mut transit = BlockInTransit::new();
        transit.replace(&[b"a".to_vec(), b"b".to_vec()]);
        transit.replace(&[b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);

        assert_eq!(transit.len(), 3);
        assert_eq!(transit.first(), Some(&b"c"[..]));

        transit.remove(b"d");
        transit.remove(b"zz");
        assert_eq!(transit.get_items(), &[b"c".to_vec(), b"e".to_vec()]);

        transit.remove(b"c");
        transit.remove(b"e");
        assert!(transit.is_empty());
        assert!(transit.first().is_none());
    }
}

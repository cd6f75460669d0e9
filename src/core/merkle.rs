use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

/// Binary hash tree committing to a block's transactions.
///
/// Leaves hash the raw data, internal nodes hash `left ‖ right`. A level with
/// an odd number of nodes duplicates its last node before pairing, so a single
/// transaction commits to `H(H(tx) ‖ H(tx))` rather than `H(tx)`.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_count: usize,
}

#[derive(Debug, Clone)]
struct MerkleNode {
    hash: Vec<u8>,
    left: Option<Box<MerkleNode>>,
    right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(data: &[u8]) -> MerkleNode {
        MerkleNode {
            hash: sha256_digest(data),
            left: None,
            right: None,
        }
    }

    fn parent(left: MerkleNode, right: MerkleNode) -> MerkleNode {
        let mut joined = Vec::with_capacity(left.hash.len() + right.hash.len());
        joined.extend_from_slice(&left.hash);
        joined.extend_from_slice(&right.hash);
        MerkleNode {
            hash: sha256_digest(&joined),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }
}

impl MerkleTree {
    pub fn new(leaves: &[Vec<u8>]) -> Result<MerkleTree> {
        if leaves.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot build a Merkle tree without leaves".to_string(),
            ));
        }

        let mut level: Vec<MerkleNode> = leaves.iter().map(|data| MerkleNode::leaf(data)).collect();
        loop {
            if level.len() % 2 == 1 {
                if let Some(last) = level.last().cloned() {
                    level.push(last);
                }
            }

            let mut next = Vec::with_capacity(level.len() / 2);
            let mut nodes = level.into_iter();
            while let (Some(left), Some(right)) = (nodes.next(), nodes.next()) {
                next.push(MerkleNode::parent(left, right));
            }
            level = next;

            if level.len() == 1 {
                break;
            }
        }

        let root = level.pop().ok_or_else(|| {
            BlockchainError::InvalidBlock("Merkle tree construction lost its root".to_string())
        })?;
        Ok(MerkleTree {
            root,
            leaf_count: leaves.len(),
        })
    }

    /// Tree over the canonical encoding of each transaction, in block order.
    pub fn from_transactions(transactions: &[Transaction]) -> Result<MerkleTree> {
        let leaves = transactions
            .iter()
            .map(Transaction::serialize)
            .collect::<Result<Vec<_>>>()?;
        MerkleTree::new(&leaves)
    }

    pub fn root_hash(&self) -> &[u8] {
        self.root.hash.as_slice()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = &self.root;
        while let Some(left) = node.left.as_deref() {
            depth += 1;
            node = left;
        }
        depth
    }
}

use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, warn};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Leading zero bits a block hash needs. Fixed, there is no retargeting.
pub const TARGET_BITS: u32 = 16;

const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: BigInt,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        Ok(ProofOfWork {
            block,
            merkle_root: block.hash_transactions()?,
            target: Self::target(),
        })
    }

    /// 2^(256 - TARGET_BITS)
    pub fn target() -> BigInt {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        target
    }

    // prev_hash ‖ merkle_root ‖ timestamp ‖ height ‖ target_bits ‖ nonce
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash().as_bytes());
        data_bytes.extend(self.merkle_root.as_slice());
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend((self.block.get_height() as u64).to_be_bytes());
        data_bytes.extend(i64::from(TARGET_BITS).to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Scans nonces upward from zero and returns the first one whose hash is
    /// below the target.
    pub fn run(&self) -> Result<(i64, String)> {
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let hash = sha256_digest(&self.prepare_data(nonce));
            if self.meets_target(&hash) {
                let hash_hex = HEXLOWER.encode(&hash);
                debug!("Found nonce {nonce} for block at height {}", self.block.get_height());
                return Ok((nonce, hash_hex));
            }
            nonce += 1;
        }
        Err(BlockchainError::Mining(format!(
            "Nonce space exhausted for block at height {}",
            self.block.get_height()
        )))
    }

    /// Recomputes the hash from the stored nonce; it must beat the target and
    /// equal the stored hash.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow,
            Err(e) => {
                warn!("Cannot rebuild proof-of-work for block {}: {e}", block.get_hash());
                return false;
            }
        };
        let hash = sha256_digest(&pow.prepare_data(block.get_nonce()));
        pow.meets_target(&hash) && HEXLOWER.encode(&hash) == block.get_hash()
    }
}

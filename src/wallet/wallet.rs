use crate::error::{BlockchainError, Result};
use crate::utils::{
    base58_decode, base58_encode, new_key_pair, public_key_from_pkcs8, ripemd160_digest,
    sha256_digest,
};
use serde::{Deserialize, Serialize};

const ADDRESS_VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

/// A P-256 key pair and the address derived from its public key.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        convert_address(&self.get_pub_key_hash())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(&self.public_key)
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// RIPEMD160(SHA256(pub_key))
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    ripemd160_digest(&sha256_digest(pub_key))
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let second_sha = sha256_digest(&sha256_digest(payload));
    second_sha[..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// version ‖ pub_key_hash ‖ checksum, base58 encoded
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + pub_key_hash.len() + ADDRESS_CHECK_SUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pub_key_hash);
    let checksum = checksum(&payload);
    payload.extend(checksum);
    base58_encode(&payload)
}

pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    if payload.len() <= ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(body) == actual_checksum
}

/// Owner key hash locked into outputs paying `address`.
pub fn pub_key_hash_from_address(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(BlockchainError::InvalidAddress(address.to_string()));
    }
    let payload = base58_decode(address)?;
    Ok(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_has_valid_address() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        assert!(validate_address(&address));
        assert_eq!(
            pub_key_hash_from_address(&address).unwrap(),
            wallet.get_pub_key_hash()
        );
    }

    #[test]
    fn test_tampered_checksum_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut payload = base58_decode(&wallet.get_address()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        let tampered = base58_encode(&payload);

        assert!(!validate_address(&tampered));
        assert!(matches!(
            pub_key_hash_from_address(&tampered),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_garbage_addresses_are_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("not-base58-0OIl"));
        assert!(!validate_address(&base58_encode(&[0, 1, 2])));
    }
}

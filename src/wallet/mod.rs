//! Key pairs, addresses and the per-node wallet file
//!
//! Addresses are Base58 of `version ‖ RIPEMD160(SHA256(pubkey)) ‖ checksum`.
//! Wallets also keep an alias table so CLI users can say `alice` instead of
//! pasting an address.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::Wallets;

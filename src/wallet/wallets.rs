use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::{validate_address, Wallet};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct WalletFile {
    wallets: HashMap<String, Wallet>,
    aliases: BTreeMap<String, String>,
}

/// Per-node wallet store: address -> key pair, plus alias -> address.
pub struct Wallets {
    path: PathBuf,
    wallets: HashMap<String, Wallet>,
    aliases: BTreeMap<String, String>,
}

impl Wallets {
    /// Loads the wallet file at `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Wallets> {
        let mut wallets = Wallets {
            path: path.to_path_buf(),
            wallets: HashMap::new(),
            aliases: BTreeMap::new(),
        };
        if !path.exists() {
            return Ok(wallets);
        }

        let bytes = fs::read(path)?;
        let file: WalletFile = deserialize(&bytes).map_err(|e| {
            BlockchainError::Wallet(format!("Corrupt wallet file {}: {e}", path.display()))
        })?;
        wallets.wallets = file.wallets;
        wallets.aliases = file.aliases;
        Ok(wallets)
    }

    pub fn create_wallet(&mut self, alias: Option<&str>) -> Result<String> {
        if let Some(alias) = alias {
            if self.aliases.contains_key(alias) {
                return Err(BlockchainError::Wallet(format!(
                    "Alias {alias} is already taken"
                )));
            }
        }

        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), address.clone());
        }
        self.save()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn alias_of(&self, address: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, addr)| addr.as_str() == address)
            .map(|(alias, _)| alias.as_str())
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    /// Alias lookup; anything that is not a known alias is returned as given.
    pub fn resolve(&self, alias_or_address: &str) -> String {
        self.aliases
            .get(alias_or_address)
            .cloned()
            .unwrap_or_else(|| alias_or_address.to_string())
    }

    /// Resolves and checks the address checksum.
    pub fn resolve_address(&self, alias_or_address: &str) -> Result<String> {
        let address = self.resolve(alias_or_address);
        if !validate_address(&address) {
            return Err(BlockchainError::InvalidAddress(alias_or_address.to_string()));
        }
        Ok(address)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = WalletFile {
            wallets: self.wallets.clone(),
            aliases: self.aliases.clone(),
        };
        fs::write(&self.path, serialize(&file)?)?;
        Ok(())
    }
}

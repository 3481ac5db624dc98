//! Wallet configuration document
//!
//! The Config is the only persisted state. It is always written whole,
//! encrypted, through [`ConfigStore`].
//!
//! ```text
//! Config
//!   ├── wallets: [Wallet]   single key, P2WPKH, quorum {1,1}
//!   ├── vaults:  [Vault]    m-of-n, P2WSH sorted multisig
//!   └── keys:    [Key]      flat copy of every key referenced above
//! ```

pub mod codec;
pub mod setup;
pub mod store;

pub use codec::{decrypt, encrypt, encrypt_with, KdfParams};
pub use setup::coldcard_setup_file;
pub use store::ConfigStore;

use bitcoin::bip32::{DerivationPath, Fingerprint, Xpriv, Xpub};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::paths::config::SCHEMA_VERSION;
use crate::core::Network;
use crate::device::DeviceType;
use crate::error::{Error, Result, ValidationError};
use crate::keys::scripts::AccountKey;
use crate::keys::{check_network, AddressType, SoftwareKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    pub version: String,
    pub is_empty: bool,
    #[serde(default)]
    pub backup_options: BackupOptions,
    #[serde(default)]
    pub wallets: Vec<Wallet>,
    #[serde(default)]
    pub vaults: Vec<Vault>,
    #[serde(default)]
    pub keys: Vec<Key>,
    /// Carried through untouched.
    #[serde(default)]
    pub exchanges: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    pub g_drive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: SCHEMA_VERSION.into(),
            is_empty: true,
            backup_options: BackupOptions::default(),
            wallets: Vec::new(),
            vaults: Vec::new(),
            keys: Vec::new(),
            exchanges: Vec::new(),
        }
    }
}

/// Hardware signer identity stored with a device-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub model: String,
    pub fingerprint: Fingerprint,
}

/// One signing identity: software (mnemonic + xprv) or hardware (device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub id: String,
    pub created: i64,
    pub network: Network,
    /// Account-level xpub at `path`
    pub xpub: Xpub,
    /// Master xprv, software keys only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xprv: Option<Xpriv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDescriptor>,
    /// Master fingerprint of the signer
    pub parent_fingerprint: Fingerprint,
    pub path: DerivationPath,
}

impl Key {
    pub fn software(key: &SoftwareKey, network: Network) -> Self {
        Self {
            id: key_id(key.fingerprint, &key.path, &key.xpub),
            created: now(),
            network,
            xpub: key.xpub,
            xprv: Some(key.master),
            mnemonic: Some(key.mnemonic.to_string()),
            device: None,
            parent_fingerprint: key.fingerprint,
            path: key.path.clone(),
        }
    }

    pub fn from_device(device: DeviceDescriptor, xpub: Xpub, path: DerivationPath, network: Network) -> Result<Self> {
        check_network(&xpub, network)?;
        Ok(Self {
            id: key_id(device.fingerprint, &path, &xpub),
            created: now(),
            network,
            xpub,
            xprv: None,
            mnemonic: None,
            parent_fingerprint: device.fingerprint,
            device: Some(device),
            path,
        })
    }

    pub fn is_software(&self) -> bool {
        self.xprv.is_some() && self.mnemonic.is_some()
    }

    /// Fingerprint that identifies this signer in PSBT key origins.
    pub fn fingerprint(&self) -> Fingerprint {
        self.parent_fingerprint
    }

    pub fn signer_kind(&self) -> &'static str {
        match &self.device {
            Some(d) => d.device_type.as_str(),
            None => "mnemonic",
        }
    }

    /// Same account key, ignoring when it was imported.
    pub fn same_key(&self, other: &Key) -> bool {
        self.id == other.id
            && self.network == other.network
            && self.xpub == other.xpub
            && self.path == other.path
            && self.parent_fingerprint == other.parent_fingerprint
    }

    pub fn account_key(&self) -> AccountKey {
        AccountKey { xpub: self.xpub, fingerprint: self.parent_fingerprint, path: self.path.clone() }
    }

    fn validate(&self) -> Result<()> {
        let software = self.xprv.is_some() && self.mnemonic.is_some();
        let partial = self.xprv.is_some() != self.mnemonic.is_some();
        if partial || software == self.device.is_some() {
            return Err(Error::DataIntegrity(format!(
                "key {} must be either a mnemonic key or a device key",
                self.id
            )));
        }
        if let Some(device) = &self.device {
            if device.fingerprint != self.parent_fingerprint {
                return Err(Error::DataIntegrity(format!("key {} fingerprint does not match its device", self.id)));
            }
        }
        check_network(&self.xpub, self.network).map_err(|e| Error::DataIntegrity(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quorum {
    pub required_signers: usize,
    pub total_signers: usize,
}

impl Quorum {
    pub fn new(required_signers: usize, total_signers: usize) -> std::result::Result<Self, ValidationError> {
        if required_signers == 0 || required_signers > total_signers || total_signers > 15 {
            return Err(ValidationError::InvalidQuorum { required: required_signers, total: total_signers });
        }
        Ok(Self { required_signers, total_signers })
    }

    pub fn single() -> Self {
        Self { required_signers: 1, total_signers: 1 }
    }
}

/// Highest address indexes already handed out per chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressIndex {
    pub receive: u32,
    pub change: u32,
}

/// Single-key account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    pub name: String,
    pub created: i64,
    pub network: Network,
    pub quorum: Quorum,
    pub address_type: AddressType,
    pub key: Key,
    #[serde(default)]
    pub address_index: AddressIndex,
}

impl Wallet {
    pub fn from_mnemonic(name: &str, phrase: &str, network: Network) -> Result<Self> {
        let software = SoftwareKey::from_mnemonic(phrase, network, AddressType::P2wpkh)?;
        Ok(Self::with_key(name, Key::software(&software, network)))
    }

    pub fn with_key(name: &str, key: Key) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            created: now(),
            network: key.network,
            quorum: Quorum::single(),
            address_type: AddressType::P2wpkh,
            key,
            address_index: AddressIndex::default(),
        }
    }
}

/// Multisig account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: String,
    pub name: String,
    pub created: i64,
    pub network: Network,
    pub quorum: Quorum,
    pub address_type: AddressType,
    /// Co-signers, in the order they were added
    pub keys: Vec<Key>,
    #[serde(default)]
    pub address_index: AddressIndex,
}

impl Vault {
    pub fn new(name: &str, network: Network, required_signers: usize, keys: Vec<Key>) -> Result<Self> {
        let quorum = Quorum::new(required_signers, keys.len())?;
        for key in &keys {
            check_network(&key.xpub, network)?;
        }
        let mut fingerprints: Vec<Fingerprint> = keys.iter().map(|k| k.parent_fingerprint).collect();
        fingerprints.sort();
        fingerprints.dedup();
        if fingerprints.len() != keys.len() {
            return Err(ValidationError::DuplicateSigner.into());
        }
        Ok(Self {
            id: new_id(),
            name: name.to_string(),
            created: now(),
            network,
            quorum,
            address_type: AddressType::P2wsh,
            keys,
            address_index: AddressIndex::default(),
        })
    }
}

/// A wallet or vault, viewed uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountConfig {
    Wallet(Wallet),
    Vault(Vault),
}

impl AccountConfig {
    pub fn id(&self) -> &str {
        match self {
            AccountConfig::Wallet(w) => &w.id,
            AccountConfig::Vault(v) => &v.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AccountConfig::Wallet(w) => &w.name,
            AccountConfig::Vault(v) => &v.name,
        }
    }

    pub fn created(&self) -> i64 {
        match self {
            AccountConfig::Wallet(w) => w.created,
            AccountConfig::Vault(v) => v.created,
        }
    }

    pub fn network(&self) -> Network {
        match self {
            AccountConfig::Wallet(w) => w.network,
            AccountConfig::Vault(v) => v.network,
        }
    }

    pub fn quorum(&self) -> Quorum {
        match self {
            AccountConfig::Wallet(w) => w.quorum,
            AccountConfig::Vault(v) => v.quorum,
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            AccountConfig::Wallet(w) => w.address_type,
            AccountConfig::Vault(v) => v.address_type,
        }
    }

    pub fn address_index(&self) -> AddressIndex {
        match self {
            AccountConfig::Wallet(w) => w.address_index,
            AccountConfig::Vault(v) => v.address_index,
        }
    }

    pub fn keys(&self) -> &[Key] {
        match self {
            AccountConfig::Wallet(w) => std::slice::from_ref(&w.key),
            AccountConfig::Vault(v) => &v.keys,
        }
    }

    pub fn account_keys(&self) -> Vec<AccountKey> {
        self.keys().iter().map(Key::account_key).collect()
    }

    pub fn is_multisig(&self) -> bool {
        matches!(self, AccountConfig::Vault(_))
    }
}

impl Config {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    /// Wallets then vaults, in config order.
    pub fn accounts(&self) -> Vec<AccountConfig> {
        self.wallets
            .iter()
            .cloned()
            .map(AccountConfig::Wallet)
            .chain(self.vaults.iter().cloned().map(AccountConfig::Vault))
            .collect()
    }

    /// Look up by id, falling back to name.
    pub fn account(&self, id_or_name: &str) -> Option<AccountConfig> {
        let accounts = self.accounts();
        accounts
            .iter()
            .find(|a| a.id() == id_or_name)
            .or_else(|| accounts.iter().find(|a| a.name() == id_or_name))
            .cloned()
    }

    pub fn key_by_fingerprint(&self, fingerprint: Fingerprint) -> Option<&Key> {
        self.keys.iter().find(|k| k.parent_fingerprint == fingerprint)
    }

    /// Returns the wallet as stored, sharing any key already in the config.
    pub fn add_wallet(&mut self, mut wallet: Wallet) -> Result<Wallet> {
        self.check_name(&wallet.name)?;
        wallet.key = self.insert_key(wallet.key);
        self.wallets.push(wallet.clone());
        self.is_empty = false;
        Ok(wallet)
    }

    pub fn add_vault(&mut self, mut vault: Vault) -> Result<Vault> {
        self.check_name(&vault.name)?;
        vault.keys = std::mem::take(&mut vault.keys).into_iter().map(|k| self.insert_key(k)).collect();
        self.vaults.push(vault.clone());
        self.is_empty = false;
        Ok(vault)
    }

    /// Record that change up to `change_index` has been handed out.
    pub fn advance_change_index(&mut self, account_id: &str, change_index: u32) -> Result<()> {
        let index = if let Some(w) = self.wallets.iter_mut().find(|w| w.id == account_id) {
            &mut w.address_index
        } else if let Some(v) = self.vaults.iter_mut().find(|v| v.id == account_id) {
            &mut v.address_index
        } else {
            return Err(ValidationError::UnknownAccount(account_id.to_string()).into());
        };
        index.change = index.change.max(change_index.saturating_add(1));
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.accounts().iter().any(|a| a.name() == name) {
            return Err(ValidationError::DuplicateName(name.to_string()).into());
        }
        Ok(())
    }

    /// Returns the stored copy when the key is already known.
    fn insert_key(&mut self, key: Key) -> Key {
        if let Some(stored) = self.keys.iter().find(|k| k.same_key(&key)) {
            return stored.clone();
        }
        self.keys.push(key.clone());
        key
    }

    /// Structural checks applied after every decrypt and before every write.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty != (self.wallets.is_empty() && self.vaults.is_empty()) {
            return Err(Error::DataIntegrity("isEmpty does not match account lists".into()));
        }
        for key in &self.keys {
            key.validate()?;
        }
        let referenced = self
            .wallets
            .iter()
            .map(|w| &w.key)
            .chain(self.vaults.iter().flat_map(|v| v.keys.iter()));
        for key in referenced {
            if !self.keys.iter().any(|k| k.same_key(key)) {
                return Err(Error::DataIntegrity(format!("key {} missing from key list", key.id)));
            }
        }
        for wallet in &self.wallets {
            if wallet.quorum != Quorum::single() || wallet.address_type != AddressType::P2wpkh {
                return Err(Error::DataIntegrity(format!("wallet {} is not a single-key account", wallet.name)));
            }
        }
        for vault in &self.vaults {
            let q = vault.quorum;
            if q.required_signers == 0 || q.required_signers > q.total_signers || q.total_signers != vault.keys.len() {
                return Err(Error::DataIntegrity(format!("vault {} has an invalid quorum", vault.name)));
            }
        }
        Ok(())
    }
}

/// Keys are content-addressed so re-importing the same account key dedupes in the flat list.
fn key_id(fingerprint: Fingerprint, path: &DerivationPath, xpub: &Xpub) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.to_string().as_bytes());
    hasher.update(crate::keys::format_path(path).as_bytes());
    hasher.update(xpub.encode());
    hex::encode(&hasher.finalize()[..16])
}

fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn empty_config_is_valid() {
        let config = Config::default();
        assert!(config.is_empty);
        assert_eq!(config.version, "0.0.2");
        config.validate().unwrap();
    }

    #[test]
    fn add_wallet_updates_flags_and_keys() {
        let mut config = Config::new("test");
        let wallet = Wallet::from_mnemonic("spending", TEST_MNEMONIC, Network::Testnet).unwrap();
        config.add_wallet(wallet).unwrap();
        assert!(!config.is_empty);
        assert_eq!(config.wallets.len(), 1);
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.wallets[0].quorum, Quorum { required_signers: 1, total_signers: 1 });
        assert!(config.keys[0].is_software());
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut config = Config::new("test");
        config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        let err = config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap());
        assert!(matches!(err, Err(Error::Validation(ValidationError::DuplicateName(_)))));
    }

    #[test]
    fn key_must_be_software_xor_device() {
        let mut config = Config::new("test");
        config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        config.keys[0].mnemonic = None;
        assert!(matches!(config.validate(), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn missing_flat_key_is_integrity_error() {
        let mut config = Config::new("test");
        config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        config.keys.clear();
        assert!(matches!(config.validate(), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn same_key_shares_one_flat_entry() {
        let mut config = Config::new("test");
        config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        config.add_wallet(Wallet::from_mnemonic("b", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.wallets[0].key.id, config.wallets[1].key.id);
        config.validate().unwrap();
    }

    #[test]
    fn key_reused_later_keeps_config_valid() {
        let mut config = Config::new("test");
        config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        let mut later = Wallet::from_mnemonic("b", TEST_MNEMONIC, Network::Testnet).unwrap();
        later.key.created += 1;
        config.add_wallet(later).unwrap();
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.wallets[1].key, config.keys[0]);
        config.validate().unwrap();

        // A reference that drifted from the flat entry is still the same key
        config.wallets[1].key.created += 60;
        config.validate().unwrap();
        config.wallets[1].key.path = "m/84'/1'/1'".parse().unwrap();
        assert!(matches!(config.validate(), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn vault_with_repeated_signer_rejected() {
        let key = Key::software(
            &SoftwareKey::from_mnemonic(TEST_MNEMONIC, Network::Testnet, AddressType::P2wsh).unwrap(),
            Network::Testnet,
        );
        let err = Vault::new("v", Network::Testnet, 1, vec![key.clone(), key]).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::DuplicateSigner)));
    }

    #[test]
    fn quorum_bounds() {
        assert!(Quorum::new(2, 3).is_ok());
        assert!(Quorum::new(0, 3).is_err());
        assert!(Quorum::new(4, 3).is_err());
    }

    #[test]
    fn change_index_only_moves_forward() {
        let mut config = Config::new("test");
        config.add_wallet(Wallet::from_mnemonic("a", TEST_MNEMONIC, Network::Testnet).unwrap()).unwrap();
        let id = config.wallets[0].id.clone();
        config.advance_change_index(&id, 4).unwrap();
        config.advance_change_index(&id, 1).unwrap();
        assert_eq!(config.wallets[0].address_index.change, 5);
        assert!(config.advance_change_index("nope", 1).is_err());
    }
}

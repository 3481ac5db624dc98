//! Key derivation. Mnemonic → master xprv → account xpub → child keys.
//!
//! ```text
//! mnemonic ──BIP39──→ seed ──BIP32──→ master xprv (fingerprint)
//!                                         │
//!             ┌───────────────────────────┴───────────────────────────┐
//!   m/84'/coin'/0'  (single-key witness)             m/48'/coin'/0'/2'  (multisig witness script)
//!             │                                                       │
//!       /0/i receive, /1/i change                      /0/i receive, /1/i change
//! ```
//!
//! Device keys enter at the account level: the device hands back the account
//! xpub and its master fingerprint, and everything below is derived here.

mod mnemonic;
pub mod scripts;

pub use mnemonic::{generate_mnemonic, mnemonic_to_seed, parse_mnemonic};

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use zeroize::Zeroizing;

use crate::core::paths::derivation;
use crate::core::Network;
use crate::error::{Error, Result};

/// Shared signing + verification context.
pub fn secp() -> &'static Secp256k1<All> {
    static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}

/// Script type of an account's addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressType {
    /// Single-key witness (BIP84)
    P2wpkh,
    /// Witness-script multisig (BIP48)
    P2wsh,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::P2wpkh => "P2WPKH",
            AddressType::P2wsh => "P2WSH",
        }
    }

    /// Account-level path for this script type on `network`.
    pub fn account_path(&self, network: Network) -> DerivationPath {
        let hardened = |index| ChildNumber::Hardened { index };
        let coin = network.coin_type();
        let steps = match self {
            AddressType::P2wpkh => vec![hardened(derivation::P2WPKH_PURPOSE), hardened(coin), hardened(derivation::ACCOUNT)],
            AddressType::P2wsh => vec![
                hardened(derivation::P2WSH_PURPOSE),
                hardened(coin),
                hardened(derivation::ACCOUNT),
                hardened(derivation::P2WSH_SCRIPT_TYPE),
            ],
        };
        DerivationPath::from(steps)
    }
}

/// Software signing identity backed by a mnemonic.
pub struct SoftwareKey {
    pub mnemonic: Zeroizing<String>,
    pub master: Xpriv,
    pub fingerprint: Fingerprint,
    pub path: DerivationPath,
    pub xpub: Xpub,
}

impl SoftwareKey {
    pub fn from_mnemonic(phrase: &str, network: Network, address_type: AddressType) -> Result<Self> {
        let seed = mnemonic_to_seed(phrase)?;
        let path = address_type.account_path(network);
        let mut key = Self::from_seed(seed.as_slice(), network, &path)?;
        key.mnemonic = Zeroizing::new(normalize_phrase(phrase));
        Ok(key)
    }

    /// Derive from raw seed bytes along an arbitrary account path.
    pub fn from_seed(seed: &[u8], network: Network, path: &DerivationPath) -> Result<Self> {
        if !(16..=64).contains(&seed.len()) {
            return Err(Error::Derivation(format!("seed must be 16..=64 bytes, got {}", seed.len())));
        }
        let master = Xpriv::new_master(network.kind(), seed)
            .map_err(|e| Error::Derivation(format!("master key: {e}")))?;
        let fingerprint = master.fingerprint(secp());
        let account = master
            .derive_priv(secp(), path)
            .map_err(|e| Error::Derivation(format!("{path}: {e}")))?;
        let xpub = Xpub::from_priv(secp(), &account);
        Ok(Self { mnemonic: Zeroizing::new(String::new()), master, fingerprint, path: path.clone(), xpub })
    }
}

fn normalize_phrase(phrase: &str) -> String {
    phrase.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reject an xpub that belongs to a different network than the one requested.
pub fn check_network(xpub: &Xpub, network: Network) -> Result<()> {
    if xpub.network != network.kind() {
        return Err(Error::Derivation(format!(
            "network mismatch: key is for {:?}, requested {}",
            xpub.network, network
        )));
    }
    Ok(())
}

/// Derive `xpub/chain/index` (both unhardened).
pub fn derive_child(xpub: &Xpub, chain: u32, index: u32) -> Result<Xpub> {
    let steps = [normal(chain)?, normal(index)?];
    xpub.derive_pub(secp(), &steps)
        .map_err(|e| Error::Derivation(format!("{chain}/{index}: {e}")))
}

/// Full path from the master key to a child: `account_path/chain/index`.
pub fn child_path(account_path: &DerivationPath, chain: u32, index: u32) -> Result<DerivationPath> {
    Ok(account_path.extend([normal(chain)?, normal(index)?]))
}

fn normal(index: u32) -> Result<ChildNumber> {
    ChildNumber::from_normal_idx(index).map_err(|e| Error::Derivation(format!("index {index}: {e}")))
}

/// Render a path as `m/48'/1'/0'/2'`.
pub fn format_path(path: &DerivationPath) -> String {
    let mut out = String::from("m");
    for child in path {
        match child {
            ChildNumber::Hardened { index } => out.push_str(&format!("/{index}'")),
            ChildNumber::Normal { index } => out.push_str(&format!("/{index}")),
        }
    }
    out
}

/// Parse a user-supplied path such as `m/48'/1'/0'/2'`.
pub fn parse_path(raw: &str) -> Result<DerivationPath> {
    DerivationPath::from_str(raw).map_err(|e| Error::Derivation(format!("invalid path {raw}: {e}")))
}

//! Address and script construction for single-key and multisig accounts.

use bitcoin::bip32::{DerivationPath, Fingerprint, KeySource, Xpub};
use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, CompressedPublicKey, Script, ScriptBuf};
use std::collections::BTreeMap;

use super::{child_path, derive_child, AddressType};
use crate::core::Network;
use crate::error::{Error, Result};

/// Account-level key material of one co-signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKey {
    pub xpub: Xpub,
    /// Master fingerprint of the signer that owns `xpub`
    pub fingerprint: Fingerprint,
    /// Path from the master key to `xpub`
    pub path: DerivationPath,
}

/// An address derived at `chain/index`, with everything a signer needs to verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: Address,
    pub script_pubkey: ScriptBuf,
    pub witness_script: Option<ScriptBuf>,
    pub chain: u32,
    pub index: u32,
    /// Child public key → (master fingerprint, full path)
    pub origins: BTreeMap<PublicKey, KeySource>,
}

/// Derive the address of an account at `chain/index`.
pub fn derive_address(
    address_type: AddressType,
    keys: &[AccountKey],
    required: usize,
    chain: u32,
    index: u32,
    network: Network,
) -> Result<DerivedAddress> {
    let mut origins = BTreeMap::new();
    for key in keys {
        let child = derive_child(&key.xpub, chain, index)?;
        origins.insert(child.public_key, (key.fingerprint, child_path(&key.path, chain, index)?));
    }

    match address_type {
        AddressType::P2wpkh => {
            let [key] = keys else {
                return Err(Error::Derivation(format!("single-key address needs 1 key, got {}", keys.len())));
            };
            let child = derive_child(&key.xpub, chain, index)?;
            let address = Address::p2wpkh(&CompressedPublicKey(child.public_key), network.to_bitcoin());
            Ok(DerivedAddress {
                script_pubkey: address.script_pubkey(),
                address,
                witness_script: None,
                chain,
                index,
                origins,
            })
        }
        AddressType::P2wsh => {
            let pubkeys: Vec<PublicKey> = origins.keys().copied().collect();
            let witness_script = sorted_multisig_script(required, pubkeys)?;
            let address = Address::p2wsh(&witness_script, network.to_bitcoin());
            Ok(DerivedAddress {
                script_pubkey: address.script_pubkey(),
                address,
                witness_script: Some(witness_script),
                chain,
                index,
                origins,
            })
        }
    }
}

/// `OP_m <sorted pubkeys> OP_n OP_CHECKMULTISIG` (BIP67 key order).
pub fn sorted_multisig_script(required: usize, mut pubkeys: Vec<PublicKey>) -> Result<ScriptBuf> {
    let total = pubkeys.len();
    if required == 0 || required > total || total > 15 {
        return Err(Error::Derivation(format!("invalid multisig {required} of {total}")));
    }
    pubkeys.sort_by_key(|pk| pk.serialize());
    let mut builder = Builder::new().push_int(required as i64);
    for pk in &pubkeys {
        builder = builder.push_key(&bitcoin::PublicKey::new(*pk));
    }
    Ok(builder.push_int(total as i64).push_opcode(OP_CHECKMULTISIG).into_script())
}

/// Public keys of a multisig witness script, in script order.
pub fn multisig_pubkeys(witness_script: &Script) -> Vec<PublicKey> {
    witness_script
        .instructions()
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) if bytes.len() == 33 => {
                PublicKey::from_slice(bytes.as_bytes()).ok()
            }
            _ => None,
        })
        .collect()
}

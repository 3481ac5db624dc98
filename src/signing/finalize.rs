//! Contribution checks and witness assembly.

use bitcoin::bip32::Fingerprint;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, PublicKey, Psbt, Transaction, Witness};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::QuorumError;
use crate::keys::scripts::multisig_pubkeys;
use crate::keys::secp;

/// Who may sign and how many must.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerPolicy {
    pub required: usize,
    pub fingerprints: BTreeSet<Fingerprint>,
}

/// Signatures a contribution adds, grouped by signer.
pub(crate) type NewSignatures = BTreeMap<Fingerprint, Vec<(usize, PublicKey, ecdsa::Signature)>>;

/// Check `contribution` against the unsigned base. Signatures from already-counted
/// signers are ignored; everything else must be new, known and valid.
pub(crate) fn validate_contribution(
    unsigned: &Psbt,
    policy: &SignerPolicy,
    counted: &BTreeSet<Fingerprint>,
    contribution: &Psbt,
) -> Result<NewSignatures, QuorumError> {
    if contribution.unsigned_tx.compute_txid() != unsigned.unsigned_tx.compute_txid()
        || contribution.inputs.len() != unsigned.inputs.len()
    {
        return Err(QuorumError::TransactionMismatch);
    }

    let mut fresh: NewSignatures = BTreeMap::new();
    let mut repeated: Option<Fingerprint> = None;
    for (index, (base, signed)) in unsigned.inputs.iter().zip(&contribution.inputs).enumerate() {
        for (pubkey, sig) in &signed.partial_sigs {
            let (fingerprint, _) = base
                .bip32_derivation
                .get(&pubkey.inner)
                .ok_or_else(|| QuorumError::UnknownSigner(pubkey.to_string()))?;
            if !policy.fingerprints.contains(fingerprint) {
                return Err(QuorumError::UnknownSigner(fingerprint.to_string()));
            }
            if counted.contains(fingerprint) {
                repeated = Some(*fingerprint);
                continue;
            }
            verify_signature(unsigned, index, pubkey, sig)?;
            fresh.entry(*fingerprint).or_default().push((index, *pubkey, *sig));
        }
    }

    if fresh.is_empty() {
        return Err(match repeated {
            Some(fp) => QuorumError::DuplicateSigner(fp.to_string()),
            None => QuorumError::EmptyContribution,
        });
    }

    for (fingerprint, sigs) in &fresh {
        let signed: BTreeSet<usize> = sigs.iter().map(|(i, _, _)| *i).collect();
        for (index, input) in unsigned.inputs.iter().enumerate() {
            let expected = input.bip32_derivation.values().any(|(fp, _)| fp == fingerprint);
            if expected && !signed.contains(&index) {
                return Err(QuorumError::IncompleteContribution { fingerprint: fingerprint.to_string(), input: index });
            }
        }
    }

    if counted.len() + fresh.len() > policy.required {
        return Err(QuorumError::QuorumReached { required: policy.required });
    }
    Ok(fresh)
}

/// ECDSA over the BIP143 sighash of `index`.
fn verify_signature(unsigned: &Psbt, index: usize, pubkey: &PublicKey, sig: &ecdsa::Signature) -> Result<(), QuorumError> {
    let invalid = || QuorumError::InvalidSignature { input: index, pubkey: pubkey.to_string() };
    if sig.sighash_type != EcdsaSighashType::All {
        return Err(invalid());
    }
    let input = &unsigned.inputs[index];
    let utxo = input.witness_utxo.as_ref().ok_or_else(invalid)?;
    let mut cache = SighashCache::new(&unsigned.unsigned_tx);
    let sighash = match &input.witness_script {
        Some(script) => cache
            .p2wsh_signature_hash(index, script, utxo.value, sig.sighash_type)
            .map_err(|_| invalid())?,
        None => cache
            .p2wpkh_signature_hash(index, &utxo.script_pubkey, utxo.value, sig.sighash_type)
            .map_err(|_| invalid())?,
    };
    let message = Message::from_digest(sighash.to_byte_array());
    secp().verify_ecdsa(&message, &sig.signature, &pubkey.inner).map_err(|_| invalid())
}

/// A copy of the base carrying only the given signatures.
pub(crate) fn sanitized(unsigned: &Psbt, sigs: &NewSignatures) -> Psbt {
    let mut psbt = unsigned.clone();
    for (index, pubkey, sig) in sigs.values().flatten() {
        psbt.inputs[*index].partial_sigs.insert(*pubkey, *sig);
    }
    psbt
}

/// Combine contributions into the base and build final witnesses.
pub fn finalize(unsigned: &Psbt, contributions: &[Psbt], required: usize) -> Result<Transaction, QuorumError> {
    let mut merged = unsigned.clone();
    for contribution in contributions {
        merged.combine(contribution.clone()).map_err(|e| QuorumError::Finalize(e.to_string()))?;
    }

    for (index, input) in merged.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            continue;
        }
        let witness = match &input.witness_script {
            Some(script) => {
                let sigs: Vec<&ecdsa::Signature> = multisig_pubkeys(script)
                    .into_iter()
                    .filter_map(|pk| input.partial_sigs.get(&PublicKey::new(pk)))
                    .take(required)
                    .collect();
                if sigs.len() < required {
                    return Err(QuorumError::InsufficientSignatures { have: sigs.len(), need: required });
                }
                let mut witness = Witness::new();
                witness.push(Vec::<u8>::new());
                for sig in sigs {
                    witness.push(sig.to_vec());
                }
                witness.push(script.as_bytes());
                witness
            }
            None => {
                let (pubkey, sig) = input
                    .partial_sigs
                    .iter()
                    .next()
                    .ok_or(QuorumError::InsufficientSignatures { have: 0, need: 1 })?;
                let mut witness = Witness::new();
                witness.push(sig.to_vec());
                witness.push(pubkey.to_bytes());
                witness
            }
        };
        tracing::trace!(input = index, items = witness.len(), "Input finalized");
        input.final_script_witness = Some(witness);
        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
    }

    Ok(merged.extract_tx_unchecked_fee_rate())
}

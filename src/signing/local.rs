//! Software signer: signs with a key's stored master xprv.

use bitcoin::Psbt;

use crate::config::{AccountConfig, Key};
use crate::error::{QuorumError, Result, ValidationError};
use crate::keys::secp;

/// Produce a detached contribution signed by `key`.
///
/// Keys without software material (device keys) cannot sign here.
pub fn sign(key: &Key, unsigned: &Psbt) -> Result<Psbt> {
    let (Some(xprv), true) = (key.xprv.as_ref(), key.is_software()) else {
        return Err(QuorumError::UnsupportedSigner(key.signer_kind().to_string()).into());
    };

    let mut psbt = unsigned.clone();
    psbt.sign(xprv, secp())
        .map_err(|(_, errors)| ValidationError::InvalidPsbt(format!("signing failed: {errors:?}")))?;
    let added = signature_count(&psbt) - signature_count(unsigned);
    if added == 0 {
        return Err(QuorumError::UnknownSigner(key.fingerprint().to_string()).into());
    }
    tracing::debug!(fingerprint = %key.fingerprint(), signatures = added, "Signed locally");
    Ok(psbt)
}

/// Stored software keys of `account`; fails when they cannot reach its quorum.
pub fn software_signers(account: &AccountConfig) -> Result<Vec<&Key>> {
    let software: Vec<&Key> = account.keys().iter().filter(|k| k.is_software()).collect();
    if software.len() < account.quorum().required_signers {
        let kind = account.keys().iter().find(|k| !k.is_software()).map_or("mnemonic", Key::signer_kind);
        return Err(QuorumError::UnsupportedSigner(kind.to_string()).into());
    }
    Ok(software)
}

fn signature_count(psbt: &Psbt) -> usize {
    psbt.inputs.iter().map(|i| i.partial_sigs.len()).sum()
}

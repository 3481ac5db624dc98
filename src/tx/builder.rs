use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use std::str::FromStr;

use super::selection::select;
use super::FeeSpec;
use crate::account::AccountData;
use crate::core::paths::policy::DUST_THRESHOLD;
use crate::error::{Error, Result, ValidationError};
use crate::keys::scripts::DerivedAddress;

/// An unsigned spend ready for signing.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub psbt: Psbt,
    pub destination: String,
    pub amount: u64,
    pub fee: u64,
    /// Change address and value, if a change output was created
    pub change: Option<(DerivedAddress, u64)>,
    pub inputs: Vec<OutPoint>,
    pub vsize: u64,
    /// Fee exceeds the unreasonable-fee threshold
    pub high_fee: bool,
}

/// Build an unsigned PSBT paying `amount` to `destination` from `account`.
pub fn build(
    account: &AccountData,
    destination: &str,
    amount: u64,
    fee: FeeSpec,
    change_address: &DerivedAddress,
) -> Result<BuiltTransaction> {
    let network = account.config.network();
    let parsed = Address::from_str(destination.trim())
        .map_err(|_| ValidationError::InvalidAddress(destination.to_string()))?;
    let dest = parsed.require_network(network.to_bitcoin()).map_err(|_| ValidationError::WrongNetwork {
        address: destination.to_string(),
        network: network.to_string(),
    })?;
    if amount < DUST_THRESHOLD {
        return Err(ValidationError::InvalidAmount(format!("{amount} sats is below the dust threshold")).into());
    }
    fee.validate()?;

    let dest_script = dest.script_pubkey();
    let selection = select(
        &account.available_utxos,
        amount,
        fee,
        &dest_script,
        &change_address.script_pubkey,
        account.config.address_type(),
        account.config.quorum(),
    )?;

    let mut output = vec![TxOut { value: Amount::from_sat(amount), script_pubkey: dest_script }];
    if selection.change > 0 {
        output.push(TxOut { value: Amount::from_sat(selection.change), script_pubkey: change_address.script_pubkey.clone() });
    }
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: selection
            .inputs
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output,
    };

    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| ValidationError::InvalidPsbt(e.to_string()))?;
    for (input, utxo) in psbt.inputs.iter_mut().zip(&selection.inputs) {
        input.witness_utxo = Some(TxOut { value: Amount::from_sat(utxo.value), script_pubkey: utxo.owner.script_pubkey.clone() });
        input.witness_script = utxo.owner.witness_script.clone();
        input.bip32_derivation = utxo.owner.origins.clone();
    }
    if selection.change > 0 {
        let out = psbt.outputs.get_mut(1).ok_or_else(|| Error::DataIntegrity("change output missing".into()))?;
        out.witness_script = change_address.witness_script.clone();
        out.bip32_derivation = change_address.origins.clone();
    }
    for key in account.config.account_keys() {
        psbt.xpub.insert(key.xpub, (key.fingerprint, key.path));
    }

    let inputs_total = selection.input_total();
    let outputs_total = amount + selection.change;
    if inputs_total != outputs_total + selection.fee {
        return Err(Error::DataIntegrity(format!(
            "inputs {inputs_total} != outputs {outputs_total} + fee {}",
            selection.fee
        )));
    }

    tracing::info!(
        account = account.name(),
        amount,
        fee = selection.fee,
        inputs = selection.inputs.len(),
        change = selection.change,
        high_fee = selection.high_fee,
        "Transaction built"
    );

    Ok(BuiltTransaction {
        destination: dest.to_string(),
        amount,
        fee: selection.fee,
        change: (selection.change > 0).then(|| (change_address.clone(), selection.change)),
        inputs: selection.inputs.iter().map(|u| u.outpoint).collect(),
        vsize: super::size::vsize(selection.weight),
        high_fee: selection.high_fee,
        psbt,
    })
}

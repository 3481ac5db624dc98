//! Largest-first coin selection with dust-aware change.

use bitcoin::Script;

use super::size::{fee_for, tx_weight};
use super::FeeSpec;
use crate::account::Utxo;
use crate::config::Quorum;
use crate::core::paths::policy::{DUST_THRESHOLD, UNREASONABLE_FEE};
use crate::error::ValidationError;
use crate::keys::AddressType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    /// Zero when the leftover was folded into the fee
    pub change: u64,
    pub weight: u64,
    pub high_fee: bool,
}

impl Selection {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }
}

/// Value descending; ties by (txid, vout) ascending.
pub fn largest_first(utxos: &[Utxo]) -> Vec<Utxo> {
    let mut ordered = utxos.to_vec();
    ordered.sort_by(|a, b| {
        b.value
            .cmp(&a.value)
            .then(a.outpoint.txid.cmp(&b.outpoint.txid))
            .then(a.outpoint.vout.cmp(&b.outpoint.vout))
    });
    ordered
}

/// Pick inputs for `amount` to `destination`, with change to `change_script` when it is not dust.
pub fn select(
    utxos: &[Utxo],
    amount: u64,
    fee: FeeSpec,
    destination: &Script,
    change_script: &Script,
    address_type: AddressType,
    quorum: Quorum,
) -> Result<Selection, ValidationError> {
    let fee_at = |inputs: usize, outputs: &[&Script]| -> (u64, u64) {
        let weight = tx_weight(inputs, address_type, quorum, outputs);
        match fee {
            FeeSpec::Fixed(sats) => (sats, weight),
            FeeSpec::Rate(rate) => (fee_for(weight, rate), weight),
        }
    };

    let mut inputs = Vec::new();
    let mut total = 0u64;
    let mut needed = amount;

    for utxo in largest_first(utxos) {
        total = total
            .checked_add(utxo.value)
            .ok_or_else(|| ValidationError::InvalidAmount("input total overflows".into()))?;
        inputs.push(utxo);

        let (fee_with_change, weight_with_change) = fee_at(inputs.len(), &[destination, change_script]);
        if let Some(leftover) = total.checked_sub(amount.saturating_add(fee_with_change)) {
            if leftover >= DUST_THRESHOLD {
                return Ok(finish(inputs, fee_with_change, leftover, weight_with_change));
            }
        }

        let (fee_without, weight_without) = fee_at(inputs.len(), &[destination]);
        needed = amount.saturating_add(fee_without);
        if total >= needed {
            // Sub-dust leftover goes to the miner
            return Ok(finish(inputs, total - amount, 0, weight_without));
        }
    }

    Err(ValidationError::InsufficientFunds { needed, available: total })
}

fn finish(inputs: Vec<Utxo>, fee: u64, change: u64, weight: u64) -> Selection {
    Selection { inputs, fee, change, weight, high_fee: fee > UNREASONABLE_FEE }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, Wallet};
    use crate::core::Network;
    use crate::keys::scripts::derive_address;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, ScriptBuf, Txid};

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn utxos(values: &[(u8, u32, u64)]) -> Vec<Utxo> {
        let account = AccountConfig::Wallet(Wallet::from_mnemonic("w", TEST_MNEMONIC, Network::Testnet).unwrap());
        let owner = derive_address(AddressType::P2wpkh, &account.account_keys(), 1, 0, 0, Network::Testnet).unwrap();
        values
            .iter()
            .map(|(t, vout, value)| Utxo {
                outpoint: OutPoint::new(Txid::from_byte_array([*t; 32]), *vout),
                value: *value,
                height: Some(1),
                owner: owner.clone(),
            })
            .collect()
    }

    fn scripts() -> (ScriptBuf, ScriptBuf) {
        (ScriptBuf::from_bytes(vec![0u8; 22]), ScriptBuf::from_bytes(vec![1u8; 22]))
    }

    fn run(pool: &[Utxo], amount: u64, fee: FeeSpec) -> Result<Selection, ValidationError> {
        let (dest, change) = scripts();
        select(pool, amount, fee, &dest, &change, AddressType::P2wpkh, Quorum::single())
    }

    #[test]
    fn ordering_is_value_then_outpoint() {
        let ordered = largest_first(&utxos(&[(2, 0, 500), (1, 1, 900), (1, 0, 900), (0, 5, 100)]));
        let keys: Vec<(u64, u32)> = ordered.iter().map(|u| (u.value, u.outpoint.vout)).collect();
        assert_eq!(keys, vec![(900, 0), (900, 1), (500, 0), (100, 5)]);
        assert_eq!(ordered[0].outpoint.txid, ordered[1].outpoint.txid);
    }

    #[test]
    fn conservation_with_change() {
        let pool = utxos(&[(1, 0, 40_000), (2, 0, 30_000), (3, 0, 20_000)]);
        let s = run(&pool, 50_000, FeeSpec::Fixed(1_000)).unwrap();
        assert_eq!(s.inputs.len(), 2);
        assert_eq!(s.change, 19_000);
        assert_eq!(s.input_total(), 50_000 + s.fee + s.change);
    }

    #[test]
    fn dust_change_is_folded_into_fee() {
        let pool = utxos(&[(1, 0, 51_300)]);
        let s = run(&pool, 50_000, FeeSpec::Fixed(1_000)).unwrap();
        assert_eq!(s.change, 0);
        assert_eq!(s.fee, 1_300);
        assert_eq!(s.input_total(), 50_000 + s.fee);
    }

    #[test]
    fn rate_fee_conserves_value() {
        let pool = utxos(&[(1, 0, 10_000), (2, 0, 9_000), (3, 0, 8_000)]);
        for amount in [1_000u64, 9_500, 18_000, 26_000] {
            if let Ok(s) = run(&pool, amount, FeeSpec::Rate(3.0)) {
                assert_eq!(s.input_total(), amount + s.fee + s.change);
                assert!(s.change == 0 || s.change >= DUST_THRESHOLD);
                assert!(s.fee >= fee_for(s.weight, 3.0));
            }
        }
    }

    #[test]
    fn insufficient_funds_reports_totals() {
        let pool = utxos(&[(1, 0, 10_000)]);
        let err = run(&pool, 10_000, FeeSpec::Fixed(500)).unwrap_err();
        assert_eq!(err, ValidationError::InsufficientFunds { needed: 10_500, available: 10_000 });
    }

    #[test]
    fn high_fee_flagged() {
        let pool = utxos(&[(1, 0, 5_000_000)]);
        let s = run(&pool, 1_000_000, FeeSpec::Fixed(1_000_001)).unwrap();
        assert!(s.high_fee);
        let s = run(&pool, 1_000_000, FeeSpec::Fixed(1_000_000)).unwrap();
        assert!(!s.high_fee);
    }
}

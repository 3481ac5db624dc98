//! Transaction weight estimation (weight units; vsize = ceil(weight / 4)).
//!
//! Signatures are sized at their 72-byte DER maximum so estimates never undershoot.

use bitcoin::Script;

use crate::config::Quorum;
use crate::keys::AddressType;

/// version + locktime
const TX_FIXED_BYTES: u64 = 8;
/// segwit marker + flag, witness-only
const SEGWIT_HEADER_WU: u64 = 2;
/// outpoint + empty scriptSig length + sequence
const INPUT_BASE_BYTES: u64 = 36 + 1 + 4;
/// DER signature with sighash byte, plus its push length
const SIG_ITEM: u64 = 1 + 72;
/// compressed key with its push length
const PUBKEY_ITEM: u64 = 1 + 33;

pub fn varint_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Witness bytes spending one input of the given script type.
pub fn witness_bytes(address_type: AddressType, quorum: Quorum) -> u64 {
    match address_type {
        AddressType::P2wpkh => 1 + SIG_ITEM + PUBKEY_ITEM,
        AddressType::P2wsh => {
            // OP_m <n × push33> OP_n OP_CHECKMULTISIG
            let script = 3 + 34 * quorum.total_signers as u64;
            // empty dummy, m signatures, witness script
            let items = quorum.required_signers as u64 + 2;
            varint_len(items) + 1 + SIG_ITEM * quorum.required_signers as u64 + varint_len(script) + script
        }
    }
}

pub fn input_weight(address_type: AddressType, quorum: Quorum) -> u64 {
    INPUT_BASE_BYTES * 4 + witness_bytes(address_type, quorum)
}

pub fn output_weight(script_pubkey: &Script) -> u64 {
    let len = script_pubkey.len() as u64;
    (8 + varint_len(len) + len) * 4
}

/// Weight of a transaction spending `inputs` inputs of one script type to `outputs`.
pub fn tx_weight(inputs: usize, address_type: AddressType, quorum: Quorum, outputs: &[&Script]) -> u64 {
    let base = (TX_FIXED_BYTES + varint_len(inputs as u64) + varint_len(outputs.len() as u64)) * 4;
    base + SEGWIT_HEADER_WU
        + inputs as u64 * input_weight(address_type, quorum)
        + outputs.iter().map(|s| output_weight(s)).sum::<u64>()
}

pub fn vsize(weight: u64) -> u64 {
    weight.div_ceil(4)
}

/// `ceil(vsize × rate)`
pub fn fee_for(weight: u64, sat_per_vb: f64) -> u64 {
    (vsize(weight) as f64 * sat_per_vb).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;

    #[test]
    fn p2wpkh_one_in_two_out_matches_known_vsize() {
        // 22-byte witness programs: a typical 1-in 2-out P2WPKH spend is ~141 vB
        let spk = ScriptBuf::from_bytes(vec![0u8; 22]);
        let w = tx_weight(1, AddressType::P2wpkh, Quorum::single(), &[&spk, &spk]);
        assert!((140..=142).contains(&vsize(w)), "vsize {}", vsize(w));
    }

    #[test]
    fn multisig_inputs_weigh_more_with_larger_quorum() {
        let two_of_three = input_weight(AddressType::P2wsh, Quorum { required_signers: 2, total_signers: 3 });
        let three_of_five = input_weight(AddressType::P2wsh, Quorum { required_signers: 3, total_signers: 5 });
        let single = input_weight(AddressType::P2wpkh, Quorum::single());
        assert!(single < two_of_three);
        assert!(two_of_three < three_of_five);
        // 2-of-3: 164 + 1 + 1 + 146 + 1 + 105
        assert_eq!(two_of_three, 418);
    }

    #[test]
    fn fee_rounds_up() {
        assert_eq!(fee_for(561, 1.0), 141);
        assert_eq!(fee_for(400, 1.5), 150);
        assert_eq!(fee_for(401, 1.0), 101);
    }

    #[test]
    fn varint_boundaries() {
        assert_eq!(varint_len(252), 1);
        assert_eq!(varint_len(253), 3);
        assert_eq!(varint_len(70_000), 5);
    }
}

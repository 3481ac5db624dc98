//! BIP39 mnemonic generation and validation.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::ValidationError;

const WORD_COUNTS: &[usize] = &[12, 15, 18, 21, 24];

/// Generate a new English mnemonic (12 or 24 words).
pub fn generate_mnemonic(word_count: usize) -> Result<Zeroizing<String>, ValidationError> {
    let entropy_len = match word_count {
        12 => 16,
        24 => 32,
        _ => {
            return Err(ValidationError::InvalidMnemonic(
                "word count must be 12 or 24".into(),
            ))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_len]);
    rand::thread_rng().fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| ValidationError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Parse and checksum-verify an English mnemonic.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, ValidationError> {
    let words = phrase.split_whitespace().count();
    if !WORD_COUNTS.contains(&words) {
        return Err(ValidationError::InvalidMnemonic(format!(
            "expected 12, 15, 18, 21 or 24 words, got {words}"
        )));
    }
    Mnemonic::parse_in(Language::English, phrase)
        .map_err(|e| ValidationError::InvalidMnemonic(e.to_string()))
}

/// Mnemonic to 64-byte seed (empty passphrase).
pub fn mnemonic_to_seed(phrase: &str) -> Result<Zeroizing<[u8; 64]>, ValidationError> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed("")))
}

//! Password-based authenticated encryption of the whole Config document.
//!
//! - Argon2id derives a 256-bit key from the password and a random salt
//! - ChaCha20-Poly1305 seals the JSON plaintext, bound to a fixed associated-data tag
//!
//! The envelope is itself JSON so the KDF parameters travel with the data.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::Config;
use crate::core::paths::config::{AAD, ENVELOPE_VERSION};
use crate::error::{Error, Result, ValidationError};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Upper bounds accepted from an envelope: 1 GiB of memory, 16 passes, 16 lanes.
const MAX_M_COST: u32 = 1024 * 1024;
const MAX_T_COST: u32 = 16;
const MAX_P_COST: u32 = 16;

/// Argon2id cost parameters, stored in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory in KiB
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { m_cost: 19 * 1024, t_cost: 2, p_cost: 1 }
    }
}

impl KdfParams {
    pub fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self { m_cost, t_cost, p_cost }
    }

    fn check_bounds(&self) -> Result<()> {
        if self.m_cost > MAX_M_COST || self.t_cost > MAX_T_COST || self.p_cost > MAX_P_COST {
            return Err(Error::DataIntegrity(format!(
                "kdf parameters out of range: m_cost={} t_cost={} p_cost={}",
                self.m_cost, self.t_cost, self.p_cost
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    kdf: KdfParams,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Encrypt with the default KDF parameters.
pub fn encrypt(config: &Config, password: &str) -> Result<String> {
    encrypt_with(config, password, KdfParams::default())
}

pub fn encrypt_with(config: &Config, password: &str, kdf: KdfParams) -> Result<String> {
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword.into());
    }
    config.validate()?;

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let plaintext = Zeroizing::new(
        serde_json::to_vec(config).map_err(|e| Error::DataIntegrity(format!("serialize config: {e}")))?,
    );
    let key = derive_key(password, &salt, kdf)?;
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|_| Error::DataIntegrity("cipher key length".into()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext.as_slice(), aad: AAD })
        .map_err(|_| Error::DataIntegrity("encryption failed".into()))?;

    let envelope = Envelope {
        version: ENVELOPE_VERSION,
        kdf,
        salt: STANDARD.encode(salt),
        nonce: STANDARD.encode(nonce),
        ciphertext: STANDARD.encode(ciphertext),
    };
    serde_json::to_string(&envelope).map_err(|e| Error::DataIntegrity(format!("serialize envelope: {e}")))
}

/// Decrypt and validate. A wrong password and tampered ciphertext are indistinguishable.
pub fn decrypt(blob: &str, password: &str) -> Result<Config> {
    let envelope: Envelope =
        serde_json::from_str(blob).map_err(|e| Error::DataIntegrity(format!("malformed envelope: {e}")))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::DataIntegrity(format!("unsupported envelope version {}", envelope.version)));
    }
    let salt = decode_field("salt", &envelope.salt)?;
    let nonce = decode_field("nonce", &envelope.nonce)?;
    let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;
    if nonce.len() != NONCE_LEN {
        return Err(Error::DataIntegrity(format!("nonce must be {NONCE_LEN} bytes")));
    }

    let key = derive_key(password, &salt, envelope.kdf)?;
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|_| Error::DataIntegrity("cipher key length".into()))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext.as_slice(), aad: AAD })
            .map_err(|_| Error::Authentication)?,
    );

    let text = std::str::from_utf8(&plaintext).map_err(|_| Error::DataIntegrity("plaintext is not utf-8".into()))?;
    let config: Config =
        serde_json::from_str(text).map_err(|e| Error::DataIntegrity(format!("config does not parse: {e}")))?;
    config.validate()?;
    Ok(config)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value).map_err(|e| Error::DataIntegrity(format!("{name}: {e}")))
}

fn derive_key(password: &str, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    kdf.check_bounds()?;
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(32))
        .map_err(|e| Error::DataIntegrity(format!("kdf parameters: {e}")))?;
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| Error::DataIntegrity(format!("key derivation: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Wallet;
    use crate::core::Network;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn fast() -> KdfParams {
        KdfParams::new(64, 1, 1)
    }

    fn sample() -> Config {
        let mut config = Config::new("codec");
        config
            .add_wallet(Wallet::from_mnemonic("main", TEST_MNEMONIC, Network::Testnet).unwrap())
            .unwrap();
        config.exchanges.push(serde_json::json!({"name": "opaque", "apiKey": "x"}));
        config
    }

    #[test]
    fn round_trip() {
        let config = sample();
        let blob = encrypt_with(&config, "hunter2", fast()).unwrap();
        assert_eq!(decrypt(&blob, "hunter2").unwrap(), config);
    }

    #[test]
    fn wrong_password_is_authentication_error() {
        let blob = encrypt_with(&sample(), "hunter2", fast()).unwrap();
        assert!(matches!(decrypt(&blob, "hunter3"), Err(Error::Authentication)));
    }

    #[test]
    fn tampered_ciphertext_is_authentication_error() {
        let blob = encrypt_with(&sample(), "pw", fast()).unwrap();
        let mut envelope: serde_json::Value = serde_json::from_str(&blob).unwrap();
        let mut bytes = STANDARD.decode(envelope["ciphertext"].as_str().unwrap()).unwrap();
        bytes[0] ^= 0x01;
        envelope["ciphertext"] = STANDARD.encode(bytes).into();
        assert!(matches!(decrypt(&envelope.to_string(), "pw"), Err(Error::Authentication)));
    }

    #[test]
    fn malformed_envelope_is_integrity_error() {
        assert!(matches!(decrypt("not json", "pw"), Err(Error::DataIntegrity(_))));
        let bad = r#"{"version":1,"kdf":{"m_cost":64,"t_cost":1,"p_cost":1},"salt":"!!","nonce":"","ciphertext":""}"#;
        assert!(matches!(decrypt(bad, "pw"), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn oversized_kdf_parameters_rejected() {
        let blob = encrypt_with(&sample(), "pw", fast()).unwrap();
        let mut envelope: serde_json::Value = serde_json::from_str(&blob).unwrap();
        envelope["kdf"]["m_cost"] = (u32::MAX - 1).into();
        assert!(matches!(decrypt(&envelope.to_string(), "pw"), Err(Error::DataIntegrity(_))));

        envelope["kdf"] = serde_json::json!({"m_cost": 64, "t_cost": 1, "p_cost": 1000});
        assert!(matches!(decrypt(&envelope.to_string(), "pw"), Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn empty_password_rejected() {
        let err = encrypt_with(&Config::default(), "", fast()).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyPassword)));
    }

    #[test]
    fn salts_differ_between_encryptions() {
        let config = Config::default();
        let a = encrypt_with(&config, "pw", fast()).unwrap();
        let b = encrypt_with(&config, "pw", fast()).unwrap();
        assert_ne!(a, b);
    }
}

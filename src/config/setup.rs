//! Coldcard multisig setup file export.

use chrono::{NaiveDate, Utc};
use std::fmt::Write;

use super::Vault;
use crate::keys::format_path;

/// Setup text for `vault`, dated today.
pub fn coldcard_setup_file(vault: &Vault) -> String {
    render_setup_file(vault, Utc::now().date_naive())
}

pub fn render_setup_file(vault: &Vault, date: NaiveDate) -> String {
    let derivation = vault
        .keys
        .first()
        .map(|k| format_path(&k.path))
        .unwrap_or_else(|| format_path(&vault.address_type.account_path(vault.network)));

    let mut out = String::new();
    let _ = writeln!(out, "# Coldcard Multisig setup file (created by beevault on {})", date.format("%m/%d/%Y"));
    out.push_str("#\n");
    let _ = writeln!(out, "Name: {}", vault.name);
    let _ = writeln!(out, "Policy: {} of {}", vault.quorum.required_signers, vault.quorum.total_signers);
    let _ = writeln!(out, "Derivation: {derivation}");
    out.push_str("Format: P2WSH\n");
    for key in &vault.keys {
        let _ = write!(out, "\n{}: {}", key.parent_fingerprint.to_string().to_uppercase(), key.xpub);
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Key;
    use crate::core::Network;
    use crate::keys::{AddressType, SoftwareKey};

    #[test]
    fn renders_policy_and_cosigners() {
        let keys: Vec<Key> = [
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
            "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong",
        ]
        .iter()
        .map(|m| {
            let k = SoftwareKey::from_mnemonic(m, Network::Testnet, AddressType::P2wsh).unwrap();
            Key::software(&k, Network::Testnet)
        })
        .collect();
        let vault = Vault::new("cold", Network::Testnet, 2, keys).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let text = render_setup_file(&vault, date);

        assert!(text.starts_with("# Coldcard Multisig setup file (created by beevault on 03/09/2024)\n#\n"));
        assert!(text.contains("Name: cold\n"));
        assert!(text.contains("Policy: 2 of 2\n"));
        assert!(text.contains("Derivation: m/48'/1'/0'/2'\n"));
        assert!(text.contains("Format: P2WSH\n"));
        assert!(text.contains("\n73C5DA0A: tpub"));
        assert_eq!(text.lines().filter(|l| l.contains(": tpub")).count(), 2);
    }
}

//! Threshold signing sessions.
//!
//! ```text
//! Created ──contribution──→ CollectingSignatures ──count == required──→ Finalizable ──finalize──→ Finalized
//!    │                              │                                         │
//!    └──────────────────────────────┴──────────────── abandon ────────────────┴──→ Abandoned
//! ```
//!
//! One session per spend attempt. Contributions are serialized by the session's
//! mutex; a rejected contribution leaves the session exactly as it was.

mod finalize;
pub mod local;

pub use finalize::{finalize, SignerPolicy};

use bitcoin::bip32::Fingerprint;
use bitcoin::{Psbt, Transaction, Txid};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::Mutex;

use crate::config::AccountConfig;
use crate::error::{QuorumError, Result};
use crate::tx::psbt_from_base64;
use finalize::{sanitized, validate_contribution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    CollectingSignatures,
    Finalizable,
    Finalized,
    Abandoned,
}

/// A partial-signature document from one or more signers.
#[derive(Debug, Clone)]
pub enum Contribution {
    Psbt(Psbt),
    /// Base64 PSBT as returned by a device
    Base64(String),
}

impl Contribution {
    fn into_psbt(self) -> Result<Psbt> {
        match self {
            Contribution::Psbt(psbt) => Ok(psbt),
            Contribution::Base64(raw) => psbt_from_base64(&raw),
        }
    }
}

impl From<Psbt> for Contribution {
    fn from(psbt: Psbt) -> Self {
        Contribution::Psbt(psbt)
    }
}

impl SignerPolicy {
    pub fn for_account(account: &AccountConfig) -> Self {
        Self {
            required: account.quorum().required_signers,
            fingerprints: account.keys().iter().map(|k| k.fingerprint()).collect(),
        }
    }
}

struct SessionInner {
    state: SessionState,
    counted: BTreeSet<Fingerprint>,
    accepted: Vec<Psbt>,
    transaction: Option<Transaction>,
}

pub struct SigningSession {
    unsigned: Psbt,
    policy: SignerPolicy,
    inner: Mutex<SessionInner>,
}

impl SigningSession {
    pub fn new(unsigned: Psbt, policy: SignerPolicy) -> Self {
        Self {
            unsigned,
            policy,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                counted: BTreeSet::new(),
                accepted: Vec::new(),
                transaction: None,
            }),
        }
    }

    pub fn for_account(unsigned: Psbt, account: &AccountConfig) -> Self {
        Self::new(unsigned, SignerPolicy::for_account(account))
    }

    pub fn txid(&self) -> Txid {
        self.unsigned.unsigned_tx.compute_txid()
    }

    pub fn unsigned_psbt(&self) -> &Psbt {
        &self.unsigned
    }

    pub fn policy(&self) -> &SignerPolicy {
        &self.policy
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Distinct signers accepted so far.
    pub async fn signers(&self) -> Vec<Fingerprint> {
        self.inner.lock().await.counted.iter().copied().collect()
    }

    pub async fn signature_count(&self) -> usize {
        self.inner.lock().await.counted.len()
    }

    /// Validate and accept a contribution. Returns the state after acceptance.
    pub async fn add_contribution(&self, contribution: impl Into<Contribution>) -> Result<SessionState> {
        let psbt = contribution.into().into_psbt()?;
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Finalized => return Err(QuorumError::AlreadyFinalized.into()),
            SessionState::Abandoned => return Err(QuorumError::Abandoned.into()),
            SessionState::Finalizable => {
                return Err(QuorumError::QuorumReached { required: self.policy.required }.into())
            }
            SessionState::Created | SessionState::CollectingSignatures => {}
        }

        let fresh = validate_contribution(&self.unsigned, &self.policy, &inner.counted, &psbt).map_err(|e| {
            tracing::warn!(txid = %self.txid(), error = %e, "Contribution rejected");
            e
        })?;

        inner.accepted.push(sanitized(&self.unsigned, &fresh));
        inner.counted.extend(fresh.keys().copied());
        inner.state = if inner.counted.len() == self.policy.required {
            SessionState::Finalizable
        } else {
            SessionState::CollectingSignatures
        };
        tracing::info!(
            txid = %self.txid(),
            signers = inner.counted.len(),
            required = self.policy.required,
            "Contribution accepted"
        );
        Ok(inner.state)
    }

    /// Merge accepted contributions into a broadcastable transaction.
    pub async fn finalize(&self) -> Result<Transaction> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Finalized => {
                return inner.transaction.clone().ok_or_else(|| QuorumError::AlreadyFinalized.into())
            }
            SessionState::Abandoned => return Err(QuorumError::Abandoned.into()),
            SessionState::Finalizable => {}
            SessionState::Created | SessionState::CollectingSignatures => {
                return Err(QuorumError::InsufficientSignatures {
                    have: inner.counted.len(),
                    need: self.policy.required,
                }
                .into())
            }
        }

        let tx = finalize(&self.unsigned, &inner.accepted, self.policy.required)?;
        inner.transaction = Some(tx.clone());
        inner.state = SessionState::Finalized;
        tracing::info!(txid = %tx.compute_txid(), "Session finalized");
        Ok(tx)
    }

    /// Abandon the session. A finalized session stays finalized.
    pub async fn abandon(&self) -> SessionState {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Finalized {
            inner.state = SessionState::Abandoned;
        }
        inner.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{aggregate, AccountData};
    use crate::chain::MemoryChain;
    use crate::config::{Key, Vault, Wallet};
    use crate::core::Network;
    use crate::error::Error;
    use crate::keys::scripts::derive_address;
    use crate::keys::{AddressType, SoftwareKey};
    use crate::tx::{build, FeeSpec};
    use bitcoin::hashes::Hash;
    use bitcoin::OutPoint;

    const MNEMONICS: [&str; 4] = [
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong",
        "legal winner thank year wave sausage worth useful legal winner thank yellow",
        "letter advice cage absurd amount doctor acoustic avoid letter advice cage above",
    ];
    const DEST: &str = "tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl";

    fn key(m: &str, address_type: AddressType) -> Key {
        Key::software(&SoftwareKey::from_mnemonic(m, Network::Testnet, address_type).unwrap(), Network::Testnet)
    }

    async fn funded(account: &AccountConfig, values: &[u64]) -> AccountData {
        let chain = MemoryChain::new(Network::Testnet);
        for (i, value) in values.iter().enumerate() {
            let a = derive_address(account.address_type(), &account.account_keys(), account.quorum().required_signers, 0, i as u32, Network::Testnet).unwrap();
            chain.fund(&a.script_pubkey, OutPoint::new(Txid::from_byte_array([i as u8 + 7; 32]), 1), *value, Some(5)).unwrap();
        }
        aggregate(account, &chain, 4).await.unwrap()
    }

    async fn vault_session(values: &[u64]) -> (AccountConfig, SigningSession) {
        let keys = MNEMONICS[..3].iter().map(|m| key(m, AddressType::P2wsh)).collect();
        let account = AccountConfig::Vault(Vault::new("v", Network::Testnet, 2, keys).unwrap());
        let data = funded(&account, values).await;
        let change = data.next_change_address().unwrap().clone();
        let built = build(&data, DEST, 50_000, FeeSpec::Fixed(1_000), &change).unwrap();
        let session = SigningSession::for_account(built.psbt, &account);
        (account, session)
    }

    #[tokio::test]
    async fn two_of_three_reaches_finalizable_and_rejects_third() {
        let (account, session) = vault_session(&[40_000, 30_000]).await;
        let keys = account.keys();
        assert_eq!(session.state().await, SessionState::Created);

        let first = local::sign(&keys[0], session.unsigned_psbt()).unwrap();
        assert_eq!(session.add_contribution(first.clone()).await.unwrap(), SessionState::CollectingSignatures);

        let dup = session.add_contribution(first).await.unwrap_err();
        assert!(matches!(dup, Error::Quorum(QuorumError::DuplicateSigner(_))));
        assert_eq!(session.signature_count().await, 1);

        let second = local::sign(&keys[2], session.unsigned_psbt()).unwrap();
        assert_eq!(session.add_contribution(second).await.unwrap(), SessionState::Finalizable);

        let third = local::sign(&keys[1], session.unsigned_psbt()).unwrap();
        let err = session.add_contribution(third).await.unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::QuorumReached { required: 2 })));
        assert_eq!(session.signature_count().await, 2);

        let tx = session.finalize().await.unwrap();
        assert_eq!(tx.input.len(), 2);
        for input in &tx.input {
            // dummy, two signatures, witness script
            assert_eq!(input.witness.len(), 4);
            assert!(input.witness.nth(0).unwrap().is_empty());
        }
        assert_eq!(session.state().await, SessionState::Finalized);
        assert_eq!(session.finalize().await.unwrap(), tx);
    }

    #[tokio::test]
    async fn sequential_signing_counts_only_new_signer() {
        let (account, session) = vault_session(&[80_000]).await;
        let keys = account.keys();
        let first = local::sign(&keys[0], session.unsigned_psbt()).unwrap();
        session.add_contribution(first.clone()).await.unwrap();
        // second signer signs on top of the first signer's document
        let stacked = local::sign(&keys[1], &first).unwrap();
        assert_eq!(session.add_contribution(stacked).await.unwrap(), SessionState::Finalizable);
        assert_eq!(session.signature_count().await, 2);
    }

    #[tokio::test]
    async fn outsider_and_mismatched_contributions_rejected() {
        let (_, session) = vault_session(&[80_000]).await;
        let outsider = key(MNEMONICS[3], AddressType::P2wsh);
        let err = local::sign(&outsider, session.unsigned_psbt()).unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::UnknownSigner(_))));

        let (other_account, other) = vault_session(&[81_000]).await;
        let foreign = local::sign(&other_account.keys()[0], other.unsigned_psbt()).unwrap();
        let err = session.add_contribution(foreign).await.unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::TransactionMismatch)));

        let err = session.add_contribution(session.unsigned_psbt().clone()).await.unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::EmptyContribution)));
        assert_eq!(session.state().await, SessionState::Created);
    }

    #[tokio::test]
    async fn forged_signature_rejected() {
        let (account, session) = vault_session(&[80_000]).await;
        let mut forged = local::sign(&account.keys()[0], session.unsigned_psbt()).unwrap();
        // move a valid signature onto another co-signer's pubkey
        let input = &mut forged.inputs[0];
        let (_, sig) = input.partial_sigs.pop_first().unwrap();
        let other = input
            .bip32_derivation
            .iter()
            .find(|(_, (fp, _))| *fp == account.keys()[1].fingerprint())
            .map(|(pk, _)| *pk)
            .unwrap();
        input.partial_sigs.insert(bitcoin::PublicKey::new(other), sig);

        let err = session.add_contribution(forged).await.unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::InvalidSignature { .. })));
        assert_eq!(session.signature_count().await, 0);
    }

    #[tokio::test]
    async fn incomplete_contribution_rejected() {
        let (account, session) = vault_session(&[30_000, 30_000]).await;
        let mut partial = local::sign(&account.keys()[0], session.unsigned_psbt()).unwrap();
        assert_eq!(partial.inputs.len(), 2);
        partial.inputs[1].partial_sigs.clear();
        let err = session.add_contribution(partial).await.unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::IncompleteContribution { input: 1, .. })));
    }

    #[tokio::test]
    async fn finalize_requires_quorum_and_abandon_is_terminal() {
        let (account, session) = vault_session(&[80_000]).await;
        let err = session.finalize().await.unwrap_err();
        assert!(matches!(err, Error::Quorum(QuorumError::InsufficientSignatures { have: 0, need: 2 })));

        assert_eq!(session.abandon().await, SessionState::Abandoned);
        let c = local::sign(&account.keys()[0], session.unsigned_psbt()).unwrap();
        assert!(matches!(session.add_contribution(c).await, Err(Error::Quorum(QuorumError::Abandoned))));
    }

    #[tokio::test]
    async fn single_key_wallet_signs_and_finalizes() {
        let account = AccountConfig::Wallet(Wallet::from_mnemonic("w", MNEMONICS[0], Network::Testnet).unwrap());
        let data = funded(&account, &[70_000]).await;
        let change = data.next_change_address().unwrap().clone();
        let built = build(&data, DEST, 50_000, FeeSpec::Rate(2.0), &change).unwrap();
        let session = SigningSession::for_account(built.psbt, &account);

        let signed = local::sign(&account.keys()[0], session.unsigned_psbt()).unwrap();
        assert_eq!(session.add_contribution(Contribution::Base64(signed.to_string())).await.unwrap(), SessionState::Finalizable);
        let tx = session.finalize().await.unwrap();
        assert_eq!(tx.input[0].witness.len(), 2);
        assert_eq!(tx.output.len(), 2);
    }
}

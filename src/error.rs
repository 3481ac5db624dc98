//! Error taxonomy. Every failure names the constraint it violated.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Wrong password, or ciphertext that fails authentication.
    #[error("authentication failed: wrong password or corrupted config")]
    Authentication,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Quorum(#[from] QuorumError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Chain data source or broadcast failure.
    #[error("network error: {0}")]
    Network(String),

    /// Config decrypted but is structurally invalid.
    #[error("config integrity error: {0}")]
    DataIntegrity(String),

    #[error("key derivation error: {0}")]
    Derivation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid address ({0})")]
    InvalidAddress(String),

    #[error("address {address} is not valid for {network}")]
    WrongNetwork { address: String, network: String },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid fee: {0}")]
    InvalidFee(String),

    #[error("insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("password confirmation does not match")]
    PasswordMismatch,

    #[error("password cannot be empty")]
    EmptyPassword,

    #[error("invalid quorum: {required} of {total}")]
    InvalidQuorum { required: usize, total: usize },

    #[error("vault co-signers must have distinct fingerprints")]
    DuplicateSigner,

    #[error("account name cannot be empty")]
    EmptyName,

    #[error("account name already in use: {0}")]
    DuplicateName(String),

    #[error("account not found: {0}")]
    UnknownAccount(String),

    #[error("invalid pin: {0}")]
    InvalidPin(String),

    #[error("invalid psbt: {0}")]
    InvalidPsbt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuorumError {
    #[error("contribution is for a different transaction")]
    TransactionMismatch,

    #[error("signer {0} is not part of this account")]
    UnknownSigner(String),

    #[error("signer {0} already contributed")]
    DuplicateSigner(String),

    #[error("contribution carries no new signatures")]
    EmptyContribution,

    #[error("signer {fingerprint} did not sign input {input}")]
    IncompleteContribution { fingerprint: String, input: usize },

    #[error("signature on input {input} fails verification for {pubkey}")]
    InvalidSignature { input: usize, pubkey: String },

    #[error("quorum already reached ({required} signers)")]
    QuorumReached { required: usize },

    #[error("not enough signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("session already finalized")]
    AlreadyFinalized,

    #[error("session abandoned")]
    Abandoned,

    #[error("not implemented for this signer type ({0})")]
    UnsupportedSigner(String),

    #[error("finalization failed: {0}")]
    Finalize(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device not found")]
    NotFound,

    #[error("device is locked: {0}")]
    Locked(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("device busy: another action is in progress")]
    Busy,

    #[error("device action aborted")]
    Aborted,

    #[error("device action timed out after {0}s")]
    Timeout(u64),

    #[error("unsupported device type: {0}")]
    UnsupportedType(String),

    #[error("{device} does not support {action}")]
    Unsupported { device: String, action: String },

    #[error("device error ({code}): {message}")]
    Reported { code: i64, message: String },

    #[error("device transport: {0}")]
    Transport(String),
}

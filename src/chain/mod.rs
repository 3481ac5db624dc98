//! Chain data: script history, unspent outputs, broadcast and fee estimates.
//!
//! Everything above this module talks to [`ChainSource`]; the Electrum client
//! is one implementation, the in-memory chain another.

#[cfg(feature = "electrum")]
mod electrum;
mod memory;

#[cfg(feature = "electrum")]
pub use electrum::ElectrumChain;
pub use memory::MemoryChain;

use async_trait::async_trait;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use serde::Serialize;

use crate::core::Network;
use crate::error::Result;

/// A transaction touching a script. `height == None` means unconfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub txid: Txid,
    pub height: Option<u32>,
}

/// An unspent output paying to a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnspentEntry {
    pub outpoint: OutPoint,
    pub value: u64,
    pub height: Option<u32>,
}

/// Fee estimates in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeRates {
    /// Next block
    pub fast: f64,
    /// ~3 blocks
    pub normal: f64,
    /// ~6 blocks
    pub slow: f64,
}

impl FeeRates {
    /// Floor used when the source has no estimate.
    pub const MIN_RELAY: f64 = 1.0;
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    fn network(&self) -> Network;

    /// History per script, same order as `scripts`.
    async fn history(&self, scripts: &[ScriptBuf]) -> Result<Vec<Vec<HistoryEntry>>>;

    /// Unspent outputs per script, same order as `scripts`.
    async fn unspent(&self, scripts: &[ScriptBuf]) -> Result<Vec<Vec<UnspentEntry>>>;

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid>;

    async fn fee_rates(&self) -> Result<FeeRates>;
}

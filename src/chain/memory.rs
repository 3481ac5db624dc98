//! In-memory chain source for offline use and tests.

use async_trait::async_trait;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ChainSource, FeeRates, HistoryEntry, UnspentEntry};
use crate::core::Network;
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    history: HashMap<ScriptBuf, Vec<HistoryEntry>>,
    unspent: HashMap<ScriptBuf, Vec<UnspentEntry>>,
    broadcasts: Vec<Transaction>,
    fee_rates: Option<FeeRates>,
    failure: Option<String>,
    script_failures: HashMap<ScriptBuf, String>,
    broadcast_rejection: Option<String>,
}

pub struct MemoryChain {
    network: Network,
    state: Mutex<State>,
}

impl MemoryChain {
    pub fn new(network: Network) -> Self {
        Self { network, state: Mutex::new(State::default()) }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| Error::Network("memory chain lock".into()))?;
        Ok(f(&mut state))
    }

    /// Record an output paying `value` to `script` (history + unspent).
    pub fn fund(&self, script: &ScriptBuf, outpoint: OutPoint, value: u64, height: Option<u32>) -> Result<()> {
        self.with_state(|s| {
            s.history.entry(script.clone()).or_default().push(HistoryEntry { txid: outpoint.txid, height });
            s.unspent.entry(script.clone()).or_default().push(UnspentEntry { outpoint, value, height });
        })
    }

    /// Record history without an unspent output (the script was used and emptied).
    pub fn add_history(&self, script: &ScriptBuf, txid: Txid, height: Option<u32>) -> Result<()> {
        self.with_state(|s| s.history.entry(script.clone()).or_default().push(HistoryEntry { txid, height }))
    }

    pub fn set_fee_rates(&self, rates: FeeRates) -> Result<()> {
        self.with_state(|s| s.fee_rates = Some(rates))
    }

    /// Make every subsequent call fail with a network error.
    pub fn fail_with(&self, message: &str) -> Result<()> {
        self.with_state(|s| s.failure = Some(message.to_string()))
    }

    /// Make any query touching `script` fail while other scripts keep working.
    pub fn fail_script(&self, script: &ScriptBuf, message: &str) -> Result<()> {
        self.with_state(|s| {
            s.script_failures.insert(script.clone(), message.to_string());
        })
    }

    /// Make broadcasts fail while other calls keep working.
    pub fn reject_broadcasts(&self, message: &str) -> Result<()> {
        self.with_state(|s| s.broadcast_rejection = Some(message.to_string()))
    }

    pub fn broadcasts(&self) -> Result<Vec<Transaction>> {
        self.with_state(|s| s.broadcasts.clone())
    }

    fn check(&self, scripts: &[ScriptBuf]) -> Result<()> {
        let failure = self.with_state(|s| {
            s.failure.clone().or_else(|| scripts.iter().find_map(|sc| s.script_failures.get(sc).cloned()))
        })?;
        match failure {
            Some(msg) => Err(Error::Network(msg)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainSource for MemoryChain {
    fn network(&self) -> Network {
        self.network
    }

    async fn history(&self, scripts: &[ScriptBuf]) -> Result<Vec<Vec<HistoryEntry>>> {
        self.check(scripts)?;
        self.with_state(|s| scripts.iter().map(|sc| s.history.get(sc).cloned().unwrap_or_default()).collect())
    }

    async fn unspent(&self, scripts: &[ScriptBuf]) -> Result<Vec<Vec<UnspentEntry>>> {
        self.check(scripts)?;
        self.with_state(|s| scripts.iter().map(|sc| s.unspent.get(sc).cloned().unwrap_or_default()).collect())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        self.check(&[])?;
        if let Some(msg) = self.with_state(|s| s.broadcast_rejection.clone())? {
            return Err(Error::Network(msg));
        }
        self.with_state(|s| s.broadcasts.push(tx.clone()))?;
        Ok(tx.compute_txid())
    }

    async fn fee_rates(&self) -> Result<FeeRates> {
        self.check(&[])?;
        self.with_state(|s| {
            s.fee_rates.unwrap_or(FeeRates { fast: FeeRates::MIN_RELAY, normal: FeeRates::MIN_RELAY, slow: FeeRates::MIN_RELAY })
        })
    }
}

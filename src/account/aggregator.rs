//! Gap-limit scan of one account against a chain source.

use bitcoin::Txid;
use std::collections::HashMap;

use super::{AccountData, Utxo};
use crate::chain::{ChainSource, HistoryEntry};
use crate::config::AccountConfig;
use crate::core::paths::derivation::{CHANGE_CHAIN, RECEIVE_CHAIN};
use crate::error::{Error, Result};
use crate::keys::scripts::{derive_address, DerivedAddress};

struct ChainScan {
    addresses: Vec<DerivedAddress>,
    used: Vec<bool>,
    history: Vec<HistoryEntry>,
}

impl ChainScan {
    fn unused(&self) -> Vec<DerivedAddress> {
        self.addresses.iter().zip(&self.used).filter(|(_, u)| !**u).map(|(a, _)| a.clone()).collect()
    }
}

/// Build a fresh snapshot of `account`.
pub async fn aggregate(account: &AccountConfig, chain: &dyn ChainSource, gap_limit: u32) -> Result<AccountData> {
    if chain.network() != account.network() {
        return Err(Error::Network(format!(
            "chain source is {}, account {} is {}",
            chain.network(),
            account.name(),
            account.network()
        )));
    }
    let gap_limit = gap_limit.max(1);

    let receive = scan_chain(account, chain, RECEIVE_CHAIN, gap_limit).await?;
    let change = scan_chain(account, chain, CHANGE_CHAIN, gap_limit).await?;

    let used: Vec<&DerivedAddress> = receive
        .addresses
        .iter()
        .zip(&receive.used)
        .chain(change.addresses.iter().zip(&change.used))
        .filter(|(_, used)| **used)
        .map(|(a, _)| a)
        .collect();

    let scripts: Vec<_> = used.iter().map(|a| a.script_pubkey.clone()).collect();
    let unspent = if scripts.is_empty() { Vec::new() } else { chain.unspent(&scripts).await? };
    if unspent.len() != used.len() {
        return Err(Error::DataIntegrity(format!("unspent batch returned {} of {} scripts", unspent.len(), used.len())));
    }

    let mut available_utxos = Vec::new();
    for (owner, entries) in used.iter().zip(unspent) {
        for entry in entries {
            available_utxos.push(Utxo { outpoint: entry.outpoint, value: entry.value, height: entry.height, owner: (*owner).clone() });
        }
    }
    available_utxos.sort_by(|a, b| (a.outpoint.txid, a.outpoint.vout).cmp(&(b.outpoint.txid, b.outpoint.vout)));
    available_utxos.dedup_by(|a, b| a.outpoint == b.outpoint);

    let current_balance = sum_values(&available_utxos)?;
    let unused_addresses = receive.unused();
    let unused_change_addresses = change.unused();
    let transactions = merge_history(receive.history.iter().chain(&change.history).cloned());

    tracing::debug!(
        account = account.name(),
        receive = receive.addresses.len(),
        change = change.addresses.len(),
        utxos = available_utxos.len(),
        balance = current_balance,
        "Account aggregated"
    );

    Ok(AccountData {
        config: account.clone(),
        addresses: receive.addresses,
        change_addresses: change.addresses,
        unused_addresses,
        unused_change_addresses,
        available_utxos,
        transactions,
        current_balance,
    })
}

/// Derive and query in batches of `gap_limit` until `gap_limit` consecutive addresses are unused.
async fn scan_chain(account: &AccountConfig, chain: &dyn ChainSource, chain_index: u32, gap_limit: u32) -> Result<ChainScan> {
    let keys = account.account_keys();
    let quorum = account.quorum();
    let mut scan = ChainScan { addresses: Vec::new(), used: Vec::new(), history: Vec::new() };
    let mut unused_run = 0u32;
    let mut next = 0u32;

    while unused_run < gap_limit {
        let batch: Vec<DerivedAddress> = (next..next.saturating_add(gap_limit))
            .map(|i| derive_address(account.address_type(), &keys, quorum.required_signers, chain_index, i, account.network()))
            .collect::<Result<_>>()?;
        let scripts: Vec<_> = batch.iter().map(|a| a.script_pubkey.clone()).collect();
        let histories = chain.history(&scripts).await?;
        if histories.len() != batch.len() {
            return Err(Error::Network(format!("history batch returned {} of {} scripts", histories.len(), batch.len())));
        }

        for (address, history) in batch.into_iter().zip(histories) {
            let used = !history.is_empty();
            unused_run = if used { 0 } else { unused_run + 1 };
            scan.history.extend(history);
            scan.addresses.push(address);
            scan.used.push(used);
        }
        next = next.saturating_add(gap_limit);
    }
    Ok(scan)
}

fn sum_values(utxos: &[Utxo]) -> Result<u64> {
    utxos.iter().try_fold(0u64, |acc, u| {
        acc.checked_add(u.value).ok_or_else(|| Error::DataIntegrity("balance overflows u64".into()))
    })
}

/// One entry per txid; confirmed wins over unconfirmed. Unconfirmed first, then height desc, then txid.
fn merge_history(entries: impl Iterator<Item = HistoryEntry>) -> Vec<HistoryEntry> {
    let mut by_txid: HashMap<Txid, Option<u32>> = HashMap::new();
    for entry in entries {
        let slot = by_txid.entry(entry.txid).or_insert(entry.height);
        if slot.is_none() {
            *slot = entry.height;
        }
    }
    let mut merged: Vec<HistoryEntry> = by_txid.into_iter().map(|(txid, height)| HistoryEntry { txid, height }).collect();
    merged.sort_by(|a, b| {
        let key = |e: &HistoryEntry| (e.height.is_some(), std::cmp::Reverse(e.height));
        key(a).cmp(&key(b)).then(a.txid.cmp(&b.txid))
    });
    merged
}

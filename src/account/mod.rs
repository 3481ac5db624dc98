//! Derived account state: addresses, UTXOs, history and balance.
//!
//! AccountData is a snapshot. It is rebuilt from chain data and replaced whole;
//! nothing mutates it in place.

mod aggregator;
mod registry;

pub use aggregator::aggregate;
pub use registry::{AccountRegistry, Snapshot};

use bitcoin::OutPoint;
use serde_json::{json, Value};

use crate::chain::HistoryEntry;
use crate::config::AccountConfig;
use crate::keys::scripts::DerivedAddress;

/// An unspent output owned by the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    /// Block height, `None` while unconfirmed
    pub height: Option<u32>,
    /// The owning address with its script and key origins
    pub owner: DerivedAddress,
}

#[derive(Debug, Clone)]
pub struct AccountData {
    pub config: AccountConfig,
    /// Receive addresses scanned, in index order
    pub addresses: Vec<DerivedAddress>,
    /// Change addresses scanned, in index order
    pub change_addresses: Vec<DerivedAddress>,
    pub unused_addresses: Vec<DerivedAddress>,
    pub unused_change_addresses: Vec<DerivedAddress>,
    pub available_utxos: Vec<Utxo>,
    /// Unconfirmed first, then newest block first
    pub transactions: Vec<HistoryEntry>,
    /// Exact sum of `available_utxos` values
    pub current_balance: u64,
}

impl AccountData {
    pub fn id(&self) -> &str {
        self.config.id()
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// First unused receive address.
    pub fn next_receive_address(&self) -> Option<&DerivedAddress> {
        let floor = self.config.address_index().receive;
        self.unused_addresses.iter().find(|a| a.index >= floor)
    }

    /// First unused change address not already handed out to an earlier spend.
    pub fn next_change_address(&self) -> Option<&DerivedAddress> {
        let floor = self.config.address_index().change;
        self.unused_change_addresses.iter().find(|a| a.index >= floor)
    }

    pub fn to_json(&self) -> Value {
        let addr = |a: &DerivedAddress| a.address.to_string();
        json!({
            "id": self.id(),
            "name": self.name(),
            "network": self.config.network(),
            "addressType": self.config.address_type(),
            "quorum": self.config.quorum(),
            "currentBalance": self.current_balance,
            "addresses": self.addresses.iter().map(addr).collect::<Vec<_>>(),
            "changeAddresses": self.change_addresses.iter().map(addr).collect::<Vec<_>>(),
            "unusedAddresses": self.unused_addresses.iter().map(addr).collect::<Vec<_>>(),
            "unusedChangeAddresses": self.unused_change_addresses.iter().map(addr).collect::<Vec<_>>(),
            "availableUtxos": self.available_utxos.iter().map(|u| json!({
                "txid": u.outpoint.txid.to_string(),
                "vout": u.outpoint.vout,
                "value": u.value,
                "height": u.height,
                "address": addr(&u.owner),
            })).collect::<Vec<_>>(),
            "transactions": self.transactions,
        })
    }
}

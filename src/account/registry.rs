//! Owned per-account snapshots with explicit refresh.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{aggregate, AccountData};
use crate::chain::ChainSource;
use crate::config::AccountConfig;
use crate::error::{Error, Result, ValidationError};

#[derive(Debug, Clone)]
pub enum Snapshot {
    Loading,
    Ready(Arc<AccountData>),
    Failed(String),
}

pub struct AccountRegistry {
    chain: Arc<dyn ChainSource>,
    gap_limit: u32,
    accounts: RwLock<Vec<AccountConfig>>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl AccountRegistry {
    pub fn new(chain: Arc<dyn ChainSource>, gap_limit: u32) -> Self {
        Self { chain, gap_limit, accounts: RwLock::new(Vec::new()), snapshots: RwLock::new(HashMap::new()) }
    }

    pub fn chain(&self) -> &Arc<dyn ChainSource> {
        &self.chain
    }

    /// Replace the tracked account set. Snapshots of removed accounts are dropped,
    /// new accounts start as Loading, existing snapshots are kept until refreshed.
    pub async fn set_accounts(&self, accounts: Vec<AccountConfig>) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.retain(|id, _| accounts.iter().any(|a| a.id() == id));
        for account in &accounts {
            snapshots.entry(account.id().to_string()).or_insert(Snapshot::Loading);
        }
        *self.accounts.write().await = accounts;
    }

    pub async fn accounts(&self) -> Vec<AccountConfig> {
        self.accounts.read().await.clone()
    }

    pub async fn account(&self, id: &str) -> Option<AccountConfig> {
        self.accounts.read().await.iter().find(|a| a.id() == id).cloned()
    }

    /// Earliest `created`; ties go to config order (wallets before vaults).
    pub async fn default_account(&self) -> Option<AccountConfig> {
        self.accounts
            .read()
            .await
            .iter()
            .enumerate()
            .min_by_key(|(position, a)| (a.created(), *position))
            .map(|(_, a)| a.clone())
    }

    pub async fn snapshot(&self, id: &str) -> Option<Snapshot> {
        self.snapshots.read().await.get(id).cloned()
    }

    /// Ready data for `id`, if the last refresh succeeded.
    pub async fn data(&self, id: &str) -> Option<Arc<AccountData>> {
        match self.snapshot(id).await {
            Some(Snapshot::Ready(data)) => Some(data),
            _ => None,
        }
    }

    /// Rebuild one account. A failure is recorded for that account only.
    pub async fn refresh(&self, id: &str) -> Result<Arc<AccountData>> {
        let account = self
            .account(id)
            .await
            .ok_or_else(|| ValidationError::UnknownAccount(id.to_string()))?;

        let result = aggregate(&account, self.chain.as_ref(), self.gap_limit).await.map(Arc::new);
        let snapshot = match &result {
            Ok(data) => Snapshot::Ready(data.clone()),
            Err(e) => Snapshot::Failed(e.to_string()),
        };
        if !self.store_snapshot(id, snapshot).await {
            tracing::debug!(account = account.name(), "Account removed during refresh");
            return Err(ValidationError::UnknownAccount(id.to_string()).into());
        }
        match &result {
            Ok(data) => tracing::info!(account = account.name(), balance = data.current_balance, "Account refreshed"),
            Err(e) => tracing::warn!(account = account.name(), error = %e, "Account refresh failed"),
        }
        result
    }

    /// Store under the snapshot lock, only while `id` is still tracked.
    async fn store_snapshot(&self, id: &str, snapshot: Snapshot) -> bool {
        let mut snapshots = self.snapshots.write().await;
        if !self.accounts.read().await.iter().any(|a| a.id() == id) {
            return false;
        }
        snapshots.insert(id.to_string(), snapshot);
        true
    }

    /// Refresh every account concurrently. One failure does not affect the others.
    pub async fn refresh_all(&self) -> Vec<(String, std::result::Result<Arc<AccountData>, String>)> {
        let ids: Vec<String> = self.accounts().await.iter().map(|a| a.id().to_string()).collect();
        let results = join_all(ids.iter().map(|id| self.refresh(id))).await;
        ids.into_iter()
            .zip(results)
            .map(|(id, r)| (id, r.map_err(|e: Error| e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::config::{Key, Vault, Wallet};
    use crate::core::Network;
    use crate::keys::{AddressType, SoftwareKey};

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn wallet(name: &str, created: i64) -> AccountConfig {
        let mut w = Wallet::from_mnemonic(name, TEST_MNEMONIC, Network::Testnet).unwrap();
        w.created = created;
        AccountConfig::Wallet(w)
    }

    fn vault(name: &str, created: i64) -> AccountConfig {
        let k = SoftwareKey::from_mnemonic(TEST_MNEMONIC, Network::Testnet, AddressType::P2wsh).unwrap();
        let mut v = Vault::new(name, Network::Testnet, 1, vec![Key::software(&k, Network::Testnet)]).unwrap();
        v.created = created;
        AccountConfig::Vault(v)
    }

    #[tokio::test]
    async fn default_account_is_deterministic() {
        let registry = AccountRegistry::new(Arc::new(MemoryChain::new(Network::Testnet)), 3);
        registry.set_accounts(vec![wallet("b", 20), vault("v", 10), wallet("a", 10)]).await;
        assert_eq!(registry.default_account().await.unwrap().name(), "v");

        registry.set_accounts(vec![wallet("a", 10), vault("v", 10)]).await;
        assert_eq!(registry.default_account().await.unwrap().name(), "a");
    }

    #[tokio::test]
    async fn refresh_replaces_snapshot() {
        let registry = AccountRegistry::new(Arc::new(MemoryChain::new(Network::Testnet)), 3);
        let account = wallet("a", 1);
        let id = account.id().to_string();
        registry.set_accounts(vec![account]).await;
        assert!(matches!(registry.snapshot(&id).await, Some(Snapshot::Loading)));

        let data = registry.refresh(&id).await.unwrap();
        assert_eq!(data.current_balance, 0);
        assert!(registry.data(&id).await.is_some());
        assert!(registry.refresh("missing").await.is_err());
    }

    #[tokio::test]
    async fn failure_is_per_account() {
        let registry = AccountRegistry::new(Arc::new(MemoryChain::new(Network::Testnet)), 3);
        let good = vault("v", 2);
        let bad = AccountConfig::Wallet(Wallet::from_mnemonic("main", TEST_MNEMONIC, Network::Mainnet).unwrap());
        let (good_id, bad_id) = (good.id().to_string(), bad.id().to_string());
        registry.set_accounts(vec![bad, good]).await;

        let results = registry.refresh_all().await;
        assert_eq!(results.len(), 2);
        assert!(matches!(registry.snapshot(&good_id).await, Some(Snapshot::Ready(_))));
        assert!(matches!(registry.snapshot(&bad_id).await, Some(Snapshot::Failed(msg)) if msg.contains("mainnet")));
    }

    #[tokio::test]
    async fn chain_outage_marks_accounts_failed() {
        let chain = Arc::new(MemoryChain::new(Network::Testnet));
        chain.fail_with("offline").unwrap();
        let registry = AccountRegistry::new(chain, 3);
        registry.set_accounts(vec![wallet("a", 1)]).await;
        let results = registry.refresh_all().await;
        assert!(matches!(&results[0].1, Err(msg) if msg.contains("offline")));
    }

    /// Holds the first history call until released.
    struct GatedChain {
        inner: MemoryChain,
        gated: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ChainSource for GatedChain {
        fn network(&self) -> Network {
            self.inner.network()
        }

        async fn history(&self, scripts: &[bitcoin::ScriptBuf]) -> Result<Vec<Vec<crate::chain::HistoryEntry>>> {
            if self.gated.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.history(scripts).await
        }

        async fn unspent(&self, scripts: &[bitcoin::ScriptBuf]) -> Result<Vec<Vec<crate::chain::UnspentEntry>>> {
            self.inner.unspent(scripts).await
        }

        async fn broadcast(&self, tx: &bitcoin::Transaction) -> Result<bitcoin::Txid> {
            self.inner.broadcast(tx).await
        }

        async fn fee_rates(&self) -> Result<crate::chain::FeeRates> {
            self.inner.fee_rates().await
        }
    }

    #[tokio::test]
    async fn removed_account_not_restored_by_inflight_refresh() {
        let chain = Arc::new(GatedChain {
            inner: MemoryChain::new(Network::Testnet),
            gated: std::sync::atomic::AtomicBool::new(true),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let registry = Arc::new(AccountRegistry::new(chain.clone(), 3));
        let account = wallet("a", 1);
        let id = account.id().to_string();
        registry.set_accounts(vec![account]).await;

        let task = tokio::spawn({
            let (registry, id) = (registry.clone(), id.clone());
            async move { registry.refresh(&id).await }
        });
        chain.entered.notified().await;
        registry.set_accounts(Vec::new()).await;
        chain.release.notify_one();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Validation(ValidationError::UnknownAccount(_)))));
        assert!(registry.snapshot(&id).await.is_none());
    }
}

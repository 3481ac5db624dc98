//! Engine - the wallet façade
//!
//! ```text
//! ConfigStore ──→ AccountRegistry ──→ tx::build ──→ SigningSession ──→ Broadcaster
//!   (encrypted)     (snapshots)        (PSBT)      ↑ LocalSigner          │
//!                                                  ↑ DeviceBridge         ▼
//!                                                                     txid / errMsg
//! ```
//!
//! Config writes run on the blocking pool; everything else is async.

use bitcoin::bip32::Fingerprint;
use bitcoin::Transaction;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use crate::account::{AccountData, AccountRegistry};
use crate::broadcast::{BroadcastOutcome, Broadcaster};
use crate::chain::{ChainSource, FeeRates};
use crate::config::{coldcard_setup_file, AccountConfig, Config, ConfigStore, Key, Vault, Wallet};
use crate::core::Network;
use crate::device::{Device, DeviceBridge, DeviceTransport};
use crate::error::{Error, QuorumError, Result, ValidationError};
use crate::keys::{generate_mnemonic, AddressType};
use crate::runtime::CancelToken;
use crate::settings::EngineSettings;
use crate::signing::{local, SessionState, SigningSession};
use crate::tx::{build, BuiltTransaction, FeeSpec};

/// One spend attempt: the built transaction and its signing session.
pub struct Spend {
    pub account_id: String,
    pub built: BuiltTransaction,
    pub session: SigningSession,
}

/// Outcome of refreshing one account.
#[derive(Debug, Clone)]
pub struct AccountRefresh {
    pub account: AccountConfig,
    pub result: std::result::Result<Arc<AccountData>, String>,
}

pub struct Engine {
    settings: EngineSettings,
    store: Arc<Mutex<ConfigStore>>,
    registry: AccountRegistry,
    devices: DeviceBridge,
    broadcaster: Broadcaster,
}

impl Engine {
    /// Open the config file and connect to Electrum.
    #[cfg(feature = "electrum")]
    pub async fn open(settings: EngineSettings, password: &str) -> Result<Self> {
        let store = open_config(settings.config_path.clone(), password).await?;
        let url = settings.electrum_url.clone();
        let network = settings.network;
        let chain = tokio::task::spawn_blocking(move || crate::chain::ElectrumChain::connect(url.as_deref(), network))
            .await
            .map_err(|e| Error::Network(format!("electrum task: {e}")))??;
        let transport = Arc::new(crate::device::HwiTransport::new(settings.hwi_binary.clone()));
        Self::with_parts(settings, store, Arc::new(chain), transport).await
    }

    /// Assemble from explicit parts (offline use, tests).
    pub async fn with_parts(
        settings: EngineSettings,
        store: ConfigStore,
        chain: Arc<dyn ChainSource>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<Self> {
        if chain.network() != settings.network {
            return Err(Error::Network(format!(
                "chain source is {}, settings ask for {}",
                chain.network(),
                settings.network
            )));
        }
        let registry = AccountRegistry::new(chain.clone(), settings.gap_limit);
        let devices = DeviceBridge::new(transport).with_timeout(settings.device_timeout);
        let engine = Self {
            registry,
            devices,
            broadcaster: Broadcaster::new(chain),
            store: Arc::new(Mutex::new(store)),
            settings,
        };
        engine.sync_registry().await?;
        Ok(engine)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn network(&self) -> Network {
        self.settings.network
    }

    pub fn devices(&self) -> &DeviceBridge {
        &self.devices
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn config(&self) -> Result<Config> {
        let store = self.store.lock().map_err(|_| Error::DataIntegrity("config lock poisoned".into()))?;
        Ok(store.config().clone())
    }

    /// Accounts on the active network.
    fn network_accounts(&self) -> Result<Vec<AccountConfig>> {
        Ok(self.config()?.accounts().into_iter().filter(|a| a.network() == self.network()).collect())
    }

    async fn sync_registry(&self) -> Result<()> {
        self.registry.set_accounts(self.network_accounts()?).await;
        Ok(())
    }

    /// Apply a config mutation on the blocking pool, then resync the registry.
    async fn update_config<T, F>(&self, change: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Config) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let out = tokio::task::spawn_blocking(move || {
            let mut store = store.lock().map_err(|_| Error::DataIntegrity("config lock poisoned".into()))?;
            store.update(change)
        })
        .await
        .map_err(|e| Error::DataIntegrity(format!("config task: {e}")))??;
        self.sync_registry().await?;
        Ok(out)
    }

    /// Create a single-key wallet. Without a mnemonic a new 24-word one is generated
    /// and returned so it can be shown once.
    pub async fn create_wallet(&self, name: &str, mnemonic: Option<&str>) -> Result<(Wallet, Option<Zeroizing<String>>)> {
        let (phrase, generated) = match mnemonic {
            Some(m) => (Zeroizing::new(m.to_string()), None),
            None => {
                let m = generate_mnemonic(24)?;
                (m.clone(), Some(m))
            }
        };
        let wallet = Wallet::from_mnemonic(name, &phrase, self.network())?;
        let wallet = self.update_config(move |c| c.add_wallet(wallet)).await?;
        tracing::info!(name, network = %self.network(), "Wallet created");
        Ok((wallet, generated))
    }

    /// Create an m-of-n vault from already-imported co-signer keys.
    pub async fn create_vault(&self, name: &str, required: usize, keys: Vec<Key>) -> Result<Vault> {
        let vault = Vault::new(name, self.network(), required, keys)?;
        let vault = self.update_config(move |c| c.add_vault(vault)).await?;
        tracing::info!(name, required, total = vault.keys.len(), "Vault created");
        Ok(vault)
    }

    pub async fn enumerate_devices(&self, cancel: &CancelToken) -> Result<Vec<Device>> {
        self.devices.enumerate(self.network(), cancel).await
    }

    /// Fetch a device's multisig account key.
    pub async fn import_device_key(&self, device: &Device, cancel: &CancelToken) -> Result<Key> {
        self.devices.import_key(device, self.network(), AddressType::P2wsh, cancel).await
    }

    /// Resolve by id or name; without either, the default account.
    pub async fn account(&self, id_or_name: Option<&str>) -> Result<AccountConfig> {
        let accounts = self.registry.accounts().await;
        match id_or_name {
            Some(key) => accounts
                .iter()
                .find(|a| a.id() == key)
                .or_else(|| accounts.iter().find(|a| a.name() == key))
                .cloned()
                .ok_or_else(|| ValidationError::UnknownAccount(key.to_string()).into()),
            None => self
                .registry
                .default_account()
                .await
                .ok_or_else(|| ValidationError::UnknownAccount("no accounts on this network".into()).into()),
        }
    }

    /// Fresh snapshot of one account.
    pub async fn refresh(&self, id_or_name: Option<&str>) -> Result<Arc<AccountData>> {
        let account = self.account(id_or_name).await?;
        self.registry.refresh(account.id()).await
    }

    /// Refresh one account, or every account when none is named. A failing
    /// account is reported in its slot and never hides the others.
    pub async fn refresh_accounts(&self, id_or_name: Option<&str>) -> Result<Vec<AccountRefresh>> {
        if id_or_name.is_some() {
            let account = self.account(id_or_name).await?;
            let result = self.registry.refresh(account.id()).await.map_err(|e| e.to_string());
            return Ok(vec![AccountRefresh { account, result }]);
        }
        let accounts = self.registry.accounts().await;
        let mut results: std::collections::HashMap<String, _> = self.registry.refresh_all().await.into_iter().collect();
        Ok(accounts
            .into_iter()
            .filter_map(|account| results.remove(account.id()).map(|result| AccountRefresh { account, result }))
            .collect())
    }

    pub async fn refresh_all(&self) -> Vec<(String, std::result::Result<Arc<AccountData>, String>)> {
        self.registry.refresh_all().await
    }

    pub async fn fee_rates(&self) -> Result<FeeRates> {
        self.registry.chain().fee_rates().await
    }

    /// Build an unsigned spend from a fresh snapshot and open its signing session.
    pub async fn prepare_spend(
        &self,
        id_or_name: Option<&str>,
        destination: &str,
        amount: u64,
        fee: FeeSpec,
    ) -> Result<Spend> {
        let data = self.refresh(id_or_name).await?;
        let change = data
            .next_change_address()
            .ok_or_else(|| Error::Derivation("no unused change address".into()))?
            .clone();
        let built = build(&data, destination, amount, fee, &change)?;
        if built.high_fee {
            tracing::warn!(fee = built.fee, "Fee exceeds the unreasonable-fee threshold");
        }
        let session = SigningSession::for_account(built.psbt.clone(), &data.config);
        Ok(Spend { account_id: data.id().to_string(), built, session })
    }

    /// Sign with a stored software key. Device keys are refused.
    pub async fn sign_local(&self, spend: &Spend, fingerprint: Option<Fingerprint>) -> Result<SessionState> {
        let account = self.account(Some(&spend.account_id)).await?;
        let key = match fingerprint {
            Some(fp) => account.keys().iter().find(|k| k.fingerprint() == fp),
            None => account.keys().first(),
        }
        .ok_or_else(|| QuorumError::UnknownSigner(fingerprint.map(|f| f.to_string()).unwrap_or_default()))?;
        let contribution = local::sign(key, spend.session.unsigned_psbt())?;
        spend.session.add_contribution(contribution).await
    }

    /// Sign with stored software keys until the quorum is reached.
    pub async fn sign_software(&self, spend: &Spend) -> Result<SessionState> {
        let account = self.account(Some(&spend.account_id)).await?;
        let signers = local::software_signers(&account)?;
        let mut state = spend.session.state().await;
        for key in signers {
            if state == SessionState::Finalizable {
                break;
            }
            let contribution = local::sign(key, spend.session.unsigned_psbt())?;
            state = spend.session.add_contribution(contribution).await?;
        }
        Ok(state)
    }

    /// Ask `device` to sign and submit its document as a contribution.
    pub async fn sign_with_device(&self, spend: &Spend, device: &Device, cancel: &CancelToken) -> Result<SessionState> {
        let account = self.account(Some(&spend.account_id)).await?;
        let fingerprint = device.fingerprint.ok_or_else(|| crate::error::DeviceError::Locked("unlock the device".into()))?;
        if !account.keys().iter().any(|k| k.fingerprint() == fingerprint) {
            return Err(QuorumError::UnknownSigner(fingerprint.to_string()).into());
        }
        let signed = self.devices.sign(device, spend.session.unsigned_psbt(), self.network(), cancel).await?;
        spend.session.add_contribution(signed).await
    }

    /// Finalize and record the consumed change index.
    pub async fn finalize(&self, spend: &Spend) -> Result<Transaction> {
        let tx = spend.session.finalize().await?;
        if let Some((change, _)) = &spend.built.change {
            let (id, index) = (spend.account_id.clone(), change.index);
            self.update_config(move |c| c.advance_change_index(&id, index)).await?;
        }
        Ok(tx)
    }

    pub async fn broadcast(&self, tx: &Transaction) -> BroadcastOutcome {
        self.broadcaster.broadcast(tx, self.network()).await
    }

    pub async fn coldcard_setup(&self, id_or_name: &str) -> Result<String> {
        match self.account(Some(id_or_name)).await? {
            AccountConfig::Vault(vault) => Ok(coldcard_setup_file(&vault)),
            AccountConfig::Wallet(w) => Err(ValidationError::UnknownAccount(format!("{} is not a vault", w.name)).into()),
        }
    }
}

/// Decrypt (or start) the config file on the blocking pool.
pub async fn open_config(path: std::path::PathBuf, password: &str) -> Result<ConfigStore> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || ConfigStore::open(&path, &password))
        .await
        .map_err(|e| Error::DataIntegrity(format!("config task: {e}")))?
}

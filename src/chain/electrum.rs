//! Electrum-backed chain source. The client is blocking; every call runs on spawn_blocking.

use async_trait::async_trait;
use bdk_electrum::electrum_client::{Client, ElectrumApi};
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use std::sync::Arc;

use super::{ChainSource, FeeRates, HistoryEntry, UnspentEntry};
use crate::core::Network;
use crate::error::{Error, Result};

pub struct ElectrumChain {
    client: Arc<Client>,
    network: Network,
    url: String,
}

impl ElectrumChain {
    pub fn default_url(network: Network) -> &'static str {
        match network {
            Network::Mainnet => "ssl://electrum.blockstream.info:50002",
            Network::Testnet => "ssl://electrum.blockstream.info:60002",
        }
    }

    pub fn connect(url: Option<&str>, network: Network) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let url = url.unwrap_or(Self::default_url(network)).to_string();
        let client = Client::new(&url).map_err(|e| Error::Network(format!("electrum {url}: {e}")))?;
        tracing::info!(%url, %network, "Electrum connected");
        Ok(Self { client: Arc::new(client), network, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> std::result::Result<T, bdk_electrum::electrum_client::Error> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| Error::Network(format!("electrum task: {e}")))?
            .map_err(|e| Error::Network(format!("electrum: {e}")))
    }
}

fn confirmed_height(height: i64) -> Option<u32> {
    u32::try_from(height).ok().filter(|h| *h > 0)
}

#[async_trait]
impl ChainSource for ElectrumChain {
    fn network(&self) -> Network {
        self.network
    }

    async fn history(&self, scripts: &[ScriptBuf]) -> Result<Vec<Vec<HistoryEntry>>> {
        let scripts = scripts.to_vec();
        self.blocking(move |c| {
            let batches = c.batch_script_get_history(scripts.iter().map(|s| s.as_script()))?;
            Ok(batches
                .into_iter()
                .map(|entries| {
                    entries
                        .into_iter()
                        .map(|e| HistoryEntry { txid: e.tx_hash, height: confirmed_height(e.height as i64) })
                        .collect()
                })
                .collect())
        })
        .await
    }

    async fn unspent(&self, scripts: &[ScriptBuf]) -> Result<Vec<Vec<UnspentEntry>>> {
        let scripts = scripts.to_vec();
        self.blocking(move |c| {
            let batches = c.batch_script_list_unspent(scripts.iter().map(|s| s.as_script()))?;
            Ok(batches
                .into_iter()
                .map(|entries| {
                    entries
                        .into_iter()
                        .map(|u| UnspentEntry {
                            outpoint: OutPoint::new(u.tx_hash, u.tx_pos as u32),
                            value: u.value,
                            height: confirmed_height(u.height as i64),
                        })
                        .collect()
                })
                .collect())
        })
        .await
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        let tx = tx.clone();
        self.blocking(move |c| c.transaction_broadcast(&tx)).await
    }

    async fn fee_rates(&self) -> Result<FeeRates> {
        // estimate_fee answers in BTC/kvB, -1 when unknown
        let estimates = self
            .blocking(|c| Ok([c.estimate_fee(1)?, c.estimate_fee(3)?, c.estimate_fee(6)?]))
            .await?;
        let to_sat_vb = |btc_kvb: f64| (btc_kvb * 100_000.0).max(FeeRates::MIN_RELAY);
        Ok(FeeRates { fast: to_sat_vb(estimates[0]), normal: to_sat_vb(estimates[1]), slow: to_sat_vb(estimates[2]) })
    }
}

//! Submit finalized transactions. Failures are outcomes, never errors.

use bitcoin::Transaction;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::chain::ChainSource;
use crate::core::Network;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    Accepted { txid: String },
    Rejected { err_msg: String },
}

impl BroadcastOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BroadcastOutcome::Accepted { .. })
    }

    /// `{txid, errMsg}` with exactly one side set.
    pub fn to_json(&self) -> Value {
        match self {
            BroadcastOutcome::Accepted { txid } => json!({"txid": txid, "errMsg": null}),
            BroadcastOutcome::Rejected { err_msg } => json!({"txid": null, "errMsg": err_msg}),
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    chain: Arc<dyn ChainSource>,
}

impl Broadcaster {
    pub fn new(chain: Arc<dyn ChainSource>) -> Self {
        Self { chain }
    }

    pub async fn broadcast(&self, tx: &Transaction, network: Network) -> BroadcastOutcome {
        if self.chain.network() != network {
            return BroadcastOutcome::Rejected {
                err_msg: format!("chain source is {}, transaction is for {network}", self.chain.network()),
            };
        }
        let txid = tx.compute_txid();
        let outcome = match AssertUnwindSafe(self.chain.broadcast(tx)).catch_unwind().await {
            Ok(Ok(accepted)) => BroadcastOutcome::Accepted { txid: accepted.to_string() },
            Ok(Err(e)) => BroadcastOutcome::Rejected { err_msg: e.to_string() },
            Err(_) => BroadcastOutcome::Rejected { err_msg: "broadcast panicked".into() },
        };
        match &outcome {
            BroadcastOutcome::Accepted { .. } => tracing::info!(%txid, "Broadcast accepted"),
            BroadcastOutcome::Rejected { err_msg } => tracing::warn!(%txid, error = %err_msg, "Broadcast rejected"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;

    fn tx() -> Transaction {
        Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input: vec![], output: vec![] }
    }

    #[tokio::test]
    async fn accepted_returns_txid() {
        let chain = Arc::new(MemoryChain::new(Network::Testnet));
        let outcome = Broadcaster::new(chain.clone()).broadcast(&tx(), Network::Testnet).await;
        assert_eq!(outcome, BroadcastOutcome::Accepted { txid: tx().compute_txid().to_string() });
        assert_eq!(chain.broadcasts().unwrap().len(), 1);
        assert!(outcome.to_json()["errMsg"].is_null());
    }

    #[tokio::test]
    async fn failures_become_rejections() {
        let chain = Arc::new(MemoryChain::new(Network::Testnet));
        chain.reject_broadcasts("bad-txns-inputs-missingorspent").unwrap();
        let b = Broadcaster::new(chain);
        let outcome = b.broadcast(&tx(), Network::Testnet).await;
        assert!(matches!(&outcome, BroadcastOutcome::Rejected { err_msg } if err_msg.contains("missingorspent")));
        assert!(outcome.to_json()["txid"].is_null());

        let outcome = b.broadcast(&tx(), Network::Mainnet).await;
        assert!(!outcome.is_accepted());
    }
}

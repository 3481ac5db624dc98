//! Beevault: multisig Bitcoin wallet engine.
//!
//! # Architecture
//!
//! ```text
//! Engine (entry point)
//!   │
//!   ├── ConfigStore (Argon2id + ChaCha20-Poly1305 envelope)
//!   │     └── Config { wallets, vaults, keys }
//!   │
//!   ├── AccountRegistry ──→ ChainSource (Electrum | Memory)
//!   │     └── AccountData snapshots (addresses, UTXOs, history, balance)
//!   │
//!   ├── tx::build ──→ SigningSession ──→ Broadcaster
//!   │                   ↑         ↑
//!   │              local::sign   DeviceBridge ──→ hwi (Coldcard, Ledger, Trezor)
//!   │
//!   └── runtime (CancelToken, signal handlers)
//! ```
//!
//! # Features
//!
//! - `electrum` (default) - Electrum chain source over rustls
//!
//! # Usage
//!
//! ```ignore
//! use beevault::{Engine, EngineSettings, FeeSpec, Network};
//!
//! let engine = Engine::open(EngineSettings::default().with_network(Network::Testnet), "password").await?;
//! let (wallet, mnemonic) = engine.create_wallet("spending", None).await?;
//! let spend = engine.prepare_spend(Some("spending"), "tb1q...", 50_000, FeeSpec::Rate(2.0)).await?;
//! engine.sign_local(&spend, None).await?;
//! let tx = engine.finalize(&spend).await?;
//! let outcome = engine.broadcast(&tx).await;
//! ```

pub mod account;
pub mod broadcast;
pub mod chain;
pub mod config;
pub mod core;
pub mod device;
pub mod engine;
pub mod error;
pub mod keys;
pub mod logging;
pub mod runtime;
pub mod settings;
pub mod signing;
pub mod tx;

pub use account::{AccountData, AccountRegistry, Snapshot, Utxo};
pub use broadcast::{BroadcastOutcome, Broadcaster};
pub use chain::{ChainSource, FeeRates, MemoryChain};
#[cfg(feature = "electrum")]
pub use chain::ElectrumChain;
pub use config::{AccountConfig, Config, ConfigStore, Key, Quorum, Vault, Wallet};
pub use core::Network;
pub use device::{Device, DeviceBridge, DeviceStatus, DeviceTransport, DeviceType, HwiTransport};
pub use engine::{open_config, AccountRefresh, Engine, Spend};
pub use error::{DeviceError, Error, QuorumError, Result, ValidationError};
pub use keys::AddressType;
pub use runtime::{install_signal_handlers, until_cancelled, CancelToken};
pub use settings::EngineSettings;
pub use signing::{Contribution, SessionState, SigningSession};
pub use tx::{BuiltTransaction, FeeSpec};

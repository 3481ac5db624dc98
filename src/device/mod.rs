//! Hardware signing devices.
//!
//! ```text
//! DeviceBridge ──(single-flight per path, timeout, cancel)──→ DeviceDriver ──→ DeviceTransport
//!                                                              coldcard         HwiTransport (hwi CLI)
//!                                                              ledger           mock (tests)
//!                                                              trezor
//! ```
//!
//! A cancelled or timed-out action drops its future, which kills the HWI child
//! process; the device is free again immediately. Nothing here touches signing
//! sessions: a device signature only counts once it is submitted as a contribution.

pub mod hwi;
pub mod vendors;

pub use hwi::{DeviceTransport, HwiRequest, HwiTransport};
pub use vendors::{DeviceDriver, DeviceRegistry};

use bitcoin::bip32::{DerivationPath, Fingerprint, Xpub};
use bitcoin::Psbt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{DeviceDescriptor, Key};
use crate::core::paths::hwi as commands;
use crate::core::Network;
use crate::error::{DeviceError, Result, ValidationError};
use crate::keys::AddressType;
use crate::runtime::CancelToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Coldcard,
    Ledger,
    Trezor,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Coldcard => "coldcard",
            DeviceType::Ledger => "ledger",
            DeviceType::Trezor => "trezor",
        }
    }
}

impl FromStr for DeviceType {
    type Err = DeviceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coldcard" => Ok(DeviceType::Coldcard),
            "ledger" => Ok(DeviceType::Ledger),
            "trezor" => Ok(DeviceType::Trezor),
            other => Err(DeviceError::UnsupportedType(other.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum DeviceStatus {
    Ready,
    /// Attached but not reporting a fingerprint (PIN or app required)
    NeedsUnlock,
    Error(String),
}

/// An attached device as seen by the last enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub model: String,
    pub path: String,
    pub fingerprint: Option<Fingerprint>,
    pub xpub: Option<Xpub>,
    pub status: DeviceStatus,
}

impl Device {
    /// Parse one `enumerate` entry; entries for vendors we do not drive yield `None`.
    pub fn from_enumerate_entry(entry: &Value) -> Option<Self> {
        let raw_type = entry.get("type").and_then(Value::as_str)?;
        let device_type = match DeviceType::from_str(raw_type) {
            Ok(t) => t,
            Err(_) => {
                tracing::debug!(device_type = raw_type, "Skipping unsupported device");
                return None;
            }
        };
        let text = |name: &str| entry.get(name).and_then(Value::as_str).map(str::to_string);
        let fingerprint = text("fingerprint").and_then(|f| Fingerprint::from_str(&f).ok());
        let needs_pin = entry.get("needs_pin_sent").and_then(Value::as_bool).unwrap_or(false);

        let status = if let Some(err) = text("error") {
            DeviceStatus::Error(err)
        } else if fingerprint.is_none() || needs_pin {
            DeviceStatus::NeedsUnlock
        } else {
            DeviceStatus::Ready
        };

        Some(Self {
            device_type,
            model: text("model").unwrap_or_else(|| raw_type.to_string()),
            path: text("path").unwrap_or_default(),
            fingerprint,
            xpub: None,
            status,
        })
    }
}

/// Marks a device path busy for as long as it lives.
struct FlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    path: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.path);
        }
    }
}

/// Typed, cancellable, single-flight access to hardware signers.
#[derive(Clone)]
pub struct DeviceBridge {
    transport: Arc<dyn DeviceTransport>,
    registry: DeviceRegistry,
    in_flight: Arc<Mutex<HashSet<String>>>,
    timeout: Duration,
}

impl DeviceBridge {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            transport,
            registry: DeviceRegistry::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub async fn enumerate(&self, network: Network, cancel: &CancelToken) -> Result<Vec<Device>> {
        let request = HwiRequest::new(commands::ENUMERATE, network);
        let response = self.bounded(commands::ENUMERATE, cancel, self.transport.call(&request)).await?;
        let entries = response
            .as_array()
            .ok_or_else(|| DeviceError::Transport("enumerate did not return a list".into()))?;
        let devices: Vec<Device> = entries.iter().filter_map(Device::from_enumerate_entry).collect();
        tracing::info!(count = devices.len(), "Devices enumerated");
        Ok(devices)
    }

    pub async fn get_xpub(
        &self,
        device: &Device,
        path: &DerivationPath,
        network: Network,
        cancel: &CancelToken,
    ) -> Result<Xpub> {
        let driver = self.ready_driver(device)?;
        let _guard = self.acquire(&device.path)?;
        let fut = driver.get_xpub(self.transport.as_ref(), device, path, network);
        Ok(self.bounded(commands::GET_XPUB, cancel, fut).await?)
    }

    /// Import the device's account key for `address_type` as a config Key.
    pub async fn import_key(
        &self,
        device: &Device,
        network: Network,
        address_type: AddressType,
        cancel: &CancelToken,
    ) -> Result<Key> {
        let fingerprint = device.fingerprint.ok_or_else(|| self.locked(device))?;
        let path = address_type.account_path(network);
        let xpub = self.get_xpub(device, &path, network, cancel).await?;
        let descriptor = DeviceDescriptor { device_type: device.device_type, model: device.model.clone(), fingerprint };
        Key::from_device(descriptor, xpub, path, network)
    }

    /// Ask the device to sign; the returned PSBT is a contribution, not a session update.
    pub async fn sign(&self, device: &Device, psbt: &Psbt, network: Network, cancel: &CancelToken) -> Result<Psbt> {
        let driver = self.ready_driver(device)?;
        let _guard = self.acquire(&device.path)?;
        tracing::info!(device = device.device_type.as_str(), path = %device.path, "Requesting device signature");
        let fut = driver.sign(self.transport.as_ref(), device, psbt, network);
        Ok(self.bounded(commands::SIGN_TX, cancel, fut).await?)
    }

    pub async fn prompt_pin(&self, device: &Device, network: Network, cancel: &CancelToken) -> Result<()> {
        let driver = self.pin_driver(device, commands::PROMPT_PIN)?;
        let _guard = self.acquire(&device.path)?;
        let fut = driver.prompt_pin(self.transport.as_ref(), device, network);
        Ok(self.bounded(commands::PROMPT_PIN, cancel, fut).await?)
    }

    /// `pin` is the scrambled-keypad positions, digits 1–9.
    pub async fn send_pin(&self, device: &Device, pin: &str, network: Network, cancel: &CancelToken) -> Result<()> {
        if pin.is_empty() || !pin.chars().all(|c| ('1'..='9').contains(&c)) {
            return Err(ValidationError::InvalidPin("positions must be digits 1-9".into()).into());
        }
        let driver = self.pin_driver(device, commands::SEND_PIN)?;
        let _guard = self.acquire(&device.path)?;
        let fut = driver.send_pin(self.transport.as_ref(), device, pin, network);
        Ok(self.bounded(commands::SEND_PIN, cancel, fut).await?)
    }

    fn ready_driver(&self, device: &Device) -> std::result::Result<Arc<dyn DeviceDriver>, DeviceError> {
        let driver = self.registry.driver(device.device_type)?;
        match &device.status {
            DeviceStatus::Ready => Ok(driver),
            DeviceStatus::NeedsUnlock => Err(DeviceError::Locked(driver.unlock_hint().into())),
            DeviceStatus::Error(msg) => Err(DeviceError::Reported { code: 0, message: msg.clone() }),
        }
    }

    /// Vendors that unlock on the device itself never reach the transport.
    fn pin_driver(&self, device: &Device, action: &str) -> std::result::Result<Arc<dyn DeviceDriver>, DeviceError> {
        let driver = self.registry.driver(device.device_type)?;
        if !driver.supports_pin() {
            return Err(driver.unsupported(action));
        }
        Ok(driver)
    }

    fn locked(&self, device: &Device) -> DeviceError {
        let hint = self.registry.driver(device.device_type).map(|d| d.unlock_hint()).unwrap_or("unlock the device");
        DeviceError::Locked(hint.into())
    }

    fn acquire(&self, path: &str) -> std::result::Result<FlightGuard, DeviceError> {
        let mut set = self.in_flight.lock().map_err(|_| DeviceError::Transport("device lock poisoned".into()))?;
        if !set.insert(path.to_string()) {
            return Err(DeviceError::Busy);
        }
        Ok(FlightGuard { in_flight: self.in_flight.clone(), path: path.to_string() })
    }

    async fn bounded<T>(
        &self,
        action: &str,
        cancel: &CancelToken,
        fut: impl Future<Output = std::result::Result<T, DeviceError>>,
    ) -> std::result::Result<T, DeviceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(action, "Device action cancelled");
                Err(DeviceError::Aborted)
            }
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(out) => out,
                Err(_) => {
                    tracing::warn!(action, timeout_secs = self.timeout.as_secs(), "Device action timed out");
                    Err(DeviceError::Timeout(self.timeout.as_secs()))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers every request after `delay` with `response`.
    struct Scripted {
        delay: Duration,
        response: Value,
    }

    #[async_trait]
    impl DeviceTransport for Scripted {
        async fn call(&self, _request: &HwiRequest) -> std::result::Result<Value, DeviceError> {
            tokio::time::sleep(self.delay).await;
            hwi::check_response(self.response.clone())
        }
    }

    fn bridge(delay_ms: u64, response: Value) -> DeviceBridge {
        DeviceBridge::new(Arc::new(Scripted { delay: Duration::from_millis(delay_ms), response }))
            .with_timeout(Duration::from_millis(200))
    }

    fn device(status: DeviceStatus) -> Device {
        Device {
            device_type: DeviceType::Trezor,
            model: "trezor_1".into(),
            path: "hid:0001".into(),
            fingerprint: Fingerprint::from_str("73c5da0a").ok(),
            xpub: None,
            status,
        }
    }

    fn path() -> DerivationPath {
        DerivationPath::from_str("m/48'/1'/0'/2'").unwrap()
    }

    #[test]
    fn enumerate_entry_statuses() {
        let ready = Device::from_enumerate_entry(&json!({"type": "coldcard", "model": "coldcard", "path": "p", "fingerprint": "73c5da0a"})).unwrap();
        assert_eq!(ready.status, DeviceStatus::Ready);

        let locked = Device::from_enumerate_entry(&json!({"type": "trezor", "model": "trezor_t", "path": "p", "needs_pin_sent": true})).unwrap();
        assert_eq!(locked.status, DeviceStatus::NeedsUnlock);
        assert!(locked.fingerprint.is_none());

        let broken = Device::from_enumerate_entry(&json!({"type": "ledger", "path": "p", "error": "Could not open client", "code": -13})).unwrap();
        assert_eq!(broken.status, DeviceStatus::Error("Could not open client".into()));

        assert!(Device::from_enumerate_entry(&json!({"type": "bitbox02", "path": "p"})).is_none());
    }

    #[tokio::test]
    async fn enumerate_parses_list() {
        let b = bridge(0, json!([{"type": "trezor", "path": "a", "fingerprint": "73c5da0a"}, {"type": "keepkey", "path": "b"}]));
        let devices = b.enumerate(Network::Testnet, &CancelToken::new()).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, DeviceType::Trezor);
    }

    #[tokio::test]
    async fn locked_device_is_rejected_before_transport() {
        let b = bridge(0, json!({"xpub": "unused"}));
        let err = b.get_xpub(&device(DeviceStatus::NeedsUnlock), &path(), Network::Testnet, &CancelToken::new()).await;
        assert!(matches!(err, Err(crate::Error::Device(DeviceError::Locked(_)))));
    }

    #[tokio::test]
    async fn second_action_on_same_path_is_busy() {
        let b = bridge(100, json!({"success": true}));
        let d = device(DeviceStatus::Ready);
        let cancel = CancelToken::new();
        let (first, second) = tokio::join!(
            b.prompt_pin(&d, Network::Testnet, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                b.prompt_pin(&d, Network::Testnet, &cancel).await
            }
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(crate::Error::Device(DeviceError::Busy))));
        assert!(b.prompt_pin(&d, Network::Testnet, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn timeout_frees_device() {
        let b = bridge(1_000, json!({"success": true}));
        let d = device(DeviceStatus::Ready);
        let err = b.prompt_pin(&d, Network::Testnet, &CancelToken::new()).await;
        assert!(matches!(err, Err(crate::Error::Device(DeviceError::Timeout(_)))));
        assert!(b.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_aborts_and_frees_device() {
        let b = bridge(150, json!({"success": true}));
        let d = device(DeviceStatus::Ready);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = b.prompt_pin(&d, Network::Testnet, &cancel).await;
        assert!(matches!(err, Err(crate::Error::Device(DeviceError::Aborted))));
        assert!(b.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pin_positions_validated() {
        let b = bridge(0, json!({"success": true}));
        let d = device(DeviceStatus::NeedsUnlock);
        let cancel = CancelToken::new();
        assert!(matches!(
            b.send_pin(&d, "1290", Network::Testnet, &cancel).await,
            Err(crate::Error::Validation(ValidationError::InvalidPin(_)))
        ));
        assert!(b.send_pin(&d, "5831", Network::Testnet, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn pin_unsupported_on_ledger() {
        // A slow transport would time out; refusal happens before any call
        let b = bridge(1_000, json!({"success": true}));
        let mut d = device(DeviceStatus::NeedsUnlock);
        d.device_type = DeviceType::Ledger;
        let err = b.prompt_pin(&d, Network::Testnet, &CancelToken::new()).await;
        assert!(matches!(err, Err(crate::Error::Device(DeviceError::Unsupported { .. }))));
        let err = b.send_pin(&d, "123", Network::Testnet, &CancelToken::new()).await;
        assert!(matches!(err, Err(crate::Error::Device(DeviceError::Unsupported { .. }))));
        assert!(b.in_flight.lock().unwrap().is_empty());
    }
}

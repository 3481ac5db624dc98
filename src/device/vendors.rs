//! Vendor drivers. Capability differences live here instead of in string matches.

use async_trait::async_trait;
use bitcoin::bip32::{DerivationPath, Xpub};
use bitcoin::Psbt;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::hwi::{DeviceTransport, HwiRequest};
use super::{Device, DeviceType};
use crate::core::paths::hwi;
use crate::core::Network;
use crate::error::DeviceError;
use crate::keys::format_path;

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn device_type(&self) -> DeviceType;

    /// What the user has to do when the device reports no fingerprint.
    fn unlock_hint(&self) -> &'static str;

    fn supports_pin(&self) -> bool {
        false
    }

    async fn get_xpub(
        &self,
        transport: &dyn DeviceTransport,
        device: &Device,
        path: &DerivationPath,
        network: Network,
    ) -> Result<Xpub, DeviceError> {
        let request = HwiRequest::new(hwi::GET_XPUB, network).for_device(device).arg(format_path(path));
        let response = transport.call(&request).await?;
        let raw = field(&response, "xpub")?;
        Xpub::from_str(raw).map_err(|e| DeviceError::Transport(format!("device returned invalid xpub: {e}")))
    }

    async fn sign(
        &self,
        transport: &dyn DeviceTransport,
        device: &Device,
        psbt: &Psbt,
        network: Network,
    ) -> Result<Psbt, DeviceError> {
        let request = HwiRequest::new(hwi::SIGN_TX, network).for_device(device).arg(psbt.to_string());
        let response = transport.call(&request).await?;
        if response.get("signed").and_then(Value::as_bool) == Some(false) {
            return Err(DeviceError::Reported { code: 0, message: "device did not sign".into() });
        }
        let raw = field(&response, "psbt")?;
        Psbt::from_str(raw).map_err(|e| DeviceError::Transport(format!("device returned invalid psbt: {e}")))
    }

    async fn prompt_pin(
        &self,
        _transport: &dyn DeviceTransport,
        _device: &Device,
        _network: Network,
    ) -> Result<(), DeviceError> {
        Err(self.unsupported(hwi::PROMPT_PIN))
    }

    async fn send_pin(
        &self,
        _transport: &dyn DeviceTransport,
        _device: &Device,
        _pin: &str,
        _network: Network,
    ) -> Result<(), DeviceError> {
        Err(self.unsupported(hwi::SEND_PIN))
    }

    fn unsupported(&self, action: &str) -> DeviceError {
        DeviceError::Unsupported { device: self.device_type().as_str().into(), action: action.into() }
    }
}

fn field<'a>(response: &'a Value, name: &str) -> Result<&'a str, DeviceError> {
    response
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DeviceError::Transport(format!("response has no {name}")))
}

fn expect_success(response: &Value) -> Result<(), DeviceError> {
    match response.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        _ => Err(DeviceError::Reported { code: 0, message: "device reported failure".into() }),
    }
}

pub struct Coldcard;

#[async_trait]
impl DeviceDriver for Coldcard {
    fn device_type(&self) -> DeviceType {
        DeviceType::Coldcard
    }

    fn unlock_hint(&self) -> &'static str {
        "unlock the Coldcard and reconnect it"
    }
}

pub struct Ledger;

#[async_trait]
impl DeviceDriver for Ledger {
    fn device_type(&self) -> DeviceType {
        DeviceType::Ledger
    }

    fn unlock_hint(&self) -> &'static str {
        "unlock the Ledger and open the Bitcoin app"
    }
}

/// The only vendor that takes its PIN through the host (scrambled keypad).
pub struct Trezor;

#[async_trait]
impl DeviceDriver for Trezor {
    fn device_type(&self) -> DeviceType {
        DeviceType::Trezor
    }

    fn unlock_hint(&self) -> &'static str {
        "enter the Trezor PIN"
    }

    fn supports_pin(&self) -> bool {
        true
    }

    async fn prompt_pin(
        &self,
        transport: &dyn DeviceTransport,
        device: &Device,
        network: Network,
    ) -> Result<(), DeviceError> {
        let request = HwiRequest::new(hwi::PROMPT_PIN, network).for_device(device);
        expect_success(&transport.call(&request).await?)
    }

    async fn send_pin(
        &self,
        transport: &dyn DeviceTransport,
        device: &Device,
        pin: &str,
        network: Network,
    ) -> Result<(), DeviceError> {
        let request = HwiRequest::new(hwi::SEND_PIN, network).for_device(device).arg(pin);
        expect_success(&transport.call(&request).await?)
    }
}

/// Drivers keyed by device type.
#[derive(Clone)]
pub struct DeviceRegistry {
    drivers: HashMap<DeviceType, Arc<dyn DeviceDriver>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::empty().register(Arc::new(Coldcard)).register(Arc::new(Ledger)).register(Arc::new(Trezor))
    }
}

impl DeviceRegistry {
    pub fn empty() -> Self {
        Self { drivers: HashMap::new() }
    }

    pub fn register(mut self, driver: Arc<dyn DeviceDriver>) -> Self {
        self.drivers.insert(driver.device_type(), driver);
        self
    }

    pub fn driver(&self, device_type: DeviceType) -> Result<Arc<dyn DeviceDriver>, DeviceError> {
        self.drivers
            .get(&device_type)
            .cloned()
            .ok_or_else(|| DeviceError::UnsupportedType(device_type.as_str().into()))
    }
}

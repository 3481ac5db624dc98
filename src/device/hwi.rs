//! HWI transport: one `hwi` process per request, JSON on stdout.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::{Device, DeviceType};
use crate::core::Network;
use crate::error::DeviceError;

/// One HWI command addressed to a device (or to none, for `enumerate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwiRequest {
    pub command: &'static str,
    pub device_type: Option<DeviceType>,
    pub device_path: Option<String>,
    pub network: Network,
    pub args: Vec<String>,
}

impl HwiRequest {
    pub fn new(command: &'static str, network: Network) -> Self {
        Self { command, device_type: None, device_path: None, network, args: Vec::new() }
    }

    pub fn for_device(mut self, device: &Device) -> Self {
        self.device_type = Some(device.device_type);
        self.device_path = Some(device.path.clone());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command-line arguments in HWI order: global flags, command, command args.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(t) = self.device_type {
            argv.extend(["--device-type".to_string(), t.as_str().to_string()]);
        }
        if let Some(p) = &self.device_path {
            argv.extend(["--device-path".to_string(), p.clone()]);
        }
        argv.extend(["--chain".to_string(), self.network.hwi_chain().to_string()]);
        argv.push(self.command.to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Request/response channel to signing devices.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Run one request. A response carrying an `error` field is a failure.
    async fn call(&self, request: &HwiRequest) -> Result<Value, DeviceError>;
}

/// Runs the `hwi` binary. The child is killed if the call is dropped.
pub struct HwiTransport {
    binary: PathBuf,
}

impl HwiTransport {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for HwiTransport {
    fn default() -> Self {
        Self::new("hwi")
    }
}

#[async_trait]
impl DeviceTransport for HwiTransport {
    async fn call(&self, request: &HwiRequest) -> Result<Value, DeviceError> {
        let argv = request.argv();
        tracing::debug!(command = request.command, path = ?request.device_path, "hwi");
        let output = Command::new(&self.binary)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    DeviceError::Transport(format!("{} not found on PATH", self.binary.display()))
                }
                _ => DeviceError::Transport(e.to_string()),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value: Value = serde_json::from_str(stdout.trim()).map_err(|_| {
            let stderr = String::from_utf8_lossy(&output.stderr);
            DeviceError::Transport(format!("unparseable hwi output (exit {:?}): {}", output.status.code(), stderr.trim()))
        })?;
        check_response(value)
    }
}

/// Fail on a top-level `error` field; pass anything else through.
pub fn check_response(value: Value) -> Result<Value, DeviceError> {
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        return Err(map_error(code, message));
    }
    Ok(value)
}

/// HWI error codes onto device errors.
pub fn map_error(code: i64, message: &str) -> DeviceError {
    match code {
        -1 => DeviceError::NotFound,
        -3 if message.to_ascii_lowercase().contains("not found") => DeviceError::NotFound,
        -3 => DeviceError::Disconnected,
        -4 => DeviceError::UnsupportedType(message.to_string()),
        -12 => DeviceError::Locked(message.to_string()),
        -14 => DeviceError::Aborted,
        -15 => DeviceError::Busy,
        _ => DeviceError::Reported { code, message: message.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;
    use serde_json::json;

    fn trezor() -> Device {
        Device {
            device_type: DeviceType::Trezor,
            model: "trezor_t".into(),
            path: "webusb:001:4".into(),
            fingerprint: None,
            xpub: None,
            status: DeviceStatus::NeedsUnlock,
        }
    }

    #[test]
    fn argv_orders_globals_before_command() {
        let req = HwiRequest::new("getxpub", Network::Testnet).for_device(&trezor()).arg("m/48'/1'/0'/2'");
        assert_eq!(
            req.argv(),
            vec!["--device-type", "trezor", "--device-path", "webusb:001:4", "--chain", "test", "getxpub", "m/48'/1'/0'/2'"]
        );
        assert_eq!(HwiRequest::new("enumerate", Network::Mainnet).argv(), vec!["--chain", "main", "enumerate"]);
    }

    #[test]
    fn error_field_is_failure() {
        assert_eq!(check_response(json!({"error": "busy", "code": -15})), Err(DeviceError::Busy));
        assert_eq!(check_response(json!({"error": "cancelled", "code": -14})), Err(DeviceError::Aborted));
        assert!(matches!(check_response(json!({"error": "pin", "code": -12})), Err(DeviceError::Locked(_))));
        assert!(matches!(check_response(json!({"error": "x"})), Err(DeviceError::Reported { code: 0, .. })));
        assert_eq!(check_response(json!({"xpub": "tpub"})).unwrap()["xpub"], "tpub");
        assert!(check_response(json!([])).is_ok());
    }

    #[tokio::test]
    async fn missing_binary_is_transport_error() {
        let transport = HwiTransport::new("/nonexistent/beevault-hwi");
        let err = transport.call(&HwiRequest::new("enumerate", Network::Testnet)).await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));
    }
}

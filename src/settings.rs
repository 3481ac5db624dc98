//! Engine settings. CLI flags > environment (`BEEVAULT_*`, `.env`) > defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::paths::policy::DEFAULT_GAP_LIMIT;
use crate::core::Network;
use crate::device::DEFAULT_TIMEOUT;

pub const DEFAULT_CONFIG_FILE: &str = "beevault-config.json";

pub mod vars {
    pub const NETWORK: &str = "BEEVAULT_NETWORK";
    pub const CONFIG: &str = "BEEVAULT_CONFIG";
    pub const ELECTRUM: &str = "BEEVAULT_ELECTRUM";
    pub const GAP_LIMIT: &str = "BEEVAULT_GAP_LIMIT";
    pub const DEVICE_TIMEOUT: &str = "BEEVAULT_DEVICE_TIMEOUT";
    pub const HWI: &str = "BEEVAULT_HWI";
    pub const PASSWORD: &str = "BEEVAULT_PASSWORD";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub network: Network,
    pub config_path: PathBuf,
    /// `None` uses the public server for the network
    pub electrum_url: Option<String>,
    pub gap_limit: u32,
    pub device_timeout: Duration,
    pub hwi_binary: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            electrum_url: None,
            gap_limit: DEFAULT_GAP_LIMIT,
            device_timeout: DEFAULT_TIMEOUT,
            hwi_binary: PathBuf::from("hwi"),
        }
    }
}

impl EngineSettings {
    /// Defaults overlaid with whatever `BEEVAULT_*` variables are set.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        if let Some(n) = var(vars::NETWORK).and_then(|v| Network::from_str(&v)) {
            s.network = n;
        }
        if let Some(p) = var(vars::CONFIG) {
            s.config_path = PathBuf::from(p);
        }
        s.electrum_url = var(vars::ELECTRUM);
        if let Some(g) = var(vars::GAP_LIMIT).and_then(|v| v.parse().ok()) {
            s.gap_limit = g;
        }
        if let Some(t) = var(vars::DEVICE_TIMEOUT).and_then(|v| v.parse().ok()) {
            s.device_timeout = Duration::from_secs(t);
        }
        if let Some(h) = var(vars::HWI) {
            s.hwi_binary = PathBuf::from(h);
        }
        s
    }

    pub fn with_network(mut self, network: Network) -> Self { self.network = network; self }
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self { self.config_path = path.into(); self }
    pub fn with_electrum(mut self, url: impl Into<String>) -> Self { self.electrum_url = Some(url.into()); self }
    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self { self.gap_limit = gap_limit.max(1); self }
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self { self.device_timeout = timeout; self }
    pub fn with_hwi(mut self, binary: impl Into<PathBuf>) -> Self { self.hwi_binary = binary.into(); self }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Load `KEY=value` lines into the environment without overriding variables already set.
pub fn load_dotenv(path: impl AsRef<Path>) {
    let Ok(contents) = std::fs::read_to_string(path.as_ref()) else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() && env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value);
            }
        }
    }
}

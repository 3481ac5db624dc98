//! On-disk home of the encrypted Config.
//!
//! Every mutation goes through [`ConfigStore::update`]: the change is applied to
//! a copy, validated, encrypted and written (temp file + rename) before the
//! in-memory document is replaced. A failed update leaves both untouched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use super::codec::{decrypt, encrypt_with, KdfParams};
use super::Config;
use crate::error::{Result, ValidationError};

pub struct ConfigStore {
    path: PathBuf,
    password: Zeroizing<String>,
    kdf: KdfParams,
    config: Config,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Load the config at `path`. A missing file yields a fresh empty Config.
    pub fn open(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(ValidationError::EmptyPassword.into());
        }
        let path = path.as_ref().to_path_buf();
        let config = match fs::read_to_string(&path) {
            Ok(blob) => decrypt(blob.trim(), password)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, starting empty");
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, password: Zeroizing::new(password.to_string()), kdf: KdfParams::default(), config })
    }

    /// Open with a password that must be typed twice.
    pub fn create(path: impl AsRef<Path>, password: &str, confirmation: &str) -> Result<Self> {
        if password != confirmation {
            return Err(ValidationError::PasswordMismatch.into());
        }
        Self::open(path, password)
    }

    /// Override the key-derivation cost for subsequent writes.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apply `change` to a copy and persist it; the copy replaces the current Config only on success.
    pub fn update<T>(&mut self, change: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
        let mut next = self.config.clone();
        let out = change(&mut next)?;
        next.validate()?;
        let blob = encrypt_with(&next, &self.password, self.kdf)?;
        write_atomic(&self.path, blob.as_bytes())?;
        self.config = next;
        tracing::debug!(path = %self.path.display(), "Config persisted");
        Ok(out)
    }

    /// Persist the current document as-is.
    pub fn save(&mut self) -> Result<()> {
        self.update(|_| Ok(()))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Wallet;
    use crate::core::Network;
    use crate::error::Error;
    use tempfile::TempDir;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn store(dir: &TempDir) -> ConfigStore {
        ConfigStore::open(dir.path().join("config.json"), "pw").unwrap().with_kdf(KdfParams::new(64, 1, 1))
    }

    #[test]
    fn missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.config().is_empty);
        assert!(!store.path().exists());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store
            .update(|c| c.add_wallet(Wallet::from_mnemonic("w", TEST_MNEMONIC, Network::Testnet)?))
            .unwrap();

        let reopened = ConfigStore::open(store.path(), "pw").unwrap();
        assert_eq!(reopened.config(), store.config());
        assert!(matches!(ConfigStore::open(store.path(), "nope"), Err(Error::Authentication)));
    }

    #[test]
    fn failed_update_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let err = store.update(|c| {
            c.is_empty = false;
            Ok(())
        });
        assert!(matches!(err, Err(Error::DataIntegrity(_))));
        assert!(store.config().is_empty);
        assert!(!store.path().exists());
    }

    #[test]
    fn confirmation_must_match() {
        let dir = TempDir::new().unwrap();
        let err = ConfigStore::create(dir.path().join("c.json"), "a", "b").unwrap_err();
        assert_eq!(err.to_string(), "password confirmation does not match");
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.save().unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

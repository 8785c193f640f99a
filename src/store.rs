//! Secret storage for persisted token sets.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, Result};

/// A stored value plus the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Key/value secret storage keyed by opaque strings.
///
/// `set` replaces the whole entry and resets its creation timestamp.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<StoredSecret>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, StoredSecret>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry with an explicit creation time.
    pub fn insert_at(&self, key: &str, value: &[u8], created_at: DateTime<Utc>) -> Result<()> {
        self.lock()?.insert(
            key.to_string(),
            StoredSecret {
                value: value.to_vec(),
                created_at,
            },
        );
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredSecret>>> {
        self.entries
            .lock()
            .map_err(|_| OAuthError::Store("memory store lock poisoned".to_string()))
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<StoredSecret>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.insert_at(key, value, Utc::now())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Configuration for file-backed secret storage.
#[derive(Debug, Clone)]
pub struct FileSecretStoreConfig {
    pub base_dir: PathBuf,
}

impl FileSecretStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_store_dir()
    }
}

/// File-backed store, one TOML file per key, readable only by the owner.
///
/// # Example
/// ```no_run
/// use roci_oauth::store::{FileSecretStore, FileSecretStoreConfig, SecretStore};
///
/// let store = FileSecretStore::new(FileSecretStoreConfig::new("/tmp/oauth".into()));
/// store.set("my-client:tokens", b"{}")?;
/// assert!(store.contains("my-client:tokens")?);
/// # Ok::<(), roci_oauth::OAuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    base_dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(config: FileSecretStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_store_dir(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys contain ':' and other characters that are not portable in
        // file names.
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.base_dir.join(format!("{name}.toml"))
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<StoredSecret>> {
        let path = self.entry_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: SecretFile = toml::from_str(&raw)
            .map_err(|e| OAuthError::Store(format!("corrupt entry for `{key}`: {e}")))?;
        let value = STANDARD
            .decode(file.value.as_bytes())
            .map_err(|e| OAuthError::Store(format!("corrupt entry for `{key}`: {e}")))?;
        Ok(Some(StoredSecret {
            value,
            created_at: file.saved_at,
        }))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        Self::ensure_parent(&path)?;
        let file = SecretFile {
            version: 1,
            key: key.to_string(),
            value: STANDARD.encode(value),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretFile {
    version: u32,
    key: String,
    value: String,
    saved_at: DateTime<Utc>,
}

fn default_store_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "roci-oauth")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".roci-oauth"))
}

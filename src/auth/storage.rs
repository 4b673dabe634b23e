use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::auth::token::CredentialPair;

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Key/value persistence for the credential pair.
///
/// Backends only implement the three primitive operations; the typed helpers
/// are provided on top of them.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY).await
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY).await
    }

    async fn set_access_token(&self, token: &str) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, token).await
    }

    async fn set_refresh_token(&self, token: &str) -> Result<()> {
        self.set(REFRESH_TOKEN_KEY, token).await
    }

    /// Both tokens, if both are present
    async fn credentials(&self) -> Result<Option<CredentialPair>> {
        match (self.access_token().await?, self.refresh_token().await?) {
            (Some(access), Some(refresh)) => Ok(Some(CredentialPair::new(access, refresh))),
            _ => Ok(None),
        }
    }

    async fn store_credentials(&self, pair: &CredentialPair) -> Result<()> {
        self.set_access_token(&pair.access_token).await?;
        self.set_refresh_token(&pair.refresh_token).await
    }

    /// Remove both tokens
    async fn clear(&self) -> Result<()> {
        self.remove(ACCESS_TOKEN_KEY).await?;
        self.remove(REFRESH_TOKEN_KEY).await
    }
}

/// Process-local token storage
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a credential pair already stored
    pub fn with_credentials(pair: &CredentialPair) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), pair.access_token.clone());
        entries.insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh_token.clone());
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Token storage persisted as a flat JSON object on disk.
///
/// The whole map is rewritten on every mutation through a temporary file and
/// a rename, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Open the store at `path`, loading existing tokens if the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str::<HashMap<String, String>>(&contents)
                .with_context(|| format!("Token file {} is not valid JSON", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No token file yet, starting empty");
                HashMap::new()
            }
            Err(e) => {
                return Err(anyhow!(
                    "Failed to read token file {}: {}",
                    path.display(),
                    e
                ))
            }
        };

        info!(path = %path.display(), keys = entries.len(), "Opened token file");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entries` to disk. Callers hold `write_lock` from the in-memory
    /// mutation through this call so files land in mutation order.
    async fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create token directory {}", parent.display())
                })?;
            }
        }

        let contents = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Token file saved");
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut entries = self.entries.write().await;
            entries.insert(key.to_string(), value.to_string());
            entries.clone()
        };
        self.persist(&snapshot).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut entries = self.entries.write().await;
            if entries.remove(key).is_none() {
                return Ok(());
            }
            entries.clone()
        };
        self.persist(&snapshot).await
    }
}

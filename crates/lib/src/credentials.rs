//! Credential store: persisted authentication blob for the chat-network session.
//!
//! The blob is opaque to the gateway. The bridge hands it over on credential-change events and
//! gets it back on the next connect; the store only loads, saves, and wipes it.

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Opaque authentication state produced by the chat network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credentials, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Credentials>, GatewayError>;
    async fn save(&self, credentials: &Credentials) -> Result<(), GatewayError>;
    /// Remove stored credentials. Succeeds when there is nothing to remove.
    async fn wipe(&self) -> Result<(), GatewayError>;
}

/// Credentials kept as a JSON file on disk.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_err(&self, action: &str, e: impl std::fmt::Display) -> GatewayError {
        GatewayError::Storage(format!("{} {}: {}", action, self.path.display(), e))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>, GatewayError> {
        let s = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage_err("reading", e)),
        };
        serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| self.storage_err("parsing", e))
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), GatewayError> {
        let json = serde_json::to_string_pretty(credentials)
            .map_err(|e| self.storage_err("serializing", e))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_err("creating directory for", e))?;
        }
        // Write next to the target and rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.storage_err("writing", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.storage_err("replacing", e))
    }

    async fn wipe(&self) -> Result<(), GatewayError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                log::info!("removed stored credentials at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_err("removing", e)),
        }
    }
}

/// In-memory store, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(Some(credentials)),
        }
    }

    pub async fn current(&self) -> Option<Credentials> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>, GatewayError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), GatewayError> {
        *self.inner.write().await = Some(credentials.clone());
        Ok(())
    }

    async fn wipe(&self) -> Result<(), GatewayError> {
        *self.inner.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("chatgate-creds-test-{}", uuid::Uuid::new_v4()))
            .join("session")
            .join("credentials.json")
    }

    #[tokio::test]
    async fn file_store_load_missing_is_none() {
        let store = FileCredentialStore::new(temp_path());
        assert_eq!(store.load().await.expect("load"), None);
    }

    #[tokio::test]
    async fn file_store_saves_and_reloads_blob() {
        let path = temp_path();
        let store = FileCredentialStore::new(&path);
        let creds = Credentials(json!({ "me": "6281234", "keys": [1, 2, 3] }));
        store.save(&creds).await.expect("save");
        assert!(path.exists());

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.load().await.expect("load"), Some(creds));

        reopened.wipe().await.expect("wipe");
        assert!(!path.exists());
        reopened.wipe().await.expect("second wipe is a no-op");
        if let Some(dir) = path.parent().and_then(|p| p.parent()) {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_file() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "not json").expect("write");
        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.load().await, Err(GatewayError::Storage(_))));
        if let Some(dir) = path.parent().and_then(|p| p.parent()) {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn memory_store_wipe_clears() {
        let store = MemoryCredentialStore::with(Credentials(json!({"a": 1})));
        assert!(store.load().await.expect("load").is_some());
        store.wipe().await.expect("wipe");
        assert_eq!(store.current().await, None);
    }
}

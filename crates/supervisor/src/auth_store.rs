//! Durable session credentials.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    stickerbot_transport::Credentials,
    tracing::{debug, info},
};

use crate::{Error, Result};

const CREDS_FILE: &str = "creds.json";

/// Load and persist the credential document of the single session.
#[async_trait]
pub trait AuthStateStore: Send + Sync {
    /// Stored credentials, or empty ones on a first run.
    async fn load(&self) -> Result<Credentials>;

    /// Replace the stored credentials.
    async fn save(&self, credentials: &Credentials) -> Result<()>;

    /// Forget the stored credentials so the next session pairs again.
    async fn clear(&self) -> Result<()>;
}

/// Credentials kept as `creds.json` in a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileAuthStore {
    dir: PathBuf,
}

impl FileAuthStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::auth(format!("create {}", self.dir.display()), e))
    }
}

#[async_trait]
impl AuthStateStore for FileAuthStore {
    async fn load(&self) -> Result<Credentials> {
        self.ensure_dir().await?;
        let path = self.creds_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %self.dir.display(), "no stored credentials, pairing required");
                return Ok(Credentials::empty());
            },
            Err(e) => return Err(Error::auth(format!("read {}", path.display()), e)),
        };
        let credentials: Credentials = serde_json::from_slice(&raw)?;
        debug!(path = %path.display(), "loaded credentials");
        Ok(credentials)
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.creds_path();
        let tmp = self.dir.join(format!("{CREDS_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(credentials)?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::auth(format!("write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::auth(format!("rename into {}", path.display()), e))?;
        debug!(path = %path.display(), "saved credentials");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let path = self.creds_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "cleared stored credentials");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::auth(format!("remove {}", path.display()), e)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn first_run_yields_empty_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::new(dir.path().join("auth_info"));

        let creds = store.load().await.unwrap();
        assert!(creds.is_empty());
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn save_then_load_returns_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::new(dir.path());

        store
            .save(&Credentials::new(json!({"me": {"id": "1"}, "rev": 1})))
            .await
            .unwrap();
        store
            .save(&Credentials::new(json!({"me": {"id": "1"}, "rev": 2})))
            .await
            .unwrap();

        let creds = store.load().await.unwrap();
        assert_eq!(creds.as_value()["rev"], 2);
        assert!(!dir.path().join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn clear_forgets_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::new(dir.path());
        store
            .save(&Credentials::new(json!({"me": {"id": "1"}})))
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        // Clearing twice is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::new(dir.path());
        std::fs::write(store.creds_path(), b"{not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::MalformedCredentials(_)));
    }
}

//! Session cookie persistence.

use crate::error::CredentialError;
use crate::models::Credential;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The persisted credential, or `None` when nothing usable is stored.
    async fn load(&self) -> Result<Option<Credential>, CredentialError>;

    async fn save(&self, credential: &Credential) -> Result<(), CredentialError>;
}

/// Cookie list stored as pretty-printed JSON.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seed the cookie file from a base64-encoded JSON dump. A file that already
    /// exists is left alone. Returns whether the file was written.
    pub async fn bootstrap_from_base64(&self, encoded: &str) -> Result<bool, CredentialError> {
        if tokio::fs::try_exists(&self.path).await? {
            debug!("{:?} exists, skipping base64 bootstrap", self.path);
            return Ok(false);
        }
        let decoded = STANDARD.decode(encoded.trim())?;
        let credential: Credential = serde_json::from_slice(&decoded)?;
        self.save(&credential).await?;
        info!("{:?} restored from base64 ({} cookies)", self.path, credential.cookies.len());
        Ok(true)
    }

    /// The stored file as base64, for pasting into `COOKIES_BASE64`.
    pub async fn export_base64(&self) -> Result<Option<String>, CredentialError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(STANDARD.encode(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, CredentialError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let credential: Credential = serde_json::from_slice(&bytes)?;
        Ok((!credential.is_empty()).then_some(credential))
    }

    /// Writes to a uniquely named temp file in the same directory, then renames it over
    /// the cookie file, so concurrent saves never publish a partial file.
    async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(credential)?;
        let path = self.path.clone();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        tokio::task::spawn_blocking(move || -> Result<(), CredentialError> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CredentialError::Io(std::io::Error::other(e)))??;

        debug!("saved {} cookies to {:?}", credential.cookies.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store. With `persist` off, saves are counted but not kept.
    #[derive(Default)]
    pub struct MemoryStore {
        stored: Mutex<Option<Credential>>,
        persist: bool,
        saves: AtomicUsize,
    }

    impl MemoryStore {
        pub fn empty() -> Self {
            Self {
                persist: true,
                ..Default::default()
            }
        }

        pub fn holding(credential: Credential) -> Self {
            Self {
                stored: Mutex::new(Some(credential)),
                persist: true,
                saves: AtomicUsize::new(0),
            }
        }

        pub fn forgetful() -> Self {
            Self::default()
        }

        pub fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self) -> Result<Option<Credential>, CredentialError> {
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.persist {
                *self.stored.lock().unwrap() = Some(credential.clone());
            }
            Ok(())
        }
    }
}

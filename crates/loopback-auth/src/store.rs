//! On-disk token cache
//!
//! One JSON file holding one `Credential`. Writes go through a temp file in
//! the same directory followed by a rename, so readers only ever observe the
//! old file or the complete new one. Anything that can't be read back as a
//! credential with an access token counts as a cache miss.
//!
//! Clones share a write lock, and every write uses its own temp file, so
//! concurrent saves never interleave bytes in one temp file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Temp file suffix counter; unique per write within this process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Single-credential file store.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    /// Serializes save/clear across clones
    write_lock: Arc<Mutex<()>>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached credential.
    ///
    /// Returns `None` when the file is absent, unreadable, malformed, or has
    /// an empty access token. None of these are errors: the caller simply
    /// re-authorizes.
    pub async fn load(&self) -> Option<Credential> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cached token");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file unreadable, treating as missing");
                return None;
            }
        };

        match serde_json::from_str::<Credential>(&contents) {
            Ok(credential) if credential.is_valid() => {
                debug!(path = %self.path.display(), "loaded cached token");
                Some(credential)
            }
            Ok(_) => {
                warn!(path = %self.path.display(), "cached token has no access token, ignoring");
                None
            }
            Err(e) => {
                let err = Error::CredentialParse(e.to_string());
                warn!(path = %self.path.display(), error = %err, "malformed token file, ignoring");
                None
            }
        }
    }

    /// Atomically replace the token file with `credential`.
    ///
    /// Creates the parent directory if needed. The file is 0600 on unix.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, credential).await?;
        info!(path = %self.path.display(), "saved token");
        Ok(())
    }

    /// Remove the cached token. A missing file is not an error.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "removed cached token");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "removing {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Write the credential to a temp file beside `path`, then rename over it.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_vec_pretty(credential)
        .map_err(|e| Error::Persistence(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Persistence("token path has no parent directory".into()))?;
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Persistence(format!("creating {}: {e}", dir.display())))?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Persistence("token path has no file name".into()))?
        .to_string_lossy();
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}.{seq}", std::process::id()));

    if let Err(e) = write_private(&tmp_path, &json).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Persistence(format!(
            "renaming temp token file into place: {e}"
        )));
    }

    debug!(path = %path.display(), "persisted token file");
    Ok(())
}

/// Write `bytes` to a fresh file readable only by the owner.
async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| Error::Persistence(format!("creating temp token file: {e}")))?;

    // mode() only applies on creation; a stale temp file keeps its old bits
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::Persistence(format!("setting token file permissions: {e}")))?;
    }

    file.write_all(bytes)
        .await
        .map_err(|e| Error::Persistence(format!("writing temp token file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Persistence(format!("syncing temp token file: {e}")))?;
    Ok(())
}

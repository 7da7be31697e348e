//! Filesystem-backed implementation of [`BaselineStore`].
//!
//! Per client, one newline-delimited record file
//! `{root}/{client_id}/previous-input.ndjson`. Rewrites go through a
//! temporary file followed by a rename so readers never observe a torn
//! baseline.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deltasync_types::{FieldSet, Result, SyncError};
use tokio::fs;
use tokio::io::{BufReader, BufWriter};

use crate::backend::BaselineStore;
use crate::ndjson;

/// Baseline file name within each client directory.
pub const PREVIOUS_FILE: &str = "previous-input.ndjson";

/// Filesystem-backed baseline storage.
pub struct FilesystemStore {
    root: PathBuf,
    initialized: AtomicBool,
}

impl FilesystemStore {
    /// Create a store rooted at `path`. The directory is created on
    /// [`initialize`](BaselineStore::initialize).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] when `path` is empty.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let root = path.into();
        if root.as_os_str().is_empty() {
            return Err(SyncError::config("filesystem store path must not be empty"));
        }
        Ok(Self {
            root,
            initialized: AtomicBool::new(false),
        })
    }

    fn client_file(&self, client_id: &str) -> PathBuf {
        self.root.join(client_id).join(PREVIOUS_FILE)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SyncError::not_initialized(format!(
                "filesystem store at {} used before initialize()",
                self.root.display()
            )))
        }
    }

    /// Atomically move `from` over `to` (rename within the store root).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on rename failure.
    pub async fn move_resource(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await?;
        Ok(())
    }
}

#[async_trait]
impl BaselineStore for FilesystemStore {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn fetch_previous(
        &self,
        client_id: &str,
        _pk_fields: &[String],
        _limit_to: Option<&[FieldSet]>,
    ) -> Result<Vec<FieldSet>> {
        self.ensure_initialized()?;
        let path = self.client_file(client_id);
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        ndjson::read_records(BufReader::new(file)).await
    }

    async fn update_previous(
        &self,
        client_id: &str,
        data: Vec<FieldSet>,
        _pk_fields: &[String],
        _failure_count: u64,
    ) -> Result<u64> {
        self.ensure_initialized()?;
        let path = self.client_file(client_id);

        if data.is_empty() {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tracing::debug!(client_id, "baseline emptied, previous file removed");
            return Ok(0);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("ndjson.tmp");
        let file = fs::File::create(&tmp).await?;
        let mut writer = BufWriter::new(file);
        let written = ndjson::write_records(&mut writer, &data).await?;
        drop(writer);
        self.move_resource(&tmp, &path).await?;
        tracing::debug!(client_id, records = written, "baseline rewritten");
        Ok(written)
    }
}

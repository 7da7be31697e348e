//! Object-bucket implementation of [`BaselineStore`].
//!
//! Same file semantics as the filesystem backend — one
//! `{key_prefix}/{client_id}/previous-input.ndjson` object per client —
//! expressed over an [`ObjectStore`]. Buckets have no rename, so
//! `move_resource` is emulated with copy-then-delete; "parent directory"
//! creation is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deltasync_types::{FieldSet, Result, SyncError};
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, WriteMultipart};

use crate::backend::BaselineStore;
use crate::filesystem::PREVIOUS_FILE;
use crate::ndjson::{self, LineDecoder};
use crate::region::resolve_region;

/// Object-bucket baseline storage.
pub struct ObjectBucketStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: Option<String>,
    initialized: AtomicBool,
}

impl ObjectBucketStore {
    /// Build an S3-compatible store. Credentials come from the SDK
    /// environment; the region follows the `{explicit, AWS_REGION, REGION,
    /// SDK default}` chain.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an empty bucket name or a client
    /// that cannot be constructed from the environment.
    pub fn new(
        bucket: impl Into<String>,
        key_prefix: Option<String>,
        region: Option<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(SyncError::config("bucket name must not be empty"));
        }
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&bucket);
        if let Some(region) = resolve_region(region.as_deref(), |key| std::env::var(key).ok()) {
            builder = builder.with_region(region);
        }
        let store = builder
            .build()
            .map_err(|e| SyncError::config(format!("cannot build bucket client: {e}")))?;
        Ok(Self::with_store(Arc::new(store), bucket, key_prefix))
    }

    /// Wrap an existing [`ObjectStore`] (in-memory stores in tests).
    #[must_use]
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key_prefix: Option<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key_prefix: key_prefix.filter(|p| !p.trim().is_empty()),
            initialized: AtomicBool::new(false),
        }
    }

    fn client_object(&self, client_id: &str) -> ObjectPath {
        let key = match &self.key_prefix {
            Some(prefix) => format!("{prefix}/{client_id}/{PREVIOUS_FILE}"),
            None => format!("{client_id}/{PREVIOUS_FILE}"),
        };
        ObjectPath::from(key)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SyncError::not_initialized(format!(
                "bucket store '{}' used before initialize()",
                self.bucket
            )))
        }
    }

    /// Copy-then-delete emulation of a rename.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] when either half fails.
    pub async fn move_resource(&self, from: &ObjectPath, to: &ObjectPath) -> Result<()> {
        self.store
            .copy(from, to)
            .await
            .map_err(|e| SyncError::io_with(format!("copy {from} -> {to}"), e))?;
        self.store
            .delete(from)
            .await
            .map_err(|e| SyncError::io_with(format!("delete {from} after copy"), e))?;
        Ok(())
    }
}

#[async_trait]
impl BaselineStore for ObjectBucketStore {
    async fn initialize(&self) -> Result<()> {
        // Probe the bucket so bad credentials or a missing bucket surface
        // here rather than mid-cycle. A missing probe object is expected.
        let probe = match &self.key_prefix {
            Some(prefix) => ObjectPath::from(format!("{prefix}/.deltasync")),
            None => ObjectPath::from(".deltasync"),
        };
        match self.store.head(&probe).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => {
                return Err(SyncError::io_with(
                    format!("bucket '{}' is not reachable", self.bucket),
                    e,
                ))
            }
        }
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
        let path = self.client_object(client_id);
        let result = match self.store.get(&path).await {
            Ok(r) => r,
            Err(object_store::Error::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io_with(format!("get {path}"), e)),
        };

        let mut decoder = LineDecoder::new();
        let mut records = Vec::new();
        let mut stream = result.into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SyncError::io_with(format!("read {path}"), e))?;
            decoder.push(&chunk, &mut records)?;
        }
        if let Some(last) = decoder.finish()? {
            records.push(last);
        }
        Ok(records)
    }

    async fn update_previous(
        &self,
        client_id: &str,
        data: Vec<FieldSet>,
        _pk_fields: &[String],
        _failure_count: u64,
    ) -> Result<u64> {
        self.ensure_initialized()?;
        let path = self.client_object(client_id);

        if data.is_empty() {
            match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(SyncError::io_with(format!("delete {path}"), e)),
            }
            tracing::debug!(client_id, bucket = self.bucket, "baseline emptied, object removed");
            return Ok(0);
        }

        let upload = self
            .store
            .put_multipart(&path)
            .await
            .map_err(|e| SyncError::io_with(format!("start upload {path}"), e))?;
        let mut writer = WriteMultipart::new(upload);
        let mut written = 0u64;
        for record in &data {
            writer.write(&ndjson::encode_line(record)?);
            written += 1;
        }
        writer
            .finish()
            .await
            .map_err(|e| SyncError::io_with(format!("finish upload {path}"), e))?;
        tracing::debug!(
            client_id,
            bucket = self.bucket,
            records = written,
            "baseline object rewritten"
        );
        Ok(written)
    }
}

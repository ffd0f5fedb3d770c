//! Content-addressed upload of data objects.
//!
//! Objects are stored at
//! `tenant/<tenant>/objects/<hash[..prefix]>/<hash[prefix..]>`, where `hash`
//! is the hex BLAKE3 digest of the encoded bytes. Uploading the same bytes
//! twice resolves to the same path and leaves the stored object untouched.

use bytes::Bytes;
use log::debug;
use prometheus_client::registry::Registry;
use snafu::prelude::*;

use crate::{
    config::UploaderConfig,
    context::QueryContext,
    dataobj::error::{ConfigSnafu, ContextSnafu, DataObjResult, StorageSnafu},
    metrics::UploaderMetrics,
    storage::StorageLocation,
};

/// Uploads encoded data objects under content-derived paths.
#[derive(Clone, Debug)]
pub struct Uploader {
    storage: StorageLocation,
    config: UploaderConfig,
    metrics: UploaderMetrics,
}

impl Uploader {
    /// Create an uploader after validating `config`.
    pub fn new(storage: StorageLocation, config: UploaderConfig) -> DataObjResult<Self> {
        config.validate().context(ConfigSnafu)?;
        Ok(Self {
            storage,
            config,
            metrics: UploaderMetrics::default(),
        })
    }

    /// Register the upload counters with `registry`.
    pub fn register_metrics(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Path an object with these bytes is stored at for the context's tenant.
    pub fn object_path(&self, ctx: &QueryContext, bytes: &[u8]) -> String {
        let hash = blake3::hash(bytes).to_hex();
        let (prefix, rest) = hash.as_str().split_at(self.config.sha_prefix_size);
        format!("tenant/{}/objects/{prefix}/{rest}", ctx.tenant())
    }

    /// Upload `bytes`, returning the object path.
    ///
    /// An object already present at the content-derived path is reused.
    pub async fn upload(&self, ctx: &QueryContext, bytes: Bytes) -> DataObjResult<String> {
        let path = self.object_path(ctx, &bytes);
        let size = bytes.len();
        let written = ctx
            .run(self.storage.write_new(&path, bytes))
            .await
            .context(ContextSnafu)?;
        match written {
            Ok(()) => {
                self.metrics.uploads.inc();
                self.metrics.upload_bytes.inc_by(size as u64);
                debug!("uploaded data object {path} ({size} bytes)");
            }
            Err(e) if e.is_already_exists() => {
                self.metrics.reused_uploads.inc();
                debug!("data object {path} already present; reusing it");
            }
            Err(e) => {
                self.metrics.upload_failures.inc();
                return Err(e).context(StorageSnafu);
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ctx;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn path_uses_hash_prefix() -> TestResult {
        let uploader = Uploader::new(
            StorageLocation::in_memory(),
            UploaderConfig { sha_prefix_size: 4 },
        )?;
        let hex = blake3::hash(b"abc").to_hex().to_string();
        let path = uploader.object_path(&ctx(), b"abc");
        assert_eq!(
            path,
            format!("tenant/test-tenant/objects/{}/{}", &hex[..4], &hex[4..])
        );
        Ok(())
    }

    #[tokio::test]
    async fn upload_is_idempotent() -> TestResult {
        let storage = StorageLocation::in_memory();
        let uploader = Uploader::new(storage.clone(), UploaderConfig::default())?;
        let ctx = ctx();

        let first = uploader.upload(&ctx, Bytes::from_static(b"object")).await?;
        let second = uploader.upload(&ctx, Bytes::from_static(b"object")).await?;
        assert_eq!(first, second);
        assert_eq!(&storage.read_all_bytes(&first).await?[..], b"object");

        let other = uploader.upload(&ctx, Bytes::from_static(b"other")).await?;
        assert_ne!(first, other);
        Ok(())
    }

    #[tokio::test]
    async fn reused_uploads_are_counted_separately() -> TestResult {
        let uploader = Uploader::new(StorageLocation::in_memory(), UploaderConfig::default())?;
        let mut registry = Registry::default();
        uploader.register_metrics(&mut registry);
        let ctx = ctx();

        uploader.upload(&ctx, Bytes::from_static(b"object")).await?;
        uploader.upload(&ctx, Bytes::from_static(b"object")).await?;
        uploader.upload(&ctx, Bytes::from_static(b"other")).await?;

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &registry)?;
        assert!(text.contains("dataobj_uploads_total 2"), "{text}");
        assert!(text.contains("dataobj_reused_uploads_total 1"), "{text}");
        // b"object" and b"other" are 6 and 5 bytes.
        assert!(text.contains("dataobj_upload_bytes_total 11"), "{text}");
        assert!(text.contains("dataobj_upload_failures_total 0"), "{text}");
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_upload_writes_nothing() -> TestResult {
        let storage = StorageLocation::in_memory();
        let uploader = Uploader::new(storage.clone(), UploaderConfig::default())?;
        let (ctx, handle) = crate::context::QueryContext::with_cancel(crate::test_util::tenant());
        handle.cancel();

        let err = uploader
            .upload(&ctx, Bytes::from_static(b"object"))
            .await
            .expect_err("cancelled");
        assert!(err.is_cancellation());
        assert!(storage.list_prefix("tenant").await?.is_empty());
        Ok(())
    }
}

//! Large-object storage.
//!
//! Blobs live in a bucket (GridFS-style prefix, `fs` by default) and are addressed by an
//! ObjectId generated at upload time.

use bson::oid::ObjectId;
use std::fmt;
use tracing::{debug, instrument};

use crate::{backend::StoreBackend, error::DalResult, store::DocumentStore};

/// A stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: ObjectId,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Blob access through a document store.
pub struct BlobStore<'a, B: StoreBackend> {
    bucket: String,
    store: &'a DocumentStore<B>,
}

impl<'a, B: StoreBackend> BlobStore<'a, B> {
    pub(crate) fn new(bucket: String, store: &'a DocumentStore<B>) -> Self {
        Self { bucket, store }
    }

    /// Uses another bucket prefix.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// The bucket prefix.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Stores `bytes` under `name` and returns the generated identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::BlobWrite`](crate::error::DalError::BlobWrite) when a stage of
    /// the upload fails. The error carries the generated id for open and write failures
    /// and no id for close failures; either way the error is authoritative.
    #[instrument(skip_all, fields(bucket = %self.bucket, name = %name, size = bytes.len()))]
    pub async fn put(&self, name: &str, bytes: &[u8]) -> DalResult<ObjectId> {
        let id = ObjectId::new();

        self.store
            .run("blob_put", async {
                let conn = self.store.acquire().await?;
                self.store
                    .backend()
                    .write_blob(&conn, &self.bucket, id, name, bytes)
                    .await?;
                debug!(%id, "blob stored");
                Ok(id)
            })
            .await
    }

    /// Reads the full content of blob `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::NotFound`](crate::error::DalError::NotFound) for an unknown id.
    pub async fn get(&self, id: ObjectId) -> DalResult<Vec<u8>> {
        Ok(self.fetch(id).await?.bytes)
    }

    /// Reads blob `id` together with the name it was stored under. See [`get`](Self::get).
    #[instrument(skip_all, fields(bucket = %self.bucket, %id))]
    pub async fn fetch(&self, id: ObjectId) -> DalResult<Blob> {
        self.store
            .run("blob_get", async {
                let conn = self.store.acquire().await?;
                let blob = self
                    .store
                    .backend()
                    .read_blob(&conn, &self.bucket, id)
                    .await?;
                debug!(name = %blob.name, size = blob.bytes.len(), "blob read");
                Ok(blob)
            })
            .await
    }
}

impl<B: StoreBackend> fmt::Debug for BlobStore<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore").field("bucket", &self.bucket).finish()
    }
}

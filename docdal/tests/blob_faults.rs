use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, oid::ObjectId};
use docdal::{
    blob::Blob,
    error::BlobStage,
    memory::{InMemoryStore, MemoryConnection},
    pool::ConnectionPool,
    prelude::*,
};
use futures::stream::BoxStream;

/// Memory backend whose blob uploads fail at a chosen stage.
#[derive(Debug)]
struct FailingUploads {
    inner: InMemoryStore,
    fail_at: BlobStage,
}

impl FailingUploads {
    fn store(fail_at: BlobStage) -> DocumentStore<Self> {
        DocumentStore::new(Self { inner: InMemoryStore::new(), fail_at })
    }
}

#[async_trait]
impl StoreBackend for FailingUploads {
    type Connection = MemoryConnection;

    fn pool(&self) -> &ConnectionPool<MemoryConnection> {
        self.inner.pool()
    }

    async fn ensure_index(&self, conn: &MemoryConnection, collection: &str, index: &IndexSpec) -> DalResult<()> {
        self.inner.ensure_index(conn, collection, index).await
    }

    async fn insert_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DalResult<Vec<Bson>> {
        self.inner.insert_documents(conn, collection, documents).await
    }

    async fn count_documents(&self, conn: &MemoryConnection, collection: &str, filter: BsonDocument) -> DalResult<u64> {
        self.inner.count_documents(conn, collection, filter).await
    }

    async fn find_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        spec: FindSpec,
    ) -> DalResult<BoxStream<'static, DalResult<BsonDocument>>> {
        self.inner.find_documents(conn, collection, spec).await
    }

    async fn update_document(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> DalResult<ChangeInfo> {
        self.inner.update_document(conn, collection, filter, update, upsert).await
    }

    async fn replace_document(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
    ) -> DalResult<ChangeInfo> {
        self.inner.replace_document(conn, collection, filter, replacement).await
    }

    async fn delete_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        just_one: bool,
    ) -> DalResult<ChangeInfo> {
        self.inner.delete_documents(conn, collection, filter, just_one).await
    }

    async fn find_and_modify(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        change: &Change,
    ) -> DalResult<(Option<BsonDocument>, ChangeInfo)> {
        self.inner.find_and_modify(conn, collection, filter, change).await
    }

    async fn aggregate(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        pipeline: Vec<BsonDocument>,
    ) -> DalResult<Vec<BsonDocument>> {
        self.inner.aggregate(conn, collection, pipeline).await
    }

    async fn write_blob(
        &self,
        conn: &MemoryConnection,
        bucket: &str,
        id: ObjectId,
        name: &str,
        bytes: &[u8],
    ) -> DalResult<()> {
        match self.fail_at {
            BlobStage::Open => self.inner.write_blob(conn, bucket, id, name, bytes).await,
            BlobStage::Write => Err(DalError::BlobWrite {
                stage: BlobStage::Write,
                id: Some(id),
                message: "connection reset while writing chunks".to_string(),
            }),
            BlobStage::Close => Err(DalError::BlobWrite {
                stage: BlobStage::Close,
                id: None,
                message: "failed to write files document".to_string(),
            }),
        }
    }

    async fn read_blob(&self, conn: &MemoryConnection, bucket: &str, id: ObjectId) -> DalResult<Blob> {
        self.inner.read_blob(conn, bucket, id).await
    }

    async fn drop_database(&self, conn: &MemoryConnection) -> DalResult<()> {
        self.inner.drop_database(conn).await
    }
}

#[tokio::test]
async fn test_put_write_failure_reports_generated_id() {
    let store = FailingUploads::store(BlobStage::Write);
    let blobs = store.blobs();

    let err = blobs.put("report.pdf", b"%PDF").await.unwrap_err();
    let DalError::BlobWrite { stage, id, .. } = err else {
        panic!("expected a blob write error, got {err:?}");
    };
    assert_eq!(stage, BlobStage::Write);

    let id = id.expect("write failures carry the generated id");
    assert!(blobs.get(id).await.unwrap_err().is_not_found());
    assert_eq!(store.backend().pool().checked_out(), 0);
}

#[tokio::test]
async fn test_put_close_failure_reports_no_id() {
    let store = FailingUploads::store(BlobStage::Close);

    let err = store.blobs().put("report.pdf", b"%PDF").await.unwrap_err();
    assert!(matches!(
        err,
        DalError::BlobWrite { stage: BlobStage::Close, id: None, .. }
    ));
    assert_eq!(store.backend().pool().checked_out(), 0);
}

#[tokio::test]
async fn test_put_succeeds_through_wrapper() {
    let store = FailingUploads::store(BlobStage::Open);
    let blobs = store.blobs();

    let id = blobs.put("ok.txt", b"fine").await.unwrap();
    let blob = blobs.fetch(id).await.unwrap();
    assert_eq!(blob, Blob { id, name: "ok.txt".to_string(), bytes: b"fine".to_vec() });
}

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::{
    StreamExt, TryStreamExt,
    io::{AsyncReadExt, AsyncWriteExt},
    stream::BoxStream,
};
use mongodb::{
    Client, Collection as MongoCollection, Database,
    error::{ErrorKind, GridFsErrorKind},
    gridfs::GridFsBucket,
    options::{ClientOptions, GridFsBucketOptions},
};
use tracing::{debug, info, instrument, warn};

use docdal_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    blob::Blob,
    config::PoolConfig,
    error::{BlobStage, DalError, DalResult},
    index::IndexSpec,
    pool::ConnectionPool,
    query::FindSpec,
    update::{Change, ChangeInfo},
};

use crate::{
    query::{
        FindAndModifyReply, delete_info, find_and_modify_command, find_options, index_model,
        update_info,
    },
    sanitizer::NameSanitizer,
};

const APP_NAME: &str = "docdal";

fn backend_error(e: mongodb::error::Error) -> DalError {
    DalError::StorageOperationFailed(e.to_string())
}

fn is_file_not_found(e: &mongodb::error::Error) -> bool {
    matches!(*e.kind, ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. }))
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    pool: ConnectionPool<Database>,
}

impl MongoDbStore {
    pub fn new(client: Client, database: &str, pool: PoolConfig) -> Self {
        let database = client.database(&NameSanitizer::sanitize(database));
        Self {
            client,
            pool: ConnectionPool::new(database, pool),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, conn: &Database, collection_name: &str) -> MongoCollection<Document> {
        conn.collection(&NameSanitizer::sanitize(collection_name))
    }

    fn get_bucket(&self, conn: &Database, bucket: &str) -> GridFsBucket {
        conn.gridfs_bucket(
            GridFsBucketOptions::builder()
                .bucket_name(NameSanitizer::sanitize(bucket))
                .build(),
        )
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Connection = Database;

    fn pool(&self) -> &ConnectionPool<Database> {
        &self.pool
    }

    async fn ensure_index(&self, conn: &Database, collection: &str, index: &IndexSpec) -> DalResult<()> {
        if index.keys.is_empty() {
            return Err(DalError::IndexCreationFailed {
                collection: collection.to_string(),
                message: "index needs at least one key".to_string(),
            });
        }
        if index.drop_duplicates {
            warn!(collection, "server ignores drop_duplicates on index creation");
        }

        self.get_collection(conn, collection)
            .create_index(index_model(index))
            .await
            .map_err(|e| DalError::IndexCreationFailed {
                collection: collection.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn insert_documents(&self, conn: &Database, collection: &str, documents: Vec<Document>) -> DalResult<Vec<Bson>> {
        let count = documents.len();
        let mut inserted = self
            .get_collection(conn, collection)
            .insert_many(documents)
            .await
            .map_err(backend_error)?
            .inserted_ids;

        Ok((0..count)
            .map(|position| inserted.remove(&position).unwrap_or(Bson::Null))
            .collect())
    }

    async fn count_documents(&self, conn: &Database, collection: &str, filter: Document) -> DalResult<u64> {
        self.get_collection(conn, collection)
            .count_documents(filter)
            .await
            .map_err(backend_error)
    }

    async fn find_documents(
        &self,
        conn: &Database,
        collection: &str,
        spec: FindSpec,
    ) -> DalResult<BoxStream<'static, DalResult<Document>>> {
        let options = find_options(&spec);

        let cursor = self
            .get_collection(conn, collection)
            .find(spec.filter)
            .with_options(options)
            .await
            .map_err(backend_error)?;

        Ok(cursor.map_err(backend_error).boxed())
    }

    async fn update_document(
        &self,
        conn: &Database,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> DalResult<ChangeInfo> {
        self.get_collection(conn, collection)
            .update_one(filter, update)
            .upsert(upsert)
            .await
            .map(update_info)
            .map_err(backend_error)
    }

    async fn replace_document(
        &self,
        conn: &Database,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> DalResult<ChangeInfo> {
        self.get_collection(conn, collection)
            .replace_one(filter, replacement)
            .upsert(true)
            .await
            .map(update_info)
            .map_err(backend_error)
    }

    async fn delete_documents(
        &self,
        conn: &Database,
        collection: &str,
        filter: Document,
        just_one: bool,
    ) -> DalResult<ChangeInfo> {
        let collection = self.get_collection(conn, collection);

        let result = if just_one {
            collection.delete_one(filter).await
        } else {
            collection.delete_many(filter).await
        };

        result.map(delete_info).map_err(backend_error)
    }

    async fn find_and_modify(
        &self,
        conn: &Database,
        collection: &str,
        filter: Document,
        change: &Change,
    ) -> DalResult<(Option<Document>, ChangeInfo)> {
        let name = NameSanitizer::sanitize(collection);
        let command = find_and_modify_command(&name, filter.clone(), change);

        let reply = conn.run_command(command).await.map_err(backend_error)?;
        let reply: FindAndModifyReply = bson::de::deserialize_from_document(reply)?;

        if reply.is_miss() && !change.upsert {
            return Err(DalError::not_found(collection, &filter));
        }

        let info = reply.change_info(change);
        Ok((reply.value, info))
    }

    async fn aggregate(&self, conn: &Database, collection: &str, pipeline: Vec<Document>) -> DalResult<Vec<Document>> {
        self.get_collection(conn, collection)
            .aggregate(pipeline)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn write_blob(
        &self,
        conn: &Database,
        bucket: &str,
        id: ObjectId,
        name: &str,
        bytes: &[u8],
    ) -> DalResult<()> {
        let failed = |stage: BlobStage, id: Option<ObjectId>, message: String| DalError::BlobWrite {
            stage,
            id,
            message,
        };

        let mut upload = self
            .get_bucket(conn, bucket)
            .open_upload_stream(name)
            .id(Bson::ObjectId(id))
            .await
            .map_err(|e| failed(BlobStage::Open, Some(id), e.to_string()))?;

        if let Err(e) = upload.write_all(bytes).await {
            if let Err(abort) = upload.abort().await {
                debug!(%id, error = %abort, "failed to abort blob upload");
            }
            return Err(failed(BlobStage::Write, Some(id), e.to_string()));
        }

        upload
            .close()
            .await
            .map_err(|e| failed(BlobStage::Close, None, e.to_string()))
    }

    async fn read_blob(&self, conn: &Database, bucket: &str, id: ObjectId) -> DalResult<Blob> {
        let not_found = || DalError::not_found(&format!("{bucket}.files"), id);
        let gridfs = self.get_bucket(conn, bucket);

        let file = gridfs
            .find_one(doc! { "_id": id })
            .await
            .map_err(backend_error)?
            .ok_or_else(not_found)?;

        let mut download = gridfs
            .open_download_stream(Bson::ObjectId(id))
            .await
            .map_err(|e| if is_file_not_found(&e) { not_found() } else { backend_error(e) })?;

        let mut bytes = Vec::new();
        download
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| DalError::StorageOperationFailed(e.to_string()))?;

        Ok(Blob {
            id,
            name: file.filename.unwrap_or_default(),
            bytes,
        })
    }

    async fn drop_database(&self, conn: &Database) -> DalResult<()> {
        conn.drop().await.map_err(backend_error)
    }

    async fn shutdown(self) -> DalResult<()> {
        self.pool.close();
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    pool: PoolConfig,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            pool: PoolConfig::default(),
        }
    }

    /// Sets the connection pool configuration. `max_size` also caps the driver's own
    /// connection pool.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    #[instrument(skip(self), fields(database = %self.database, max_size = self.pool.max_size))]
    async fn build(self) -> DalResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DalError::Initialization(e.to_string()))?;

        options.max_pool_size = Some(self.pool.max_size as u32);
        options.app_name.get_or_insert_with(|| APP_NAME.to_string());

        let client = Client::with_options(options)
            .map_err(|e| DalError::Initialization(e.to_string()))?;

        info!("connected to MongoDB");
        Ok(MongoDbStore::new(client, &self.database, self.pool))
    }
}

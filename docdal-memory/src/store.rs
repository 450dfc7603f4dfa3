//! In-memory storage implementation for document stores.
//!
//! This module provides a backend that keeps collections, their index specifications
//! and blob buckets in process memory behind an async-safe read-write lock.

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, oid::ObjectId};
use futures::{StreamExt, stream::BoxStream};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

use docdal_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    blob::Blob,
    config::PoolConfig,
    document::ID_FIELD,
    error::{BlobStage, DalError, DalResult},
    index::IndexSpec,
    pool::ConnectionPool,
    query::FindSpec,
    update::{Change, ChangeInfo, is_operator_document},
};

use crate::{
    evaluator::{
        DocumentEvaluator, apply_update, lookup, replace_document, sort_documents,
        upsert_document, with_id,
    },
    pipeline,
};

/// Everything the in-memory database holds.
#[derive(Debug, Default)]
pub struct MemoryState {
    /// collection name -> documents, in insertion order
    collections: HashMap<String, Vec<BsonDocument>>,
    /// collection name -> ensured indexes
    indexes: HashMap<String, Vec<IndexSpec>>,
    /// bucket -> blob id -> blob
    blobs: HashMap<String, HashMap<ObjectId, Blob>>,
}

/// The connection handed out by the pool: a shared handle on the state.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection(Arc<RwLock<MemoryState>>);

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait on top of [`MemoryState`]. Filters,
/// update operators, sorting and a subset of the aggregation stages are interpreted
/// directly; unique indexes are enforced on every write.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data and the same connection pool.
///
/// # Performance
///
/// Queries scan all documents in a collection. Indexes are only used for uniqueness.
///
/// # Example
///
/// ```ignore
/// use docdal_memory::InMemoryStore;
/// use docdal::store::DocumentStore;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = DocumentStore::new(InMemoryStore::new());
///     store.collection("users").create(vec![doc! { "name": "Alice" }], vec![]).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    pool: Arc<ConnectionPool<MemoryConnection>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store with the default pool.
    pub fn new() -> Self {
        Self::with_pool(PoolConfig::default())
    }

    /// Creates a new empty in-memory document store with a custom pool.
    pub fn with_pool(config: PoolConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(MemoryConnection::default(), config)),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docdal_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().pool(PoolConfig::default().max_size(2)).build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns the indexes ensured on `collection`.
    pub async fn index_specs(&self, collection: &str) -> Vec<IndexSpec> {
        self.pool
            .connection()
            .0
            .read()
            .await
            .indexes
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a snapshot of every document in `collection`, in insertion order.
    pub async fn snapshot(&self, collection: &str) -> Vec<BsonDocument> {
        self.pool
            .connection()
            .0
            .read()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn duplicate_key(collection: &str, fields: &str) -> DalError {
    DalError::StorageOperationFailed(format!(
        "E11000 duplicate key error collection: {collection} index: {fields}"
    ))
}

/// The values a document contributes to an index, or `None` if a sparse index skips it.
fn index_key(index: &IndexSpec, document: &BsonDocument) -> Option<Vec<Bson>> {
    let values = index
        .fields()
        .map(|field| lookup(document, field).cloned())
        .collect::<Vec<_>>();

    if index.sparse && values.iter().all(Option::is_none) {
        return None;
    }

    Some(values.into_iter().map(|v| v.unwrap_or(Bson::Null)).collect())
}

impl MemoryState {
    /// Checks `candidate` against the `_id` and unique indexes of `collection`, ignoring
    /// the stored document at position `skip`.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &BsonDocument,
        pending: &[BsonDocument],
        skip: Option<usize>,
    ) -> DalResult<()> {
        let stored = self.collections.get(collection).map(Vec::as_slice).unwrap_or_default();
        let others = stored
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .map(|(_, document)| document)
            .chain(pending.iter());

        let unique = self
            .indexes
            .get(collection)
            .map(|indexes| indexes.iter().filter(|index| index.unique).collect::<Vec<_>>())
            .unwrap_or_default();

        let candidate_id = candidate.get(ID_FIELD);
        let candidate_keys = unique
            .iter()
            .map(|index| index_key(index, candidate))
            .collect::<Vec<_>>();

        for other in others {
            if candidate_id.is_some() && other.get(ID_FIELD) == candidate_id {
                return Err(duplicate_key(collection, ID_FIELD));
            }
            for (index, key) in unique.iter().zip(&candidate_keys) {
                if key.is_some() && index_key(index, other) == *key {
                    let fields = index.fields().collect::<Vec<_>>().join(", ");
                    return Err(duplicate_key(collection, &fields));
                }
            }
        }

        Ok(())
    }

    fn first_match(&self, collection: &str, filter: &BsonDocument) -> DalResult<Option<usize>> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(None);
        };

        for (position, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(filter)? {
                return Ok(Some(position));
            }
        }

        Ok(None)
    }

    /// Replaces the stored document at `position` with the result of `modify`, if the
    /// result still satisfies the unique indexes. Returns the old and new documents.
    fn modify_at(
        &mut self,
        collection: &str,
        position: usize,
        modify: impl FnOnce(&mut BsonDocument) -> DalResult<bool>,
    ) -> DalResult<(BsonDocument, BsonDocument, bool)> {
        let before = self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(position))
            .cloned()
            .ok_or_else(|| DalError::not_found(collection, position))?;
        let mut after = before.clone();
        let changed = modify(&mut after)?;

        if changed {
            self.check_unique(collection, &after, &[], Some(position))?;
            if let Some(documents) = self.collections.get_mut(collection) {
                documents[position] = after.clone();
            }
        }

        Ok((before, after, changed))
    }

    fn insert_upsert(&mut self, collection: &str, document: BsonDocument) -> DalResult<Bson> {
        self.check_unique(collection, &document, &[], None)?;
        let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(id)
    }
}

fn apply(document: &mut BsonDocument, update: &BsonDocument) -> DalResult<bool> {
    if is_operator_document(update) {
        apply_update(document, update, false)
    } else {
        replace_document(document, update)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Connection = MemoryConnection;

    fn pool(&self) -> &ConnectionPool<MemoryConnection> {
        &self.pool
    }

    async fn ensure_index(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        index: &IndexSpec,
    ) -> DalResult<()> {
        let failed = |message: String| DalError::IndexCreationFailed {
            collection: collection.to_string(),
            message,
        };

        if index.keys.is_empty() {
            return Err(failed("index needs at least one key".to_string()));
        }

        let mut state = conn.0.write().await;

        if let Some(existing) = state
            .indexes
            .get(collection)
            .and_then(|indexes| indexes.iter().find(|existing| existing.keys == index.keys))
        {
            if existing.unique == index.unique && existing.sparse == index.sparse {
                return Ok(());
            }
            return Err(failed(
                "an index over the same keys exists with different options".to_string(),
            ));
        }

        if index.unique {
            let documents = state.collections.remove(collection).unwrap_or_default();
            let mut kept: Vec<BsonDocument> = Vec::with_capacity(documents.len());
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            let mut dropped = 0usize;
            let mut conflict = false;

            for document in documents {
                match index_key(index, &document) {
                    Some(key) if seen.contains(&key) => {
                        if index.drop_duplicates {
                            dropped += 1;
                            continue;
                        }
                        conflict = true;
                    }
                    Some(key) => seen.push(key),
                    None => {}
                }
                kept.push(document);
            }

            state.collections.insert(collection.to_string(), kept);

            if conflict {
                return Err(failed("E11000 duplicate key error while building index".to_string()));
            }
            if dropped > 0 {
                warn!(collection, dropped, "dropped duplicates while building unique index");
            }
        }

        state
            .indexes
            .entry(collection.to_string())
            .or_default()
            .push(index.clone());
        debug!(collection, keys = ?index.keys, "index ensured");

        Ok(())
    }

    async fn insert_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DalResult<Vec<Bson>> {
        let mut state = conn.0.write().await;

        let documents = documents.into_iter().map(with_id).collect::<Vec<_>>();
        for (position, document) in documents.iter().enumerate() {
            state.check_unique(collection, document, &documents[..position], None)?;
        }

        let ids = documents
            .iter()
            .map(|document| document.get(ID_FIELD).cloned().unwrap_or(Bson::Null))
            .collect();

        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);

        Ok(ids)
    }

    async fn count_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
    ) -> DalResult<u64> {
        let state = conn.0.read().await;
        let Some(documents) = state.collections.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in documents {
            if DocumentEvaluator::new(document).matches(&filter)? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn find_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        spec: FindSpec,
    ) -> DalResult<BoxStream<'static, DalResult<BsonDocument>>> {
        let state = conn.0.read().await;
        let mut documents = match state.collections.get(collection) {
            Some(documents) => DocumentEvaluator::filter_documents(documents, &spec.filter)?,
            None => Vec::new(),
        };
        drop(state);

        sort_documents(&mut documents, &spec.sort);

        let skip = spec.page.skip().unwrap_or(0) as usize;
        let limit = spec.page.limit().map(|l| l as usize).unwrap_or(usize::MAX);
        let page = documents
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(Ok)
            .collect::<Vec<_>>();

        Ok(futures::stream::iter(page).boxed())
    }

    async fn update_document(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> DalResult<ChangeInfo> {
        if !is_operator_document(&update) {
            return Err(DalError::StorageOperationFailed(
                "update document requires atomic operators".to_string(),
            ));
        }

        let mut state = conn.0.write().await;

        match state.first_match(collection, &filter)? {
            Some(position) => {
                let (_, _, changed) = state.modify_at(collection, position, |document| {
                    apply_update(document, &update, false)
                })?;
                Ok(ChangeInfo { matched: 1, updated: changed as u64, ..ChangeInfo::default() })
            }
            None if upsert => {
                let id = state.insert_upsert(collection, upsert_document(&filter, &update)?)?;
                Ok(ChangeInfo { upserted_id: Some(id), ..ChangeInfo::default() })
            }
            None => Ok(ChangeInfo::default()),
        }
    }

    async fn replace_document(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
    ) -> DalResult<ChangeInfo> {
        let mut state = conn.0.write().await;

        match state.first_match(collection, &filter)? {
            Some(position) => {
                let (_, _, changed) = state.modify_at(collection, position, |document| {
                    replace_document(document, &replacement)
                })?;
                Ok(ChangeInfo { matched: 1, updated: changed as u64, ..ChangeInfo::default() })
            }
            None => {
                let id = state.insert_upsert(collection, upsert_document(&filter, &replacement)?)?;
                Ok(ChangeInfo { upserted_id: Some(id), ..ChangeInfo::default() })
            }
        }
    }

    async fn delete_documents(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        just_one: bool,
    ) -> DalResult<ChangeInfo> {
        let mut state = conn.0.write().await;
        let Some(documents) = state.collections.get_mut(collection) else {
            return Ok(ChangeInfo::default());
        };

        let mut matched = Vec::new();
        for (position, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(&filter)? {
                matched.push(position);
                if just_one {
                    break;
                }
            }
        }

        for position in matched.iter().rev() {
            documents.remove(*position);
        }

        let removed = matched.len() as u64;
        Ok(ChangeInfo { matched: removed, removed, ..ChangeInfo::default() })
    }

    async fn find_and_modify(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        filter: BsonDocument,
        change: &Change,
    ) -> DalResult<(Option<BsonDocument>, ChangeInfo)> {
        let mut state = conn.0.write().await;

        match state.first_match(collection, &filter)? {
            Some(position) if change.remove => {
                let removed = state
                    .collections
                    .get_mut(collection)
                    .map(|documents| documents.remove(position));
                Ok((removed, ChangeInfo { matched: 1, removed: 1, ..ChangeInfo::default() }))
            }
            Some(position) => {
                let (before, after, changed) = state.modify_at(collection, position, |document| {
                    apply(document, &change.update)
                })?;
                let info = ChangeInfo { matched: 1, updated: changed as u64, ..ChangeInfo::default() };
                Ok((Some(if change.return_new { after } else { before }), info))
            }
            None if change.upsert && !change.remove => {
                let document = upsert_document(&filter, &change.update)?;
                let id = state.insert_upsert(collection, document.clone())?;
                let info = ChangeInfo { upserted_id: Some(id), ..ChangeInfo::default() };
                Ok((change.return_new.then_some(document), info))
            }
            None => Err(DalError::not_found(collection, &filter)),
        }
    }

    async fn aggregate(
        &self,
        conn: &MemoryConnection,
        collection: &str,
        pipeline: Vec<BsonDocument>,
    ) -> DalResult<Vec<BsonDocument>> {
        let documents = conn
            .0
            .read()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();

        pipeline::run(documents, &pipeline)
    }

    async fn write_blob(
        &self,
        conn: &MemoryConnection,
        bucket: &str,
        id: ObjectId,
        name: &str,
        bytes: &[u8],
    ) -> DalResult<()> {
        let mut state = conn.0.write().await;
        let files = state.blobs.entry(bucket.to_string()).or_default();

        if files.contains_key(&id) {
            return Err(DalError::BlobWrite {
                stage: BlobStage::Open,
                id: Some(id),
                message: format!("a file with id {id} already exists in bucket {bucket}"),
            });
        }

        files.insert(id, Blob { id, name: name.to_string(), bytes: bytes.to_vec() });
        Ok(())
    }

    async fn read_blob(
        &self,
        conn: &MemoryConnection,
        bucket: &str,
        id: ObjectId,
    ) -> DalResult<Blob> {
        let state = conn.0.read().await;

        state
            .blobs
            .get(bucket)
            .and_then(|files| files.get(&id))
            .cloned()
            .ok_or_else(|| DalError::not_found(&format!("{bucket}.files"), id))
    }

    async fn drop_database(&self, conn: &MemoryConnection) -> DalResult<()> {
        let mut state = conn.0.write().await;
        *state = MemoryState::default();
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docdal_memory::InMemoryStore;
/// use docdal::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    pool: PoolConfig,
}

impl InMemoryStoreBuilder {
    /// Sets the connection pool configuration.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DalResult<Self::Backend> {
        Ok(InMemoryStore::with_pool(self.pool))
    }
}

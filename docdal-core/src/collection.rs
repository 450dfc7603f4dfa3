//! Collection types for data-access operations.
//!
//! This module provides the selector-polymorphic CRUD and query surface over a single
//! collection.
//!
//! # Collection Types
//!
//! - [`Collection`] - Untyped collection working on raw BSON documents
//! - [`TypedCollection`] - Type-safe collection for a specific document type
//! - [`FindQuery`] - Lazy, executable query handle returned by [`Collection::find`]
//!
//! Every operation that takes a selector resolves it before checking out a
//! connection, so a bad selector never touches the pool.
//!
//! # Example
//!
//! ```ignore
//! use docdal::{page::Page, update::Change};
//! use bson::doc;
//!
//! let users = store.collection("users");
//! users.create(vec![doc! { "name": "Alice", "age": 30 }], vec![]).await?;
//!
//! let alice = users.find_one(doc! { "name": "Alice" }).await?;
//! users.update(alice.get_object_id("_id")?, doc! { "age": 31 }).await?;
//!
//! let adults = users
//!     .find_many(doc! { "age": { "$gte": 18 } }, Page::parse("0", "20"), vec![])
//!     .await?;
//! ```

use bson::{Bson, Document as BsonDocument};
use futures::{
    Stream, StreamExt, TryStreamExt,
    stream::BoxStream,
    task::{Context, Poll},
};
use std::{fmt, marker::PhantomData, pin::Pin};
use tracing::{debug, instrument, warn};

use crate::{
    backend::StoreBackend,
    document::{Document, DocumentExt},
    error::{DalError, DalResult},
    index::IndexSpec,
    page::Page,
    pool::PooledConnection,
    query::{FindSpec, SortKey},
    selector::{IntoSelector, Selector},
    soft_delete::SoftDeleteMetadata,
    store::DocumentStore,
    update::{ChangeInfo, UpdateSpec, UpsertOutcome, is_operator_document, prepare_field_update},
};

/// An untyped collection bound to a document store.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the store reference
/// * `B` - The storage backend type
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    store: &'a DocumentStore<B>,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, store: &'a DocumentStore<B>) -> Self {
        Self { name, store }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts documents after ensuring an index over `index_keys`.
    ///
    /// An empty `index_keys` ensures the default index (descending `create_at`,
    /// unique, sparse). Documents are inserted as given, without an existence check.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::IndexCreationFailed`] without inserting anything if the index
    /// cannot be ensured.
    pub async fn create(
        &self,
        documents: Vec<BsonDocument>,
        index_keys: Vec<SortKey>,
    ) -> DalResult<Vec<Bson>> {
        let index = if index_keys.is_empty() {
            IndexSpec::default()
        } else {
            IndexSpec::for_keys(index_keys)
        };

        self.create_with_index(documents, index).await
    }

    /// Inserts a single document. See [`create`](Self::create).
    pub async fn create_one(
        &self,
        document: BsonDocument,
        index_keys: Vec<SortKey>,
    ) -> DalResult<Bson> {
        let mut ids = self.create(vec![document], index_keys).await?;
        ids.pop()
            .ok_or_else(|| DalError::StorageOperationFailed("insert returned no id".to_string()))
    }

    /// Inserts documents after ensuring a fully custom index.
    #[instrument(skip_all, fields(collection = %self.name, count = documents.len()))]
    pub async fn create_with_index(
        &self,
        documents: Vec<BsonDocument>,
        index: IndexSpec,
    ) -> DalResult<Vec<Bson>> {
        self.store
            .run("create", async {
                let conn = self.store.acquire().await?;
                let backend = self.store.backend();

                backend.ensure_index(&conn, &self.name, &index).await?;
                if documents.is_empty() {
                    return Ok(Vec::new());
                }

                let ids = backend
                    .insert_documents(&conn, &self.name, documents)
                    .await?;
                debug!(inserted = ids.len(), "documents created");
                Ok(ids)
            })
            .await
    }

    /// Upserts the document selected by `selector`.
    ///
    /// A [`Change`](crate::update::Change) runs as an atomic find-and-modify and the
    /// outcome carries the resulting document. A plain document updates the match when it
    /// is in operator form and replaces it otherwise; either way a document is inserted
    /// when nothing matches.
    ///
    /// # Errors
    ///
    /// - [`DalError::NullSelector`] / [`DalError::UnsupportedSelectorKind`] for a bad
    ///   selector.
    /// - [`DalError::NotFound`] for a non-upserting change that matches nothing.
    /// - [`DalError::StorageOperationFailed`] for an update document mixing operators and
    ///   plain fields, before any connection is checked out.
    #[instrument(skip_all, fields(collection = %self.name))]
    pub async fn upsert(
        &self,
        selector: impl IntoSelector,
        update: impl Into<UpdateSpec>,
    ) -> DalResult<UpsertOutcome> {
        let filter = selector.into_selector()?.into_filter();
        let update: UpdateSpec = update.into();
        update.validate()?;

        self.store
            .run("upsert", async {
                let conn = self.store.acquire().await?;
                let backend = self.store.backend();

                let outcome = match update {
                    UpdateSpec::Modify(change) => {
                        let (document, change) = backend
                            .find_and_modify(&conn, &self.name, filter, &change)
                            .await?;
                        UpsertOutcome { document, change }
                    }
                    UpdateSpec::Fields(update) if is_operator_document(&update) => UpsertOutcome {
                        document: None,
                        change: backend
                            .update_document(&conn, &self.name, filter, update, true)
                            .await?,
                    },
                    UpdateSpec::Fields(replacement) => UpsertOutcome {
                        document: None,
                        change: backend
                            .replace_document(&conn, &self.name, filter, replacement)
                            .await?,
                    },
                };

                debug!(change = ?outcome.change, "upsert applied");
                Ok(outcome)
            })
            .await
    }

    /// Updates the first document selected by `selector`. Never inserts.
    ///
    /// `_id` and `create_at` are stripped from `fields` (top level and inside operator
    /// sub-documents). A plain field map is merged with `$set`.
    ///
    /// A selector that matches nothing is not an error; inspect the returned
    /// [`ChangeInfo`]. A document mixing operators and plain fields is rejected with
    /// [`DalError::StorageOperationFailed`].
    #[instrument(skip_all, fields(collection = %self.name))]
    pub async fn update(
        &self,
        selector: impl IntoSelector,
        fields: BsonDocument,
    ) -> DalResult<ChangeInfo> {
        let filter = selector.into_selector()?.into_filter();
        let Some(update) = prepare_field_update(fields)? else {
            debug!("nothing left to update");
            return Ok(ChangeInfo::default());
        };

        self.store
            .run("update", async {
                let conn = self.store.acquire().await?;
                self.store
                    .backend()
                    .update_document(&conn, &self.name, filter, update, false)
                    .await
            })
            .await
    }

    /// Physically deletes the first document selected by `selector`.
    #[instrument(skip_all, fields(collection = %self.name))]
    pub async fn remove(&self, selector: impl IntoSelector) -> DalResult<ChangeInfo> {
        let filter = selector.into_selector()?.into_filter();
        self.delete(filter, true).await
    }

    /// Physically deletes every document selected by `selector`.
    #[instrument(skip_all, fields(collection = %self.name))]
    pub async fn remove_all(&self, selector: impl IntoSelector) -> DalResult<ChangeInfo> {
        let filter = selector.into_selector()?.into_filter();
        self.delete(filter, false).await
    }

    async fn delete(&self, filter: BsonDocument, just_one: bool) -> DalResult<ChangeInfo> {
        self.store
            .run("remove", async {
                let conn = self.store.acquire().await?;
                let info = self
                    .store
                    .backend()
                    .delete_documents(&conn, &self.name, filter, just_one)
                    .await?;
                debug!(removed = info.removed, "documents removed");
                Ok(info)
            })
            .await
    }

    /// Marks the first document selected by `selector` deleted without removing it.
    ///
    /// Sets `is_delete`, `delete_at` and `modify_at`. Later reads still return the
    /// document; filter with
    /// [`SoftDeleteMetadata::exclude_deleted`](crate::soft_delete::SoftDeleteMetadata::exclude_deleted)
    /// to skip it.
    #[instrument(skip_all, fields(collection = %self.name))]
    pub async fn soft_remove(&self, selector: impl IntoSelector) -> DalResult<ChangeInfo> {
        let filter = selector.into_selector()?.into_filter();
        let update = SoftDeleteMetadata::now().to_update();

        self.store
            .run("soft_remove", async {
                let conn = self.store.acquire().await?;
                self.store
                    .backend()
                    .update_document(&conn, &self.name, filter, update, false)
                    .await
            })
            .await
    }

    /// Builds a lazy query over the documents matching `filter`.
    ///
    /// Results are sorted by `sort`, or newest first when `sort` is empty, then skipped
    /// and limited if `page` is valid. Nothing runs until the handle is executed.
    pub fn find(
        &self,
        filter: impl IntoSelector,
        page: Page,
        sort: Vec<SortKey>,
    ) -> DalResult<FindQuery<'a, B>> {
        let spec = FindSpec::builder()
            .filter(filter.into_selector()?.into_filter())
            .sort(sort)
            .page(page)
            .build();

        Ok(FindQuery {
            collection: self.name.clone(),
            store: self.store,
            spec,
        })
    }

    /// Runs [`find`](Self::find) and collects every result.
    pub async fn find_many(
        &self,
        filter: impl IntoSelector,
        page: Page,
        sort: Vec<SortKey>,
    ) -> DalResult<Vec<BsonDocument>> {
        self.find(filter, page, sort)?.to_vec().await
    }

    /// Fetches exactly one document.
    ///
    /// An identifier is fetched directly. A filter map is counted first and must match
    /// exactly one document.
    ///
    /// # Errors
    ///
    /// - [`DalError::AmbiguousMatch`] if a filter map matches more than one document.
    /// - [`DalError::NotFound`] if nothing matches.
    #[instrument(skip_all, fields(collection = %self.name))]
    pub async fn find_one(&self, selector: impl IntoSelector) -> DalResult<BsonDocument> {
        let selector = selector.into_selector()?;

        self.store
            .run("find_one", async {
                let conn = self.store.acquire().await?;
                let backend = self.store.backend();

                if let Selector::FilterMap(filter) = &selector {
                    let count = backend
                        .count_documents(&conn, &self.name, filter.clone())
                        .await?;
                    if count > 1 {
                        warn!(count, "single-result query matched several documents");
                        return Err(DalError::AmbiguousMatch {
                            collection: self.name.clone(),
                            count,
                        });
                    }
                    if count == 0 {
                        return Err(DalError::not_found(&self.name, &selector));
                    }
                }

                let mut found = backend
                    .find_documents(&conn, &self.name, FindSpec::first(selector.to_filter()))
                    .await?;

                match found.next().await {
                    Some(document) => document,
                    None => Err(DalError::not_found(&self.name, &selector)),
                }
            })
            .await
    }

    /// Counts the documents matching `filter`.
    pub async fn count(&self, filter: impl IntoSelector) -> DalResult<u64> {
        let filter = filter.into_selector()?.into_filter();

        self.store
            .run("count", async {
                let conn = self.store.acquire().await?;
                self.store
                    .backend()
                    .count_documents(&conn, &self.name, filter)
                    .await
            })
            .await
    }

    /// Runs an aggregation pipeline verbatim and collects its output.
    ///
    /// Stages are not validated here; malformed stages fail in the backend.
    #[instrument(skip_all, fields(collection = %self.name, stages = stages.len()))]
    pub async fn pipeline(&self, stages: Vec<BsonDocument>) -> DalResult<Vec<BsonDocument>> {
        self.store
            .run("pipeline", async {
                let conn = self.store.acquire().await?;
                self.store
                    .backend()
                    .aggregate(&conn, &self.name, stages)
                    .await
            })
            .await
    }
}

impl<B: StoreBackend> fmt::Debug for Collection<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

/// An executable query built by [`Collection::find`].
///
/// The handle only describes the query; each execution checks out its own connection.
pub struct FindQuery<'a, B: StoreBackend> {
    collection: String,
    store: &'a DocumentStore<B>,
    spec: FindSpec,
}

impl<'a, B: StoreBackend> FindQuery<'a, B> {
    /// The query this handle runs.
    pub fn spec(&self) -> &FindSpec {
        &self.spec
    }

    /// Opens a stream over the results.
    ///
    /// The stream keeps its connection checked out until it is dropped. The
    /// operation deadline only bounds opening the stream.
    pub async fn stream(&self) -> DalResult<GuardedStream<B::Connection>> {
        self.store
            .run("find", async {
                let conn = self.store.acquire().await?;
                let inner = self
                    .store
                    .backend()
                    .find_documents(&conn, &self.collection, self.spec.clone())
                    .await?;
                Ok(GuardedStream { inner, _conn: conn })
            })
            .await
    }

    /// Runs the query and collects every result.
    pub async fn to_vec(&self) -> DalResult<Vec<BsonDocument>> {
        self.store
            .run("find", async {
                let conn = self.store.acquire().await?;
                let documents: Vec<BsonDocument> = self
                    .store
                    .backend()
                    .find_documents(&conn, &self.collection, self.spec.clone())
                    .await?
                    .try_collect()
                    .await?;
                debug!(collection = %self.collection, found = documents.len(), "query executed");
                Ok(documents)
            })
            .await
    }

    /// Counts every document matching the filter, ignoring sort and page.
    pub async fn count(&self) -> DalResult<u64> {
        self.store
            .run("count", async {
                let conn = self.store.acquire().await?;
                self.store
                    .backend()
                    .count_documents(&conn, &self.collection, self.spec.filter.clone())
                    .await
            })
            .await
    }
}

impl<B: StoreBackend> fmt::Debug for FindQuery<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindQuery")
            .field("collection", &self.collection)
            .field("spec", &self.spec)
            .finish()
    }
}

/// A result stream that holds its connection until dropped.
pub struct GuardedStream<C> {
    inner: BoxStream<'static, DalResult<BsonDocument>>,
    _conn: PooledConnection<C>,
}

impl<C> Unpin for GuardedStream<C> {}

impl<C> Stream for GuardedStream<C> {
    type Item = DalResult<BsonDocument>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A type-safe collection for a specific document type.
///
/// Models are converted with serde on the way in and out; everything else delegates to
/// [`Collection`].
pub struct TypedCollection<'a, B: StoreBackend, D: Document> {
    inner: Collection<'a, B>,
    _marker: PhantomData<D>,
}

impl<'a, B: StoreBackend, D: Document> TypedCollection<'a, B, D> {
    pub(crate) fn new(inner: Collection<'a, B>) -> Self {
        Self { inner, _marker: PhantomData }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The untyped view of this collection.
    pub fn untyped(&self) -> &Collection<'a, B> {
        &self.inner
    }

    /// Serializes and inserts `documents`. See [`Collection::create`].
    pub async fn create(&self, documents: Vec<D>, index_keys: Vec<SortKey>) -> DalResult<Vec<Bson>> {
        let documents = documents
            .iter()
            .map(DocumentExt::to_document)
            .collect::<DalResult<Vec<_>>>()?;

        self.inner.create(documents, index_keys).await
    }

    /// Fetches and deserializes exactly one document. See [`Collection::find_one`].
    pub async fn find_one(&self, selector: impl IntoSelector) -> DalResult<D> {
        D::from_document(self.inner.find_one(selector).await?)
    }

    /// Fetches and deserializes every match. See [`Collection::find`].
    pub async fn find_many(
        &self,
        filter: impl IntoSelector,
        page: Page,
        sort: Vec<SortKey>,
    ) -> DalResult<Vec<D>> {
        self.inner
            .find_many(filter, page, sort)
            .await?
            .into_iter()
            .map(D::from_document)
            .collect()
    }

    /// See [`Collection::upsert`].
    pub async fn upsert(
        &self,
        selector: impl IntoSelector,
        update: impl Into<UpdateSpec>,
    ) -> DalResult<UpsertOutcome> {
        self.inner.upsert(selector, update).await
    }

    /// See [`Collection::update`].
    pub async fn update(
        &self,
        selector: impl IntoSelector,
        fields: BsonDocument,
    ) -> DalResult<ChangeInfo> {
        self.inner.update(selector, fields).await
    }

    /// See [`Collection::remove`].
    pub async fn remove(&self, selector: impl IntoSelector) -> DalResult<ChangeInfo> {
        self.inner.remove(selector).await
    }

    /// See [`Collection::soft_remove`].
    pub async fn soft_remove(&self, selector: impl IntoSelector) -> DalResult<ChangeInfo> {
        self.inner.soft_remove(selector).await
    }
}

impl<B: StoreBackend, D: Document> fmt::Debug for TypedCollection<'_, B, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCollection")
            .field("name", &self.inner.name)
            .field("type", &std::any::type_name::<D>())
            .finish()
    }
}

use std::time::Duration;

use bson::{Bson, doc, oid::ObjectId};
use docdal::{memory::InMemoryStore, prelude::*};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Author {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    create_at: i64,
}

impl Document for Author {
    fn collection_name() -> &'static str {
        "authors"
    }
}

fn memory_store() -> DocumentStore<InMemoryStore> {
    DocumentStore::new(InMemoryStore::new())
}

async fn seed_numbered(store: &DocumentStore<InMemoryStore>, count: i64) {
    let documents = (0..count)
        .map(|n| doc! { "n": n, "create_at": n, "even": (n % 2 == 0) })
        .collect();
    store.collection("items").create(documents, vec![]).await.unwrap();
}

/// Runs every selector-taking operation with `selector` and returns the errors by name.
async fn selector_errors(
    users: &Collection<'_, InMemoryStore>,
    selector: Bson,
) -> Vec<(&'static str, DalResult<()>)> {
    let change = Change::update(doc! { "$set": { "a": 1 } }).upsert(true);

    vec![
        ("find", users.find(selector.clone(), Page::all(), vec![]).map(drop)),
        ("find_many", users.find_many(selector.clone(), Page::all(), vec![]).await.map(drop)),
        ("find_one", users.find_one(selector.clone()).await.map(drop)),
        ("count", users.count(selector.clone()).await.map(drop)),
        ("upsert", users.upsert(selector.clone(), doc! { "a": 1 }).await.map(drop)),
        ("upsert_change", users.upsert(selector.clone(), change).await.map(drop)),
        ("update", users.update(selector.clone(), doc! { "a": 1 }).await.map(drop)),
        ("remove", users.remove(selector.clone()).await.map(drop)),
        ("remove_all", users.remove_all(selector.clone()).await.map(drop)),
        ("soft_remove", users.soft_remove(selector).await.map(drop)),
    ]
}

#[tokio::test]
async fn test_bad_selectors_fail_before_checkout() {
    let store = memory_store();
    let users = store.collection("users");

    for (operation, result) in selector_errors(&users, Bson::Null).await {
        assert!(
            matches!(result, Err(DalError::NullSelector)),
            "{operation}: {result:?}"
        );
    }

    for unsupported in [Bson::Int32(1), Bson::String("not an id".into()), Bson::Boolean(true)] {
        for (operation, result) in selector_errors(&users, unsupported.clone()).await {
            assert!(
                matches!(result, Err(DalError::UnsupportedSelectorKind(_))),
                "{operation} with {unsupported}: {result:?}"
            );
        }
    }

    let err = users.remove(None::<ObjectId>).await.unwrap_err();
    assert!(matches!(err, DalError::NullSelector));

    assert_eq!(store.backend().pool().total_acquired(), 0);
    assert_eq!(users.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_mixed_update_documents_are_rejected() {
    let store = memory_store();
    let users = store.collection("users");
    let id = users
        .create_one(doc! { "name": "a", "n": 1, "create_at": 1 }, vec![])
        .await
        .unwrap();
    let acquired = store.backend().pool().total_acquired();

    let mixed = doc! { "name": "b", "$inc": { "n": 1 } };
    let err = users.update(id.clone(), mixed.clone()).await.unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));

    let err = users.upsert(id.clone(), mixed.clone()).await.unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));

    let err = users.upsert(id.clone(), Change::update(mixed)).await.unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));

    assert_eq!(store.backend().pool().total_acquired(), acquired);
    let stored = users.find_one(id).await.unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "a");
    assert_eq!(stored.get_i32("n").unwrap(), 1);
    assert!(!stored.contains_key("$inc"));
}

#[tokio::test]
async fn test_inc_overflow_fails_without_writing() {
    let store = memory_store();
    let counters = store.collection("counters");
    let id = counters
        .create_one(doc! { "n": i64::MAX, "create_at": 1 }, vec![])
        .await
        .unwrap();

    let err = counters
        .update(id.clone(), doc! { "$inc": { "n": 1_i64 } })
        .await
        .unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));

    let err = counters
        .upsert(id.clone(), Change::update(doc! { "$inc": { "n": 1 } }))
        .await
        .unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));

    let stored = counters.find_one(id).await.unwrap();
    assert_eq!(stored.get_i64("n").unwrap(), i64::MAX);
    assert_eq!(store.backend().pool().checked_out(), 0);
}

#[tokio::test]
async fn test_rename_onto_immutable_field_is_dropped() {
    let store = memory_store();
    let users = store.collection("users");
    let id = users
        .create_one(doc! { "name": "a", "stamp": 99, "create_at": 1 }, vec![])
        .await
        .unwrap();

    let info = users
        .update(id.clone(), doc! { "$rename": { "stamp": "create_at" } })
        .await
        .unwrap();
    assert!(info.is_noop());

    let stored = users.find_one(id).await.unwrap();
    assert_eq!(stored.get_i32("create_at").unwrap(), 1);
    assert_eq!(stored.get_i32("stamp").unwrap(), 99);
}

#[tokio::test]
async fn test_create_ensures_default_index() {
    let store = memory_store();
    let ids = store
        .collection("users")
        .create(vec![doc! { "name": "Alice", "create_at": 1 }], vec![])
        .await
        .unwrap();

    assert_eq!(ids.len(), 1);
    assert!(matches!(ids[0], Bson::ObjectId(_)));
    assert_eq!(store.backend().index_specs("users").await, vec![IndexSpec::default()]);
}

#[tokio::test]
async fn test_create_with_empty_documents_still_ensures_index() {
    let store = memory_store();
    let ids = store
        .collection("users")
        .create(vec![], vec![SortKey::asc("email")])
        .await
        .unwrap();

    assert!(ids.is_empty());
    let specs = store.backend().index_specs("users").await;
    assert_eq!(specs[0].keys, vec![SortKey::asc("email")]);
}

#[tokio::test]
async fn test_index_failure_aborts_insert() {
    let store = memory_store();
    let users = store.collection("users");
    users
        .create(
            vec![
                doc! { "email": "a@example.com", "create_at": 1 },
                doc! { "email": "a@example.com", "create_at": 2 },
            ],
            vec![],
        )
        .await
        .unwrap();

    let err = users
        .create_with_index(
            vec![doc! { "email": "b@example.com", "create_at": 3 }],
            IndexSpec::for_keys(["email"]).drop_duplicates(false),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DalError::IndexCreationFailed { .. }));
    assert_eq!(users.count(doc! {}).await.unwrap(), 2);
    assert_eq!(store.backend().pool().checked_out(), 0);
}

#[tokio::test]
async fn test_unique_index_build_drops_duplicates() {
    let store = memory_store();
    let users = store.collection("users");
    users
        .create(
            vec![
                doc! { "email": "a@example.com", "create_at": 1 },
                doc! { "email": "a@example.com", "create_at": 2 },
            ],
            vec![],
        )
        .await
        .unwrap();

    users
        .create(
            vec![doc! { "email": "b@example.com", "create_at": 3 }],
            vec![SortKey::asc("email")],
        )
        .await
        .unwrap();

    assert_eq!(users.count(doc! { "email": "a@example.com" }).await.unwrap(), 1);

    let err = users
        .create(
            vec![doc! { "email": "b@example.com", "create_at": 4 }],
            vec![SortKey::asc("email")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));
}

#[tokio::test]
async fn test_update_strips_immutable_fields() {
    let store = memory_store();
    let users = store.collection("users");
    let id = users
        .create_one(doc! { "name": "Alice", "create_at": 1 }, vec![])
        .await
        .unwrap();
    let id = id.as_object_id().unwrap();

    let info = users
        .update(id, doc! { "_id": ObjectId::new(), "create_at": 99, "name": "Alicia" })
        .await
        .unwrap();
    assert_eq!(info.matched, 1);
    assert_eq!(info.updated, 1);

    let stored = users.find_one(id).await.unwrap();
    assert_eq!(stored.get_object_id("_id").unwrap(), id);
    assert_eq!(stored.get_i32("create_at").unwrap(), 1);
    assert_eq!(stored.get_str("name").unwrap(), "Alicia");
}

#[tokio::test]
async fn test_update_of_only_immutable_fields_is_a_noop() {
    let store = memory_store();
    let users = store.collection("users");

    let info = users
        .update(ObjectId::new(), doc! { "_id": 1, "create_at": 2 })
        .await
        .unwrap();

    assert!(info.is_noop());
    assert_eq!(store.backend().pool().total_acquired(), 0);
}

#[tokio::test]
async fn test_update_never_inserts() {
    let store = memory_store();
    let users = store.collection("users");

    let info = users.update(doc! { "name": "Ghost" }, doc! { "age": 1 }).await.unwrap();

    assert_eq!(info.matched, 0);
    assert_eq!(users.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_soft_remove_keeps_document() {
    let store = memory_store();
    let users = store.collection("users");
    let id = users
        .create_one(doc! { "name": "Alice", "create_at": 1 }, vec![])
        .await
        .unwrap();

    let info = users.soft_remove(doc! { "name": "Alice" }).await.unwrap();
    assert_eq!(info.updated, 1);

    let stored = users.find_one(id).await.unwrap();
    assert!(stored.get_bool("is_delete").unwrap());
    assert!(stored.get_datetime("delete_at").is_ok());
    assert!(stored.get_datetime("modify_at").is_ok());

    let live = SoftDeleteMetadata::exclude_deleted(doc! { "name": "Alice" });
    assert_eq!(users.count(live).await.unwrap(), 0);
}

#[tokio::test]
async fn test_remove_and_remove_all() {
    let store = memory_store();
    seed_numbered(&store, 6).await;
    let items = store.collection("items");

    let info = items.remove(doc! { "even": true }).await.unwrap();
    assert_eq!(info.removed, 1);
    assert_eq!(items.count(doc! { "even": true }).await.unwrap(), 2);

    let info = items.remove_all(doc! { "even": false }).await.unwrap();
    assert_eq!(info.removed, 3);
    assert_eq!(items.count(doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn test_find_one_requires_exactly_one_match() {
    let store = memory_store();
    seed_numbered(&store, 4).await;
    let items = store.collection("items");

    let found = items.find_one(doc! { "n": 3 }).await.unwrap();
    assert_eq!(found.get_i64("n").unwrap(), 3);

    let err = items.find_one(doc! { "n": 42 }).await.unwrap_err();
    assert!(err.is_not_found());

    let err = items.find_one(doc! { "even": true }).await.unwrap_err();
    assert!(matches!(err, DalError::AmbiguousMatch { count: 2, .. }));

    let err = items.find_one(ObjectId::new()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_find_defaults_to_newest_first_with_pagination() {
    let store = memory_store();
    seed_numbered(&store, 30).await;
    let items = store.collection("items");

    let page = items.find_many(doc! {}, Page::new(10, 5), vec![]).await.unwrap();
    let numbers = page.iter().map(|d| d.get_i64("n").unwrap()).collect::<Vec<_>>();
    assert_eq!(numbers, vec![19, 18, 17, 16, 15]);

    let everything = items
        .find_many(doc! {}, Page::parse("abc", "5"), vec![])
        .await
        .unwrap();
    assert_eq!(everything.len(), 30);

    let oldest = items
        .find_many(doc! { "even": true }, Page::new(0, 2), vec![SortKey::asc("create_at")])
        .await
        .unwrap();
    let numbers = oldest.iter().map(|d| d.get_i64("n").unwrap()).collect::<Vec<_>>();
    assert_eq!(numbers, vec![0, 2]);
}

#[tokio::test]
async fn test_find_query_is_lazy_and_holds_connection_while_streaming() {
    let store = memory_store();
    seed_numbered(&store, 3).await;
    let items = store.collection("items");
    let before = store.backend().pool().total_acquired();

    let query = items.find(doc! {}, Page::all(), vec![]).unwrap();
    assert_eq!(store.backend().pool().total_acquired(), before);
    assert_eq!(query.count().await.unwrap(), 3);

    let mut stream = query.stream().await.unwrap();
    assert_eq!(store.backend().pool().checked_out(), 1);

    let mut seen = 0;
    while let Some(document) = stream.next().await {
        document.unwrap();
        seen += 1;
    }
    assert_eq!(seen, 3);

    drop(stream);
    assert_eq!(store.backend().pool().checked_out(), 0);
}

#[tokio::test]
async fn test_upsert_with_atomic_change() {
    let store = memory_store();
    let counters = store.collection("counters");
    let change = Change::update(doc! { "$inc": { "n": 1 } })
        .upsert(true)
        .return_new(true);

    let first = counters.upsert(doc! { "_id": "visits" }, change.clone()).await.unwrap();
    assert_eq!(first.change.upserted_id, Some(Bson::String("visits".into())));
    assert_eq!(first.document.unwrap().get_i32("n").unwrap(), 1);

    let second = counters.upsert(doc! { "_id": "visits" }, change).await.unwrap();
    assert_eq!(second.change.updated, 1);
    assert_eq!(second.document.unwrap().get_i32("n").unwrap(), 2);

    let err = counters
        .upsert(doc! { "_id": "missing" }, Change::update(doc! { "$inc": { "n": 1 } }))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_upsert_with_plain_fields() {
    let store = memory_store();
    let users = store.collection("users");

    let inserted = users
        .upsert(doc! { "name": "Zed" }, doc! { "name": "Zed", "age": 3 })
        .await
        .unwrap();
    assert!(inserted.change.upserted_id.is_some());
    assert!(inserted.document.is_none());

    let replaced = users
        .upsert(doc! { "name": "Zed" }, doc! { "name": "Zed", "age": 4 })
        .await
        .unwrap();
    assert_eq!(replaced.change.updated, 1);

    let updated = users
        .upsert(doc! { "name": "Zed" }, doc! { "$set": { "age": 5 } })
        .await
        .unwrap();
    assert_eq!(updated.change.matched, 1);

    assert_eq!(users.count(doc! {}).await.unwrap(), 1);
    let zed = users.find_one(doc! { "name": "Zed" }).await.unwrap();
    assert_eq!(zed.get_i32("age").unwrap(), 5);
}

#[tokio::test]
async fn test_references_are_rewritten_and_queryable() {
    let store = memory_store();
    let author_id = ObjectId::new();

    let mut book = doc! { "title": "Dune", "author": { "id": author_id.to_hex() }, "create_at": 1 };
    let reference = resolve_reference::<Author>(&mut book, "author").unwrap().unwrap();
    assert_eq!(reference.id, author_id);
    assert!(book.get("author").is_none());
    assert_eq!(
        book.get_document("author_ref").unwrap(),
        &doc! { "$ref": "authors", "$id": author_id }
    );

    let books = store.collection("books");
    books.create(vec![book], vec![]).await.unwrap();

    let mut filter = doc! { "author": { "id": author_id.to_hex() } };
    resolve_reference_id(&mut filter, "author").unwrap();
    let found = books.find_one(filter).await.unwrap();
    assert_eq!(found.get_str("title").unwrap(), "Dune");
}

#[tokio::test]
async fn test_reference_errors_leave_map_untouched() {
    let mut not_embedded = doc! { "author": "someone" };
    let err = resolve_reference::<Author>(&mut not_embedded, "author").unwrap_err();
    assert!(matches!(err, DalError::InvalidReferenceShape { .. }));
    assert_eq!(not_embedded, doc! { "author": "someone" });

    let mut bad_hex = doc! { "author": { "id": "zzzz" } };
    let err = resolve_reference::<Author>(&mut bad_hex, "author").unwrap_err();
    assert!(matches!(err, DalError::InvalidIdentifierFormat { .. }));
    assert_eq!(bad_hex, doc! { "author": { "id": "zzzz" } });

    let mut absent = doc! { "title": "Dune" };
    assert!(resolve_reference::<Author>(&mut absent, "author").unwrap().is_none());
    assert_eq!(absent, doc! { "title": "Dune" });
}

#[tokio::test]
async fn test_blob_round_trip() {
    let store = memory_store();
    let blobs = store.blobs();
    assert_eq!(blobs.bucket(), "fs");

    let id = blobs.put("notes.txt", b"hello blobs").await.unwrap();
    assert_eq!(blobs.get(id).await.unwrap(), b"hello blobs".to_vec());

    let empty = blobs.put("empty.bin", &[]).await.unwrap();
    assert!(blobs.get(empty).await.unwrap().is_empty());

    let err = blobs.get(ObjectId::new()).await.unwrap_err();
    assert!(err.is_not_found());

    let other = store.blobs().with_bucket("avatars");
    assert!(other.get(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_pipeline_runs_stages() {
    let store = memory_store();
    seed_numbered(&store, 6).await;

    let grouped = store
        .collection("items")
        .pipeline(vec![
            doc! { "$match": { "n": { "$gte": 2 } } },
            doc! { "$group": { "_id": "$even", "total": { "$sum": "$n" } } },
            doc! { "$sort": { "_id": 1 } },
        ])
        .await
        .unwrap();

    assert_eq!(
        grouped,
        vec![
            doc! { "_id": false, "total": 8_i64 },
            doc! { "_id": true, "total": 6_i64 },
        ]
    );

    let err = store
        .collection("items")
        .pipeline(vec![doc! { "$bogus": {} }])
        .await
        .unwrap_err();
    assert!(matches!(err, DalError::StorageOperationFailed(_)));
}

#[tokio::test]
async fn test_operation_timeout() {
    let backend = InMemoryStore::with_pool(PoolConfig::default().max_size(1));
    let store = DocumentStore::with_config(
        backend,
        StoreConfig::default().operation_timeout(Duration::from_millis(20)),
    );

    let held = store.backend().pool().acquire().await.unwrap();
    let err = store.collection("users").count(doc! {}).await.unwrap_err();
    assert!(matches!(err, DalError::Timeout { operation: "count", .. }));

    drop(held);
    assert_eq!(store.collection("users").count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_typed_collection() {
    let store = memory_store();
    let authors = store.typed_collection::<Author>();
    assert_eq!(authors.name(), "authors");

    authors
        .create(
            vec![
                Author { id: None, name: "Frank".into(), create_at: 1 },
                Author { id: None, name: "Ursula".into(), create_at: 2 },
            ],
            vec![],
        )
        .await
        .unwrap();

    let frank = authors.find_one(doc! { "name": "Frank" }).await.unwrap();
    assert!(frank.id.is_some());

    authors.update(frank.id, doc! { "name": "Frank H." }).await.unwrap();
    let renamed = authors.find_one(frank.id).await.unwrap();
    assert_eq!(renamed.name, "Frank H.");

    let all = authors.find_many(doc! {}, Page::all(), vec![]).await.unwrap();
    assert_eq!(
        all.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        vec!["Ursula", "Frank H."]
    );

    authors.remove(renamed.id).await.unwrap();
    assert!(authors.find_one(renamed.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_drop_database_and_shutdown() {
    let store = memory_store();
    seed_numbered(&store, 2).await;

    store.drop_database().await.unwrap();
    assert_eq!(store.collection("items").count(doc! {}).await.unwrap(), 0);
    assert!(store.backend().index_specs("items").await.is_empty());

    store.shutdown().await.unwrap();
}

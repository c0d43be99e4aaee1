//! End-to-end tests of the document store over the SQLite executor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use docbase_core::document::{DocId, Document};
use docbase_core::error::DocbaseError;
use docbase_core::executor::{SqlExecutor, Statement};
use docbase_core::index::{Aggregate, IndexDef, IndexRow, MapIndex, ReduceIndex};
use docbase_core::page::PageRequest;
use docbase_core::query::{col, desc};
use docbase_core::store::DocumentStore;
use docbase_core::value::{SqlType, SqlValue};
use docbase_core::{parse_date_filter, SqliteDialect};
use docbase_sqlite::SqliteExecutor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct User {
    id: DocId,
    name: String,
    age: i64,
}

impl Document for User {
    fn id(&self) -> DocId {
        self.id
    }
    fn set_id(&mut self, id: DocId) {
        self.id = id;
    }
    fn document_type() -> &'static str {
        "user"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Post {
    id: DocId,
    tag: String,
    score: i64,
    published: DateTime<Utc>,
}

impl Document for Post {
    fn id(&self) -> DocId {
        self.id
    }
    fn set_id(&mut self, id: DocId) {
        self.id = id;
    }
    fn document_type() -> &'static str {
        "post"
    }
}

fn user(name: &str, age: i64) -> User {
    User { id: 0, name: name.into(), age }
}

fn post(tag: &str, score: i64) -> Post {
    Post {
        id: 0,
        tag: tag.into(),
        score,
        published: Utc::now(),
    }
}

fn by_name() -> IndexDef {
    MapIndex::<User>::new("by_name")
        .column("name", SqlType::Text)
        .column("age", SqlType::BigInt)
        .rows(|u| vec![IndexRow::new(vec![u.name.as_str().into(), u.age.into()])])
        .unwrap()
}

/// Emits a row only for adults; joins against this index filter minors out.
fn adults_only() -> IndexDef {
    MapIndex::<User>::new("adults_only")
        .column("age", SqlType::BigInt)
        .rows(|u| {
            if u.age >= 18 {
                vec![IndexRow::new(vec![u.age.into()])]
            } else {
                Vec::new()
            }
        })
        .unwrap()
}

fn by_published() -> IndexDef {
    MapIndex::<Post>::new("by_published")
        .column("published", SqlType::DateTime)
        .rows(|p| vec![IndexRow::new(vec![p.published.into()])])
        .unwrap()
}

fn count_by_tag() -> IndexDef {
    ReduceIndex::<Post>::new("count_by_tag")
        .key("tag", SqlType::Text)
        .aggregate("n", SqlType::BigInt, Aggregate::Count)
        .rows(|p| vec![IndexRow::new(vec![p.tag.as_str().into(), 1i64.into()])])
        .unwrap()
}

fn score_by_tag() -> IndexDef {
    ReduceIndex::<Post>::new("score_by_tag")
        .key("tag", SqlType::Text)
        .aggregate("total", SqlType::BigInt, Aggregate::Sum)
        .rows(|p| vec![IndexRow::new(vec![p.tag.as_str().into(), p.score.into()])])
        .unwrap()
}

fn max_by_tag() -> IndexDef {
    ReduceIndex::<Post>::new("max_by_tag")
        .key("tag", SqlType::Text)
        .aggregate("top", SqlType::BigInt, Aggregate::Max)
        .rows(|p| vec![IndexRow::new(vec![p.tag.as_str().into(), p.score.into()])])
        .unwrap()
}

async fn open_store() -> (DocumentStore, SqliteExecutor) {
    let executor = SqliteExecutor::open_memory().unwrap();
    let store = DocumentStore::builder()
        .dialect(SqliteDialect)
        .executor(Arc::new(executor.clone()))
        .register::<User>()
        .register::<Post>()
        .index(by_name())
        .index(adults_only())
        .index(by_published())
        .index(count_by_tag())
        .index(score_by_tag())
        .index(max_by_tag())
        .build()
        .unwrap();
    store.initialize().await.unwrap();
    (store, executor)
}

async fn table_count(executor: &SqliteExecutor, table: &str) -> i64 {
    executor
        .query(&Statement::bare(format!("SELECT COUNT(*) FROM \"{table}\"")))
        .await
        .unwrap()[0]
        .i64(0)
        .unwrap()
}

async fn stored_version(executor: &SqliteExecutor, id: DocId) -> Option<i64> {
    executor
        .query(&Statement::new(
            "SELECT \"version\" FROM \"docbase_documents\" WHERE \"id\" = ?1".to_string(),
            vec![SqlValue::BigInt(id)],
        ))
        .await
        .unwrap()
        .first()
        .and_then(|row| row.i64(0))
}

// ---------------------------------------------------------------------------
// Basic CRUD lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_save_assigns_id_and_persists() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();

    let mut alice = user("a", 30);
    session.save(&mut alice).unwrap();
    assert!(alice.id > 0, "id assigned at save");
    session.save_changes().await.unwrap();

    assert_eq!(table_count(&executor, "docbase_documents").await, 1);
    assert_eq!(stored_version(&executor, alice.id).await, Some(1));

    // Update in the same session.
    alice.name = "b".into();
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(stored_version(&executor, alice.id).await, Some(2));

    // A fresh session observes the committed state.
    let mut fresh = store.create_session();
    let loaded: User = fresh.get(alice.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "b");
}

#[tokio::test]
async fn test_get_returns_none_for_unknown_id() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    assert!(session.get::<User>(424242).await.unwrap().is_none());
}

#[tokio::test]
async fn test_identity_within_a_session() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();

    let mut other = store.create_session();
    let first: User = other.get(alice.id).await.unwrap().unwrap();
    let second: User = other.get(alice.id).await.unwrap().unwrap();
    assert_eq!(first, second);

    // A read after a write in the same session observes the write.
    let mut bob = user("bob", 40);
    other.save(&mut bob).unwrap();
    let pending: User = other.get(bob.id).await.unwrap().unwrap();
    assert_eq!(pending.name, "bob");
}

#[tokio::test]
async fn test_delete_removes_document_and_index_rows() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_by_name_document").await, 1);

    session.delete(&alice).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(table_count(&executor, "docbase_documents").await, 0);
    assert_eq!(table_count(&executor, "docbase_by_name_document").await, 0);
    assert!(session.get::<User>(alice.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_by_id_without_loading() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    // A different session deletes the document it never loaded; the index
    // rows must go with it.
    let mut other = store.create_session();
    other.delete_by_id::<User>(alice.id).unwrap();
    other.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_documents").await, 0);
    assert_eq!(table_count(&executor, "docbase_by_name_document").await, 0);
}

#[tokio::test]
async fn test_save_then_delete_before_flush_stores_nothing() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.delete(&alice).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_documents").await, 0);
}

#[tokio::test]
async fn test_delete_then_save_revives() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();

    session.delete(&alice).unwrap();
    alice.age = 31;
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();

    let mut fresh = store.create_session();
    let loaded: User = fresh.get(alice.id).await.unwrap().unwrap();
    assert_eq!(loaded.age, 31);
}

#[tokio::test]
async fn test_save_with_existing_id_updates_instead_of_inserting() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    // Another session saves a document carrying the same id without having
    // loaded it first.
    let mut other = store.create_session();
    let mut replacement = User { id: alice.id, name: "alicia".into(), age: 31 };
    other.save(&mut replacement).unwrap();
    other.save_changes().await.unwrap();

    assert_eq!(table_count(&executor, "docbase_documents").await, 1);
    assert_eq!(stored_version(&executor, alice.id).await, Some(2));
    let mut fresh = store.create_session();
    let loaded: User = fresh.get(alice.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "alicia");
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_flush_is_idempotent() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();

    // No mutation since the last flush: no DML, version untouched.
    session.save_changes().await.unwrap();
    assert_eq!(stored_version(&executor, alice.id).await, Some(1));
}

#[tokio::test]
async fn test_byte_equal_save_produces_no_dml() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    let mut other = store.create_session();
    let mut same: User = other.get(alice.id).await.unwrap().unwrap();
    other.save(&mut same).unwrap();
    other.save_changes().await.unwrap();
    assert_eq!(stored_version(&executor, alice.id).await, Some(1));
}

#[tokio::test]
async fn test_read_only_documents_are_not_flushed() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut alice = user("alice", 30);
    session.save(&mut alice).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    let mut other = store.create_session();
    let _: User = other.get_read_only(alice.id).await.unwrap().unwrap();
    other.save_changes().await.unwrap();
    assert_eq!(stored_version(&executor, alice.id).await, Some(1));
}

// ---------------------------------------------------------------------------
// Map index queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_map_index_query() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    session.save(&mut user("x", 20)).unwrap();
    session.save(&mut user("y", 25)).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    let found = fresh
        .query::<User>("by_name")
        .filter(col("name").eq("x"))
        .list()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "x");
}

#[tokio::test]
async fn test_index_rows_follow_updates() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut u = user("before", 20);
    session.save(&mut u).unwrap();
    session.save_changes().await.unwrap();

    u.name = "after".into();
    session.save(&mut u).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    assert!(fresh
        .query::<User>("by_name")
        .filter(col("name").eq("before"))
        .list()
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        fresh
            .query::<User>("by_name")
            .filter(col("name").eq("after"))
            .list()
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_empty_predicate_returns_everything() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    for n in 0..5 {
        session.save(&mut user(&format!("u{n}"), 20 + n)).unwrap();
    }
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    let all = fresh.query::<User>("by_name").list().await.unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn test_paging_and_ordering() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    for n in 0..10 {
        session.save(&mut user(&format!("u{n}"), n)).unwrap();
    }
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    let page = fresh
        .query::<User>("by_name")
        .order_by(desc("age"))
        .skip(2)
        .take(3)
        .list()
        .await
        .unwrap();
    let ages: Vec<i64> = page.iter().map(|u| u.age).collect();
    assert_eq!(ages, vec![7, 6, 5]);

    // Skip past the end: empty page, no error.
    let empty = fresh
        .query::<User>("by_name")
        .skip(100)
        .take(5)
        .list()
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_page_api_reports_totals() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    for n in 0..25 {
        session.save(&mut user(&format!("u{n:02}"), n)).unwrap();
    }
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    let page = fresh
        .query::<User>("by_name")
        .page(PageRequest::new(2, 10))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.total, 25);
    assert_eq!(page.previous_page, Some(1));
    assert_eq!(page.next_page, Some(3));
}

#[tokio::test]
async fn test_join_requires_rows_in_every_index() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    session.save(&mut user("adult", 30)).unwrap();
    session.save(&mut user("minor", 12)).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    let matched = fresh
        .query::<User>("by_name")
        .join("adults_only")
        .list()
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name, "adult");
}

#[tokio::test]
async fn test_query_helpers() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    session.save(&mut user("a", 1)).unwrap();
    session.save(&mut user("b", 2)).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(session.query::<User>("by_name").count().await.unwrap(), 2);
    assert!(session
        .query::<User>("by_name")
        .filter(col("name").eq("a"))
        .exists()
        .await
        .unwrap());
    let first = session
        .query::<User>("by_name")
        .filter(col("age").gte(2i64))
        .first()
        .await
        .unwrap();
    assert_eq!(first.unwrap().name, "b");
    let ids = session.query::<User>("by_name").ids().await.unwrap();
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn test_unknown_index_and_column_fail_at_compile() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let err = session
        .query::<User>("no_such_index")
        .list()
        .await
        .unwrap_err();
    assert!(matches!(err, DocbaseError::QueryCompile(_)), "{err}");

    let err = session
        .query::<User>("by_name")
        .filter(col("nope").eq(1i64))
        .list()
        .await
        .unwrap_err();
    assert!(matches!(err, DocbaseError::QueryCompile(_)), "{err}");
}

#[tokio::test]
async fn test_get_many_batches() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut ids = Vec::new();
    for n in 0..5 {
        let mut u = user(&format!("u{n}"), n);
        session.save(&mut u).unwrap();
        ids.push(u.id);
    }
    session.save_changes().await.unwrap();
    session.close();

    let mut fresh = store.create_session();
    let mut wanted = vec![ids[3], ids[0], 99999, ids[4]];
    let docs = fresh.get_many::<User>(&wanted).await.unwrap();
    let names: Vec<&str> = docs.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["u3", "u0", "u4"]);

    // Duplicates collapse.
    wanted.push(ids[3]);
    let docs = fresh.get_many::<User>(&wanted).await.unwrap();
    assert_eq!(docs.len(), 3);
}

// ---------------------------------------------------------------------------
// Date filter mini-language, end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_date_filter_against_index() {
    let (store, _) = open_store().await;
    let now = Utc::now();
    let mut session = store.create_session();

    let mut recent = post("r", 1);
    recent.published = now - Duration::days(1);
    let mut ancient = post("a", 1);
    ancient.published = now - Duration::days(30);
    session.save(&mut recent).unwrap();
    session.save(&mut ancient).unwrap();
    session.save_changes().await.unwrap();
    session.close();

    let filter = parse_date_filter("@now-7..@now", now).unwrap();
    let mut fresh = store.create_session();
    let matched = fresh
        .query::<Post>("by_published")
        .filter(col("published").within(filter))
        .list()
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, recent.id);
}

// ---------------------------------------------------------------------------
// Reduce indexes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_count_reduce_index() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut first_t = post("t", 1);
    session.save(&mut first_t).unwrap();
    session.save(&mut post("t", 2)).unwrap();
    session.save(&mut post("t", 3)).unwrap();
    session.save(&mut post("u", 4)).unwrap();
    session.save_changes().await.unwrap();

    let rows = session.reduce_rows("count_by_tag", None).await.unwrap();
    assert_eq!(
        rows,
        vec![
            IndexRow::new(vec!["t".into(), SqlValue::BigInt(3)]),
            IndexRow::new(vec!["u".into(), SqlValue::BigInt(1)]),
        ]
    );

    // Deleting one contributor decrements its group.
    session.delete(&first_t).unwrap();
    session.save_changes().await.unwrap();
    let rows = session.reduce_rows("count_by_tag", None).await.unwrap();
    assert_eq!(
        rows,
        vec![
            IndexRow::new(vec!["t".into(), SqlValue::BigInt(2)]),
            IndexRow::new(vec!["u".into(), SqlValue::BigInt(1)]),
        ]
    );
}

#[tokio::test]
async fn test_reduce_row_deleted_with_last_contributor() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut only = post("solo", 5);
    session.save(&mut only).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_count_by_tag_reduced").await, 1);

    session.delete(&only).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_count_by_tag_reduced").await, 0);
    assert_eq!(table_count(&executor, "docbase_count_by_tag_document").await, 0);
}

#[tokio::test]
async fn test_sum_reduce_follows_group_moves() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut mover = post("t", 10);
    session.save(&mut mover).unwrap();
    session.save(&mut post("t", 5)).unwrap();
    session.save_changes().await.unwrap();

    let rows = session.reduce_rows("score_by_tag", None).await.unwrap();
    assert_eq!(rows, vec![IndexRow::new(vec!["t".into(), SqlValue::BigInt(15)])]);

    // Move one document to another group; both totals adjust.
    mover.tag = "u".into();
    session.save(&mut mover).unwrap();
    session.save_changes().await.unwrap();
    let rows = session.reduce_rows("score_by_tag", None).await.unwrap();
    assert_eq!(
        rows,
        vec![
            IndexRow::new(vec!["t".into(), SqlValue::BigInt(5)]),
            IndexRow::new(vec!["u".into(), SqlValue::BigInt(10)]),
        ]
    );
}

#[tokio::test]
async fn test_non_invertible_reduce_rebuilds_group() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    let mut top = post("t", 100);
    session.save(&mut top).unwrap();
    session.save(&mut post("t", 60)).unwrap();
    session.save(&mut post("t", 40)).unwrap();
    session.save_changes().await.unwrap();

    let rows = session.reduce_rows("max_by_tag", None).await.unwrap();
    assert_eq!(rows, vec![IndexRow::new(vec!["t".into(), SqlValue::BigInt(100)])]);

    // Removing the maximum forces a re-aggregation from the survivors.
    session.delete(&top).unwrap();
    session.save_changes().await.unwrap();
    let rows = session.reduce_rows("max_by_tag", None).await.unwrap();
    assert_eq!(rows, vec![IndexRow::new(vec!["t".into(), SqlValue::BigInt(60)])]);
}

#[tokio::test]
async fn test_reduce_rows_filtered_by_key() {
    let (store, _) = open_store().await;
    let mut session = store.create_session();
    session.save(&mut post("t", 1)).unwrap();
    session.save(&mut post("u", 2)).unwrap();
    session.save_changes().await.unwrap();

    let rows = session
        .reduce_rows("count_by_tag", Some(col("tag").eq("u")))
        .await
        .unwrap();
    assert_eq!(rows, vec![IndexRow::new(vec!["u".into(), SqlValue::BigInt(1)])]);
}

// ---------------------------------------------------------------------------
// Concurrency and atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_competing_sessions_raise_concurrency_error() {
    let (store, _) = open_store().await;
    let mut setup = store.create_session();
    let mut alice = user("alice", 30);
    setup.save(&mut alice).unwrap();
    setup.save_changes().await.unwrap();
    setup.close();

    let mut first = store.create_session();
    let mut second = store.create_session();
    let mut from_first: User = first.get(alice.id).await.unwrap().unwrap();
    let mut from_second: User = second.get(alice.id).await.unwrap().unwrap();

    from_first.age = 31;
    first.save(&mut from_first).unwrap();
    first.save_changes().await.unwrap();

    from_second.age = 32;
    second.save(&mut from_second).unwrap();
    let err = second.save_changes().await.unwrap_err();
    assert!(matches!(err, DocbaseError::Concurrency(_)), "{err}");
    assert!(second.is_cancelled());

    // A cancelled session refuses further work.
    let err = second.save(&mut from_second).unwrap_err();
    assert!(matches!(err, DocbaseError::SessionCancelled));

    // The first writer's value survived.
    let mut fresh = store.create_session();
    let loaded: User = fresh.get(alice.id).await.unwrap().unwrap();
    assert_eq!(loaded.age, 31);
}

/// An index whose projection emits NULL into a NOT NULL column for one
/// specific document, forcing the flush to fail mid-transaction.
fn poisoned_index() -> IndexDef {
    MapIndex::<User>::new("by_alias")
        .column("alias", SqlType::Text)
        .rows(|u| {
            if u.name == "poison" {
                vec![IndexRow::new(vec![SqlValue::Null])]
            } else {
                vec![IndexRow::new(vec![u.name.as_str().into()])]
            }
        })
        .unwrap()
}

#[tokio::test]
async fn test_failed_flush_rolls_back_everything() {
    let executor = SqliteExecutor::open_memory().unwrap();
    let store = DocumentStore::builder()
        .dialect(SqliteDialect)
        .executor(Arc::new(executor.clone()))
        .register::<User>()
        .index(by_name())
        .index(poisoned_index())
        .build()
        .unwrap();
    store.initialize().await.unwrap();

    let mut session = store.create_session();
    let mut victim = user("fine", 30);
    session.save(&mut victim).unwrap();
    session.save_changes().await.unwrap();

    // The update itself would succeed; the poisoned index row aborts the
    // whole transaction.
    victim.name = "poison".into();
    session.save(&mut victim).unwrap();
    let err = session.save_changes().await.unwrap_err();
    assert!(matches!(err, DocbaseError::Backend(_)), "{err}");
    assert!(session.is_cancelled());

    // Every table shows the pre-flush state.
    assert_eq!(stored_version(&executor, victim.id).await, Some(1));
    let mut fresh = store.create_session();
    let loaded: User = fresh.get(victim.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "fine");
    let by_alias = fresh
        .query::<User>("by_alias")
        .filter(col("alias").eq("fine"))
        .list()
        .await
        .unwrap();
    assert_eq!(by_alias.len(), 1);
}

// ---------------------------------------------------------------------------
// Batching boundaries
// ---------------------------------------------------------------------------

/// Three wide columns per row; 300 rows per document overruns SQLite's
/// 999-parameter ceiling several times over.
fn wide_index() -> IndexDef {
    MapIndex::<User>::new("wide")
        .column("a", SqlType::BigInt)
        .column("b", SqlType::BigInt)
        .column("c", SqlType::BigInt)
        .rows(|u| {
            (0..300i64)
                .map(|n| IndexRow::new(vec![u.age.into(), n.into(), (n * 2).into()]))
                .collect()
        })
        .unwrap()
}

#[tokio::test]
async fn test_index_batches_chunk_under_parameter_ceiling() {
    let executor = SqliteExecutor::open_memory().unwrap();
    let store = DocumentStore::builder()
        .dialect(SqliteDialect)
        .executor(Arc::new(executor.clone()))
        .register::<User>()
        .index(wide_index())
        .build()
        .unwrap();
    store.initialize().await.unwrap();

    let mut session = store.create_session();
    session.save(&mut user("wide", 7)).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_wide_document").await, 300);
}

#[tokio::test]
async fn test_document_batches_chunk_under_parameter_ceiling() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    // 200 inserts at 6 parameters each exceed 999 and must split.
    for n in 0..200 {
        session.save(&mut user(&format!("u{n}"), n)).unwrap();
    }
    session.save_changes().await.unwrap();
    assert_eq!(table_count(&executor, "docbase_documents").await, 200);
}

// ---------------------------------------------------------------------------
// Identifier allocation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ids_are_unique_across_sessions() {
    let (store, _) = open_store().await;
    let mut seen = std::collections::HashSet::new();
    for _ in 0..3 {
        let mut session = store.create_session();
        for n in 0..100 {
            let mut u = user(&format!("u{n}"), n);
            session.save(&mut u).unwrap();
            assert!(seen.insert(u.id), "id {} handed out twice", u.id);
        }
        session.save_changes().await.unwrap();
        session.close();
    }
}

#[tokio::test]
async fn test_file_backed_store_persists_across_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs.db");

    let saved_id;
    {
        let executor = SqliteExecutor::open(&path).unwrap();
        let store = DocumentStore::builder()
            .dialect(SqliteDialect)
            .executor(Arc::new(executor))
            .register::<User>()
            .index(by_name())
            .build()
            .unwrap();
        store.initialize().await.unwrap();
        let mut session = store.create_session();
        let mut u = user("durable", 50);
        session.save(&mut u).unwrap();
        session.save_changes().await.unwrap();
        saved_id = u.id;
    }

    // Reopen the same file; documents and index rows survive, and new ids
    // continue past the reserved range.
    let executor = SqliteExecutor::open(&path).unwrap();
    let store = DocumentStore::builder()
        .dialect(SqliteDialect)
        .executor(Arc::new(executor))
        .register::<User>()
        .index(by_name())
        .build()
        .unwrap();
    store.initialize().await.unwrap();
    let mut session = store.create_session();
    let loaded: User = session.get(saved_id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "durable");

    let mut next = user("later", 51);
    session.save(&mut next).unwrap();
    assert!(next.id > saved_id);
    session.save_changes().await.unwrap();
}

#[tokio::test]
async fn test_identifiers_row_advances_past_assigned_ids() {
    let (store, executor) = open_store().await;
    let mut session = store.create_session();
    let mut u = user("u", 1);
    session.save(&mut u).unwrap();
    session.save_changes().await.unwrap();

    let rows = executor
        .query(&Statement::bare(
            "SELECT \"next_value\" FROM \"docbase_identifiers\" WHERE \"dimension\" = 'document'"
                .to_string(),
        ))
        .await
        .unwrap();
    let next_value = rows[0].i64(0).unwrap();
    assert!(next_value > u.id);
}

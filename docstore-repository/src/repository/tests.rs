use super::*;
use crate::config::RepositoryConfig;
use crate::error::{StoreErrorKind, StoreOperation};
use crate::policy::default_index_models;
use crate::schema::EntitySchema;
use crate::store::memory::MemoryDatabase;
use crate::store::{IndexModel, TransactionOptions};
use crate::types::{DayTiming, GeoPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct User {
    id: Option<DocumentId>,
    name: String,
    email: String,
    #[serde(default)]
    age: Option<u32>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl User {
    fn new(name: &str, email: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            email: email.to_string(),
            age: None,
            created_at: None,
            updated_at: None,
            deleted_at: None,
        }
    }

    fn aged(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    fn id_str(&self) -> &str {
        self.id.as_ref().map(DocumentId::as_str).unwrap_or_default()
    }
}

impl Entity for User {
    const COLLECTION: &'static str = "users";
    const ID_PREFIX: &'static str = "usr";
    const SCHEMA: EntitySchema = EntitySchema::new(&[
        "id",
        "name",
        "email",
        "age",
        "createdAt",
        "updatedAt",
        "deletedAt",
    ]);

    fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }
    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

#[derive(Debug, Default, Serialize)]
struct UserChanges {
    #[serde(skip)]
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    age: Option<u32>,
    nickname: Option<String>,
}

impl UserChanges {
    fn for_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    fn age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }
}

impl UpdatePayload for UserChanges {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn is_valid(&self) -> bool {
        self.name.as_deref().map_or(true, |name| !name.trim().is_empty())
    }
}

#[derive(Debug, Default)]
struct UserPolicy;

impl RepositoryPolicy<User> for UserPolicy {
    fn should_update_field(&self, field: &str) -> bool {
        field != "email"
    }

    fn index_models(&self) -> Vec<IndexModel> {
        let mut indexes = default_index_models::<User>();
        indexes.push(IndexModel::ascending("email").unique());
        indexes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditEntry {
    id: Option<DocumentId>,
    action: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Entity for AuditEntry {
    const COLLECTION: &'static str = "audit_entries";
    const ID_PREFIX: &'static str = "aud";
    const SCHEMA: EntitySchema = EntitySchema::new(&["id", "action", "createdAt", "updatedAt"]);

    fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }
    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

#[derive(Debug, Default, Serialize)]
struct AuditChanges {
    action: Option<String>,
}

impl UpdatePayload for AuditChanges {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Venue {
    id: Option<DocumentId>,
    name: String,
    location: GeoPoint,
    timings: Vec<DayTiming>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Entity for Venue {
    const COLLECTION: &'static str = "venues";
    const ID_PREFIX: &'static str = "ven";
    const SCHEMA: EntitySchema =
        EntitySchema::new(&["id", "name", "location", "timings", "createdAt", "updatedAt"]);

    fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }
    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

#[derive(Debug, Default, Serialize)]
struct VenueChanges {
    name: Option<String>,
}

impl UpdatePayload for VenueChanges {}

type Users = DocumentRepository<User, UserChanges, UserPolicy>;
type Audits = DocumentRepository<AuditEntry, AuditChanges>;
type Venues = DocumentRepository<Venue, VenueChanges>;

fn setup() -> (MemoryDatabase, DbContext) {
    let db = MemoryDatabase::new("app");
    let context = DbContext::new(Arc::new(db.clone()), RepositoryConfig::default());
    (db, context)
}

async fn seed_users(users: &Users, count: usize) -> Vec<User> {
    let batch = (0..count)
        .map(|i| User::new(&format!("user-{:02}", i), &format!("user{}@example.com", i)))
        .collect();
    users.create_many(batch).await.unwrap()
}

// ============================================================================
// Create and read
// ============================================================================

#[tokio::test]
async fn test_create_round_trip() {
    let (_db, context) = setup();
    let users = Users::new(&context);

    let created = users
        .create(User::new("Ada", "ada@example.com").aged(36))
        .await
        .unwrap();
    let id = created.id.clone().unwrap();
    assert_eq!(id.prefix(), "usr");
    assert!(created.created_at.is_some());
    assert_eq!(created.created_at, created.updated_at);
    assert_eq!(created.deleted_at, None);

    let fetched = users.get(id.as_str()).await.unwrap().unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_create_replaces_foreign_identifier() {
    let (_db, context) = setup();
    let users = Users::new(&context);

    let mut user = User::new("Ada", "ada@example.com");
    user.id = Some(DocumentId::new("ord"));
    let created = users.create(user).await.unwrap();
    assert_eq!(created.id.unwrap().prefix(), "usr");

    let keep = DocumentId::new("usr");
    let mut user = User::new("Grace", "grace@example.com");
    user.id = Some(keep.clone());
    assert_eq!(users.create(user).await.unwrap().id, Some(keep));
}

#[tokio::test]
async fn test_create_many_empty_is_noop() {
    let (db, context) = setup();
    let users = Users::new(&context);

    db.fail_next("users", StoreOperation::Insert);
    assert!(users.create_many(Vec::new()).await.unwrap().is_empty());
    assert!(!context.index_registry().is_provisioned("users"));
}

#[tokio::test]
async fn test_unique_index_provisioned_on_first_use() {
    let (db, context) = setup();
    let users = Users::new(&context);

    users.create(User::new("Ada", "ada@example.com")).await.unwrap();
    let err = users
        .create(User::new("Imposter", "ada@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.store_error().map(|e| e.kind), Some(StoreErrorKind::DuplicateKey));
    assert!(db.index_names("users").await.contains(&"email_1".to_string()));
    assert_eq!(db.documents("users").await.len(), 1);
}

#[tokio::test]
async fn test_invalid_identifiers_rejected_before_io() {
    let (db, context) = setup();
    let users = Users::new(&context);
    db.fail_next("users", StoreOperation::Find);

    let err = users.get("").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid document ID");

    let err = users.get("not-an-id").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid document ID format. Id=not-an-id");

    let foreign = DocumentId::new("aud");
    let err = users.get(foreign.as_str()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));

    let err = users.delete_one("nope", true).await.unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));
    assert!(!context.index_registry().is_provisioned("users"));
}

#[tokio::test]
async fn test_find_one_and_count() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 4).await;

    let last = users
        .find_one(Filter::Empty, Some("-name"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.name, "user-03");

    let filter = FilterBuilder::<User>::in_list("name", ["user-00", "user-02"]).unwrap();
    assert_eq!(users.count(filter).await.unwrap(), 2);

    let missing = FilterBuilder::<User>::eq("name", "nobody").unwrap();
    assert!(users.find_one(missing, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_filter_rejects_unknown_field_but_sort_ignores_it() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 3).await;

    let err = FilterBuilder::<User>::eq("nickname", "ada").unwrap_err();
    assert!(matches!(err, Error::InvalidField(ref f) if f == "nickname"));

    let page = users
        .find(Filter::Empty, None, None, Some("nickname"))
        .await
        .unwrap();
    assert_eq!(page.len(), 3);
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_pages_with_lookahead() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 12).await;

    let first = users
        .find(Filter::Empty, Some(0), Some(5), Some("name"))
        .await
        .unwrap();
    assert_eq!(first.len(), 5);
    assert!(first.has_next_page);
    assert_eq!(first.documents[0].name, "user-00");

    let second = users
        .find_paged(Filter::Empty, &PageRequest::new(5, 5).ordered_by("name", false))
        .await
        .unwrap();
    assert_eq!(second.documents[0].name, "user-05");
    assert!(second.has_next_page);

    let third = users
        .find(Filter::Empty, Some(10), Some(5), Some("name"))
        .await
        .unwrap();
    assert_eq!(third.len(), 2);
    assert!(!third.has_next_page);
    assert_eq!((third.offset, third.limit), (10, 5));
}

#[tokio::test]
async fn test_single_row_pages_still_look_ahead() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 12).await;

    let page = users.find(Filter::Empty, Some(10), Some(1), None).await.unwrap();
    assert_eq!(page.len(), 1);
    assert!(page.has_next_page);

    let page = users.find(Filter::Empty, Some(11), Some(1), None).await.unwrap();
    assert_eq!(page.len(), 1);
    assert!(!page.has_next_page);
}

#[tokio::test]
async fn test_limit_edge_cases() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 12).await;

    let all = users.find(Filter::Empty, None, Some(-1), None).await.unwrap();
    assert_eq!(all.len(), 12);
    assert_eq!(all.limit, i64::MAX);
    assert!(!all.has_next_page);

    let empty = users.find(Filter::Empty, Some(3), Some(0), None).await.unwrap();
    assert!(empty.is_empty());
    assert!(empty.has_next_page);

    let defaulted = users.find(Filter::Empty, None, None, None).await.unwrap();
    assert_eq!(defaulted.limit, 50);
    assert_eq!(defaulted.len(), 12);

    let unbounded = users
        .find_with_options(
            Filter::Empty,
            FindOptions {
                sort: Some(SortSpec::descending("name")),
                skip: 2,
                limit: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(unbounded.len(), 10);
    assert_eq!(unbounded.documents[0].name, "user-09");
}

#[tokio::test]
async fn test_find_all_ands_filters() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    users
        .create_many(vec![
            User::new("Ada", "ada@example.com").aged(36),
            User::new("Alan", "alan@example.com").aged(41),
            User::new("Grace", "grace@example.com").aged(45),
        ])
        .await
        .unwrap();

    let page = users
        .find_all(
            vec![
                FilterBuilder::<User>::gte("age", 40).unwrap(),
                FilterBuilder::<User>::text_match("name", Some("^a")).unwrap(),
            ],
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.documents[0].name, "Alan");
}

#[tokio::test]
async fn test_page_within_transaction_session() {
    let (db, context) = setup();
    db.set_clustered(true);
    let users = Users::new(&context);
    seed_users(&users, 3).await;

    let session = context.start_session().await.unwrap();
    session
        .start_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let page = users
        .page(Filter::Empty, None, 0, 2, Some(session.as_ref()))
        .await
        .unwrap();
    session.commit_transaction().await.unwrap();

    assert_eq!(page.len(), 2);
    assert!(page.has_next_page);
}

// ============================================================================
// Soft delete
// ============================================================================

#[tokio::test]
async fn test_soft_deleted_documents_are_hidden() {
    let (db, context) = setup();
    let users = Users::new(&context);
    let created = users
        .create_many(vec![
            User::new("Ada", "ada@example.com").aged(30),
            User::new("Alan", "alan@example.com").aged(30),
            User::new("Grace", "grace@example.com").aged(30),
        ])
        .await
        .unwrap();

    let result = users.delete_one(created[1].id_str(), false).await.unwrap();
    assert_eq!(result.modified_count, 1);

    let thirty = || FilterBuilder::<User>::eq("age", 30).unwrap();
    let page = users.find(thirty(), None, None, None).await.unwrap();
    assert_eq!(page.len(), 2);
    assert!(page.documents.iter().all(|u| u.name != "Alan"));
    assert_eq!(users.count(thirty()).await.unwrap(), 2);
    assert!(users.get(created[1].id_str()).await.unwrap().is_none());
    assert_eq!(db.documents("users").await.len(), 3);
}

#[tokio::test]
async fn test_soft_delete_is_idempotent_and_purge_is_terminal() {
    let (db, context) = setup();
    let users = Users::new(&context);
    let user = users.create(User::new("Ada", "ada@example.com")).await.unwrap();
    let id = user.id_str().to_string();

    let first = users.find_one_and_delete(&id, false).await.unwrap().unwrap();
    let first_deleted_at = first.deleted_at.unwrap();

    let second = users.find_one_and_delete(&id, false).await.unwrap().unwrap();
    assert!(second.deleted_at.unwrap() >= first_deleted_at);
    assert!(users.get(&id).await.unwrap().is_none());

    let purged = users.find_one_and_delete(&id, true).await.unwrap();
    assert_eq!(purged.map(|u| u.name), Some("Ada".to_string()));
    assert!(db.documents("users").await.is_empty());
    assert!(users.get(&id).await.unwrap().is_none());
    assert!(users.find_one_and_delete(&id, true).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_where_soft_and_permanent() {
    let (db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 5).await;

    let filter = || FilterBuilder::<User>::in_list("name", ["user-01", "user-02", "user-03"]).unwrap();
    let soft = users.delete_where(filter(), false).await.unwrap();
    assert_eq!(soft, WriteResult { matched_count: 3, modified_count: 3 });
    assert_eq!(users.count(Filter::Empty).await.unwrap(), 2);

    let hard = users.delete_where(filter(), true).await.unwrap();
    assert_eq!(hard.modified_count, 3);
    assert_eq!(db.documents("users").await.len(), 2);
}

#[tokio::test]
async fn test_entities_without_delete_timestamp_are_removed() {
    let (db, context) = setup();
    let audits = Audits::new(&context);
    assert!(!audits.soft_delete_enabled());

    let entry = audits
        .create(AuditEntry {
            id: None,
            action: "login".to_string(),
            created_at: None,
            updated_at: None,
        })
        .await
        .unwrap();
    let id = entry.id.unwrap();

    let result = audits.delete_one(id.as_str(), false).await.unwrap();
    assert_eq!(result.modified_count, 1);
    assert!(db.documents("audit_entries").await.is_empty());
    assert_eq!(
        db.index_names("audit_entries").await,
        vec!["updatedAt_-1", "createdAt_-1"]
    );
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn test_update_applies_only_allowed_fields() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    let user = users.create(User::new("Ada", "ada@example.com")).await.unwrap();

    let changes = UserChanges {
        email: Some("other@example.com".to_string()),
        nickname: Some("countess".to_string()),
        ..UserChanges::for_id(user.id_str())
    }
    .name("Ada Lovelace")
    .age(36);
    let outcome = users.update(&changes).await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Applied(WriteResult { matched_count: 1, modified_count: 1 })
    );

    let updated = users.get(user.id_str()).await.unwrap().unwrap();
    assert_eq!(updated.name, "Ada Lovelace");
    assert_eq!(updated.age, Some(36));
    assert_eq!(updated.email, "ada@example.com");
    assert_eq!(updated.created_at, user.created_at);
    assert!(updated.updated_at >= user.updated_at);
}

#[tokio::test]
async fn test_update_with_nothing_to_apply_skips_store() {
    let (db, context) = setup();
    let users = Users::new(&context);
    let user = users.create(User::new("Ada", "ada@example.com")).await.unwrap();

    db.fail_next("users", StoreOperation::Update);
    let changes = UserChanges {
        email: Some("ignored@example.com".to_string()),
        ..UserChanges::default()
    };
    let outcome = users.update_by_id(user.id_str(), &changes).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::NothingToUpdate);
    assert!(!outcome.is_applied());

    // The injected failure is still armed
    let err = users
        .update_by_id(user.id_str(), &UserChanges::default().age(1))
        .await
        .unwrap_err();
    assert_eq!(err.store_error().map(|e| e.operation), Some(StoreOperation::Update));
}

#[tokio::test]
async fn test_invalid_payloads_rejected() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    let user = users.create(User::new("Ada", "ada@example.com")).await.unwrap();

    let err = users
        .update_by_id(user.id_str(), &UserChanges::default().name("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPayload(_)));

    let err = users.update(&UserChanges::default().age(3)).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid document ID");
}

#[tokio::test]
async fn test_update_where_many() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    seed_users(&users, 4).await;

    let filter = FilterBuilder::<User>::text_match("name", Some("user-0[12]")).unwrap();
    let outcome = users
        .update_where(filter, &UserChanges::default().age(50), true)
        .await
        .unwrap();
    assert_eq!(outcome.modified_count(), 2);

    let fifty = FilterBuilder::<User>::eq("age", 50).unwrap();
    assert_eq!(users.count(fifty).await.unwrap(), 2);
}

#[tokio::test]
async fn test_find_one_and_update_returns_requested_version() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    let user = users.create(User::new("Ada", "ada@example.com")).await.unwrap();

    let before = users
        .find_one_and_update(user.id_str(), &UserChanges::default().age(30), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.age, None);

    let after = users
        .find_one_and_update(user.id_str(), &UserChanges::default().age(31), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.age, Some(31));

    let unchanged = users
        .find_one_and_update(user.id_str(), &UserChanges::default(), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged, after);
}

#[tokio::test]
async fn test_find_one_and_update_upsert_inserts_document() {
    let (db, context) = setup();
    let users = Users::new(&context);

    let filter = FilterBuilder::<User>::eq("email", "new@example.com").unwrap();
    let inserted = users
        .find_one_and_update_where(filter, &UserChanges::default().name("Newcomer"), true, true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(inserted.email, "new@example.com");
    assert_eq!(inserted.name, "Newcomer");
    assert_eq!(inserted.id.as_ref().map(DocumentId::prefix), Some("usr"));
    assert_eq!(inserted.created_at, inserted.updated_at);
    assert_eq!(db.documents("users").await.len(), 1);
}

#[tokio::test]
async fn test_bulk_update() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    let created = seed_users(&users, 3).await;

    assert_eq!(
        users.bulk_update(&[]).await.unwrap(),
        BulkWriteResult::empty()
    );

    let result = users
        .bulk_update(&[
            UserChanges::for_id(created[0].id_str()).age(20),
            UserChanges::for_id(created[1].id_str()),
            UserChanges::for_id(created[2].id_str()).name("renamed"),
        ])
        .await
        .unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.modified_count, 2);

    let nothing = users
        .bulk_update(&[UserChanges::for_id(created[1].id_str())])
        .await
        .unwrap();
    assert_eq!(nothing, BulkWriteResult::empty());
}

#[tokio::test]
async fn test_bulk_update_validates_every_identifier_first() {
    let (_db, context) = setup();
    let users = Users::new(&context);
    let created = seed_users(&users, 1).await;

    let err = users
        .bulk_update(&[
            UserChanges::for_id(created[0].id_str()).age(20),
            UserChanges::for_id("bogus").age(21),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));

    let unchanged = users.get(created[0].id_str()).await.unwrap().unwrap();
    assert_eq!(unchanged.age, None);
}

// ============================================================================
// Sequences and settings-driven filters
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_next_sequence_concurrent() {
    let (_db, context) = setup();
    let users = Users::new(&context);

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let users = users.clone();
            tokio::spawn(async move { users.next_sequence("orders", 0).await })
        })
        .collect();

    let mut values = BTreeSet::new();
    for result in futures::future::join_all(tasks).await {
        assert!(values.insert(result.unwrap().unwrap()));
    }
    assert_eq!(values, (1..=100).collect());
}

#[tokio::test]
async fn test_settings_driven_filters() {
    let (_db, context) = setup();
    let venues = Venues::new(&context);
    let always_open: Vec<DayTiming> = (0..7)
        .map(|day| DayTiming {
            day,
            start: 0,
            end: 24 * 60,
        })
        .collect();
    venues
        .create_many(vec![
            Venue {
                id: None,
                name: "Corner Cafe".to_string(),
                location: GeoPoint::new(24.7136, 46.6753),
                timings: always_open,
                created_at: None,
                updated_at: None,
            },
            Venue {
                id: None,
                name: "Far Diner".to_string(),
                location: GeoPoint::new(21.4858, 39.1925),
                timings: Vec::new(),
                created_at: None,
                updated_at: None,
            },
        ])
        .await
        .unwrap();

    let near = venues.near_filter("location", 24.7140, 46.6750).unwrap();
    let found = venues.find(near, None, None, None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found.documents[0].name, "Corner Cafe");

    let open = venues.availability_filter("timings", true).unwrap();
    let found = venues.find(open, None, None, None).await.unwrap();
    assert_eq!(found.len(), 1);

    let closed = venues.availability_filter("timings", false).unwrap();
    assert_eq!(venues.count(closed).await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_failures_are_re_raised() {
    let (db, context) = setup();
    let users = Users::new(&context);
    let user = users.create(User::new("Ada", "ada@example.com")).await.unwrap();

    db.fail_next("users", StoreOperation::Delete);
    let err = users.delete_one(user.id_str(), true).await.unwrap_err();
    assert_eq!(err.store_error().map(|e| e.operation), Some(StoreOperation::Delete));
    assert!(users.get(user.id_str()).await.unwrap().is_some());

    db.fail_next("users", StoreOperation::Find);
    assert!(matches!(
        users.find(Filter::Empty, None, None, None).await,
        Err(Error::Store(_))
    ));
    assert_eq!(users.context().database().name(), "app");
}

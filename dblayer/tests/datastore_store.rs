use async_trait::async_trait;
use mea::mutex::Mutex;
use dblayer::{
    datastore::{DatastoreEmulator, DatastoreError, DatastoreService},
    prelude::*,
};
use rstest::rstest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn document(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn store(emulator: &DatastoreEmulator) -> DatabaseStore<DatastoreService> {
    init_tracing();
    DatabaseStore::new(DatastoreService::new(emulator.clone()))
}

#[derive(Debug, Default)]
struct RecordingHooks {
    inserted: Mutex<Vec<String>>,
    dropped: Mutex<Vec<String>>,
}

#[async_trait]
impl ItemHooks for RecordingHooks {
    async fn post_insert_item(&self, table: &str, key: &ItemKey) -> DatabaseResult<()> {
        self.inserted.lock().await.push(format!("{table}/{key}"));
        Ok(())
    }

    async fn post_drop_table(&self, table: &str) -> DatabaseResult<()> {
        self.dropped.lock().await.push(table.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn exclusive_put_keeps_the_first_item() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let users = store.table("users");
    let key = ItemKey::new("id", "u-1");

    users
        .put_item(&key, document(json!({ "name": "ada" })), ReturnItemBehavior::DoNotReturn, false)
        .await
        .unwrap();
    let err = users
        .put_item(&key, document(json!({ "name": "bob" })), ReturnItemBehavior::DoNotReturn, false)
        .await
        .unwrap_err();

    assert!(matches!(err, DatabaseError::Conflict(_)));
    assert_eq!(err.status_code().as_u16(), 409);
    assert_eq!(
        users.get_item(&key, None).await.unwrap(),
        Some(document(json!({ "id": "u-1", "name": "ada" })))
    );
}

#[tokio::test]
async fn overwriting_put_returns_the_old_item() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let users = store.table("users");
    let key = ItemKey::new("id", "u-1");

    let first = users
        .put_item(&key, document(json!({ "name": "ada" })), ReturnItemBehavior::ReturnOldValues, true)
        .await
        .unwrap();
    assert_eq!(first, None);

    let replaced = users
        .put_item(&key, document(json!({ "name": "bob" })), ReturnItemBehavior::ReturnOldValues, true)
        .await
        .unwrap();
    assert_eq!(replaced, Some(document(json!({ "id": "u-1", "name": "ada" }))));
}

#[tokio::test]
async fn update_merges_top_level_attributes() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let orders = store.table("orders");
    let key = ItemKey::new("id", "o-1");

    orders
        .put_item(&key, document(json!({ "a": 1, "b": 2 })), ReturnItemBehavior::DoNotReturn, false)
        .await
        .unwrap();
    let updated = orders
        .update_item(
            &key,
            document(json!({ "b": 3, "c": 4 })),
            ReturnItemBehavior::ReturnNewValues,
            Condition::attribute_exists("a"),
        )
        .await
        .unwrap();

    assert_eq!(updated, Some(document(json!({ "id": "o-1", "a": 1, "b": 3, "c": 4 }))));
}

#[tokio::test]
async fn update_creates_missing_items() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let key = ItemKey::new("id", 42i64);

    let old = store
        .update_item(
            "orders",
            &key,
            document(json!({ "total": 10 })),
            ReturnItemBehavior::ReturnOldValues,
            ConditionCoupling::Empty,
        )
        .await
        .unwrap();

    assert_eq!(old, None);
    let stored = store.get_item("orders", &key, None).await.unwrap().unwrap();
    assert_eq!(stored, document(json!({ "id": "42", "total": 10 })));
}

#[tokio::test]
async fn increments_accumulate_on_nested_counters() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let pages = store.table("pages");
    let key = ItemKey::new("id", "home");

    assert_eq!(
        pages
            .increment_attribute(&key, "stats.views", 5.0, ConditionCoupling::Empty)
            .await
            .unwrap(),
        5.0
    );
    assert_eq!(
        pages
            .increment_attribute(&key, "stats.views", -2.0, ConditionCoupling::Empty)
            .await
            .unwrap(),
        3.0
    );

    let stored = pages.get_item(&key, None).await.unwrap().unwrap();
    assert_eq!(stored["stats"]["views"].as_f64(), Some(3.0));
}

#[tokio::test]
async fn array_elements_are_added_and_removed() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let lists = store.table("lists");
    let key = ItemKey::new("id", "l-1");

    lists
        .add_elements_to_array(
            &key,
            "numbers",
            &[1i64.into(), 2i64.into(), 3i64.into()],
            ReturnItemBehavior::DoNotReturn,
            ConditionCoupling::Empty,
        )
        .await
        .unwrap();
    let updated = lists
        .remove_elements_from_array(
            &key,
            "numbers",
            &[2i64.into()],
            ReturnItemBehavior::ReturnNewValues,
            ConditionCoupling::Empty,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated["numbers"], json!([1, 3]));
    assert!(
        lists
            .item_exists(&key, Condition::array_element_not_exists("numbers", 2i64))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn removing_from_a_missing_item_is_a_no_op() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);

    let returned = store
        .remove_elements_from_array(
            "lists",
            &ItemKey::new("id", "missing"),
            "numbers",
            &[1i64.into()],
            ReturnItemBehavior::ReturnNewValues,
            ConditionCoupling::Empty,
        )
        .await
        .unwrap();

    assert_eq!(returned, None);
    assert_eq!(emulator.entity_count("lists").await, 0);
}

#[tokio::test]
async fn delete_is_gated_by_conditions() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let tickets = store.table("tickets");
    let key = ItemKey::new("id", "t-1");
    tickets
        .put_item(&key, document(json!({ "status": "open" })), ReturnItemBehavior::DoNotReturn, false)
        .await
        .unwrap();

    let err = tickets
        .delete_item(
            &key,
            ReturnItemBehavior::ReturnOldValues,
            Condition::attribute_equals("status", "closed"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::PreconditionFailed(_)));
    assert_eq!(err.status_code().as_u16(), 412);
    assert!(tickets.item_exists(&key, ConditionCoupling::Empty).await.unwrap());

    let deleted = tickets
        .delete_item(
            &key,
            ReturnItemBehavior::ReturnOldValues,
            Condition::attribute_equals("status", "closed") | Condition::attribute_equals("status", "open"),
        )
        .await
        .unwrap();
    assert_eq!(deleted, Some(document(json!({ "id": "t-1", "status": "open" }))));
    assert!(!tickets.item_exists(&key, ConditionCoupling::Empty).await.unwrap());
}

#[tokio::test]
async fn paginated_scans_visit_every_item_once() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let items = store.table("items");
    for i in 0..7i64 {
        items
            .put_item(
                &ItemKey::new("id", i),
                document(json!({ "n": i })),
                ReturnItemBehavior::DoNotReturn,
                false,
            )
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let page = items.scan_paginated(3, token.as_ref()).await.unwrap();
        assert!(page.items.len() <= 3);
        seen.extend(page.items.iter().map(|item| item["id"].as_str().unwrap().to_string()));
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    let unique = seen.iter().cloned().collect::<BTreeSet<_>>();
    assert_eq!(seen.len(), 7);
    assert_eq!(unique, (0..7).map(|i| i.to_string()).collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn filtered_scans_return_matches_only() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let tickets = store.table("tickets");
    for (id, status) in [("a", "open"), ("b", "closed"), ("c", "open")] {
        tickets
            .put_item(
                &ItemKey::new("id", id),
                document(json!({ "status": status })),
                ReturnItemBehavior::DoNotReturn,
                false,
            )
            .await
            .unwrap();
    }

    let open = tickets
        .scan_with_filter(Condition::attribute_equals("status", "open"))
        .await
        .unwrap();
    let mut ids = open
        .iter()
        .map(|item| item["id"].as_str().unwrap())
        .collect::<Vec<_>>();
    ids.sort();
    assert_eq!(ids, ["a", "c"]);
}

#[tokio::test(start_paused = true)]
async fn contention_is_retried_up_to_the_policy_limit() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let key = ItemKey::new("id", "c-1");

    emulator
        .fail_next_commits(4, DatastoreError::Aborted("concurrent transaction".into()))
        .await;
    let value = store
        .increment_attribute("counters", &key, "n", 1.0, ConditionCoupling::Empty)
        .await
        .unwrap();
    assert_eq!(value, 1.0);

    emulator
        .fail_next_commits(5, DatastoreError::Aborted("concurrent transaction".into()))
        .await;
    let err = store
        .increment_attribute("counters", &key, "n", 1.0, ConditionCoupling::Empty)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::TooManyRequests(_)));
    assert_eq!(err.status_code().as_u16(), 429);

    let stored = store.get_item("counters", &key, None).await.unwrap().unwrap();
    assert_eq!(stored["n"].as_f64(), Some(1.0));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: String,
    name: String,
    age: i64,
    score: f64,
    active: bool,
    tags: Vec<String>,
}

#[tokio::test]
async fn typed_items_round_trip() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let profiles = store.table("profiles");
    let key = ItemKey::new("id", "p-1");
    let profile = Profile {
        id: "p-1".into(),
        name: "ada".into(),
        age: 36,
        score: 0.5,
        active: true,
        tags: vec!["math".into(), "engines".into()],
    };

    profiles.put(&key, &profile, false).await.unwrap();

    assert_eq!(profiles.get_item_as::<Profile>(&key).await.unwrap(), Some(profile));
}

#[tokio::test]
async fn options_post_process_idempotently() {
    let emulator = DatastoreEmulator::new();
    let options = DatabaseOptions::new()
        .with_auto_sort_arrays(true)
        .with_auto_convert_round_floats_to_integers(true);
    let store = store(&emulator).with_options(options);
    let key = ItemKey::new("id", "x");

    store
        .put_item(
            "things",
            &key,
            document(json!({ "tags": [3, 1, 2], "n": 2.0 })),
            ReturnItemBehavior::DoNotReturn,
            false,
        )
        .await
        .unwrap();
    let item = store.get_item("things", &key, None).await.unwrap().unwrap();

    assert_eq!(item["tags"], json!([1, 2, 3]));
    assert_eq!(item["n"].as_i64(), Some(2));
    assert_eq!(options.apply(item.clone()), item);
}

#[tokio::test]
async fn projections_keep_the_key() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let key = ItemKey::new("id", "x");
    store
        .put_item(
            "things",
            &key,
            document(json!({ "a": 1, "b": 2 })),
            ReturnItemBehavior::DoNotReturn,
            false,
        )
        .await
        .unwrap();

    let item = store
        .get_item("things", &key, Some(&["b".to_string()]))
        .await
        .unwrap();
    assert_eq!(item, Some(document(json!({ "id": "x", "b": 2 }))));
}

#[tokio::test]
async fn cancelled_stores_refuse_work() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let token = CancellationToken::new();
    let scoped = store.with_cancellation(token.clone());
    token.cancel();

    let err = scoped
        .put_item(
            "things",
            &ItemKey::new("id", "x"),
            document(json!({ "a": 1 })),
            ReturnItemBehavior::DoNotReturn,
            false,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DatabaseError::Cancelled(_)));
    assert_eq!(emulator.entity_count("things").await, 0);
    assert!(store.get_table_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn hooks_observe_creations_and_drops() {
    init_tracing();
    let emulator = DatastoreEmulator::new();
    let hooks = Arc::new(RecordingHooks::default());
    let service = DatastoreService::builder()
        .with_client(emulator.clone())
        .with_hooks(hooks.clone())
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
        .build()
        .await
        .unwrap();
    let store = DatabaseStore::new(service);
    let notes = store.table("notes");
    let key = ItemKey::new("id", "n-1");

    notes
        .put_item(&key, document(json!({ "body": "a" })), ReturnItemBehavior::DoNotReturn, true)
        .await
        .unwrap();
    notes
        .put_item(&key, document(json!({ "body": "b" })), ReturnItemBehavior::DoNotReturn, true)
        .await
        .unwrap();
    notes
        .add_elements_to_array(
            &ItemKey::new("id", "n-2"),
            "labels",
            &["x".into()],
            ReturnItemBehavior::DoNotReturn,
            ConditionCoupling::Empty,
        )
        .await
        .unwrap();
    assert_eq!(store.get_table_names().await.unwrap(), ["notes"]);

    notes.drop_table().await.unwrap();

    assert_eq!(*hooks.inserted.lock().await, ["notes/id=n-1", "notes/id=n-2"]);
    assert_eq!(*hooks.dropped.lock().await, ["notes"]);
    assert!(notes.scan().await.unwrap().is_empty());
}

#[rstest]
#[case::empty_elements("tags", vec![])]
#[case::mixed_elements("tags", vec![Primitive::from(1i64), Primitive::from("1")])]
#[case::key_attribute("id", vec![Primitive::from(1i64)])]
#[case::indexed_path("tags[0]", vec![Primitive::from(1i64)])]
#[tokio::test]
async fn malformed_array_mutations_are_rejected(
    #[case] attribute: &str,
    #[case] elements: Vec<Primitive>,
) {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);

    let err = store
        .add_elements_to_array(
            "things",
            &ItemKey::new("id", "x"),
            attribute,
            &elements,
            ReturnItemBehavior::DoNotReturn,
            ConditionCoupling::Empty,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DatabaseError::BadRequest(_)));
    assert_eq!(emulator.entity_count("things").await, 0);
}

#[tokio::test]
async fn non_numeric_counters_are_rejected() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let key = ItemKey::new("id", "x");
    store
        .put_item("things", &key, document(json!({ "n": "many" })), ReturnItemBehavior::DoNotReturn, false)
        .await
        .unwrap();

    let err = store
        .increment_attribute("things", &key, "n", 1.0, ConditionCoupling::Empty)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::BadRequest(_)));

    let err = store
        .increment_attribute("things", &key, "m", f64::NAN, ConditionCoupling::Empty)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::BadRequest(_)));
}

#[tokio::test]
async fn key_names_with_the_native_separator_are_rejected() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let users = store.table("users");
    let key = ItemKey::new("user:id", "42");

    let err = users
        .put_item(&key, document(json!({ "name": "ada" })), ReturnItemBehavior::DoNotReturn, true)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::BadRequest(_)));
    assert!(matches!(users.get_item(&key, None).await, Err(DatabaseError::BadRequest(_))));
    assert_eq!(emulator.entity_count("users").await, 0);

    // Values may still contain the separator.
    let key = ItemKey::new("id", "org:42");
    users
        .put_item(&key, document(json!({ "name": "ada" })), ReturnItemBehavior::DoNotReturn, true)
        .await
        .unwrap();
    let scanned = users.scan().await.unwrap();
    assert_eq!(scanned, vec![document(json!({ "id": "org:42", "name": "ada" }))]);
}

#[tokio::test]
async fn empty_page_tokens_start_from_the_beginning() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let items = store.table("items");
    for id in ["a", "b", "c"] {
        items
            .put_item(&ItemKey::new("id", id), Document::new(), ReturnItemBehavior::DoNotReturn, false)
            .await
            .unwrap();
    }

    let fresh = items.scan_paginated(2, None).await.unwrap();
    let empty = items.scan_paginated(2, Some(&PageToken::from(""))).await.unwrap();
    assert_eq!(empty.items, fresh.items);
    assert_eq!(empty.items.len(), 2);
    assert!(empty.next_page_token.is_some());

    let filtered = store
        .scan_table_with_filter_paginated(
            "items",
            5,
            Some(&PageToken::from("")),
            Condition::attribute_exists("id"),
        )
        .await
        .unwrap();
    assert_eq!(filtered.items.len(), 3);
}

#[tokio::test]
async fn integer_counters_stay_integers() {
    let emulator = DatastoreEmulator::new();
    let store = store(&emulator);
    let counters = store.table("counters");
    let key = ItemKey::new("id", "c");

    counters.increment_attribute(&key, "hits", 2.0, ConditionCoupling::Empty).await.unwrap();
    let value = counters.increment_attribute(&key, "hits", 3.0, ConditionCoupling::Empty).await.unwrap();
    assert_eq!(value, 5.0);

    let item = counters.get_item(&key, None).await.unwrap().unwrap();
    assert_eq!(item["hits"], json!(5));
    assert!(item["hits"].is_i64());
}

#[derive(Debug)]
struct FailingHooks;

#[async_trait]
impl ItemHooks for FailingHooks {
    async fn post_insert_item(&self, _table: &str, _key: &ItemKey) -> DatabaseResult<()> {
        Err(DatabaseError::ServiceUnavailable("search index is down".into()))
    }

    async fn post_drop_table(&self, _table: &str) -> DatabaseResult<()> {
        Err(DatabaseError::ServiceUnavailable("search index is down".into()))
    }
}

#[tokio::test]
async fn failing_hooks_are_reported() {
    init_tracing();
    let emulator = DatastoreEmulator::new();
    let service = DatastoreService::builder()
        .with_client(emulator.clone())
        .with_hooks(Arc::new(FailingHooks))
        .build()
        .await
        .unwrap();
    let store = DatabaseStore::new(service);
    let notes = store.table("notes");
    let key = ItemKey::new("id", "n-1");

    let err = notes
        .put_item(&key, document(json!({ "body": "a" })), ReturnItemBehavior::DoNotReturn, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ServiceUnavailable(_)));
    assert!(notes.get_item(&key, None).await.unwrap().is_some());

    // Overwrites are not creations, so the hook is not consulted.
    notes
        .put_item(&key, document(json!({ "body": "b" })), ReturnItemBehavior::DoNotReturn, true)
        .await
        .unwrap();

    let err = notes.drop_table().await.unwrap_err();
    assert!(matches!(err, DatabaseError::InternalServerError(_)));
    assert_eq!(err.status_code().as_u16(), 500);
    assert!(notes.scan().await.unwrap().is_empty());
}

#[derive(Debug)]
struct StalledHooks;

#[async_trait]
impl ItemHooks for StalledHooks {
    async fn post_insert_item(&self, _table: &str, _key: &ItemKey) -> DatabaseResult<()> {
        std::future::pending().await
    }

    async fn post_drop_table(&self, _table: &str) -> DatabaseResult<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_operations_in_flight() {
    init_tracing();
    let emulator = DatastoreEmulator::new();
    let service = DatastoreService::builder()
        .with_client(emulator.clone())
        .with_hooks(Arc::new(StalledHooks))
        .build()
        .await
        .unwrap();
    let store = DatabaseStore::new(service);
    let token = CancellationToken::new();
    let scoped = store.with_cancellation(token.clone());

    let key = ItemKey::new("id", "x");
    let (result, ()) = tokio::join!(
        scoped.put_item(
            "things",
            &key,
            document(json!({ "a": 1 })),
            ReturnItemBehavior::DoNotReturn,
            false,
        ),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        }
    );

    assert!(matches!(result, Err(DatabaseError::Cancelled(_))));
    assert!(matches!(
        scoped.item_exists("things", &ItemKey::new("id", "x"), ConditionCoupling::Empty).await,
        Err(DatabaseError::Cancelled(_))
    ));
}

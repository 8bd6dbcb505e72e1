//! End-to-end tests for the context hierarchy over an in-memory store.
//!
//! These tests verify:
//! - Insert/update/delete round trips through background transactions
//! - Isolation of uncommitted work between sibling contexts
//! - Empty commits produce no notification and no store write
//! - Merge policies settle conflicting property values

use mellon::{
    CommitOutcome, Context, ContextError, ContextHierarchy, Entity, EntityDescription, EntityRef,
    FieldKind, ManagedObject, MellonConfig, MellonError, MellonResult, MergePolicy, Operator,
    Schema, StoreMode, Value,
};

fn schema() -> Schema {
    Schema::new()
        .with_entity(
            EntityDescription::new("Fruit")
                .required("id", FieldKind::String)
                .optional("name", FieldKind::String)
                .optional("weight", FieldKind::Int),
        )
        .with_entity(EntityDescription::new("Basket").required("label", FieldKind::String))
}

fn open() -> ContextHierarchy {
    ContextHierarchy::open("fruits", StoreMode::InMemory, MellonConfig::default(), schema()).unwrap()
}

fn insert_fruit(ctx: &Context, id: &str, name: &str) -> MellonResult<ManagedObject> {
    let fruit = ctx.insert("Fruit")?;
    fruit.set("id", id)?;
    fruit.set("name", name)?;
    Ok(fruit)
}

#[derive(Debug, PartialEq)]
struct Fruit {
    id: String,
    name: Option<String>,
}

impl Entity for Fruit {
    const ENTITY_NAME: &'static str = "Fruit";

    fn from_object(object: &ManagedObject) -> MellonResult<Self> {
        let record = object.values()?;
        Ok(Self {
            id: record.get("id").as_string().unwrap_or_default().to_string(),
            name: record.get("name").as_string().map(str::to_string),
        })
    }
}

#[test]
fn test_round_trip_through_transaction() {
    let stores = open();
    stores
        .transaction(|ctx| insert_fruit(ctx, "u1", "Banana").map(|_| ()))
        .unwrap()
        .unwrap();

    let main = stores.main_context().unwrap();
    let found = main.query("Fruit").with("id", Operator::EqualTo, "u1").execute().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name").unwrap(), Value::from("Banana"));
}

#[test]
fn test_insert_update_delete_scenario() {
    let stores = open();
    let ids: Vec<String> = (0..6).map(|i| format!("id-{i}")).collect();

    let seed = ids.clone();
    stores
        .transaction(move |ctx| -> MellonResult<()> {
            for id in &seed {
                insert_fruit(ctx, id, &EntityRef::new().to_string())?;
            }
            Ok(())
        })
        .unwrap()
        .unwrap();

    let main = stores.main_context().unwrap();
    assert_eq!(main.query("Fruit").contained_in("id", ids.clone()).count().unwrap(), 6);

    let target = ids[2].clone();
    let lookup = target.clone();
    stores
        .transaction(move |ctx| -> MellonResult<()> {
            let fruit = ctx
                .query("Fruit")
                .equal_to("id", lookup.as_str())
                .first()?
                .ok_or_else(|| MellonError::internal("fruit not found"))?;
            fruit.set("name", "MELLON")
        })
        .unwrap()
        .unwrap();

    let updated = main.query("Fruit").equal_to("id", target.as_str()).first().unwrap().unwrap();
    assert_eq!(updated.get("name").unwrap(), Value::from("MELLON"));

    let keep = target.clone();
    let all = ids.clone();
    let deleted = stores
        .transaction(move |ctx| {
            ctx.query("Fruit")
                .not_equal_to("id", keep.as_str())
                .contained_in("id", all)
                .delete()
        })
        .unwrap()
        .unwrap();
    assert_eq!(deleted, 5);

    let remaining = main.query("Fruit").contained_in("id", ids.clone()).execute().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("name").unwrap(), Value::from("MELLON"));

    stores.drain().unwrap();
    let root = stores.root_context().unwrap();
    assert_eq!(root.query("Fruit").contained_in("id", ids).count().unwrap(), 1);
    assert_eq!(stores.stats().unwrap().rows, 1);
}

#[test]
fn test_count_matches_live_inserts() {
    let stores = open();
    stores
        .transaction(|ctx| -> MellonResult<()> {
            for i in 0..10 {
                let fruit = insert_fruit(ctx, &format!("f{i}"), "Kiwi")?;
                if i % 3 == 0 {
                    fruit.delete_sync()?;
                }
            }
            Ok(())
        })
        .unwrap()
        .unwrap();

    stores.drain().unwrap();
    let root = stores.root_context().unwrap();
    assert_eq!(root.query("Fruit").count().unwrap(), 6);
}

#[test]
fn test_uncommitted_changes_are_isolated() {
    let stores = open();
    let writer = stores.new_background_context().unwrap();
    let sibling = stores.new_background_context().unwrap();
    let main = stores.main_context().unwrap();

    insert_fruit(&writer, "u1", "Banana").unwrap();

    assert_eq!(writer.query("Fruit").count().unwrap(), 1);
    assert_eq!(sibling.query("Fruit").count().unwrap(), 0);
    assert_eq!(main.query("Fruit").count().unwrap(), 0);

    assert_eq!(writer.commit().unwrap(), CommitOutcome::Propagated { changes: 1 });
    assert_eq!(main.query("Fruit").count().unwrap(), 1);
    assert_eq!(sibling.query("Fruit").count().unwrap(), 1);
}

#[test]
fn test_empty_commit_is_a_no_op() {
    let stores = open();
    stores
        .transaction(|ctx| insert_fruit(ctx, "u1", "Banana").map(|_| ()))
        .unwrap()
        .unwrap();
    stores.drain().unwrap();

    let notifications = stores.notifications();
    let commits = stores.stats().unwrap().persisted_commits;

    let background = stores.new_background_context().unwrap();
    assert_eq!(background.commit().unwrap(), CommitOutcome::NoChanges);
    assert_eq!(stores.main_context().unwrap().commit().unwrap(), CommitOutcome::NoChanges);
    assert_eq!(stores.root_context().unwrap().commit().unwrap(), CommitOutcome::NoChanges);
    stores.transaction(|_| ()).unwrap();
    stores.drain().unwrap();

    assert_eq!(stores.notifications(), notifications);
    assert_eq!(stores.stats().unwrap().persisted_commits, commits);
}

#[test]
fn test_panicking_transaction_commits_nothing() {
    let stores = open();
    let result: MellonResult<()> = stores.transaction(|ctx| {
        insert_fruit(ctx, "u1", "Banana").unwrap();
        panic!("block failed");
    });

    assert!(matches!(
        result,
        Err(MellonError::Context(ContextError::TransactionPanicked { .. }))
    ));
    stores.drain().unwrap();
    assert_eq!(stores.main_context().unwrap().query("Fruit").count().unwrap(), 0);
}

#[test]
fn test_missing_required_field_keeps_changes_pending() {
    let stores = open();
    let background = stores.new_background_context().unwrap();
    let fruit = background.insert("Fruit").unwrap();
    fruit.set("name", "Nameless").unwrap();

    let err = background.commit().unwrap_err();
    assert!(err.is_validation());
    assert!(background.has_changes().unwrap());

    fruit.set("id", "u9").unwrap();
    assert_eq!(background.commit().unwrap(), CommitOutcome::Propagated { changes: 1 });
    assert!(!background.has_changes().unwrap());
}

#[test]
fn test_property_level_merge_keeps_both_edits() {
    let stores = open();
    let fruit_ref = stores
        .transaction(|ctx| insert_fruit(ctx, "u1", "Banana").map(|f| f.entity_ref()))
        .unwrap()
        .unwrap();
    stores.drain().unwrap();

    let first = stores.new_background_context().unwrap();
    let second = stores.new_background_context().unwrap();
    first.object(fruit_ref).unwrap().set("name", "Plantain").unwrap();
    second.object(fruit_ref).unwrap().set("weight", 120).unwrap();
    first.commit().unwrap();
    second.commit().unwrap();
    stores.drain().unwrap();

    let root = stores.root_context().unwrap();
    let record = root.object(fruit_ref).unwrap().values().unwrap();
    assert_eq!(record.get("name"), &Value::from("Plantain"));
    assert_eq!(record.get("weight"), &Value::Int(120));
}

#[test]
fn test_first_committer_wins_keeps_parent_value() {
    let stores = open();
    let fruit_ref = stores
        .transaction(|ctx| insert_fruit(ctx, "u1", "Banana").map(|f| f.entity_ref()))
        .unwrap()
        .unwrap();
    stores.drain().unwrap();

    let main = stores.main_context().unwrap();
    main.object(fruit_ref).unwrap().set("name", "FromMain").unwrap();

    let background = stores
        .new_background_context_with(MergePolicy::FirstCommitterWins)
        .unwrap();
    background.object(fruit_ref).unwrap().set("name", "FromBackground").unwrap();
    background.commit().unwrap();

    let name = main.object(fruit_ref).unwrap().get("name").unwrap();
    assert_eq!(name, Value::from("FromMain"));
}

#[test]
fn test_parent_copy_is_refreshed_after_child_commit() {
    let stores = open();
    let fruit_ref = stores
        .transaction(|ctx| insert_fruit(ctx, "u1", "Banana").map(|f| f.entity_ref()))
        .unwrap()
        .unwrap();

    let main = stores.main_context().unwrap();
    let seen_by_main = main.object(fruit_ref).unwrap();
    assert_eq!(seen_by_main.get("name").unwrap(), Value::from("Banana"));

    let background = stores.new_background_context().unwrap();
    seen_by_main.in_context(&background).unwrap().set("name", "Plantain").unwrap();
    assert_eq!(seen_by_main.get("name").unwrap(), Value::from("Banana"));

    background.commit().unwrap();
    assert_eq!(seen_by_main.get("name").unwrap(), Value::from("Plantain"));
}

#[test]
fn test_deleted_object_reports_deleted() {
    let stores = open();
    let background = stores.new_background_context().unwrap();
    let fruit_ref = stores
        .transaction(|ctx| insert_fruit(ctx, "u1", "Banana").map(|f| f.entity_ref()))
        .unwrap()
        .unwrap();

    let fruit = background.object(fruit_ref).unwrap();
    fruit.delete().unwrap();
    assert!(matches!(
        fruit.get("name"),
        Err(MellonError::Context(ContextError::ObjectDeleted(r))) if r == fruit_ref
    ));
    assert!(matches!(
        background.object(EntityRef::new()),
        Err(MellonError::Context(ContextError::ObjectNotFound(_)))
    ));
}

#[test]
fn test_rollback_discards_pending_changes() {
    let stores = open();
    let background = stores.new_background_context().unwrap();
    insert_fruit(&background, "u1", "Banana").unwrap();
    assert!(background.has_changes().unwrap());

    background.rollback().unwrap();
    assert!(!background.has_changes().unwrap());
    assert_eq!(background.query("Fruit").count().unwrap(), 0);
}

#[test]
fn test_typed_entity_contract() {
    let stores = open();
    stores
        .transaction(|ctx| -> MellonResult<()> {
            let fruit = Fruit::create(ctx)?;
            fruit.set("id", "t1")?;
            fruit.set("name", "Fig")
        })
        .unwrap()
        .unwrap();

    let main = stores.main_context().unwrap();
    let fruits: Vec<Fruit> = Fruit::query(&main).execute_as().unwrap();
    assert_eq!(
        fruits,
        vec![Fruit {
            id: "t1".to_string(),
            name: Some("Fig".to_string()),
        }]
    );
}

#[test]
fn test_schema_rejects_mismatched_values() {
    let stores = open();
    let background = stores.new_background_context().unwrap();
    let fruit = background.insert("Fruit").unwrap();

    assert!(fruit.set("weight", "heavy").unwrap_err().is_validation());
    assert!(fruit.set("colour", "yellow").unwrap_err().is_validation());
    assert!(background.insert("Vegetable").unwrap_err().is_validation());
}

#[test]
fn test_save_changes_persists_main_edits() {
    let stores = open();
    let main = stores.main_context().unwrap();
    insert_fruit(&main, "m1", "Mango").unwrap();

    stores.save_changes().unwrap();
    stores.drain().unwrap();
    assert!(!main.has_changes().unwrap());
    assert_eq!(stores.stats().unwrap().rows, 1);
}

#[test]
fn test_nested_transactions_complete() {
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    let stores = Arc::new(open());
    let (tx, rx) = mpsc::channel();

    let outer = Arc::clone(&stores);
    std::thread::spawn(move || {
        let middle = Arc::clone(&outer);
        let result = outer.transaction(move |_| {
            let inner = Arc::clone(&middle);
            middle.transaction(move |_| {
                inner.transaction(|ctx| insert_fruit(ctx, "n1", "Nested").map(|_| ()))
            })
        });
        let _ = tx.send(matches!(result, Ok(Ok(Ok(Ok(()))))));
    });

    let finished = rx.recv_timeout(Duration::from_secs(10));
    assert_eq!(finished, Ok(true), "nested transactions did not finish");

    stores.drain().unwrap();
    let main = stores.main_context().unwrap();
    assert_eq!(main.query("Fruit").equal_to("id", "n1").count().unwrap(), 1);
    assert_eq!(stores.stats().unwrap().rows, 1);
}

#[test]
fn test_sibling_background_contexts_run_on_distinct_lanes() {
    let stores = open();
    let first = stores.new_background_context().unwrap();
    let second = stores.new_background_context().unwrap();

    let first_thread = first.perform_and_wait(|_| std::thread::current().id()).unwrap();
    let second_thread = second.perform_and_wait(|_| std::thread::current().id()).unwrap();
    assert_ne!(first_thread, second_thread);
}

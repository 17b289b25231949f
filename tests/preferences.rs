use std::sync::Arc;

use chrono::DateTime;
use uuid::Uuid;

use autobind::config::{EngineConfig, RunnerKind, StoreKind};
use autobind::context::{BindingContext, Specifier};
use autobind::error::AutobindError;
use autobind::persist::{PersistenceMode, SqliteStore};
use autobind::prefs::{LaunchPrefs, Preferences, PreferencesManager};
use autobind::schema::{ClassSchema, SchemaRegistry, ValueType};
use autobind::services::Services;
use autobind::store::{MemoryStore, ValueStore};
use autobind::value::{ObjectRef, Record, Value};

fn config(store: StoreKind) -> EngineConfig {
    EngineConfig { runner: RunnerKind::Inline, delay_quantum_ms: 60_000, store, ..Default::default() }
}

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        ClassSchema::new("demo.Counter")
            .field("label", ValueType::Str)
            .method("getCount", None, Some(ValueType::Int))
            .method("setCount", Some(ValueType::Int), None)
            .field("tags", ValueType::list_of(ValueType::Str)),
    );
    registry
}

fn counter() -> ObjectRef {
    Record::new("demo.Counter")
        .with_field("label", "clicks")
        .with_field("count", 0i64)
        .with_field("tags", Value::Null)
        .with_method("getCount", |r, _| Ok(r.field("count")))
        .with_method("setCount", |r, args| {
            r.put("count", args.into_iter().next().unwrap_or(Value::Null));
            Ok(Value::Null)
        })
        .into_ref()
}

fn bind(services: &Arc<Services>, object: ObjectRef) -> Arc<BindingContext> {
    BindingContext::bind_root(services, &registry(), &ValueType::Object("demo.Counter".into()), Value::Object(object))
        .expect("bind")
}

fn edit(root: &Arc<BindingContext>, path: &str, value: Value) {
    let ctx = root.find(path).expect(path);
    let outcome = ctx.execute_edit(value, &Specifier::none(), ctx.clock().next()).expect("edit");
    assert!(outcome.wait().expect("setter"));
}

fn label_of(root: &Arc<BindingContext>) -> Value {
    root.refresh_from_root(None);
    root.find("label").expect("label").current_value(&Specifier::none()).expect("label")
}

fn values_are_stored_under_the_type_node(services: Arc<Services>) {
    let root = bind(&services, counter());
    edit(&root, "label", Value::Str("taps".into()));
    let manager = PreferencesManager::new(Arc::clone(&root));
    assert_eq!(manager.store_values().expect("store"), 2);

    let store = services.store();
    let label = "/demo/Counter/$default/label";
    assert_eq!(store.get(label, "$value").expect("get"), Some("\"taps\"".to_string()));
    assert_eq!(store.get("/demo/Counter/$default/count", "$value").expect("get"), Some("0".to_string()));
    let slot = "/demo/Counter/$default/label/$history/0";
    assert_eq!(store.get(slot, "value").expect("get"), Some("\"taps\"".to_string()));
    assert_eq!(store.get(slot, "index").expect("get"), Some("0".to_string()));
    let time = store.get(slot, "time").expect("get").expect("time");
    assert!(DateTime::parse_from_rfc3339(&time).is_ok());
    // collections keep no values
    assert!(!store.node_exists("/demo/Counter/$default/tags").expect("exists"));
    root.shutdown();

    // a fresh object picks the stored values up
    let again = bind(&services, counter());
    let applied = PreferencesManager::new(Arc::clone(&again)).apply_values().expect("apply");
    assert_eq!(applied, 2);
    assert_eq!(label_of(&again), Value::Str("taps".into()));
    again.shutdown();
}

#[test]
fn memory_store_layout() {
    values_are_stored_under_the_type_node(Services::new(config(StoreKind::Memory)).expect("services"));
}

#[test]
fn sqlite_store_layout() {
    values_are_stored_under_the_type_node(Services::new(config(StoreKind::Sqlite)).expect("services"));
}

#[test]
fn snapshots_save_load_and_remove() {
    let services = Services::new(config(StoreKind::Memory)).expect("services");
    let root = bind(&services, counter());
    let manager = PreferencesManager::new(Arc::clone(&root));
    edit(&root, "label", Value::Str("first".into()));
    let uuid = manager.save_snapshot("morning").expect("save");
    assert!(Uuid::parse_str(&uuid).is_ok());

    let snapshots = manager.saved_snapshots().expect("list");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].number, 0);
    assert_eq!(snapshots[0].name, "morning");
    let saved = services.store();
    assert_eq!(
        saved.get("/demo/Counter/$saved/0/label", "$value").expect("get"),
        Some("\"first\"".to_string())
    );

    edit(&root, "label", Value::Str("second".into()));
    assert_eq!(label_of(&root), Value::Str("second".into()));
    assert!(manager.load_snapshot(&uuid).expect("load") >= 1);
    assert_eq!(label_of(&root), Value::Str("first".into()));

    let second = manager.save_snapshot("evening").expect("save");
    assert_eq!(manager.saved_snapshots().expect("list")[1].number, 1);
    manager.set_launch_prefs(&LaunchPrefs::Saved(second.clone())).expect("launch");
    assert_eq!(manager.launch_prefs().expect("launch"), LaunchPrefs::Saved(second.clone()));

    assert!(manager.remove_snapshot(&second).expect("remove"));
    assert!(!manager.remove_snapshot(&second).expect("remove again"));
    assert_eq!(manager.launch_prefs().expect("launch"), LaunchPrefs::Default);
    assert!(matches!(manager.load_snapshot(&second), Err(AutobindError::Store(_))));
    root.shutdown();
}

#[test]
fn launch_prefs_select_what_is_applied() {
    let services = Services::new(config(StoreKind::Memory)).expect("services");
    let root = bind(&services, counter());
    let manager = PreferencesManager::new(Arc::clone(&root));
    edit(&root, "label", Value::Str("stored".into()));
    manager.store_values().expect("store");
    root.shutdown();

    let fresh = bind(&services, counter());
    let manager = PreferencesManager::new(Arc::clone(&fresh));
    manager.set_launch_prefs(&LaunchPrefs::Empty).expect("launch");
    assert_eq!(manager.apply_launch_prefs().expect("apply"), 0);
    assert_eq!(label_of(&fresh), Value::Str("clicks".into()));

    manager.set_launch_prefs(&LaunchPrefs::Default).expect("launch");
    assert!(manager.apply_launch_prefs().expect("apply") >= 1);
    assert_eq!(label_of(&fresh), Value::Str("stored".into()));

    manager.reset_to_default().expect("reset");
    assert!(!services.store().node_exists("/demo/Counter/$default").expect("exists"));
    assert!(fresh.find("label").expect("label").history_values().expect("history").is_empty());
    fresh.shutdown();
}

#[test]
fn entries_and_nodes_do_not_share_names() {
    for store in [
        Arc::new(MemoryStore::default()) as Arc<dyn ValueStore>,
        Arc::new(SqliteStore::open(PersistenceMode::InMemory, 8192).expect("db")) as Arc<dyn ValueStore>,
    ] {
        let prefs = Preferences::new(store, "/app/Thing");
        prefs.put_string("size", "3").expect("put");
        assert!(matches!(prefs.child("size").put_string("x", "1"), Err(AutobindError::Namespace(_))));
        prefs.child("layout").put_string("x", "1").expect("put");
        assert!(matches!(prefs.put_string("layout", "2"), Err(AutobindError::Namespace(_))));
        assert!(prefs.has_entry_key("size").expect("entry"));
        assert!(prefs.has_node_key("layout").expect("node"));
        assert_eq!(prefs.get_int("size").expect("int"), Some(3));

        prefs.remove_this_node().expect("remove");
        assert!(!prefs.exists().expect("exists"));
        assert!(!prefs.child("layout").exists().expect("exists"));
    }
}

#[test]
fn sqlite_file_mode_survives_reopening() {
    let path = "test_autobind_prefs.db".to_string();
    // Ensure clean start
    let _ = std::fs::remove_file(&path);
    {
        let store = SqliteStore::open(PersistenceMode::File(path.clone()), 8192).expect("db");
        store.put("/demo/Counter/$default/label", "$value", "\"kept\"").expect("put");
        store.flush().expect("flush");
    }
    let store = SqliteStore::open(PersistenceMode::File(path.clone()), 8192).expect("db");
    assert_eq!(
        store.get("/demo/Counter/$default/label", "$value").expect("get"),
        Some("\"kept\"".to_string())
    );
    assert_eq!(store.children("/demo/Counter").expect("children"), vec!["$default"]);
    let too_long = "x".repeat(9000);
    assert!(matches!(
        store.put("/demo", "big", &too_long),
        Err(AutobindError::ValueTooLarge { length: 9000, limit: 8192 })
    ));
    drop(store);
    // Clean up
    let _ = std::fs::remove_file(&path);
}

use std::path::PathBuf;
use std::sync::Arc;

use autobind::config::{EngineConfig, RunnerKind};
use autobind::context::{BindingContext, Role};
use autobind::matcher::match_context;
use autobind::repr::{NumberKind, Representation};
use autobind::schema::{ClassSchema, EnumSpec, SchemaRegistry, ValueType};
use autobind::services::Services;
use autobind::value::{EnumValue, ListRef, Record, Value};

fn services() -> Arc<Services> {
    let config = EngineConfig { runner: RunnerKind::Inline, delay_quantum_ms: 60_000, ..Default::default() };
    Services::new(config).expect("services")
}

fn settings_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register_enum(EnumSpec::new("app.Mode", &["Fast", "Safe"]));
    registry.register(ClassSchema::new("app.Secret").excluded());
    registry.register(
        ClassSchema::new("app.Settings")
            .field("enabled", ValueType::Bool)
            .field("mode", ValueType::Enum("app.Mode".into()))
            .field("size", ValueType::Int)
            .field("big", ValueType::BigInt)
            .field("ratio", ValueType::Float)
            .field("price", ValueType::Decimal)
            .field("home", ValueType::Path)
            .field("title", ValueType::Str)
            .field("secret", ValueType::Object("app.Secret".into()))
            .method("apply", None, None)
            .method("drop", Some(ValueType::list_of(ValueType::Str)), None),
    );
    registry
}

fn settings() -> Value {
    let secret = Record::new("app.Secret").into_ref();
    Value::Object(
        Record::new("app.Settings")
            .with_field("enabled", true)
            .with_field("mode", Value::Enum(EnumValue::new("app.Mode", "Fast")))
            .with_field("size", 3i64)
            .with_field("big", Value::Null)
            .with_field("ratio", 0.5)
            .with_field("price", Value::Null)
            .with_field("home", Value::Path(PathBuf::from("/tmp")))
            .with_field("title", "demo")
            .with_field("secret", Value::Object(secret))
            .into_ref(),
    )
}

fn representation_of(root: &Arc<BindingContext>, path: &str) -> Representation {
    root.find(path)
        .unwrap_or_else(|| panic!("no context at {path}"))
        .representation()
        .cloned()
        .unwrap_or_else(|| panic!("{path} is unclaimed"))
}

#[test]
fn leaf_kinds_claim_their_members() {
    let registry = settings_registry();
    let root = BindingContext::bind_root(&services(), &registry, &ValueType::Object("app.Settings".into()), settings())
        .expect("bind");
    assert_eq!(root.representation(), Some(&Representation::ObjectPane));
    assert_eq!(representation_of(&root, "enabled"), Representation::Boolean);
    assert!(matches!(representation_of(&root, "mode"), Representation::Enum(spec) if spec.name == "app.Mode"));
    assert_eq!(representation_of(&root, "size"), Representation::Number(NumberKind::Int));
    assert_eq!(representation_of(&root, "big"), Representation::Number(NumberKind::BigInt));
    assert_eq!(representation_of(&root, "ratio"), Representation::Number(NumberKind::Float));
    assert_eq!(representation_of(&root, "price"), Representation::Number(NumberKind::Decimal));
    assert_eq!(representation_of(&root, "home"), Representation::Path);
    assert_eq!(representation_of(&root, "title"), Representation::Str);
    assert_eq!(representation_of(&root, "secret"), Representation::Label);
    assert_eq!(representation_of(&root, "apply"), Representation::Action);
    assert_eq!(representation_of(&root, "drop"), Representation::ActionList);
    root.shutdown();
}

#[test]
fn matching_twice_changes_nothing() {
    let registry = settings_registry();
    let root = BindingContext::bind_root(&services(), &registry, &ValueType::Object("app.Settings".into()), settings())
        .expect("bind");
    let before = root.count();
    assert!(match_context(&root));
    let size = root.find("size").expect("size");
    assert!(match_context(&size));
    assert_eq!(root.count(), before);
    assert_eq!(representation_of(&root, "size"), Representation::Number(NumberKind::Int));
    root.shutdown();
}

fn library_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(ClassSchema::new("app.Address").field("street", ValueType::Str));
    registry.register(
        ClassSchema::new("app.Library")
            .field("name", ValueType::Str)
            .field("address", ValueType::Object("app.Address".into()))
            .field("tags", ValueType::list_of(ValueType::Str)),
    );
    registry.register(
        ClassSchema::new("app.Branch")
            .field("name", ValueType::Str)
            .field("address", ValueType::Object("app.Address".into())),
    );
    registry
}

fn library(class: &str) -> Value {
    let address = Record::new("app.Address").with_field("street", "Main").into_ref();
    Value::Object(
        Record::new(class)
            .with_field("name", "central")
            .with_field("address", Value::Object(address))
            .with_field("tags", Value::List(ListRef::new(vec!["a".into(), "b".into()])))
            .into_ref(),
    )
}

#[test]
fn two_nested_members_make_a_tabbed_pane() {
    let registry = library_registry();
    let root = BindingContext::bind_root(&services(), &registry, &ValueType::Object("app.Library".into()), library("app.Library"))
        .expect("bind");
    assert_eq!(root.representation(), Some(&Representation::TabbedPane));
    assert_eq!(representation_of(&root, "address"), Representation::PropertyPane);
    assert_eq!(representation_of(&root, "address/street"), Representation::Str);
    assert_eq!(representation_of(&root, "tags"), Representation::CollectionTable);

    let address = root.find("address").expect("address");
    let inner = address.children().into_iter().next().expect("inner");
    assert_eq!(inner.role(), Role::Inner);
    assert_eq!(inner.representation(), Some(&Representation::ObjectPane));

    let tags = root.find("tags").expect("tags");
    let element = tags.element_context().expect("element");
    assert_eq!(element.representation(), Some(&Representation::CollectionElement));
    assert!(element.in_collection());
    root.shutdown();

    let branch = BindingContext::bind_root(&services(), &registry, &ValueType::Object("app.Branch".into()), library("app.Branch"))
        .expect("bind");
    assert_eq!(branch.representation(), Some(&Representation::ObjectPane));
    branch.shutdown();
}

fn node_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        ClassSchema::new("app.Node")
            .field("name", ValueType::Str)
            .field("parent", ValueType::Object("app.Node".into()))
            .field("children", ValueType::list_of(ValueType::Object("app.Node".into()))),
    );
    registry
}

fn node(name: &str, children: Vec<Value>) -> Value {
    Value::Object(
        Record::new("app.Node")
            .with_field("name", name)
            .with_field("parent", Value::Null)
            .with_field("children", Value::List(ListRef::new(children)))
            .into_ref(),
    )
}

#[test]
fn recursive_types_expand_once() {
    let registry = node_registry();
    let tree = node("root", vec![node("leaf", Vec::new())]);
    let root = BindingContext::bind_root(&services(), &registry, &ValueType::Object("app.Node".into()), tree)
        .expect("bind");
    assert!(root.find("parent").is_none());

    let children = root.find("children").expect("children");
    assert_eq!(children.representation(), Some(&Representation::CollectionTable));
    assert!(children.element_context().is_some());

    // one level below, the element type repeats: the table stays without columns
    let nested = root.find("children/children").expect("nested table");
    assert_eq!(nested.representation(), Some(&Representation::CollectionTable));
    assert!(nested.element_context().is_none());
    assert!(root.find("children/parent").is_none());

    let cell = root.find("children/name").expect("cell");
    assert!(cell.in_collection());
    assert!(cell.preferences().is_none());
    root.shutdown();
}

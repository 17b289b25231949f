use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use serde_json::json;

use autobind::config::{EngineConfig, RunnerKind};
use autobind::context::{BindingContext, Specifier};
use autobind::schema::{ClassSchema, EnumSpec, SchemaRegistry, ValueType};
use autobind::services::Services;
use autobind::value::{EnumValue, ListRef, ObjectRef, Record, Value};

fn services() -> Arc<Services> {
    let config = EngineConfig { runner: RunnerKind::Inline, delay_quantum_ms: 60_000, ..Default::default() };
    Services::new(config).expect("services")
}

fn record_factory(class: &'static str) -> impl Fn() -> ObjectRef + Send + Sync + 'static {
    move || Record::new(class).into_ref()
}

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register_enum(EnumSpec::new("app.Mode", &["Fast", "Safe"]));
    registry.register(
        ClassSchema::new("app.Sample")
            .field("flag", ValueType::Bool)
            .field("mode", ValueType::Enum("app.Mode".into()))
            .field("small", ValueType::Int)
            .field("big", ValueType::BigInt)
            .field("ratio", ValueType::Float)
            .field("price", ValueType::Decimal)
            .field("home", ValueType::Path)
            .field("title", ValueType::Str)
            .factory(record_factory("app.Sample")),
    );
    registry.register(
        ClassSchema::new("app.Line")
            .field("sku", ValueType::Str)
            .field("qty", ValueType::Int)
            .factory(record_factory("app.Line")),
    );
    registry.register(
        ClassSchema::new("app.Order")
            .field("customer", ValueType::Str)
            .field("sample", ValueType::Object("app.Sample".into()))
            .field("lines", ValueType::list_of(ValueType::Object("app.Line".into())))
            .field("notes", ValueType::list_of(ValueType::Str))
            .method("submit", None, None)
            .factory(record_factory("app.Order")),
    );
    registry
}

fn sample() -> Value {
    Value::Object(
        Record::new("app.Sample")
            .with_field("flag", true)
            .with_field("mode", Value::Enum(EnumValue::new("app.Mode", "Safe")))
            .with_field("small", -42i64)
            .with_field("big", Value::BigInt(BigInt::from_str("123456789012345678901234567890").unwrap()))
            .with_field("ratio", 0.25)
            .with_field(
                "price",
                Value::Decimal(BigDecimal::from_str("3.14159265358979323846264338327950288").unwrap()),
            )
            .with_field("home", Value::Path(PathBuf::from("/home/demo")))
            .with_field("title", "tab\there")
            .into_ref(),
    )
}

fn line(sku: &str, qty: i64) -> Value {
    Value::Object(Record::new("app.Line").with_field("sku", sku).with_field("qty", qty).into_ref())
}

fn order() -> Value {
    Value::Object(
        Record::new("app.Order")
            .with_field("customer", "ada")
            .with_field("sample", sample())
            .with_field("lines", Value::List(ListRef::new(vec![line("A-1", 2), line("B-7", 1)])))
            .with_field("notes", Value::List(ListRef::new(vec!["fragile".into()])))
            .into_ref(),
    )
}

fn bind(value: Value, class: &str) -> Arc<BindingContext> {
    BindingContext::bind_root(&services(), &registry(), &ValueType::Object(class.into()), value).expect("bind")
}

#[test]
fn leaf_values_survive_json() {
    let root = bind(sample(), "app.Sample");
    for name in ["flag", "mode", "small", "big", "ratio", "price", "home", "title"] {
        let ctx = root.find(name).expect(name);
        let value = ctx.current_value(&Specifier::none()).expect("value");
        let json = ctx.to_json(&value);
        assert_eq!(ctx.from_json(&json, &Value::Null).expect("from json"), value, "{name}");
    }
    // large numbers travel as strings so no digit is lost
    let big = root.find("big").expect("big");
    let json = big.to_json(&big.current_value(&Specifier::none()).expect("value"));
    assert_eq!(json, json!("123456789012345678901234567890"));
    root.shutdown();
}

#[test]
fn malformed_leaf_json_reads_as_null() {
    let root = bind(sample(), "app.Sample");
    let small = root.find("small").expect("small");
    assert_eq!(small.from_json(&json!("not a number"), &Value::Null).expect("lenient"), Value::Null);
    let mode = root.find("mode").expect("mode");
    assert_eq!(mode.from_json(&json!("Unknown"), &Value::Null).expect("lenient"), Value::Null);
    root.shutdown();
}

#[test]
fn nested_objects_and_collections_round_trip() {
    let root = bind(order(), "app.Order");
    let value = root.current_value(&Specifier::none()).expect("value");
    let json = root.to_json(&value);
    assert_eq!(json["customer"], json!("ada"));
    assert_eq!(json["lines"][1], json!({"sku": "B-7", "qty": 1}));
    assert_eq!(json["notes"], json!(["fragile"]));
    assert_eq!(json["sample"]["mode"], json!("Safe"));
    assert!(json.get("submit").is_none());

    let copy = root.from_json(&json, &Value::Null).expect("from json");
    let fresh = copy.as_object().expect("object");
    assert!(!fresh.ptr_eq(value.as_object().expect("object")));
    assert_eq!(root.to_json(&copy), json);
    root.shutdown();
}

#[test]
fn json_fills_an_existing_target_in_place() {
    let root = bind(order(), "app.Order");
    let value = root.current_value(&Specifier::none()).expect("value");
    let lines = root.find("lines").expect("lines");
    let list = lines.current_value(&Specifier::none()).expect("lines");
    let updated = lines
        .from_json(&json!([{"sku": "C-3", "qty": 9}]), &list)
        .expect("from json");
    assert_eq!(updated, list);
    assert_eq!(list.as_list().expect("list").len(), 1);

    let filled = root.from_json(&json!({"customer": "grace"}), &value).expect("from json");
    assert!(filled.as_object().expect("object").ptr_eq(value.as_object().expect("object")));
    let owner = value.as_object().expect("object");
    assert_eq!(owner.get_field("customer").expect("customer"), Value::Str("grace".into()));
    root.shutdown();
}

#[test]
fn flat_text_uses_tabs_and_newlines() {
    let root = bind(order(), "app.Order");
    let lines = root.find("lines").expect("lines");
    let list = lines.current_value(&Specifier::none()).expect("lines");
    assert_eq!(lines.to_human_readable(&list), "A-1\t2\nB-7\t1");

    let parsed = lines.from_human_readable("Z-9\t4\nY-2\t", &Value::Null).expect("parse");
    let rows = parsed.as_list().expect("list").snapshot();
    assert_eq!(rows.len(), 2);
    let second = rows[1].as_object().expect("row");
    assert_eq!(second.get_field("sku").expect("sku"), Value::Str("Y-2".into()));
    assert_eq!(second.get_field("qty").expect("qty"), Value::Null);

    // cell text never carries separators
    let sample_ctx = root.find("sample").expect("sample");
    let sample_value = sample_ctx.current_value(&Specifier::none()).expect("sample");
    let text = sample_ctx.to_human_readable(&sample_value);
    assert_eq!(text.split('\t').count(), 8);
    assert!(text.contains("tab here"));
    root.shutdown();
}

#[test]
fn label_members_are_not_written_back() {
    let mut registry = SchemaRegistry::new();
    registry.register(ClassSchema::new("app.Secret").field("pin", ValueType::Int).excluded());
    registry.register(
        ClassSchema::new("app.Box")
            .field("title", ValueType::Str)
            .field("secret", ValueType::Object("app.Secret".into())),
    );
    let secret = Record::new("app.Secret").with_field("pin", 1234i64).into_ref();
    let boxed = Record::new("app.Box")
        .with_field("title", "t")
        .with_field("secret", Value::Object(secret.clone()))
        .into_ref();
    let value = Value::Object(boxed.clone());
    let root = BindingContext::bind_root(&services(), &registry, &ValueType::Object("app.Box".into()), value.clone())
        .expect("bind");

    let json = root.to_json(&value);
    assert_eq!(json, json!({"title": "t", "secret": "app.Secret"}));
    root.from_json(&json!({"title": "u", "secret": "app.Secret"}), &value).expect("from json");
    assert_eq!(boxed.get_field("title").expect("title"), Value::Str("u".into()));
    let kept = boxed.get_field("secret").expect("secret");
    assert!(kept.as_object().expect("secret stays an object").ptr_eq(&secret));

    let text = root.to_human_readable(&value);
    assert_eq!(text, "u\tapp.Secret");
    root.from_human_readable("v\tsomething else", &value).expect("parse");
    assert_eq!(boxed.get_field("title").expect("title"), Value::Str("v".into()));
    assert!(boxed.get_field("secret").expect("secret").as_object().expect("object").ptr_eq(&secret));
    root.shutdown();
}

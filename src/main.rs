use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autobind::config::EngineConfig;
use autobind::context::{BindingContext, Specifier};
use autobind::error::Result;
use autobind::prefs::PreferencesManager;
use autobind::schema::{ClassSchema, SchemaRegistry, ValueType};
use autobind::services::Services;
use autobind::value::{Record, Value};

fn counter_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(
        ClassSchema::new("demo.Counter")
            .field("label", ValueType::Str)
            .method("getCount", None, Some(ValueType::Int))
            .method("setCount", Some(ValueType::Int), None)
            .method("increment", None, None)
            .factory(counter),
    );
    registry
}

fn counter() -> autobind::value::ObjectRef {
    Record::new("demo.Counter")
        .with_field("label", "clicks")
        .with_field("count", 0i64)
        .with_method("getCount", |r, _| Ok(r.field("count")))
        .with_method("setCount", |r, args| {
            r.put("count", args.into_iter().next().unwrap_or(Value::Null));
            Ok(Value::Null)
        })
        .with_method("increment", |r, _| {
            let next = r.field("count").as_i64().unwrap_or(0) + 1;
            r.put("count", Value::Int(next));
            Ok(Value::Null)
        })
        .into_ref()
}

fn run(config: EngineConfig) -> Result<()> {
    let services = Services::new(config)?;
    let registry = counter_registry();
    let root = BindingContext::bind_root(
        &services,
        &registry,
        &ValueType::Object("demo.Counter".into()),
        Value::Object(counter()),
    )?;
    let manager = PreferencesManager::new(Arc::clone(&root));
    let restored = manager.apply_launch_prefs()?;
    info!(restored, "launch preferences applied");

    let count = root
        .find("count")
        .ok_or_else(|| autobind::error::AutobindError::Schema("counter has no count".into()))?;
    count.add_update_listener(|event| {
        info!(value = %event.value, clock = %event.clock, "count changed");
    });
    root.refresh_from_root(None);

    let edit = count.execute_edit(Value::Int(5), &Specifier::none(), count.clock().next())?;
    edit.wait()?;
    root.refresh_from_root(None);

    if let Some(increment) = root.find("increment") {
        increment.execute_action(&Specifier::none())?.get()?;
        root.refresh_from_root(None);
    }

    let json = root.to_json(&root.current_value(&Specifier::none())?);
    info!(%json, "counter state");
    manager.store_values()?;
    root.shutdown();
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "autobind=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match EngineConfig::load("autobind") {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = run(config) {
        error!(error = %e, "demo failed");
        std::process::exit(1);
    }
}

//! Autobind – keeps live objects and their views in sync.
//!
//! Autobind inspects a bound object graph through declared class schemas,
//! decides what every member represents, and then propagates changes both
//! ways: object to view through tree refreshes, view to object through
//! clock-checked edits.
//!
//! ## Modules
//! * [`schema`] – Declarative class and enum schemas plus the [`schema::SchemaRegistry`].
//! * [`value`] – The dynamic [`value::Value`], the [`value::DynObject`] trait and the ready-made [`value::Record`].
//! * [`construct`] – The type model: classes reflected into properties, actions, collections and values.
//! * [`repr`] – The closed set of representations and their value conversions (source, JSON, flat text).
//! * [`matcher`] – Ordered rules that claim contexts and build the context tree.
//! * [`context`] – The [`context::BindingContext`] tree: cached values, clocks, listeners, edits and actions.
//! * [`update`] – Root refreshes and deferred refresh scheduling.
//! * [`task`] – Inline and pooled runners used for user code.
//! * [`delay`] – Delay queue coalescing bursts of work per task type.
//! * [`prefs`] – Preference nodes, bounded value histories and saved snapshots.
//! * [`store`] / [`persist`] – In-memory and SQLite backends for preferences.
//! * [`services`] – Shared services injected into every bound tree.
//!
//! ## Quick Start
//! ```
//! use autobind::config::{EngineConfig, RunnerKind};
//! use autobind::context::{BindingContext, Specifier};
//! use autobind::schema::{ClassSchema, SchemaRegistry, ValueType};
//! use autobind::services::Services;
//! use autobind::value::{Record, Value};
//!
//! let mut registry = SchemaRegistry::new();
//! registry.register(ClassSchema::new("demo.Counter").field("count", ValueType::Int));
//! let config = EngineConfig { runner: RunnerKind::Inline, ..Default::default() };
//! let services = Services::new(config).unwrap();
//! let counter = Record::new("demo.Counter").with_field("count", 1i64).into_ref();
//! let root = BindingContext::bind_root(
//!     &services,
//!     &registry,
//!     &ValueType::Object("demo.Counter".into()),
//!     Value::Object(counter),
//! )
//! .unwrap();
//! let count = root.find("count").unwrap();
//! assert_eq!(count.current_value(&Specifier::none()).unwrap(), Value::Int(1));
//! root.shutdown();
//! ```

pub mod clock;
pub mod config;
pub mod construct;
pub mod context;
pub mod delay;
pub mod error;
pub mod matcher;
pub mod persist;
pub mod prefs;
pub mod repr;
pub mod schema;
pub mod services;
pub mod store;
pub mod task;
pub mod update;
pub mod value;

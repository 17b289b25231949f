//! Runtime values flowing between bound objects and the context tree.
//!
//! Scalars compare by value. Objects and lists are shared handles and compare
//! by identity, so a refresh only reports them as changed when the getter hands
//! back a different instance (lists additionally carry a mutation version).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;

use crate::error::{AutobindError, Result};

// ------------- Value -------------
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Decimal(BigDecimal),
    Str(String),
    Path(PathBuf),
    Enum(EnumValue),
    Object(ObjectRef),
    List(ListRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "string",
            Value::Path(_) => "path",
            Value::Enum(_) => "enum",
            Value::Object(_) => "object",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::Enum(e) => write!(f, "{}", e.variant),
            Value::Object(o) => write!(f, "{}", o.class_name()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}
impl From<f64> for Value {
    fn from(x: f64) -> Self { Value::Float(x) }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Str(s.to_string()) }
}
impl From<String> for Value {
    fn from(s: String) -> Self { Value::Str(s) }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub type_name: String,
    pub variant: String,
}

impl EnumValue {
    pub fn new(type_name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            variant: variant.into(),
        }
    }
}

// ------------- Objects -------------
/// The surface a bound object exposes to the engine.
///
/// Schemas say which members exist; this trait is how they are reached.
/// Implementations use interior mutability since setters take `&self`.
pub trait DynObject: Send + Sync {
    fn class_name(&self) -> &str;
    fn get_field(&self, name: &str) -> Result<Value>;
    fn set_field(&self, name: &str, value: Value) -> Result<()>;
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value>;
    fn is_closable(&self) -> bool {
        false
    }
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct ObjectRef(Arc<dyn DynObject>);

impl ObjectRef {
    pub fn new(object: impl DynObject + 'static) -> Self {
        Self(Arc::new(object))
    }
    pub fn from_arc(object: Arc<dyn DynObject>) -> Self {
        Self(object)
    }
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}
impl std::ops::Deref for ObjectRef {
    type Target = dyn DynObject;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectRef({}@{:p})", self.0.class_name(), Arc::as_ptr(&self.0))
    }
}

// ------------- Lists -------------
struct ListInner {
    items: RwLock<Vec<Value>>,
    version: AtomicU64,
}

/// Shared, mutable list. Every mutation through this handle bumps `version`.
#[derive(Clone)]
pub struct ListRef(Arc<ListInner>);

impl ListRef {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(ListInner {
            items: RwLock::new(items),
            version: AtomicU64::new(0),
        }))
    }
    pub fn len(&self) -> usize {
        self.0.items.read().map(|items| items.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.read().ok()?.get(index).cloned()
    }
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let mut items = self.0.items.write()?;
        let len = items.len();
        let slot = items.get_mut(index).ok_or_else(|| {
            AutobindError::Conversion(format!("index {} out of bounds for list of {}", index, len))
        })?;
        *slot = value;
        self.0.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    pub fn push(&self, value: Value) -> Result<()> {
        self.0.items.write()?.push(value);
        self.0.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    pub fn remove(&self, index: usize) -> Result<Value> {
        let mut items = self.0.items.write()?;
        if index >= items.len() {
            return Err(AutobindError::Conversion(format!("index {} out of bounds", index)));
        }
        let removed = items.remove(index);
        self.0.version.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
    /// Swaps in new contents, keeping the list identity.
    pub fn replace_all(&self, values: Vec<Value>) -> Result<()> {
        *self.0.items.write()? = values;
        self.0.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.items.read().map(|items| items.clone()).unwrap_or_default()
    }
    pub fn version(&self) -> u64 {
        self.0.version.load(Ordering::SeqCst)
    }
    pub fn ptr_eq(&self, other: &ListRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl PartialEq for ListRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl fmt::Debug for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListRef(len={}, v={})", self.len(), self.version())
    }
}

// ------------- SourceValue -------------
/// Cached value of a context. `Unset` means no fetch has happened yet, which
/// is different from a fetched `Value::Null`.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum SourceValue {
    #[default]
    Unset,
    Present(Value),
}

impl SourceValue {
    pub fn is_present(&self) -> bool {
        matches!(self, SourceValue::Present(_))
    }
    pub fn value(&self) -> Option<&Value> {
        match self {
            SourceValue::Present(v) => Some(v),
            SourceValue::Unset => None,
        }
    }
    pub fn into_option(self) -> Option<Value> {
        match self {
            SourceValue::Present(v) => Some(v),
            SourceValue::Unset => None,
        }
    }
    pub fn value_or_null(&self) -> Value {
        self.value().cloned().unwrap_or(Value::Null)
    }
}

// ------------- Record -------------
pub type MethodFn = Arc<dyn Fn(&Record, Vec<Value>) -> Result<Value> + Send + Sync>;
pub type CloseFn = Arc<dyn Fn(&Record) -> Result<()> + Send + Sync>;

/// A ready-made [`DynObject`]: a field map plus named method closures.
pub struct Record {
    class_name: String,
    fields: RwLock<HashMap<String, Value>>,
    methods: HashMap<String, MethodFn>,
    closer: Option<CloseFn>,
    closed: AtomicBool,
}

impl Record {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: RwLock::new(HashMap::new()),
            methods: HashMap::new(),
            closer: None,
            closed: AtomicBool::new(false),
        }
    }
    pub fn with_field(self, name: &str, value: impl Into<Value>) -> Self {
        if let Ok(mut fields) = self.fields.write() {
            fields.insert(name.to_string(), value.into());
        }
        self
    }
    pub fn with_method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Record, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }
    pub fn with_closer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> Result<()> + Send + Sync + 'static,
    {
        self.closer = Some(Arc::new(f));
        self
    }
    pub fn into_ref(self) -> ObjectRef {
        ObjectRef::new(self)
    }
    /// Field read for use inside method closures.
    pub fn field(&self, name: &str) -> Value {
        self.fields
            .read()
            .ok()
            .and_then(|fields| fields.get(name).cloned())
            .unwrap_or(Value::Null)
    }
    pub fn put(&self, name: &str, value: Value) {
        if let Ok(mut fields) = self.fields.write() {
            fields.insert(name.to_string(), value);
        }
    }
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DynObject for Record {
    fn class_name(&self) -> &str {
        &self.class_name
    }
    fn get_field(&self, name: &str) -> Result<Value> {
        self.fields
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| AutobindError::invocation(name, "no such field"))
    }
    fn set_field(&self, name: &str, value: Value) -> Result<()> {
        self.fields.write()?.insert(name.to_string(), value);
        Ok(())
    }
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let f = self
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| AutobindError::invocation(method, "no such method"))?;
        f(self, args)
    }
    fn is_closable(&self) -> bool {
        self.closer.is_some()
    }
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.closer {
            Some(f) => f(self),
            None => Ok(()),
        }
    }
}

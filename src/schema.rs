//! Declarative class schemas.
//!
//! A schema states *what* a class offers (fields and methods with their value
//! types). How those members are grouped into properties and actions is the
//! job of [`crate::construct::TypeBuilder`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::construct::{ElementId, OtherHasher, TypeModel};
use crate::error::{AutobindError, Result};
use crate::value::{ObjectRef, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    BigInt,
    Float,
    Decimal,
    Str,
    Path,
    Enum(String),
    Object(String),
    List(Box<ValueType>),
    Any,
}

impl ValueType {
    pub fn list_of(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }
    pub fn is_list(&self) -> bool {
        matches!(self, ValueType::List(_))
    }
    /// Whether `value` can be stored in a member of this type. `Null` fits
    /// every type.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ValueType::Any, _) => true,
            (ValueType::Bool, Value::Bool(_))
            | (ValueType::Int, Value::Int(_))
            | (ValueType::BigInt, Value::BigInt(_))
            | (ValueType::Float, Value::Float(_))
            | (ValueType::Decimal, Value::Decimal(_))
            | (ValueType::Str, Value::Str(_))
            | (ValueType::Path, Value::Path(_))
            | (ValueType::Object(_), Value::Object(_))
            | (ValueType::List(_), Value::List(_)) => true,
            (ValueType::Enum(name), Value::Enum(e)) => &e.type_name == name,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::BigInt => write!(f, "bigint"),
            ValueType::Float => write!(f, "float"),
            ValueType::Decimal => write!(f, "decimal"),
            ValueType::Str => write!(f, "string"),
            ValueType::Path => write!(f, "path"),
            ValueType::Enum(name) => write!(f, "enum {}", name),
            ValueType::Object(name) => write!(f, "{}", name),
            ValueType::List(element) => write!(f, "list<{}>", element),
            ValueType::Any => write!(f, "any"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: String,
    pub value_type: ValueType,
    pub readonly: bool,
    pub index: i32,
    pub excluded: bool,
}

#[derive(Clone, Debug)]
pub struct MethodDecl {
    pub name: String,
    pub param: Option<ValueType>,
    pub returns: Option<ValueType>,
    pub index: i32,
    pub excluded: bool,
}

pub type Factory = Arc<dyn Fn() -> ObjectRef + Send + Sync>;

#[derive(Clone)]
pub struct ClassSchema {
    name: String,
    included: bool,
    closable: bool,
    factory: Option<Factory>,
    fields: Vec<FieldDecl>,
    methods: Vec<MethodDecl>,
    last_is_field: bool,
}

impl ClassSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            included: true,
            closable: false,
            factory: None,
            fields: Vec::new(),
            methods: Vec::new(),
            last_is_field: false,
        }
    }
    pub fn field(mut self, name: &str, value_type: ValueType) -> Self {
        let index = self.next_index();
        self.fields.push(FieldDecl {
            name: name.to_string(),
            value_type,
            readonly: false,
            index,
            excluded: false,
        });
        self.last_is_field = true;
        self
    }
    pub fn readonly_field(mut self, name: &str, value_type: ValueType) -> Self {
        self = self.field(name, value_type);
        if let Some(f) = self.fields.last_mut() {
            f.readonly = true;
        }
        self
    }
    pub fn excluded_field(mut self, name: &str, value_type: ValueType) -> Self {
        self = self.field(name, value_type);
        if let Some(f) = self.fields.last_mut() {
            f.excluded = true;
        }
        self
    }
    /// Declares a method. `param` is the single argument type, `returns` the
    /// return type (`None` for unit).
    pub fn method(mut self, name: &str, param: Option<ValueType>, returns: Option<ValueType>) -> Self {
        let index = self.next_index();
        self.methods.push(MethodDecl {
            name: name.to_string(),
            param,
            returns,
            index,
            excluded: false,
        });
        self.last_is_field = false;
        self
    }
    pub fn excluded_method(mut self, name: &str, param: Option<ValueType>, returns: Option<ValueType>) -> Self {
        self = self.method(name, param, returns);
        if let Some(m) = self.methods.last_mut() {
            m.excluded = true;
        }
        self
    }
    /// Overrides the ordering index of the most recently declared member.
    pub fn ordered(mut self, index: i32) -> Self {
        if self.last_is_field {
            if let Some(f) = self.fields.last_mut() {
                f.index = index;
            }
        } else if let Some(m) = self.methods.last_mut() {
            m.index = index;
        }
        self
    }
    pub fn factory<F>(mut self, f: F) -> Self
    where
        F: Fn() -> ObjectRef + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(f));
        self
    }
    pub fn closable(mut self) -> Self {
        self.closable = true;
        self
    }
    pub fn excluded(mut self) -> Self {
        self.included = false;
        self
    }
    fn next_index(&self) -> i32 {
        (self.fields.len() + self.methods.len()) as i32
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    /// The part of the dotted name before the last dot, as a `/` path.
    pub fn package_path(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((package, _)) => package.replace('.', "/"),
            None => String::new(),
        }
    }
    pub fn simple_name(&self) -> &str {
        self.name.rsplit_once('.').map(|(_, n)| n).unwrap_or(&self.name)
    }
    pub fn is_included(&self) -> bool {
        self.included
    }
    pub fn is_closable(&self) -> bool {
        self.closable
    }
    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }
    pub fn methods(&self) -> &[MethodDecl] {
        &self.methods
    }
    pub fn create(&self) -> Option<ObjectRef> {
        self.factory.as_ref().map(|f| f())
    }
}

impl fmt::Debug for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClassSchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumSpec {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumSpec {
    pub fn new(name: &str, variants: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }
    pub fn contains(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v == variant)
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: HashMap<String, Arc<ClassSchema>, OtherHasher>,
    enums: HashMap<String, Arc<EnumSpec>, OtherHasher>,
    // type models built from this registry, dropped on every registration
    models: Mutex<HashMap<ValueType, (Arc<TypeModel>, ElementId), OtherHasher>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(&mut self, schema: ClassSchema) -> Arc<ClassSchema> {
        let kept = Arc::new(schema);
        self.classes.insert(kept.name().to_string(), Arc::clone(&kept));
        self.forget_models();
        kept
    }
    pub fn register_enum(&mut self, spec: EnumSpec) -> Arc<EnumSpec> {
        let kept = Arc::new(spec);
        self.enums.insert(kept.name.clone(), Arc::clone(&kept));
        self.forget_models();
        kept
    }
    pub fn class(&self, name: &str) -> Result<Arc<ClassSchema>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| AutobindError::Schema(format!("unknown class '{}'", name)))
    }
    pub fn enumeration(&self, name: &str) -> Result<Arc<EnumSpec>> {
        self.enums
            .get(name)
            .cloned()
            .ok_or_else(|| AutobindError::Schema(format!("unknown enum '{}'", name)))
    }
    fn forget_models(&mut self) {
        self.models.get_mut().unwrap_or_else(|e| e.into_inner()).clear();
    }
    pub(crate) fn cached_model(&self, root: &ValueType) -> Option<(Arc<TypeModel>, ElementId)> {
        let models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        models.get(root).map(|(model, id)| (Arc::clone(model), *id))
    }
    pub(crate) fn keep_model(&self, root: &ValueType, model: &Arc<TypeModel>, id: ElementId) {
        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        models.insert(root.clone(), (Arc::clone(model), id));
    }
    pub fn len(&self) -> usize {
        self.classes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

// used as the hasher for the name-keyed caches
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

use std::collections::HashMap;
use std::sync::Arc;

// naming conventions are matched with regular expressions compiled once
use lazy_static::lazy_static;
use regex::Regex;

use tracing::{debug, warn};

// our own stuff that we need
use crate::error::Result;
use crate::schema::{ClassSchema, EnumSpec, SchemaRegistry, ValueType};

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Index of an element in a [`TypeModel`] arena. Equal ids mean the same
/// type identity, which is what the context recursion guard compares.
pub type ElementId = usize;

lazy_static! {
    static ref GETTER: Regex = Regex::new(r"^(get|is)([A-Z][A-Za-z0-9_]*)$").unwrap();
    static ref SETTER: Regex = Regex::new(r"^set([A-Z][A-Za-z0-9_]*)$").unwrap();
}

// ------------- Type elements -------------
#[derive(Debug, Clone)]
pub enum TypeElement {
    Object(ObjectType),
    Property(PropertyType),
    Action(ActionType),
    Collection(CollectionType),
    Value(ValueElement),
}

#[derive(Debug, Clone)]
pub struct ObjectType {
    pub class_name: String,
    /// Instances are closed when the tree owning them shuts down.
    pub closable: bool,
    pub properties: Vec<ElementId>,
    pub actions: Vec<ElementId>,
}

#[derive(Debug, Clone)]
pub struct PropertyType {
    pub name: String,
    pub getter: Option<String>,
    pub setter: Option<String>,
    pub field: bool,
    pub field_readonly: bool,
    pub value_type: ValueType,
    pub value: ElementId,
}

impl PropertyType {
    pub fn is_writable(&self) -> bool {
        self.setter.is_some() || (self.field && !self.field_readonly)
    }
}

#[derive(Debug, Clone)]
pub struct ActionType {
    pub name: String,
    pub method: String,
    /// Element type of the list argument for list actions.
    pub list_element: Option<ElementId>,
    pub returns: Option<ValueType>,
}

#[derive(Debug, Clone)]
pub struct CollectionType {
    pub element_type: ValueType,
    pub element: ElementId,
}

#[derive(Debug, Clone)]
pub struct ValueElement {
    pub kind: ValueType,
}

impl TypeElement {
    pub fn name(&self) -> String {
        match self {
            TypeElement::Object(o) => o.class_name.clone(),
            TypeElement::Property(p) => p.name.clone(),
            TypeElement::Action(a) => a.name.clone(),
            TypeElement::Collection(c) => ValueType::list_of(c.element_type.clone()).to_string(),
            TypeElement::Value(v) => v.kind.to_string(),
        }
    }
}

// ------------- TypeModel -------------
/// Arena of type elements for one family of bound classes. Built once by
/// [`TypeBuilder`] and then shared read-only.
#[derive(Debug, Default)]
pub struct TypeModel {
    elements: Vec<TypeElement>,
    cache: HashMap<ValueType, ElementId, OtherHasher>,
    classes: HashMap<String, Arc<ClassSchema>, OtherHasher>,
    enums: HashMap<String, Arc<EnumSpec>, OtherHasher>,
}

impl TypeModel {
    pub fn get(&self, id: ElementId) -> &TypeElement {
        &self.elements[id]
    }
    pub fn len(&self) -> usize {
        self.elements.len()
    }
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
    pub fn lookup(&self, value_type: &ValueType) -> Option<ElementId> {
        self.cache.get(value_type).copied()
    }
    pub fn class(&self, name: &str) -> Option<Arc<ClassSchema>> {
        self.classes.get(name).cloned()
    }
    pub fn enum_spec(&self, name: &str) -> Option<Arc<EnumSpec>> {
        self.enums.get(name).cloned()
    }
    /// The value type carried by a context of this element. Actions carry none.
    pub fn value_type(&self, id: ElementId) -> Option<ValueType> {
        match self.get(id) {
            TypeElement::Object(o) => Some(ValueType::Object(o.class_name.clone())),
            TypeElement::Property(p) => Some(p.value_type.clone()),
            TypeElement::Collection(c) => Some(ValueType::list_of(c.element_type.clone())),
            TypeElement::Value(v) => Some(v.kind.clone()),
            TypeElement::Action(_) => None,
        }
    }
    /// The element a property resolves to, or the element itself.
    pub fn resolved(&self, id: ElementId) -> ElementId {
        match self.get(id) {
            TypeElement::Property(p) => p.value,
            _ => id,
        }
    }
    pub fn property_names(&self, id: ElementId) -> Vec<String> {
        match self.get(id) {
            TypeElement::Object(o) => o.properties.iter().map(|p| self.get(*p).name()).collect(),
            _ => Vec::new(),
        }
    }
    pub fn action_names(&self, id: ElementId) -> Vec<String> {
        match self.get(id) {
            TypeElement::Object(o) => o.actions.iter().map(|a| self.get(*a).name()).collect(),
            _ => Vec::new(),
        }
    }
}

// ------------- Member classification -------------
#[derive(Debug)]
enum Member {
    Property(PendingProperty),
    Action { name: String, list_element: Option<ValueType>, returns: Option<ValueType> },
}

#[derive(Debug, Default)]
struct PendingProperty {
    name: String,
    getter: Option<(String, ValueType)>,
    setter: Option<(String, ValueType)>,
    field: Option<(ValueType, bool)>,
}

impl PendingProperty {
    fn is_empty(&self) -> bool {
        self.getter.is_none() && self.setter.is_none() && self.field.is_none()
    }
}

/// Java-bean style decapitalization: `Count` -> `count`, `URL` stays `URL`.
pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if first.is_uppercase() && second.is_uppercase() => name.to_string(),
        (Some(first), _) => first.to_lowercase().chain(name.chars().skip(1)).collect(),
        (None, _) => String::new(),
    }
}

/// Name-unique, ordered member table for one class.
#[derive(Debug, Default)]
struct MemberTable {
    members: Vec<(i32, usize, Member)>,
}

impl MemberTable {
    fn position(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|(_, _, m)| match m {
            Member::Property(p) => p.name == name,
            Member::Action { name: n, .. } => n == name,
        })
    }
    fn property(&mut self, name: &str, index: i32, seq: usize) -> &mut PendingProperty {
        let position = match self.position(name) {
            Some(pos) => {
                if matches!(self.members[pos].2, Member::Action { .. }) {
                    debug!(member = name, "property displaces action of the same name");
                    self.members[pos].2 = Member::Property(PendingProperty {
                        name: name.to_string(),
                        ..Default::default()
                    });
                }
                pos
            }
            None => {
                self.members.push((
                    index,
                    seq,
                    Member::Property(PendingProperty {
                        name: name.to_string(),
                        ..Default::default()
                    }),
                ));
                self.members.len() - 1
            }
        };
        match &mut self.members[position].2 {
            Member::Property(p) => p,
            Member::Action { .. } => unreachable!("action was replaced above"),
        }
    }
    fn action(&mut self, name: &str, list_element: Option<ValueType>, returns: Option<ValueType>, index: i32, seq: usize) {
        let action = Member::Action { name: name.to_string(), list_element, returns };
        match self.position(name) {
            Some(pos) => {
                let replace = matches!(&self.members[pos].2, Member::Property(p) if p.is_empty());
                if replace {
                    self.members[pos].2 = action;
                } else {
                    debug!(member = name, "action ignored, name already classified");
                }
            }
            None => self.members.push((index, seq, action)),
        }
    }
}

// ------------- TypeBuilder -------------
pub struct TypeBuilder<'r> {
    registry: &'r SchemaRegistry,
    model: TypeModel,
}

impl<'r> TypeBuilder<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            model: TypeModel::default(),
        }
    }

    fn push(&mut self, element: TypeElement) -> ElementId {
        self.model.elements.push(element);
        self.model.elements.len() - 1
    }

    /// Returns the element for `value_type`, building it on first request.
    /// Repeated references to one type share a single element.
    pub fn build(&mut self, value_type: &ValueType) -> Result<ElementId> {
        if let Some(id) = self.model.cache.get(value_type) {
            return Ok(*id);
        }
        match value_type {
            ValueType::Object(name) => self.build_object(name),
            ValueType::List(element_type) => {
                let element = self.build(element_type)?;
                let id = self.push(TypeElement::Collection(CollectionType {
                    element_type: (**element_type).clone(),
                    element,
                }));
                self.model.cache.insert(value_type.clone(), id);
                Ok(id)
            }
            ValueType::Enum(name) => {
                let spec = self.registry.enumeration(name)?;
                self.model.enums.insert(name.clone(), spec);
                let id = self.push(TypeElement::Value(ValueElement { kind: value_type.clone() }));
                self.model.cache.insert(value_type.clone(), id);
                Ok(id)
            }
            _ => {
                let id = self.push(TypeElement::Value(ValueElement { kind: value_type.clone() }));
                self.model.cache.insert(value_type.clone(), id);
                Ok(id)
            }
        }
    }

    fn build_object(&mut self, name: &str) -> Result<ElementId> {
        let schema = self.registry.class(name)?;
        let key = ValueType::Object(name.to_string());
        self.model.classes.insert(name.to_string(), Arc::clone(&schema));
        if !schema.is_included() {
            let id = self.push(TypeElement::Value(ValueElement { kind: key.clone() }));
            self.model.cache.insert(key, id);
            return Ok(id);
        }
        // reserve the slot first so self references resolve to it
        let id = self.push(TypeElement::Object(ObjectType {
            class_name: name.to_string(),
            closable: schema.is_closable(),
            properties: Vec::new(),
            actions: Vec::new(),
        }));
        self.model.cache.insert(key, id);

        let table = classify(&schema);
        let mut properties = Vec::new();
        let mut actions = Vec::new();
        for (_, _, member) in table.members {
            match member {
                Member::Property(pending) => {
                    if let Some(property) = self.finish_property(name, pending)? {
                        properties.push(property);
                    }
                }
                Member::Action { name: action_name, list_element, returns } => {
                    let list_element = match list_element {
                        Some(t) => Some(self.build(&t)?),
                        None => None,
                    };
                    actions.push(self.push(TypeElement::Action(ActionType {
                        method: action_name.clone(),
                        name: action_name,
                        list_element,
                        returns,
                    })));
                }
            }
        }
        if let TypeElement::Object(object) = &mut self.model.elements[id] {
            object.properties = properties;
            object.actions = actions;
        }
        debug!(class = name, id, "built object type");
        Ok(id)
    }

    fn finish_property(&mut self, class: &str, pending: PendingProperty) -> Result<Option<ElementId>> {
        let PendingProperty { name, getter, mut setter, field } = pending;
        let value_type = match (&getter, &field, &setter) {
            (Some((_, t)), _, _) => t.clone(),
            (None, Some((t, _)), _) => t.clone(),
            (None, None, Some((_, t))) => t.clone(),
            (None, None, None) => return Ok(None),
        };
        if let Some((setter_name, setter_type)) = &setter {
            if *setter_type != value_type {
                warn!(class, property = %name, setter = %setter_name, "setter type differs from property type, ignoring setter");
                setter = None;
            }
        }
        let value = self.build(&value_type)?;
        let (field_present, field_readonly) = match field {
            Some((_, readonly)) => (true, readonly),
            None => (false, false),
        };
        Ok(Some(self.push(TypeElement::Property(PropertyType {
            name,
            getter: getter.map(|(n, _)| n),
            setter: setter.map(|(n, _)| n),
            field: field_present,
            field_readonly,
            value_type,
            value,
        }))))
    }

    pub fn finish(self) -> Arc<TypeModel> {
        Arc::new(self.model)
    }
}

fn classify(schema: &ClassSchema) -> MemberTable {
    // fields and methods interleaved by declared ordering
    enum Decl<'a> {
        Field(&'a crate::schema::FieldDecl),
        Method(&'a crate::schema::MethodDecl),
    }
    let mut decls: Vec<(i32, usize, Decl)> = Vec::new();
    for f in schema.fields().iter().filter(|f| !f.excluded) {
        decls.push((f.index, decls.len(), Decl::Field(f)));
    }
    for m in schema.methods().iter().filter(|m| !m.excluded) {
        decls.push((m.index, decls.len(), Decl::Method(m)));
    }
    decls.sort_by_key(|(index, seq, _)| (*index, *seq));

    let mut table = MemberTable::default();
    for (index, seq, decl) in decls {
        match decl {
            Decl::Field(f) => {
                table.property(&f.name, index, seq).field = Some((f.value_type.clone(), f.readonly));
            }
            Decl::Method(m) => {
                if let (Some(caps), None, Some(returns)) = (GETTER.captures(&m.name), &m.param, &m.returns) {
                    let is_prefix = &caps[1] == "is";
                    if !is_prefix || *returns == ValueType::Bool {
                        let name = decapitalize(&caps[2]);
                        table.property(&name, index, seq).getter = Some((m.name.clone(), returns.clone()));
                        continue;
                    }
                }
                if let (Some(caps), Some(param)) = (SETTER.captures(&m.name), &m.param) {
                    let name = decapitalize(&caps[1]);
                    table.property(&name, index, seq).setter = Some((m.name.clone(), param.clone()));
                    continue;
                }
                match &m.param {
                    None => table.action(&m.name, None, m.returns.clone(), index, seq),
                    Some(ValueType::List(element)) => {
                        table.action(&m.name, Some((**element).clone()), m.returns.clone(), index, seq)
                    }
                    Some(_) => debug!(method = %m.name, "method with a non-list parameter is not bound"),
                }
            }
        }
    }
    table.members.sort_by_key(|(index, seq, _)| (*index, *seq));
    table
}

/// Builds the type model for `root` and returns it with the root element id.
/// Models are kept by the registry, so binding the same root type again
/// shares the earlier model.
pub fn build_model(registry: &SchemaRegistry, root: &ValueType) -> Result<(Arc<TypeModel>, ElementId)> {
    if let Some(built) = registry.cached_model(root) {
        return Ok(built);
    }
    let mut builder = TypeBuilder::new(registry);
    let id = builder.build(root)?;
    let model = builder.finish();
    registry.keep_model(root, &model, id);
    debug!(root = %root, elements = model.len(), "type model built");
    Ok((model, id))
}

//! The binding context tree.
//!
//! Every node pairs a type element with the representation the matcher gave
//! it and a cached value. Parents own their children; children only hold a
//! weak link back. Nodes inside a collection are templates: their values are
//! fetched per row through a [`Specifier`] and never cached.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::clock::{ClockSnapshot, TaskClock};
use crate::construct::{build_model, ElementId, PropertyType, TypeElement, TypeModel};
use crate::error::{AutobindError, Result};
use crate::matcher::match_context;
use crate::prefs::{truncated, HistoryValueEntry, HistoryValues, Preferences, ReentrantLock, DEFAULT_NODE};
use crate::repr::{same_value, Representation};
use crate::schema::{SchemaRegistry, ValueType};
use crate::services::Services;
use crate::task::{TaskFuture, TaskRunner};
use crate::value::{ListRef, ObjectRef, SourceValue, Value};

/// How a context obtains its value from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the bound value itself.
    Root,
    /// A property or action of the parent's object.
    Member,
    /// One row of the parent's list, picked by the specifier.
    Element,
    /// Same value as the parent, under another representation.
    Inner,
}

/// Row path through nested collections, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Specifier(Vec<usize>);

impl Specifier {
    pub fn none() -> Self {
        Self(Vec::new())
    }
    pub fn row(index: usize) -> Self {
        Self(vec![index])
    }
    pub fn then(&self, index: usize) -> Self {
        let mut rows = self.0.clone();
        rows.push(index);
        Self(rows)
    }
    pub fn index(&self, depth: usize) -> Option<usize> {
        self.0.get(depth).copied()
    }
    pub fn rows(&self) -> &[usize] {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub cause: Option<Arc<BindingContext>>,
    pub value: Value,
    pub clock: ClockSnapshot,
}

pub type UpdateListener = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Result of [`BindingContext::execute_edit`].
pub enum EditOutcome {
    /// The setter was handed to the runner.
    Accepted(TaskFuture),
    /// The editor's clock was not newer than the context's; nothing happened.
    Stale,
}

impl EditOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EditOutcome::Accepted(_))
    }
    /// Waits for the setter. Stale edits resolve to `Ok(false)`.
    pub fn wait(&self) -> Result<bool> {
        match self {
            EditOutcome::Accepted(future) => future.get().map(|_| true),
            EditOutcome::Stale => Ok(false),
        }
    }
}

// ------------- Tree -------------
/// State shared by every context of one bound tree.
pub(crate) struct Tree {
    pub(crate) id: u64,
    pub(crate) services: Arc<Services>,
    pub(crate) model: Arc<TypeModel>,
    pub(crate) store_path: String,
    pub(crate) refresh_lock: Mutex<()>,
    pub(crate) prefs_lock: ReentrantLock,
    pub(crate) refresh_seq: TaskClock,
    pub(crate) shut_down: AtomicBool,
}

// ------------- BindingContext -------------
pub struct BindingContext {
    tree: Arc<Tree>,
    element: ElementId,
    role: Role,
    name: String,
    representation: OnceLock<Representation>,
    parent: Weak<BindingContext>,
    children: RwLock<Vec<Arc<BindingContext>>>,
    source: Mutex<SourceValue>,
    source_stamp: AtomicU64,
    clock: TaskClock,
    listeners: RwLock<Vec<UpdateListener>>,
    runner: OnceLock<Arc<dyn TaskRunner>>,
    prefs: OnceLock<Option<Preferences>>,
}

impl std::fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BindingContext")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("representation", &self.representation.get())
            .field("clock", &self.clock.snapshot())
            .finish()
    }
}

impl BindingContext {
    /// Builds the type model for `root_type`, binds `value` to a new root
    /// context and matches the whole tree.
    pub fn bind_root(
        services: &Arc<Services>,
        registry: &SchemaRegistry,
        root_type: &ValueType,
        value: Value,
    ) -> Result<Arc<Self>> {
        let (model, element) = build_model(registry, root_type)?;
        Self::bind_model(services, model, element, value)
    }

    pub fn bind_model(
        services: &Arc<Services>,
        model: Arc<TypeModel>,
        element: ElementId,
        value: Value,
    ) -> Result<Arc<Self>> {
        let store_path = store_path_for(&model, element);
        let tree = Arc::new(Tree {
            id: services.next_tree_id(),
            services: Arc::clone(services),
            model,
            store_path,
            refresh_lock: Mutex::new(()),
            prefs_lock: ReentrantLock::new(),
            refresh_seq: TaskClock::default(),
            shut_down: AtomicBool::new(false),
        });
        let name = tree.model.get(element).name();
        let root = Arc::new(Self::new(tree, element, Role::Root, name, Weak::new()));
        *root.source.lock()? = SourceValue::Present(value.clone());
        root.stamp(&value);
        if !match_context(&root) {
            return Err(AutobindError::Schema(format!("no representation matches '{}'", root.name)));
        }
        root.tree.services.delay_queue().acquire();
        debug!(tree = root.tree.id, root = %root.name, contexts = root.count(), "tree bound");
        Ok(root)
    }

    fn new(tree: Arc<Tree>, element: ElementId, role: Role, name: String, parent: Weak<BindingContext>) -> Self {
        Self {
            tree,
            element,
            role,
            name,
            representation: OnceLock::new(),
            parent,
            children: RwLock::new(Vec::new()),
            source: Mutex::new(SourceValue::Unset),
            source_stamp: AtomicU64::new(0),
            clock: TaskClock::default(),
            listeners: RwLock::new(Vec::new()),
            runner: OnceLock::new(),
            prefs: OnceLock::new(),
        }
    }

    /// A child that is not yet attached; the matcher decides whether it stays.
    pub(crate) fn candidate(parent: &Arc<Self>, element: ElementId, role: Role) -> Arc<Self> {
        let name = match role {
            Role::Member => parent.tree.model.get(element).name(),
            Role::Element => format!("{}[]", parent.name),
            Role::Inner | Role::Root => parent.name.clone(),
        };
        Arc::new(Self::new(Arc::clone(&parent.tree), element, role, name, Arc::downgrade(parent)))
    }

    pub(crate) fn claim(&self, representation: Representation) -> bool {
        self.representation.set(representation).is_ok()
    }

    pub(crate) fn attach(&self, child: Arc<Self>) {
        if let Ok(mut children) = self.children.write() {
            children.push(child);
        }
    }

    // ------------- structure -------------
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn element(&self) -> ElementId {
        self.element
    }
    pub fn model(&self) -> &Arc<TypeModel> {
        &self.tree.model
    }
    pub fn type_element(&self) -> &TypeElement {
        self.tree.model.get(self.element)
    }
    pub fn representation(&self) -> Option<&Representation> {
        self.representation.get()
    }
    fn bound(&self) -> Result<&Representation> {
        self.representation.get().ok_or_else(|| AutobindError::Unbound(self.name.clone()))
    }
    pub fn services(&self) -> &Arc<Services> {
        &self.tree.services
    }
    pub fn tree_id(&self) -> u64 {
        self.tree.id
    }
    pub(crate) fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.upgrade()
    }
    pub fn is_root(&self) -> bool {
        self.role == Role::Root
    }
    pub fn root(self: &Arc<Self>) -> Arc<Self> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }
    /// Ancestors, nearest first.
    pub fn ancestors(&self) -> Vec<Arc<Self>> {
        let mut found = Vec::new();
        let mut next = self.parent();
        while let Some(ctx) = next {
            next = ctx.parent();
            found.push(ctx);
        }
        found
    }
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children.read().map(|c| c.clone()).unwrap_or_default()
    }
    pub fn child(&self, name: &str) -> Option<Arc<Self>> {
        self.children().into_iter().find(|c| c.name == name)
    }
    /// Follows member names separated by `/`, passing through inner and
    /// element wrappers on the way.
    pub fn find(self: &Arc<Self>, path: &str) -> Option<Arc<Self>> {
        let mut current = Arc::clone(self);
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = current.find_member(part)?;
        }
        Some(current)
    }
    fn find_member(&self, name: &str) -> Option<Arc<Self>> {
        for child in self.children() {
            match child.role {
                Role::Member if child.name == name => return Some(child),
                Role::Inner | Role::Element => {
                    if let Some(found) = child.find_member(name) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }
    /// Number of contexts in this subtree, this one included.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(|c| c.count()).sum::<usize>()
    }
    /// Number of element wrappers among the strict ancestors.
    fn element_depth(&self) -> usize {
        self.ancestors().iter().filter(|a| a.role == Role::Element).count()
    }
    pub fn in_collection(&self) -> bool {
        self.role == Role::Element || self.element_depth() > 0
    }

    // ------------- listeners and clock -------------
    pub fn add_update_listener<F>(&self, listener: F)
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(Arc::new(listener));
        }
    }
    pub(crate) fn notify(&self, event: &UpdateEvent) {
        let listeners = self.listeners.read().map(|l| l.clone()).unwrap_or_default();
        for listener in listeners {
            listener(event);
        }
    }
    pub fn clock(&self) -> ClockSnapshot {
        self.clock.snapshot()
    }
    pub(crate) fn task_clock(&self) -> &TaskClock {
        &self.clock
    }

    // ------------- runner -------------
    /// The tree's runner, created at the root on first use and shared by
    /// every descendant.
    pub fn runner(&self) -> Arc<dyn TaskRunner> {
        Arc::clone(self.runner.get_or_init(|| match self.parent() {
            Some(parent) => parent.runner(),
            None => self.tree.services.tree_runner(),
        }))
    }

    fn report(&self, error: &AutobindError) {
        self.tree.services.report(&self.name, error);
    }

    // ------------- values -------------
    pub fn cached(&self) -> SourceValue {
        self.source.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn store_source(&self, value: Value) {
        self.stamp(&value);
        if let Ok(mut source) = self.source.lock() {
            *source = SourceValue::Present(value);
        }
    }

    fn stamp(&self, value: &Value) {
        if let Value::List(list) = value {
            self.source_stamp.store(list.version(), Ordering::SeqCst);
        }
    }

    /// Whether `value` differs from the cached one. A list with the same
    /// identity counts as changed once it has been mutated since caching.
    pub(crate) fn has_changed(&self, value: &Value) -> bool {
        match self.cached() {
            SourceValue::Unset => true,
            SourceValue::Present(old) => {
                if !same_value(&old, value) {
                    return true;
                }
                match value {
                    Value::List(list) => list.version() != self.source_stamp.load(Ordering::SeqCst),
                    _ => false,
                }
            }
        }
    }

    /// Computes this context's value from its parent's, calling user code on
    /// the current thread.
    fn derive_direct(&self, parent_value: &Value, spec: &Specifier) -> Result<Value> {
        let raw = match self.role {
            Role::Root => return Ok(self.cached().value_or_null()),
            Role::Inner => return Ok(parent_value.clone()),
            Role::Element => {
                let index = self.row_index(spec)?;
                match parent_value {
                    Value::List(list) => list.get(index).unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            }
            Role::Member => match self.type_element() {
                TypeElement::Property(property) => match parent_value {
                    Value::Object(owner) => read_property(owner, property)?,
                    Value::Null => Value::Null,
                    other => {
                        return Err(AutobindError::Conversion(format!(
                            "'{}' needs an object owner, got {}",
                            self.name,
                            other.kind_name()
                        )));
                    }
                },
                _ => Value::Null,
            },
        };
        match self.representation() {
            Some(repr) => repr.from_source(raw),
            None => Ok(raw),
        }
    }

    /// Like `derive_direct` but on the tree's runner. Failures go to the
    /// error hook before being returned.
    pub(crate) fn fetch(self: &Arc<Self>, parent_value: &Value, spec: &Specifier) -> Result<Value> {
        if matches!(self.role, Role::Root | Role::Inner) {
            return self.derive_direct(parent_value, spec);
        }
        let this = Arc::clone(self);
        let parent_value = parent_value.clone();
        let spec = spec.clone();
        let result = self
            .runner()
            .submit(Box::new(move |_| this.derive_direct(&parent_value, &spec)))
            .get();
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    fn row_index(&self, spec: &Specifier) -> Result<usize> {
        let depth = self.element_depth();
        spec.index(depth).ok_or_else(|| {
            AutobindError::Conversion(format!("'{}' needs a row at depth {}", self.name, depth))
        })
    }

    /// Current value at `spec`. Outside collections the cached value is
    /// returned, fetching it first if none is cached yet.
    pub fn current_value(self: &Arc<Self>, spec: &Specifier) -> Result<Value> {
        if self.is_root() {
            return Ok(self.cached().value_or_null());
        }
        let parent = self
            .parent()
            .ok_or_else(|| AutobindError::Invariant(format!("'{}' lost its parent", self.name)))?;
        if self.in_collection() {
            let parent_value = parent.current_value(spec)?;
            return self.fetch(&parent_value, spec);
        }
        if let SourceValue::Present(value) = self.cached() {
            return Ok(value);
        }
        let parent_value = parent.current_value(spec)?;
        let value = self.fetch(&parent_value, spec)?;
        self.store_source(value.clone());
        self.clock.increment();
        Ok(value)
    }

    /// Writes `value` into the object graph through the parent chain.
    fn write_back(self: &Arc<Self>, value: Value, spec: &Specifier) -> Result<()> {
        match self.role {
            Role::Root => {
                self.store_source(value);
                Ok(())
            }
            Role::Inner => match self.parent() {
                Some(parent) => parent.write_back(value, spec),
                None => Err(AutobindError::Invariant(format!("'{}' lost its parent", self.name))),
            },
            Role::Element => {
                let index = self.row_index(spec)?;
                let parent = self
                    .parent()
                    .ok_or_else(|| AutobindError::Invariant(format!("'{}' lost its parent", self.name)))?;
                match parent.current_value(spec)? {
                    Value::List(list) => list.set(index, value),
                    other => Err(AutobindError::Conversion(format!(
                        "'{}' expected a list, got {}",
                        parent.name,
                        other.kind_name()
                    ))),
                }
            }
            Role::Member => {
                let parent = self
                    .parent()
                    .ok_or_else(|| AutobindError::Invariant(format!("'{}' lost its parent", self.name)))?;
                match parent.current_value(spec)? {
                    Value::Object(owner) => self.assign(&owner, value),
                    other => Err(AutobindError::Conversion(format!(
                        "'{}' has no object owner ({})",
                        self.name,
                        other.kind_name()
                    ))),
                }
            }
        }
    }

    /// Sets this member on `owner` through its setter or field.
    fn assign(&self, owner: &ObjectRef, value: Value) -> Result<()> {
        let TypeElement::Property(property) = self.type_element() else {
            return Err(AutobindError::Conversion(format!("'{}' is not a property", self.name)));
        };
        let value = match self.representation() {
            Some(repr) => repr.to_source(&value),
            None => value,
        };
        if let Some(setter) = &property.setter {
            owner.invoke(setter, vec![value]).map(|_| ())
        } else if property.field && !property.field_readonly {
            owner.set_field(&property.name, value)
        } else {
            Err(AutobindError::invocation(&property.name, "property is read-only"))
        }
    }

    fn is_writable(&self) -> bool {
        match (self.role, self.type_element()) {
            (Role::Member, TypeElement::Property(p)) => p.is_writable(),
            (Role::Member, _) => false,
            (Role::Element | Role::Root, _) => true,
            (Role::Inner, _) => self.parent().map(|p| p.is_writable()).unwrap_or(false),
        }
    }

    // ------------- edits and actions -------------
    /// Applies an edit made by a view that last saw this context at
    /// `view_clock`. Edits whose clock is not newer than the context's are
    /// dropped without error.
    pub fn execute_edit(self: &Arc<Self>, new_value: Value, spec: &Specifier, view_clock: ClockSnapshot) -> Result<EditOutcome> {
        let repr = self.bound()?;
        if !repr.is_editable() || !self.is_writable() {
            return Err(AutobindError::invocation(&self.name, "context is not editable"));
        }
        let value = repr.from_source(new_value)?;
        if !self.clock.is_older_with_set(view_clock) {
            debug!(context = %self.name, clock = %self.clock.snapshot(), view = %view_clock, "stale edit dropped");
            return Ok(EditOutcome::Stale);
        }
        debug!(context = %self.name, clock = %view_clock, "edit accepted");
        if repr.supports_history() && !self.in_collection() {
            self.record_history(&value)?;
        }
        let this = Arc::clone(self);
        let spec = spec.clone();
        let future = self.runner().dispatch(Box::new(move |_| {
            let result = this.write_back(value, &spec);
            if let Err(e) = &result {
                this.report(e);
            }
            this.schedule_refresh();
            result.map(|_| Value::Null)
        }));
        Ok(EditOutcome::Accepted(future))
    }

    /// Runs a no-argument action on the object at `target`.
    pub fn execute_action(self: &Arc<Self>, target: &Specifier) -> Result<TaskFuture> {
        match self.bound()? {
            Representation::Action => self.invoke_action(target, Vec::new()),
            other => Err(AutobindError::invocation(&self.name, format!("{} is not an action", other))),
        }
    }

    /// Runs a list action with the selected rows as its single argument.
    pub fn execute_action_list(self: &Arc<Self>, target: &Specifier, selection: Vec<Value>) -> Result<TaskFuture> {
        match self.bound()? {
            Representation::ActionList => self.invoke_action(target, vec![Value::List(ListRef::new(selection))]),
            other => Err(AutobindError::invocation(&self.name, format!("{} is not a list action", other))),
        }
    }

    fn invoke_action(self: &Arc<Self>, target: &Specifier, args: Vec<Value>) -> Result<TaskFuture> {
        let TypeElement::Action(action) = self.type_element() else {
            return Err(AutobindError::invocation(&self.name, "not an action member"));
        };
        let method = action.method.clone();
        let this = Arc::clone(self);
        let target = target.clone();
        debug!(context = %self.name, "action submitted");
        Ok(self.runner().dispatch(Box::new(move |token| {
            token.check()?;
            let owner = this
                .parent()
                .ok_or_else(|| AutobindError::Invariant(format!("'{}' lost its parent", this.name)))?
                .current_value(&target);
            let result = match owner {
                Ok(Value::Object(owner)) => owner.invoke(&method, args),
                Ok(other) => Err(AutobindError::invocation(&method, format!("no owner object ({})", other.kind_name()))),
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                this.report(e);
            }
            this.schedule_refresh();
            result
        })))
    }

    // ------------- collections -------------
    /// The element wrapper under a collection table.
    pub fn element_context(&self) -> Option<Arc<Self>> {
        self.children().into_iter().find(|c| c.role == Role::Element)
    }

    fn list_at(self: &Arc<Self>, spec: &Specifier) -> Result<Option<ListRef>> {
        match self.bound()? {
            Representation::CollectionTable => {}
            other => return Err(AutobindError::Conversion(format!("{} is not a collection", other))),
        }
        Ok(self.current_value(spec)?.as_list().cloned())
    }

    pub fn element_count(self: &Arc<Self>, spec: &Specifier) -> Result<usize> {
        Ok(self.list_at(spec)?.map(|l| l.len()).unwrap_or(0))
    }

    pub fn get_element(self: &Arc<Self>, index: usize, spec: &Specifier) -> Result<Value> {
        Ok(self.list_at(spec)?.and_then(|l| l.get(index)).unwrap_or(Value::Null))
    }

    pub fn set_element(self: &Arc<Self>, index: usize, value: Value, spec: &Specifier) -> Result<()> {
        let list = self
            .list_at(spec)?
            .ok_or_else(|| AutobindError::Conversion(format!("'{}' holds no list", self.name)))?;
        list.set(index, value)?;
        self.schedule_refresh();
        Ok(())
    }

    // ------------- conversion -------------
    fn inner_child(&self) -> Option<Arc<Self>> {
        self.children().into_iter().find(|c| c.role == Role::Inner)
    }

    fn value_children(&self) -> Vec<Arc<Self>> {
        self.children()
            .into_iter()
            .filter(|c| c.representation().map(|r| !r.is_action()).unwrap_or(false))
            .collect()
    }

    pub fn to_json(self: &Arc<Self>, value: &Value) -> Json {
        let Some(repr) = self.representation() else { return Json::Null };
        match repr {
            r if r.is_leaf() => r.leaf_to_json(value),
            Representation::ObjectPane | Representation::TabbedPane => {
                if value.is_null() {
                    return Json::Null;
                }
                let mut map = serde_json::Map::new();
                for child in self.value_children() {
                    if let Ok(child_value) = child.fetch(value, &Specifier::none()) {
                        map.insert(child.name.clone(), child.to_json(&child_value));
                    }
                }
                Json::Object(map)
            }
            Representation::PropertyPane | Representation::CollectionElement => {
                self.inner_child().map(|c| c.to_json(value)).unwrap_or(Json::Null)
            }
            Representation::CollectionTable => match (value, self.element_context()) {
                (Value::List(list), Some(element)) => {
                    Json::Array(list.snapshot().iter().map(|item| element.to_json(item)).collect())
                }
                _ => Json::Null,
            },
            _ => Json::Null,
        }
    }

    /// Reads `json` into a value. Objects are filled into `target` when it is
    /// an object, or into a fresh instance from the class factory. Lists keep
    /// the identity of a list `target`.
    pub fn from_json(self: &Arc<Self>, json: &Json, target: &Value) -> Result<Value> {
        let repr = self.bound()?;
        match repr {
            r if r.is_leaf() => Ok(r.leaf_from_json(json)),
            Representation::ObjectPane | Representation::TabbedPane => {
                let Json::Object(map) = json else { return Ok(Value::Null) };
                let owner = self.object_target(target)?;
                for child in self.value_children() {
                    if let Some(child_json) = map.get(&child.name) {
                        child.fill_member(&owner, |c, current| c.from_json(child_json, current))?;
                    }
                }
                Ok(Value::Object(owner))
            }
            Representation::PropertyPane | Representation::CollectionElement => match self.inner_child() {
                Some(inner) => inner.from_json(json, target),
                None => Ok(Value::Null),
            },
            Representation::CollectionTable => {
                let Json::Array(items) = json else { return Ok(Value::Null) };
                let element = self
                    .element_context()
                    .ok_or_else(|| AutobindError::Conversion(format!("'{}' has no element type", self.name)))?;
                let values = items
                    .iter()
                    .map(|item| element.from_json(item, &Value::Null))
                    .collect::<Result<Vec<_>>>()?;
                reuse_list(target, values)
            }
            _ => Ok(Value::Null),
        }
    }

    /// Tab separated cells for objects, newline separated rows for
    /// collections. Only leaf members take part.
    pub fn to_human_readable(self: &Arc<Self>, value: &Value) -> String {
        let Some(repr) = self.representation() else { return String::new() };
        match repr {
            r if r.is_leaf() => r.to_human_readable(value),
            Representation::ObjectPane | Representation::TabbedPane => self
                .leaf_children()
                .iter()
                .map(|child| match child.fetch(value, &Specifier::none()) {
                    Ok(v) => child.to_human_readable(&v),
                    Err(_) => String::new(),
                })
                .collect::<Vec<_>>()
                .join("\t"),
            Representation::PropertyPane | Representation::CollectionElement => {
                self.inner_child().map(|c| c.to_human_readable(value)).unwrap_or_default()
            }
            Representation::CollectionTable => match (value, self.element_context()) {
                (Value::List(list), Some(element)) => list
                    .snapshot()
                    .iter()
                    .map(|item| element.to_human_readable(item))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            },
            _ => String::new(),
        }
    }

    pub fn from_human_readable(self: &Arc<Self>, text: &str, target: &Value) -> Result<Value> {
        let repr = self.bound()?;
        match repr {
            r if r.is_leaf() => r.from_human_readable(text),
            Representation::ObjectPane | Representation::TabbedPane => {
                let owner = self.object_target(target)?;
                for (child, cell) in self.leaf_children().iter().zip(text.split('\t')) {
                    child.fill_member(&owner, |c, _| c.from_human_readable(cell, &Value::Null))?;
                }
                Ok(Value::Object(owner))
            }
            Representation::PropertyPane | Representation::CollectionElement => match self.inner_child() {
                Some(inner) => inner.from_human_readable(text, target),
                None => Ok(Value::Null),
            },
            Representation::CollectionTable => {
                let element = self
                    .element_context()
                    .ok_or_else(|| AutobindError::Conversion(format!("'{}' has no element type", self.name)))?;
                let values = text
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(|line| element.from_human_readable(line, &Value::Null))
                    .collect::<Result<Vec<_>>>()?;
                reuse_list(target, values)
            }
            _ => Ok(Value::Null),
        }
    }

    fn leaf_children(&self) -> Vec<Arc<Self>> {
        self.value_children()
            .into_iter()
            .filter(|c| c.representation().map(|r| r.is_leaf()).unwrap_or(false))
            .collect()
    }

    fn object_target(&self, target: &Value) -> Result<ObjectRef> {
        if let Value::Object(owner) = target {
            return Ok(owner.clone());
        }
        let class_name = match self.tree.model.value_type(self.element) {
            Some(ValueType::Object(name)) => name,
            _ => return Err(AutobindError::Conversion(format!("'{}' is not an object type", self.name))),
        };
        self.tree
            .model
            .class(&class_name)
            .and_then(|schema| schema.create())
            .ok_or_else(|| AutobindError::Conversion(format!("class '{}' has no factory", class_name)))
    }

    /// Converts a member value with `convert` and stores it on `owner`.
    /// Read-only members are left alone when conversion kept the instance.
    /// Labels are exported for display only and never written back.
    fn fill_member<F>(self: &Arc<Self>, owner: &ObjectRef, convert: F) -> Result<()>
    where
        F: FnOnce(&Arc<Self>, &Value) -> Result<Value>,
    {
        if !self.representation().map(|r| r.is_editable()).unwrap_or(false) {
            return Ok(());
        }
        let owner_value = Value::Object(owner.clone());
        let current = self.derive_direct(&owner_value, &Specifier::none()).unwrap_or(Value::Null);
        let value = convert(self, &current)?;
        let declared = self.tree.model.value_type(self.element).unwrap_or(ValueType::Any);
        if !declared.admits(&value) {
            return Err(AutobindError::Conversion(format!(
                "'{}' expects {}, got {}",
                self.name,
                declared,
                value.kind_name()
            )));
        }
        if self.is_writable() {
            self.assign(owner, value)
        } else {
            if !same_value(&value, &current) {
                debug!(member = %self.name, "read-only member not restored");
            }
            Ok(())
        }
    }

    // ------------- preferences -------------
    /// The preference node of this context, if it has one. Contexts inside
    /// collections and actions have none; inner wrappers share their parent's.
    pub fn preferences(&self) -> Option<Preferences> {
        self.prefs.get_or_init(|| self.derive_preferences()).clone()
    }

    fn derive_preferences(&self) -> Option<Preferences> {
        if self.in_collection() {
            return None;
        }
        match self.role {
            Role::Root => Some(self.store_root().child(DEFAULT_NODE)),
            Role::Inner => self.parent()?.preferences(),
            Role::Member => match self.type_element() {
                TypeElement::Property(p) => self.parent()?.preferences().map(|prefs| prefs.child(&p.name)),
                _ => None,
            },
            Role::Element => None,
        }
    }

    /// The store node of the bound type, `/<package>/<Name>`.
    pub fn store_root(&self) -> Preferences {
        Preferences::new(self.tree.services.store(), &self.tree.store_path)
    }

    pub(crate) fn prefs_lock(&self) -> &ReentrantLock {
        &self.tree.prefs_lock
    }

    fn history(&self) -> Result<Option<HistoryValues>> {
        let Some(prefs) = self.preferences() else { return Ok(None) };
        let config = self.tree.services.config();
        HistoryValues::load(&prefs, config.history_capacity, config.history_renumber_factor).map(Some)
    }

    /// Records `value` in this context's history. Oversized values are
    /// skipped with a warning.
    pub fn record_history(&self, value: &Value) -> Result<()> {
        let Some(repr) = self.representation() else { return Ok(()) };
        if !repr.supports_history() {
            return Ok(());
        }
        let json = serde_json::to_string(&repr.leaf_to_json(value))?;
        let _guard = self.tree.prefs_lock.lock();
        let Some(mut history) = self.history()? else { return Ok(()) };
        match history.add(&json) {
            Err(AutobindError::ValueTooLarge { length, limit }) => {
                warn!(context = %self.name, length, limit, value = %truncated(&json, 100), "value too large for history");
                Ok(())
            }
            other => other,
        }
    }

    /// History entries, newest first.
    pub fn history_values(&self) -> Result<Vec<HistoryValueEntry>> {
        let _guard = self.tree.prefs_lock.lock();
        Ok(self.history()?.map(|h| h.newest_first()).unwrap_or_default())
    }

    /// Decodes a history entry with this context's representation.
    pub fn history_value(&self, entry: &HistoryValueEntry) -> Value {
        let json: Json = serde_json::from_str(&entry.value).unwrap_or(Json::Null);
        match self.representation() {
            Some(repr) if repr.is_leaf() => repr.leaf_from_json(&json),
            _ => Value::Null,
        }
    }

    // ------------- shutdown -------------
    /// Tears the subtree down: children first, then closable values owned
    /// here are closed. At the root the runner lease and the delay queue are
    /// released.
    pub fn shutdown(&self) {
        for child in self.children() {
            child.shutdown();
        }
        let owns_value = matches!(self.role, Role::Root | Role::Member) && !self.in_collection();
        if owns_value {
            if let SourceValue::Present(Value::Object(object)) = self.cached() {
                if object.is_closable() || self.declared_closable() {
                    if let Err(e) = object.close() {
                        self.report(&e);
                    }
                }
            }
        }
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.clear();
        }
        if self.is_root() && !self.tree.shut_down.swap(true, Ordering::SeqCst) {
            if let Some(runner) = self.runner.get() {
                runner.shutdown();
            }
            self.tree.services.delay_queue().release();
            debug!(tree = self.tree.id, "tree shut down");
        }
    }

    fn declared_closable(&self) -> bool {
        match self.tree.model.get(self.tree.model.resolved(self.element)) {
            TypeElement::Object(object) => object.closable,
            _ => false,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.tree.shut_down.load(Ordering::SeqCst)
    }
}

fn read_property(owner: &ObjectRef, property: &PropertyType) -> Result<Value> {
    match &property.getter {
        Some(getter) => owner.invoke(getter, Vec::new()),
        None => owner.get_field(&property.name),
    }
}

fn reuse_list(target: &Value, values: Vec<Value>) -> Result<Value> {
    match target {
        Value::List(list) => {
            list.replace_all(values)?;
            Ok(Value::List(list.clone()))
        }
        _ => Ok(Value::List(ListRef::new(values))),
    }
}

fn store_path_for(model: &TypeModel, element: ElementId) -> String {
    let name = model.get(model.resolved(element)).name();
    match model.class(&name) {
        Some(schema) if !schema.package_path().is_empty() => {
            format!("/{}/{}", schema.package_path(), schema.simple_name())
        }
        Some(schema) => format!("/{}", schema.simple_name()),
        None => format!("/{}", name.replace('/', "_")),
    }
}

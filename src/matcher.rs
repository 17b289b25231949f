//! Matching representations to contexts.
//!
//! Rules are tried in a fixed order and the first one that accepts a
//! context claims it. Composite rules build candidate children, match each
//! of them and keep only the ones that matched.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::construct::{ElementId, TypeElement, TypeModel};
use crate::context::{BindingContext, Role};
use crate::repr::{NumberKind, Representation};
use crate::schema::ValueType;

type Rule = fn(&Arc<BindingContext>) -> Option<Representation>;

/// Precedence order. Leaf kinds come before the property pane so that a
/// property holding a plain value is represented directly.
const RULES: &[(&str, Rule)] = &[
    ("boolean", match_boolean),
    ("enum", match_enum),
    ("number", match_number),
    ("path", match_path),
    ("string", match_string),
    ("collection-table", match_collection),
    ("object-pane", match_object),
    ("property-pane", match_property_pane),
    ("action", match_action),
    ("action-list", match_action_list),
    ("label", match_label),
];

/// Claims `ctx` with the first matching rule. Matching an already claimed
/// context changes nothing and reports success.
pub fn match_context(ctx: &Arc<BindingContext>) -> bool {
    if ctx.representation().is_some() {
        return true;
    }
    if rejected_by_guard(ctx) {
        trace!(context = %ctx.name(), "recursive type, not expanded");
        return false;
    }
    if ctx.role() == Role::Element {
        return match_element(ctx);
    }
    for (rule, test) in RULES {
        if let Some(representation) = test(ctx) {
            if ctx.claim(representation) {
                debug!(context = %ctx.name(), rule = *rule, "claimed");
            }
            return true;
        }
    }
    false
}

/// Rejects an object-typed context whose type already appears among its
/// ancestors up to the nearest element wrapper, and an element wrapper
/// nested in another wrapper of the same element type.
fn rejected_by_guard(ctx: &Arc<BindingContext>) -> bool {
    let model = ctx.model();
    match ctx.role() {
        Role::Root => false,
        Role::Element => ctx
            .ancestors()
            .iter()
            .any(|a| a.role() == Role::Element && a.element() == ctx.element()),
        Role::Member | Role::Inner => {
            let resolved = model.resolved(ctx.element());
            if !matches!(model.get(resolved), TypeElement::Object(_)) {
                return false;
            }
            for ancestor in ctx.ancestors() {
                if ancestor.role() == Role::Element {
                    break;
                }
                if ancestor.element() == resolved {
                    return true;
                }
            }
            false
        }
    }
}

fn value_kind(model: &TypeModel, element: ElementId) -> Option<&ValueType> {
    match model.get(element) {
        TypeElement::Property(p) => Some(&p.value_type),
        TypeElement::Value(v) => Some(&v.kind),
        _ => None,
    }
}

fn match_boolean(ctx: &Arc<BindingContext>) -> Option<Representation> {
    match value_kind(ctx.model(), ctx.element())? {
        ValueType::Bool => Some(Representation::Boolean),
        _ => None,
    }
}

fn match_enum(ctx: &Arc<BindingContext>) -> Option<Representation> {
    match value_kind(ctx.model(), ctx.element())? {
        ValueType::Enum(name) => ctx.model().enum_spec(name).map(Representation::Enum),
        _ => None,
    }
}

fn match_number(ctx: &Arc<BindingContext>) -> Option<Representation> {
    let kind = match value_kind(ctx.model(), ctx.element())? {
        ValueType::Int => NumberKind::Int,
        ValueType::BigInt => NumberKind::BigInt,
        ValueType::Float => NumberKind::Float,
        ValueType::Decimal => NumberKind::Decimal,
        _ => return None,
    };
    Some(Representation::Number(kind))
}

fn match_path(ctx: &Arc<BindingContext>) -> Option<Representation> {
    match value_kind(ctx.model(), ctx.element())? {
        ValueType::Path => Some(Representation::Path),
        _ => None,
    }
}

fn match_string(ctx: &Arc<BindingContext>) -> Option<Representation> {
    match value_kind(ctx.model(), ctx.element())? {
        ValueType::Str => Some(Representation::Str),
        _ => None,
    }
}

/// Collections always get an element wrapper; the element's own
/// representation lives under it. A table whose element was rejected stays
/// without columns.
fn match_collection(ctx: &Arc<BindingContext>) -> Option<Representation> {
    let model = ctx.model();
    let TypeElement::Collection(collection) = model.get(model.resolved(ctx.element())) else {
        return None;
    };
    let element = BindingContext::candidate(ctx, collection.element, Role::Element);
    if match_context(&element) {
        ctx.attach(element);
    }
    Some(Representation::CollectionTable)
}

fn match_element(ctx: &Arc<BindingContext>) -> bool {
    let inner = BindingContext::candidate(ctx, ctx.element(), Role::Inner);
    if !match_context(&inner) {
        return false;
    }
    ctx.attach(inner);
    ctx.claim(Representation::CollectionElement);
    true
}

/// Objects become tabbed panes when at least two members are themselves
/// objects or collections.
fn match_object(ctx: &Arc<BindingContext>) -> Option<Representation> {
    let model = ctx.model();
    let TypeElement::Object(object) = model.get(ctx.element()) else {
        return None;
    };
    let mut nested = 0;
    for member in object.properties.iter().chain(object.actions.iter()) {
        let child = BindingContext::candidate(ctx, *member, Role::Member);
        if match_context(&child) {
            if matches!(
                child.representation(),
                Some(Representation::PropertyPane | Representation::CollectionTable)
            ) {
                nested += 1;
            }
            ctx.attach(child);
        }
    }
    if nested >= 2 {
        Some(Representation::TabbedPane)
    } else {
        Some(Representation::ObjectPane)
    }
}

fn match_property_pane(ctx: &Arc<BindingContext>) -> Option<Representation> {
    let model = ctx.model();
    if ctx.role() != Role::Member {
        return None;
    }
    let TypeElement::Property(property) = model.get(ctx.element()) else {
        return None;
    };
    if !matches!(model.get(property.value), TypeElement::Object(_)) {
        return None;
    }
    let inner = BindingContext::candidate(ctx, property.value, Role::Inner);
    if !match_context(&inner) {
        return None;
    }
    ctx.attach(inner);
    Some(Representation::PropertyPane)
}

fn match_action(ctx: &Arc<BindingContext>) -> Option<Representation> {
    match ctx.model().get(ctx.element()) {
        TypeElement::Action(a) if a.list_element.is_none() => Some(Representation::Action),
        _ => None,
    }
}

fn match_action_list(ctx: &Arc<BindingContext>) -> Option<Representation> {
    match ctx.model().get(ctx.element()) {
        TypeElement::Action(a) if a.list_element.is_some() => Some(Representation::ActionList),
        _ => None,
    }
}

fn match_label(ctx: &Arc<BindingContext>) -> Option<Representation> {
    value_kind(ctx.model(), ctx.element()).map(|_| Representation::Label)
}

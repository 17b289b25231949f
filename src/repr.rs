//! Representations: the semantic role a context plays.
//!
//! The set is closed. Leaf kinds convert their own values; composite kinds
//! (panes, tables, element wrappers) delegate per child and are converted by
//! [`crate::context::BindingContext`] which knows the children.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, FromPrimitive};
use serde_json::Value as Json;
use tracing::debug;

use crate::error::{AutobindError, Result};
use crate::schema::EnumSpec;
use crate::value::{EnumValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Int,
    BigInt,
    Float,
    Decimal,
}

#[derive(Debug, Clone)]
pub enum Representation {
    Boolean,
    Enum(Arc<EnumSpec>),
    Number(NumberKind),
    Path,
    Str,
    Label,
    ObjectPane,
    TabbedPane,
    PropertyPane,
    CollectionTable,
    CollectionElement,
    Action,
    ActionList,
}

impl PartialEq for Representation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Representation::Enum(a), Representation::Enum(b)) => a.name == b.name,
            (Representation::Number(a), Representation::Number(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Representation::Enum(spec) => write!(f, "enum {}", spec.name),
            Representation::Number(kind) => write!(f, "number {:?}", kind),
            other => write!(f, "{}", other.kind_name()),
        }
    }
}

fn bad(expected: &str, got: &Value) -> AutobindError {
    AutobindError::Conversion(format!("expected {}, got {}", expected, got.kind_name()))
}

impl Representation {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Representation::Boolean => "boolean",
            Representation::Enum(_) => "enum",
            Representation::Number(_) => "number",
            Representation::Path => "path",
            Representation::Str => "string",
            Representation::Label => "label",
            Representation::ObjectPane => "object-pane",
            Representation::TabbedPane => "tabbed-pane",
            Representation::PropertyPane => "property-pane",
            Representation::CollectionTable => "collection-table",
            Representation::CollectionElement => "collection-element",
            Representation::Action => "action",
            Representation::ActionList => "action-list",
        }
    }

    /// Boolean, enum, number, path and string: values the representation
    /// converts on its own.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Representation::Boolean
                | Representation::Enum(_)
                | Representation::Number(_)
                | Representation::Path
                | Representation::Str
                | Representation::Label
        )
    }

    pub fn is_action(&self) -> bool {
        matches!(self, Representation::Action | Representation::ActionList)
    }

    pub fn is_object_pane(&self) -> bool {
        matches!(self, Representation::ObjectPane | Representation::TabbedPane)
    }

    pub fn supports_history(&self) -> bool {
        self.is_leaf() && !matches!(self, Representation::Label)
    }

    pub fn is_editable(&self) -> bool {
        !matches!(self, Representation::Label) && !self.is_action()
    }

    /// Whether a refresh scan continues into the children of this context.
    /// Table rows are fetched on demand, so their templates are never scanned.
    pub fn continue_to_children(&self) -> bool {
        !matches!(self, Representation::CollectionTable)
    }

    // ------------- source values -------------
    /// Checks and normalises a value coming from user code or from an editor.
    /// `Null` is always accepted.
    pub fn from_source(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            Representation::Boolean => match value {
                Value::Bool(_) => Ok(value),
                other => Err(bad("bool", &other)),
            },
            Representation::Enum(spec) => match value {
                Value::Enum(e) if e.type_name == spec.name && spec.contains(&e.variant) => Ok(Value::Enum(e)),
                Value::Str(s) if spec.contains(&s) => Ok(Value::Enum(EnumValue::new(spec.name.clone(), s))),
                other => Err(bad(&format!("a variant of {}", spec.name), &other)),
            },
            Representation::Number(kind) => number_from_source(*kind, value),
            Representation::Path => match value {
                Value::Path(_) => Ok(value),
                Value::Str(s) => Ok(Value::Path(PathBuf::from(s))),
                other => Err(bad("path", &other)),
            },
            Representation::Str => match value {
                Value::Str(_) => Ok(value),
                other => Err(bad("string", &other)),
            },
            Representation::CollectionTable => match value {
                Value::List(_) => Ok(value),
                other => Err(bad("list", &other)),
            },
            Representation::ObjectPane | Representation::TabbedPane | Representation::PropertyPane => match value {
                Value::Object(_) => Ok(value),
                other => Err(bad("object", &other)),
            },
            _ => Ok(value),
        }
    }

    /// The raw value handed to user code. Values are stored normalised, so
    /// this is the identity apart from dropping enum variants that no longer
    /// exist.
    pub fn to_source(&self, value: &Value) -> Value {
        match (self, value) {
            (Representation::Enum(spec), Value::Enum(e)) if !spec.contains(&e.variant) => Value::Null,
            _ => value.clone(),
        }
    }

    // ------------- JSON -------------
    /// JSON for leaf kinds. Big integers and decimals are written as strings
    /// so no precision is lost, as are non-finite floats.
    pub fn leaf_to_json(&self, value: &Value) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::BigInt(i) => Json::String(i.to_string()),
            Value::Float(x) => match serde_json::Number::from_f64(*x) {
                Some(n) => Json::Number(n),
                // NaN and the infinities have no JSON number form
                None => Json::String(x.to_string()),
            },
            Value::Decimal(d) => Json::String(d.to_string()),
            Value::Str(s) => Json::String(s.clone()),
            Value::Path(p) => Json::String(p.to_string_lossy().into_owned()),
            Value::Enum(e) => Json::String(e.variant.clone()),
            other => Json::String(other.to_string()),
        }
    }

    /// Lenient: anything that does not fit yields `Null`.
    pub fn leaf_from_json(&self, json: &Json) -> Value {
        let parsed = match (self, json) {
            (_, Json::Null) => None,
            (Representation::Boolean, Json::Bool(b)) => Some(Value::Bool(*b)),
            (Representation::Enum(spec), Json::String(s)) if spec.contains(s) => {
                Some(Value::Enum(EnumValue::new(spec.name.clone(), s.clone())))
            }
            (Representation::Number(kind), Json::Number(n)) => number_from_json(*kind, n),
            (Representation::Number(_), Json::String(s)) => self.from_human_readable(s).ok(),
            (Representation::Path, Json::String(s)) => Some(Value::Path(PathBuf::from(s))),
            (Representation::Str | Representation::Label, Json::String(s)) => Some(Value::Str(s.clone())),
            _ => None,
        };
        parsed.unwrap_or_else(|| {
            debug!(representation = %self, json = %json, "JSON value not understood, using null");
            Value::Null
        })
    }

    // ------------- human readable -------------
    pub fn to_human_readable(&self, value: &Value) -> String {
        // tabs and newlines separate cells and rows
        value.to_string().replace(['\t', '\n', '\r'], " ")
    }

    pub fn from_human_readable(&self, text: &str) -> Result<Value> {
        let text = if matches!(self, Representation::Str) { text } else { text.trim() };
        if text.is_empty() && !matches!(self, Representation::Str) {
            return Ok(Value::Null);
        }
        let conversion = |what: &str| AutobindError::Conversion(format!("'{}' is not a valid {}", text, what));
        match self {
            Representation::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(conversion("boolean")),
            },
            Representation::Enum(spec) => {
                if spec.contains(text) {
                    Ok(Value::Enum(EnumValue::new(spec.name.clone(), text)))
                } else {
                    Err(conversion(&spec.name))
                }
            }
            Representation::Number(NumberKind::Int) => {
                text.parse::<i64>().map(Value::Int).map_err(|_| conversion("integer"))
            }
            Representation::Number(NumberKind::BigInt) => {
                BigInt::from_str(text).map(Value::BigInt).map_err(|_| conversion("integer"))
            }
            Representation::Number(NumberKind::Float) => {
                text.parse::<f64>().map(Value::Float).map_err(|_| conversion("number"))
            }
            Representation::Number(NumberKind::Decimal) => {
                BigDecimal::from_str(text).map(Value::Decimal).map_err(|_| conversion("decimal"))
            }
            Representation::Path => Ok(Value::Path(PathBuf::from(text))),
            Representation::Str | Representation::Label => Ok(Value::Str(text.to_string())),
            other => Err(AutobindError::Conversion(format!(
                "{} has no flat text form of its own",
                other.kind_name()
            ))),
        }
    }
}

fn number_from_source(kind: NumberKind, value: Value) -> Result<Value> {
    match (kind, value) {
        (NumberKind::Int, v @ Value::Int(_)) => Ok(v),
        (NumberKind::BigInt, v @ Value::BigInt(_)) => Ok(v),
        (NumberKind::BigInt, Value::Int(i)) => Ok(Value::BigInt(BigInt::from(i))),
        (NumberKind::Float, v @ Value::Float(_)) => Ok(v),
        (NumberKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (NumberKind::Decimal, v @ Value::Decimal(_)) => Ok(v),
        (NumberKind::Decimal, Value::Int(i)) => Ok(Value::Decimal(BigDecimal::from(i))),
        (NumberKind::Decimal, Value::Float(x)) => BigDecimal::from_f64(x)
            .map(Value::Decimal)
            .ok_or_else(|| AutobindError::Conversion(format!("{} has no decimal form", x))),
        (kind, other) => Err(bad(&format!("{:?}", kind).to_lowercase(), &other)),
    }
}

fn number_from_json(kind: NumberKind, n: &serde_json::Number) -> Option<Value> {
    match kind {
        NumberKind::Int => n.as_i64().map(Value::Int),
        NumberKind::BigInt => BigInt::from_str(&n.to_string()).ok().map(Value::BigInt),
        NumberKind::Float => n.as_f64().map(Value::Float),
        NumberKind::Decimal => BigDecimal::from_str(&n.to_string()).ok().map(Value::Decimal),
    }
}

/// Change test used by refresh. Floats compare bitwise so a NaN does not
/// count as a change on every scan.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits() || x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_floats_survive_json() {
        let repr = Representation::Number(NumberKind::Float);
        assert_eq!(repr.leaf_to_json(&Value::Float(f64::NAN)), Json::String("NaN".into()));
        match repr.leaf_from_json(&repr.leaf_to_json(&Value::Float(f64::NAN))) {
            Value::Float(x) => assert!(x.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
        for x in [f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            assert_eq!(repr.leaf_from_json(&repr.leaf_to_json(&Value::Float(x))), Value::Float(x));
        }
    }

    #[test]
    fn big_numbers_survive_json() {
        let repr = Representation::Number(NumberKind::Decimal);
        let d = BigDecimal::from_str("12345678901234567890.000000000000000001").unwrap();
        let json = repr.leaf_to_json(&Value::Decimal(d.clone()));
        assert_eq!(repr.leaf_from_json(&json), Value::Decimal(d));
    }

    #[test]
    fn malformed_json_is_null() {
        let repr = Representation::Number(NumberKind::Int);
        assert_eq!(repr.leaf_from_json(&Json::String("abc".into())), Value::Null);
        assert_eq!(Representation::Boolean.leaf_from_json(&Json::from(3)), Value::Null);
    }

    #[test]
    fn flat_text_parses_by_kind() {
        assert_eq!(Representation::Boolean.from_human_readable("TRUE").unwrap(), Value::Bool(true));
        assert_eq!(Representation::Number(NumberKind::Int).from_human_readable(" 42 ").unwrap(), Value::Int(42));
        assert_eq!(Representation::Number(NumberKind::Float).from_human_readable("").unwrap(), Value::Null);
        assert!(Representation::Number(NumberKind::Int).from_human_readable("x").is_err());
    }
}

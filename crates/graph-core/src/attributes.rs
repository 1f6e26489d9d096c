//! Typed attribute bag attached to every graph element.
//!
//! Each attribute name is bound to a single [`ValueType`] the first time it is
//! set. The binding outlives `remove`, so an element can never observe the
//! same name holding values of two different types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::types::ElementId;

/// A single attribute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Reference(ElementId),
}

impl Value {
    /// False only for NaN or infinite numbers.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Number(n) => n.is_finite(),
            _ => true,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Number(_) => ValueType::Number,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Date(_) => ValueType::Date,
            Value::Reference(_) => ValueType::Reference,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ElementId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Reference(id) => write!(f, "->{id}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<ElementId> for Value {
    fn from(id: ElementId) -> Self {
        Value::Reference(id)
    }
}

/// The type an attribute name is bound to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Date,
    Reference,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::Reference => "reference",
        };
        f.write_str(name)
    }
}

/// Name → value mapping with sticky type bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttributeStore {
    values: BTreeMap<String, Value>,
    bindings: BTreeMap<String, ValueType>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, binding the name's type on first use.
    ///
    /// NaN and infinities are rejected: they have no JSON form and would make
    /// a persisted store unreadable.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if !value.is_finite() {
            return Err(GraphError::NonFiniteNumber {
                name: name.to_string(),
            });
        }
        let attempted = value.value_type();
        match self.bindings.get(name) {
            Some(&bound) if bound != attempted => {
                return Err(GraphError::TypeMismatch {
                    name: name.to_string(),
                    bound,
                    attempted,
                });
            }
            Some(_) => {}
            None => {
                self.bindings.insert(name.to_string(), attempted);
            }
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Remove the current value. The type binding is kept.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn bound_type(&self, name: &str) -> Option<ValueType> {
        self.bindings.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

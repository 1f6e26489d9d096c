//! Read predicates shared by the engine, the query façade and staged overlays.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::attributes::Value;
use crate::types::{Element, ElementId, ElementKind};

/// Filter over committed (or staged) elements. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadPredicate {
    pub kind: Option<ElementKind>,
    pub type_tag: Option<String>,
    /// All of these groups must be present on the element.
    pub groups: BTreeSet<String>,
    /// Attribute equality constraints. No coercion between value types.
    pub attributes: Vec<(String, Value)>,
    /// Relationship/action with this entity among its subjects.
    pub subject: Option<ElementId>,
    /// Relationship/action with this entity among its objects.
    pub object: Option<ElementId>,
    /// Relationship/action referencing this entity on either side.
    pub references: Option<ElementId>,
}

impl ReadPredicate {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn entities() -> Self {
        Self::any().kind(ElementKind::Entity)
    }

    pub fn relationships() -> Self {
        Self::any().kind(ElementKind::Relationship)
    }

    pub fn actions() -> Self {
        Self::any().kind(ElementKind::Action)
    }

    pub fn kind(mut self, kind: ElementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn of_type(mut self, type_tag: &str) -> Self {
        self.type_tag = Some(type_tag.to_string());
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.groups.insert(group.to_string());
        self
    }

    /// Attribute equality. A NaN or infinite number matches nothing, since
    /// stored attributes can never hold one.
    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.push((name.to_string(), value.into()));
        self
    }

    pub fn from_subject(mut self, id: ElementId) -> Self {
        self.subject = Some(id);
        self
    }

    pub fn to_object(mut self, id: ElementId) -> Self {
        self.object = Some(id);
        self
    }

    pub fn referencing(mut self, id: ElementId) -> Self {
        self.references = Some(id);
        self
    }

    pub fn matches(&self, element: &Element) -> bool {
        if let Some(kind) = self.kind {
            if element.kind() != kind {
                return false;
            }
        }
        if let Some(tag) = &self.type_tag {
            if element.type_tag() != tag {
                return false;
            }
        }
        if !self.groups.is_subset(element.groups()) {
            return false;
        }
        for (name, expected) in &self.attributes {
            if !expected.is_finite() || element.attributes().get(name) != Some(expected) {
                return false;
            }
        }
        if let Some(id) = self.subject {
            if !element.has_subject(id) {
                return false;
            }
        }
        if let Some(id) = self.object {
            if !element.has_object(id) {
                return false;
            }
        }
        if let Some(id) = self.references {
            if !element.references_entity(id) {
                return false;
            }
        }
        true
    }
}

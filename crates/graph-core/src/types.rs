//! Core element types for the object graph.
//!
//! Entities are nodes, relationships are directed edges between exactly two
//! entities, and actions are timestamped many-to-many event records. All
//! three share identity, a type tag, group tags and an [`AttributeStore`].

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::AttributeStore;
use crate::error::{GraphError, Result};

// ── Identity ──────────────────────────────────────────────────────

/// Unique identifier for any element in the graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of the three element shapes an element has.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Entity,
    Relationship,
    Action,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Entity => "entity",
            ElementKind::Relationship => "relationship",
            ElementKind::Action => "action",
        };
        f.write_str(name)
    }
}

fn check_type_tag(type_tag: &str) -> Result<String> {
    if type_tag.trim().is_empty() {
        return Err(GraphError::InvalidTypeTag);
    }
    Ok(type_tag.to_string())
}

// ── Element Types ─────────────────────────────────────────────────

/// A typed node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: ElementId,
    pub type_tag: String,
    pub groups: BTreeSet<String>,
    pub attributes: AttributeStore,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(type_tag: &str) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: ElementId::new(),
            type_tag: check_type_tag(type_tag)?,
            groups: BTreeSet::new(),
            attributes: AttributeStore::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

/// A typed directed edge from `subject` to `object`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: ElementId,
    pub type_tag: String,
    pub subject: ElementId,
    pub object: ElementId,
    pub groups: BTreeSet<String>,
    pub attributes: AttributeStore,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(type_tag: &str, subject: ElementId, object: ElementId) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: ElementId::new(),
            type_tag: check_type_tag(type_tag)?,
            subject,
            object,
            groups: BTreeSet::new(),
            attributes: AttributeStore::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

/// A timestamped event linking subject entities to object entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: ElementId,
    pub type_tag: String,
    pub subjects: Vec<ElementId>,
    pub objects: Vec<ElementId>,
    /// When the event happened, as opposed to when it was stored.
    pub timestamp: DateTime<Utc>,
    pub groups: BTreeSet<String>,
    pub attributes: AttributeStore,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(
        type_tag: &str,
        subjects: Vec<ElementId>,
        objects: Vec<ElementId>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let type_tag = check_type_tag(type_tag)?;
        if subjects.is_empty() || objects.is_empty() {
            return Err(GraphError::InvalidEndpoints {
                kind: ElementKind::Action.to_string(),
                reason: "an action needs at least one subject and one object".to_string(),
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: ElementId::new(),
            type_tag,
            subjects: dedup(subjects),
            objects: dedup(objects),
            timestamp,
            groups: BTreeSet::new(),
            attributes: AttributeStore::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

fn dedup(ids: Vec<ElementId>) -> Vec<ElementId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Enum wrapper for all element shapes in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    Entity(Entity),
    Relationship(Relationship),
    Action(Action),
}

impl Element {
    pub fn id(&self) -> ElementId {
        match self {
            Element::Entity(e) => e.id,
            Element::Relationship(r) => r.id,
            Element::Action(a) => a.id,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Entity(_) => ElementKind::Entity,
            Element::Relationship(_) => ElementKind::Relationship,
            Element::Action(_) => ElementKind::Action,
        }
    }

    pub fn type_tag(&self) -> &str {
        match self {
            Element::Entity(e) => &e.type_tag,
            Element::Relationship(r) => &r.type_tag,
            Element::Action(a) => &a.type_tag,
        }
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        match self {
            Element::Entity(e) => &e.groups,
            Element::Relationship(r) => &r.groups,
            Element::Action(a) => &a.groups,
        }
    }

    pub fn groups_mut(&mut self) -> &mut BTreeSet<String> {
        match self {
            Element::Entity(e) => &mut e.groups,
            Element::Relationship(r) => &mut r.groups,
            Element::Action(a) => &mut a.groups,
        }
    }

    pub fn attributes(&self) -> &AttributeStore {
        match self {
            Element::Entity(e) => &e.attributes,
            Element::Relationship(r) => &r.attributes,
            Element::Action(a) => &a.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeStore {
        match self {
            Element::Entity(e) => &mut e.attributes,
            Element::Relationship(r) => &mut r.attributes,
            Element::Action(a) => &mut a.attributes,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Element::Entity(e) => e.created_at,
            Element::Relationship(r) => r.created_at,
            Element::Action(a) => a.created_at,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Element::Entity(e) => e.updated_at,
            Element::Relationship(r) => r.updated_at,
            Element::Action(a) => a.updated_at,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        match self {
            Element::Entity(e) => e.updated_at = at,
            Element::Relationship(r) => r.updated_at = at,
            Element::Action(a) => a.updated_at = at,
        }
    }

    /// Entities this element points at. Empty for entities.
    pub fn references(&self) -> Vec<ElementId> {
        match self {
            Element::Entity(_) => Vec::new(),
            Element::Relationship(r) => vec![r.subject, r.object],
            Element::Action(a) => a.subjects.iter().chain(&a.objects).copied().collect(),
        }
    }

    pub fn references_entity(&self, id: ElementId) -> bool {
        match self {
            Element::Entity(_) => false,
            Element::Relationship(r) => r.subject == id || r.object == id,
            Element::Action(a) => a.subjects.contains(&id) || a.objects.contains(&id),
        }
    }

    pub fn has_subject(&self, id: ElementId) -> bool {
        match self {
            Element::Entity(_) => false,
            Element::Relationship(r) => r.subject == id,
            Element::Action(a) => a.subjects.contains(&id),
        }
    }

    pub fn has_object(&self, id: ElementId) -> bool {
        match self {
            Element::Entity(_) => false,
            Element::Relationship(r) => r.object == id,
            Element::Action(a) => a.objects.contains(&id),
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Element::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Element::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Element::Action(a) => Some(a),
            _ => None,
        }
    }
}

impl From<Entity> for Element {
    fn from(e: Entity) -> Self {
        Element::Entity(e)
    }
}

impl From<Relationship> for Element {
    fn from(r: Relationship) -> Self {
        Element::Relationship(r)
    }
}

impl From<Action> for Element {
    fn from(a: Action) -> Self {
        Element::Action(a)
    }
}

// ── Operations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One write against the persistence engine, carrying the full snapshot.
///
/// For deletes the snapshot is the last committed state of the element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub element: Element,
}

impl Operation {
    pub fn insert(element: Element) -> Self {
        Self {
            kind: OperationKind::Insert,
            element,
        }
    }

    pub fn update(element: Element) -> Self {
        Self {
            kind: OperationKind::Update,
            element,
        }
    }

    pub fn delete(element: Element) -> Self {
        Self {
            kind: OperationKind::Delete,
            element,
        }
    }
}

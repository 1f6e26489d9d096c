//! Staged element state held by a graph context.

use std::collections::HashMap;

use graph_core::{Element, ElementId, ElementKind, Operation};

/// Where a staged element came from.
#[derive(Debug, Clone)]
pub(crate) enum Origin {
    /// Created in this context; not yet in the engine.
    New,
    /// Loaded from the engine; holds the committed snapshot.
    Existing(Element),
}

#[derive(Debug, Clone)]
pub(crate) struct Staged {
    /// Staging order, used to keep operation order stable.
    pub seq: u64,
    pub origin: Origin,
    pub current: Element,
    pub dirty: bool,
    pub deleted: bool,
}

impl Staged {
    pub fn is_new(&self) -> bool {
        matches!(self.origin, Origin::New)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Staging {
    pub elements: HashMap<ElementId, Staged>,
    next_seq: u64,
}

impl Staging {
    pub fn stage_new(&mut self, element: Element) -> ElementId {
        let id = element.id();
        let seq = self.bump();
        self.elements.insert(
            id,
            Staged {
                seq,
                origin: Origin::New,
                current: element,
                dirty: true,
                deleted: false,
            },
        );
        id
    }

    pub fn stage_existing(&mut self, element: Element) {
        let seq = self.bump();
        self.elements.insert(
            element.id(),
            Staged {
                seq,
                origin: Origin::Existing(element.clone()),
                current: element,
                dirty: false,
                deleted: false,
            },
        );
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// The ordered operation list a commit would apply:
    /// dependent deletes, entity deletes, entity inserts, updates, dependent inserts.
    pub fn operations(&self) -> Vec<Operation> {
        let mut staged: Vec<&Staged> = self.elements.values().collect();
        staged.sort_by_key(|s| s.seq);

        let mut dependent_deletes = Vec::new();
        let mut entity_deletes = Vec::new();
        let mut entity_inserts = Vec::new();
        let mut updates = Vec::new();
        let mut dependent_inserts = Vec::new();

        for s in staged {
            let is_entity = s.current.kind() == ElementKind::Entity;
            match (&s.origin, s.deleted) {
                (Origin::Existing(committed), true) => {
                    let op = Operation::delete(committed.clone());
                    if is_entity {
                        entity_deletes.push(op);
                    } else {
                        dependent_deletes.push(op);
                    }
                }
                (Origin::Existing(_), false) if s.dirty => {
                    updates.push(Operation::update(s.current.clone()));
                }
                (Origin::Existing(_), false) => {}
                (Origin::New, true) => {}
                (Origin::New, false) => {
                    let op = Operation::insert(s.current.clone());
                    if is_entity {
                        entity_inserts.push(op);
                    } else {
                        dependent_inserts.push(op);
                    }
                }
            }
        }

        dependent_deletes
            .into_iter()
            .chain(entity_deletes)
            .chain(entity_inserts)
            .chain(updates)
            .chain(dependent_inserts)
            .collect()
    }
}

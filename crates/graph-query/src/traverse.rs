//! Breadth-first traversal over relationships.

use std::collections::{HashSet, VecDeque};

use graph_core::{Element, ElementId, ElementKind, GraphError, ReadPredicate, Result};
use graph_engine::Engine;

/// Which relationship endpoints to follow from the current entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Subject to object.
    #[default]
    Outgoing,
    /// Object to subject.
    Incoming,
    Both,
}

/// Traversal parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traversal {
    /// Only follow relationships with this type tag.
    pub relationship_type: Option<String>,
    pub direction: Direction,
    /// Maximum hops from the start. `None` uses the configured cap.
    pub max_depth: Option<usize>,
}

impl Traversal {
    pub fn outgoing() -> Self {
        Self::default()
    }

    pub fn incoming() -> Self {
        Self {
            direction: Direction::Incoming,
            ..Self::default()
        }
    }

    pub fn both() -> Self {
        Self {
            direction: Direction::Both,
            ..Self::default()
        }
    }

    pub fn of_type(mut self, relationship_type: &str) -> Self {
        self.relationship_type = Some(relationship_type.to_string());
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    fn edges(&self, from: ElementId, outgoing: bool) -> ReadPredicate {
        let mut predicate = ReadPredicate::relationships();
        if let Some(tag) = &self.relationship_type {
            predicate = predicate.of_type(tag);
        }
        if outgoing {
            predicate.from_subject(from)
        } else {
            predicate.to_object(from)
        }
    }
}

/// An entity reached by a traversal.
#[derive(Debug, Clone)]
pub struct Reached {
    pub entity: Element,
    /// Hops from the start entity; the start itself is at depth 0.
    pub depth: usize,
    /// The relationship followed to get here. `None` for the start.
    pub via: Option<ElementId>,
}

/// Walk relationships from `start`, visiting each entity at most once.
///
/// Results are in breadth-first order starting with `start`.
///
/// There is no adjacency index. Each entity expanded costs one
/// [`Engine::read`] per followed direction, and on [`MemoryEngine`] a read is
/// a scan of every stored element, so a walk is roughly
/// `expanded entities x store size`.
///
/// [`MemoryEngine`]: graph_engine::MemoryEngine
pub(crate) fn traverse(
    engine: &dyn Engine,
    start: ElementId,
    traversal: &Traversal,
    default_max_depth: usize,
) -> Result<Vec<Reached>> {
    let origin = engine.get(start)?.ok_or(GraphError::NotFound(start))?;
    if origin.kind() != ElementKind::Entity {
        return Err(GraphError::InvalidEndpoints {
            kind: "traversal".to_string(),
            reason: format!("start {start} is a {}, not an entity", origin.kind()),
        });
    }

    let max_depth = traversal.max_depth.unwrap_or(default_max_depth);
    let mut visited = HashSet::new();
    visited.insert(start);

    let mut reached = vec![Reached {
        entity: origin,
        depth: 0,
        via: None,
    }];
    let mut queue: VecDeque<(ElementId, usize)> = VecDeque::new();
    queue.push_back((start, 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }

        for (relationship, next) in neighbours(engine, current, traversal)? {
            if !visited.insert(next) {
                continue;
            }
            // Skip endpoints deleted out from under a concurrent read.
            let Some(entity) = engine.get(next)? else {
                continue;
            };
            reached.push(Reached {
                entity,
                depth: depth + 1,
                via: Some(relationship),
            });
            queue.push_back((next, depth + 1));
        }
    }

    tracing::debug!(
        start = %start,
        max_depth,
        reached = reached.len(),
        "Traversal complete"
    );
    Ok(reached)
}

/// `(relationship, neighbouring entity)` pairs one hop from `id`.
fn neighbours(
    engine: &dyn Engine,
    id: ElementId,
    traversal: &Traversal,
) -> Result<Vec<(ElementId, ElementId)>> {
    let mut out = Vec::new();
    let (outgoing, incoming) = match traversal.direction {
        Direction::Outgoing => (true, false),
        Direction::Incoming => (false, true),
        Direction::Both => (true, true),
    };

    if outgoing {
        for element in engine.read(&traversal.edges(id, true))? {
            if let Some(rel) = element.as_relationship() {
                out.push((rel.id, rel.object));
            }
        }
    }
    if incoming {
        for element in engine.read(&traversal.edges(id, false))? {
            if let Some(rel) = element.as_relationship() {
                out.push((rel.id, rel.subject));
            }
        }
    }
    Ok(out)
}

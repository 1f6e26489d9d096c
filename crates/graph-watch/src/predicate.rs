//! Subscription predicates over change records.

use std::collections::BTreeSet;

use graph_core::{ChangeRecord, ElementKind, OperationKind};

/// Matches change records by element kind, type tag, group tags and operation.
///
/// Empty sets match anything. `groups` requires every listed group to be
/// present on the changed element's snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchPredicate {
    pub kinds: BTreeSet<ElementKind>,
    pub type_tags: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub operations: BTreeSet<OperationKind>,
}

impl WatchPredicate {
    /// Matches every change.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, type_tag: &str) -> Self {
        self.type_tags.insert(type_tag.to_string());
        self
    }

    pub fn of_kind(mut self, kind: ElementKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.groups.insert(group.to_string());
        self
    }

    pub fn on(mut self, operation: OperationKind) -> Self {
        self.operations.insert(operation);
        self
    }

    pub fn matches(&self, change: &ChangeRecord) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&change.element_kind()) {
            return false;
        }
        if !self.type_tags.is_empty() && !self.type_tags.contains(change.type_tag()) {
            return false;
        }
        if !self.operations.is_empty() && !self.operations.contains(&change.operation) {
            return false;
        }
        self.groups.is_subset(change.snapshot.groups())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use graph_core::{CommitId, Element, Entity};

    fn change(tag: &str, groups: &[&str], operation: OperationKind) -> ChangeRecord {
        let mut entity = Entity::new(tag).unwrap();
        for g in groups {
            entity.groups.insert(g.to_string());
        }
        ChangeRecord {
            commit_id: CommitId::new(),
            sequence: 0,
            committed_at: Utc::now(),
            operation,
            snapshot: Element::Entity(entity),
        }
    }

    #[test]
    fn any_matches_everything() {
        assert!(WatchPredicate::any().matches(&change("Person", &[], OperationKind::Delete)));
    }

    #[test]
    fn type_filter() {
        let p = WatchPredicate::any().of_type("Person");
        assert!(p.matches(&change("Person", &[], OperationKind::Insert)));
        assert!(!p.matches(&change("Company", &[], OperationKind::Insert)));
    }

    #[test]
    fn multiple_types_are_alternatives() {
        let p = WatchPredicate::any().of_type("Person").of_type("Company");
        assert!(p.matches(&change("Company", &[], OperationKind::Insert)));
    }

    #[test]
    fn groups_must_all_be_present() {
        let p = WatchPredicate::any().in_group("vip").in_group("eu");
        assert!(p.matches(&change("Person", &["vip", "eu", "x"], OperationKind::Update)));
        assert!(!p.matches(&change("Person", &["vip"], OperationKind::Update)));
    }

    #[test]
    fn operation_and_kind_filters() {
        let p = WatchPredicate::any()
            .of_kind(ElementKind::Entity)
            .on(OperationKind::Delete);
        assert!(p.matches(&change("Person", &[], OperationKind::Delete)));
        assert!(!p.matches(&change("Person", &[], OperationKind::Insert)));

        let rel_only = WatchPredicate::any().of_kind(ElementKind::Relationship);
        assert!(!rel_only.matches(&change("Person", &[], OperationKind::Insert)));
    }
}
